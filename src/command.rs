//! Slash-command payload parsing

use crate::{Result, SlashError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// A quoted run (straight or curly quotes) or a bare whitespace-delimited word.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["“]([^"“”]+)["”]|([^\s"“”]+)"#).expect("token pattern is valid")
});

/// Decoded form fields.
///
/// Repeated keys keep every value in arrival order; [`FormFields::get`]
/// returns the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    values: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl FormFields {
    /// Decode an `application/x-www-form-urlencoded` body
    pub fn from_urlencoded(body: &[u8]) -> Result<Self> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)?;
        Ok(pairs.into_iter().collect())
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Every value for `key`, in arrival order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `key` was present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no fields were decoded
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate over keys (first-seen order) and their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.order
            .iter()
            .map(|k| (k.as_str(), self.get_all(k)))
    }

    /// The `response_url` field
    pub fn response_url(&self) -> Option<&str> {
        self.get("response_url")
    }

    /// Render as JSON: single values as strings, repeated keys as arrays
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    [single] => serde_json::Value::String(single.clone()),
                    many => serde_json::Value::from(many.to_vec()),
                };
                (k.to_string(), value)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, String)> for FormFields {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut fields = FormFields::default();
        for (key, value) in iter {
            match fields.values.get_mut(&key) {
                Some(existing) => existing.push(value),
                None => {
                    fields.order.push(key.clone());
                    fields.values.insert(key, vec![value]);
                }
            }
        }
        fields
    }
}

/// Result of parsing an inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name without the leading slash
    pub command: String,
    /// Tokenized `text`
    pub args: Vec<String>,
    /// Every decoded field
    pub fields: FormFields,
}

/// Parse a URL-encoded slash-command body.
///
/// Fails when the body cannot be decoded or `command` is missing or empty.
/// A missing `text` field yields no arguments.
pub fn parse(body: &[u8]) -> Result<ParsedCommand> {
    let fields = FormFields::from_urlencoded(body)?;

    let command = fields
        .get("command")
        .map(strip_slash)
        .filter(|c| !c.is_empty())
        .ok_or(SlashError::MissingField("command"))?
        .to_string();

    let args = tokenize(fields.get("text").unwrap_or_default());

    Ok(ParsedCommand {
        command,
        args,
        fields,
    })
}

/// Split `text` into arguments, keeping quoted runs together.
///
/// ```
/// use slashgate::command::tokenize;
///
/// assert_eq!(tokenize(r#"deploy "staging env" now"#), ["deploy", "staging env", "now"]);
/// assert!(tokenize("").is_empty());
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Split a full command line such as `/deploy "staging env" now` into the
/// command name and its arguments.
pub fn parse_command_line(line: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = tokenize(line).into_iter();
    let command = strip_slash(&tokens.next()?).to_string();
    if command.is_empty() {
        return None;
    }
    Some((command, tokens.collect()))
}

/// Strip one leading `/`
pub fn strip_slash(command: &str) -> &str {
    command.strip_prefix('/').unwrap_or(command)
}
