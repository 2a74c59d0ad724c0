//! Reply message types

use serde::{Deserialize, Serialize};

/// A reply to a slash command, delivered unmodified over whichever path is taken
#[derive(Debug, Clone, PartialEq)]
pub enum SlashMessage {
    /// Plain text
    Text(String),
    /// Structured payload with at least a `text` key
    Json(serde_json::Value),
}

impl SlashMessage {
    /// Content type and body for a direct HTTP reply
    pub fn http_body(&self) -> (&'static str, Vec<u8>) {
        match self {
            Self::Text(text) => ("text/plain; charset=utf-8", text.clone().into_bytes()),
            Self::Json(value) => ("application/json", value.to_string().into_bytes()),
        }
    }

    /// JSON body for a response_url delivery
    pub fn to_outbound_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::json!({ "text": text }),
            Self::Json(value) => value.clone(),
        }
    }
}

impl From<&str> for SlashMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for SlashMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for SlashMessage {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<ResponseMessage> for SlashMessage {
    fn from(message: ResponseMessage) -> Self {
        // Serializing a struct of strings, bools and Values cannot fail
        match serde_json::to_value(&message) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(message.text),
        }
    }
}

/// Visibility of a reply in the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Visible to everyone in the channel
    InChannel,
    /// Visible only to the invoking user
    Ephemeral,
}

/// Structured reply with optional formatting metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Message text
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,

    /// Block Kit layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,

    /// Replace the message that triggered the command (response_url only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_original: Option<bool>,

    /// Delete the message that triggered the command (response_url only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_original: Option<bool>,
}

impl ResponseMessage {
    /// Create a reply with the given text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response_type: None,
            blocks: None,
            attachments: None,
            replace_original: None,
            delete_original: None,
        }
    }

    /// Show the reply to the whole channel
    pub fn in_channel(mut self) -> Self {
        self.response_type = Some(ResponseType::InChannel);
        self
    }

    /// Show the reply only to the invoking user
    pub fn ephemeral(mut self) -> Self {
        self.response_type = Some(ResponseType::Ephemeral);
        self
    }

    /// Attach Block Kit blocks
    pub fn with_blocks(mut self, blocks: serde_json::Value) -> Self {
        self.blocks = Some(blocks);
        self
    }

    /// Attach legacy attachments
    pub fn with_attachments(mut self, attachments: serde_json::Value) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// Replace the original message
    pub fn replace_original(mut self, replace: bool) -> Self {
        self.replace_original = Some(replace);
        self
    }

    /// Delete the original message
    pub fn delete_original(mut self, delete: bool) -> Self {
        self.delete_original = Some(delete);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_http_body() {
        let (content_type, body) = SlashMessage::from("done").http_body();
        assert_eq!(content_type, "text/plain; charset=utf-8");
        assert_eq!(body, b"done");
    }

    #[test]
    fn test_text_outbound_wraps_in_text_field() {
        let message = SlashMessage::from("done".to_string());
        assert_eq!(message.to_outbound_json(), serde_json::json!({"text": "done"}));
    }

    #[test]
    fn test_json_forwarded_unmodified() {
        let value = serde_json::json!({"text": "hi", "mrkdwn": false});
        let message = SlashMessage::from(value.clone());

        assert_eq!(message.to_outbound_json(), value);
        let (content_type, body) = message.http_body();
        assert_eq!(content_type, "application/json");
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), value);
    }

    #[test]
    fn test_response_message_serialization() {
        let message: SlashMessage = ResponseMessage::new("Deployed")
            .in_channel()
            .replace_original(true)
            .into();

        assert_eq!(
            message.to_outbound_json(),
            serde_json::json!({
                "text": "Deployed",
                "response_type": "in_channel",
                "replace_original": true
            })
        );
    }

    #[test]
    fn test_ephemeral_with_blocks() {
        let blocks = serde_json::json!([{"type": "divider"}]);
        let message = ResponseMessage::new("x").ephemeral().with_blocks(blocks.clone());

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["response_type"], "ephemeral");
        assert_eq!(value["blocks"], blocks);
        assert!(value.get("attachments").is_none());
    }
}
