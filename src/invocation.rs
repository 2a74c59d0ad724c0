//! Parsed slash-command invocations and the events handed to subscribers

use crate::command::{FormFields, ParsedCommand};
use crate::{ReplyChannel, ReplyPath, SlashMessage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// One verified, parsed slash-command call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Log correlation id
    pub id: Uuid,
    /// Command name without the leading slash
    pub command: String,
    /// Tokenized arguments
    pub args: Vec<String>,
    /// Every decoded form field
    pub fields: FormFields,
    /// When the request arrived
    pub received_at: DateTime<Utc>,
}

impl Invocation {
    /// Build from a parsed payload, stamping id and arrival time
    pub fn new(parsed: ParsedCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: parsed.command,
            args: parsed.args,
            fields: parsed.fields,
            received_at: Utc::now(),
        }
    }

    /// Fallback URL supplied by the caller
    pub fn response_url(&self) -> Option<&str> {
        self.fields.response_url()
    }
}

/// What a subscriber receives: the invocation plus its reply channel
#[derive(Debug, Clone)]
pub struct SlashEvent {
    invocation: Arc<Invocation>,
    reply: ReplyChannel,
}

impl SlashEvent {
    pub(crate) fn new(invocation: Arc<Invocation>, reply: ReplyChannel) -> Self {
        Self { invocation, reply }
    }

    /// Command name without the leading slash
    pub fn command(&self) -> &str {
        &self.invocation.command
    }

    /// Tokenized arguments
    pub fn args(&self) -> &[String] {
        &self.invocation.args
    }

    /// Every decoded form field
    pub fn fields(&self) -> &FormFields {
        &self.invocation.fields
    }

    /// The full invocation
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// The channel shared by every subscriber of this invocation
    pub fn reply_channel(&self) -> &ReplyChannel {
        &self.reply
    }

    /// Shorthand for `reply_channel().send(message)`
    pub fn reply(&self, message: impl Into<SlashMessage>) -> ReplyPath {
        self.reply.send(message)
    }
}
