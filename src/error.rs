//! Error types for slash-command dispatch

use thiserror::Error;

/// Errors that can occur while configuring, serving, or replying to slash commands
#[derive(Error, Debug)]
pub enum SlashError {
    /// Configuration rejected at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error while serving
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body could not be decoded
    #[error("Failed to parse form data: {0}")]
    Parse(String),

    /// A required form field was absent or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// HTTP request to a response_url failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid response_url
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// response_url parsed but is not http(s)
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Message serialization failed
    #[error("Payload error: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for SlashError {
    fn from(err: serde_json::Error) -> Self {
        SlashError::Payload(err.to_string())
    }
}

impl From<serde_urlencoded::de::Error> for SlashError {
    fn from(err: serde_urlencoded::de::Error) -> Self {
        SlashError::Parse(err.to_string())
    }
}
