//! Error types for the chat-completion client.

use thiserror::Error;

/// Result type for chat-client operations.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by [`crate::ChatClient`].
#[derive(Debug, Error)]
pub enum ChatError {
    /// Configuration error (missing API key, invalid settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response from the provider.
    #[error("chat provider returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Unexpected response shape (invalid JSON, missing fields).
    #[error("parse error: {0}")]
    Parse(String),
}
