//! Pure chat-completion REST API client
//!
//! A clean, minimal client for an OpenAI-compatible chat-completions API with
//! no domain-specific logic: one request/response shape, function-calling
//! tool definitions, and nothing else. The calling crate owns the agent loop,
//! conversation-history model, and retry/checkpoint semantics.
//!
//! # Example
//!
//! ```rust,ignore
//! use chat_client::{ChatClient, CompletionRequest, user_message};
//!
//! let client = ChatClient::from_env()?;
//! let reply = client
//!     .complete(CompletionRequest::new("gpt-4o", vec![user_message("Hello!")]))
//!     .await?;
//! println!("{:?}", reply.content);
//! ```
//!
//! # Function calling
//!
//! ```rust,ignore
//! use chat_client::{ChatClient, CompletionRequest, Tool, user_message};
//!
//! let tools = vec![my_tool.definition()];
//! let reply = client
//!     .complete(CompletionRequest::new("gpt-4o", vec![user_message("Hello!")]).with_tools(tools))
//!     .await?;
//! if reply.has_tool_calls() {
//!     // dispatch reply.tool_calls through an ErasedTool registry
//! }
//! ```

pub mod error;
pub mod schema;
pub mod tool;
pub mod types;

pub use error::{ChatError, Result};
pub use schema::StructuredOutput;
pub use tool::{ErasedTool, Tool, ToolCall, ToolCallError, ToolDefinition};
pub use types::*;

use reqwest::Client;
use tracing::{debug, warn};

/// Pure chat-completion API client.
#[derive(Clone)]
pub struct ChatClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl ChatClient {
    /// Create a new client with the given API key, pointed at the OpenAI API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from the `CHAT_PROVIDER_API_KEY` environment variable, optionally
    /// overriding the base URL from `CHAT_PROVIDER_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("CHAT_PROVIDER_API_KEY")
            .map_err(|_| ChatError::Config("CHAT_PROVIDER_API_KEY not set".into()))?;
        let mut client = Self::new(api_key);
        if let Ok(base_url) = std::env::var("CHAT_PROVIDER_BASE_URL") {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    /// Set a custom base URL (for Azure, proxies, self-hosted providers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one chat-completion call.
    ///
    /// Returns the assistant's message, including any tool calls it made.
    /// Callers drive the agent loop themselves: append the returned message
    /// (via [`CompletionMessage::raw`]) to history, dispatch tool calls, push
    /// tool results, and call this again.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionMessage> {
        let start = std::time::Instant::now();
        let model = request.model.clone();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request.to_json())
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "chat completion request failed");
                ChatError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "chat provider returned an error");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ChatError::Parse("no choices in chat completion response".into()))?;

        debug!(
            model = %model,
            duration_ms = start.elapsed().as_millis(),
            "chat completion"
        );

        Ok(CompletionMessage::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builder_sets_base_url() {
        let client = ChatClient::new("sk-test").with_base_url("https://custom.api.com");
        assert_eq!(client.api_key(), "sk-test");
        assert_eq!(client.base_url(), "https://custom.api.com");
    }

    #[test]
    fn from_env_requires_api_key() {
        std::env::remove_var("CHAT_PROVIDER_API_KEY");
        assert!(ChatClient::from_env().is_err());
    }
}
