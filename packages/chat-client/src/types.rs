//! Chat-completion request and response types.
//!
//! Messages that may carry tool calls are represented as raw
//! [`serde_json::Value`] rather than a typed enum: the wire format embeds
//! optional `tool_calls[]` and `tool_call_id` fields whose shape varies by
//! role, and callers that checkpoint a conversation (park/resume) need the
//! assistant's message back byte-for-byte. Callers that want a typed,
//! serializable conversation history build their own variant on top of
//! these helpers; this crate stays a thin, honest wrapper around the wire
//! protocol.

use serde::{Deserialize, Serialize};

use crate::tool::ToolDefinition;

/// Build a system-role message in wire format.
pub fn system_message(content: impl Into<String>) -> serde_json::Value {
    serde_json::json!({"role": "system", "content": content.into()})
}

/// Build a user-role message in wire format.
pub fn user_message(content: impl Into<String>) -> serde_json::Value {
    serde_json::json!({"role": "user", "content": content.into()})
}

/// Build a tool-result message in wire format.
pub fn tool_message(tool_call_id: impl Into<String>, content: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "role": "tool",
        "tool_call_id": tool_call_id.into(),
        "content": content.into()
    })
}

/// Whether the model should be free to choose not to call a tool.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// A chat-completion request with optional function-calling tools.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a request with no tools and `tool_choice: auto`.
    pub fn new(model: impl Into<String>, messages: Vec<serde_json::Value>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Render the full wire-format JSON body.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
        });

        if !self.tools.is_empty() {
            let tool_defs: Vec<serde_json::Value> =
                self.tools.iter().map(|t| t.to_openai_format()).collect();
            body["tools"] = serde_json::Value::Array(tool_defs);
            body["tool_choice"] = serde_json::json!(match self.tool_choice {
                ToolChoice::Auto => "auto",
                ToolChoice::None => "none",
            });
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }
}

/// The assistant's reply to a [`CompletionRequest`].
#[derive(Debug, Clone)]
pub struct CompletionMessage {
    /// The assistant message exactly as returned by the provider, suitable
    /// for appending verbatim to conversation history.
    pub raw: serde_json::Value,
    /// Text content, if any (may be empty when the reply is tool calls only).
    pub content: Option<String>,
    /// Raw `tool_calls[]` entries, if any.
    pub tool_calls: Vec<serde_json::Value>,
}

impl CompletionMessage {
    pub fn from_raw(raw: serde_json::Value) -> Self {
        let content = raw
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let tool_calls = raw
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .cloned()
            .unwrap_or_default();

        Self {
            raw,
            content,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics, when the provider reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw chat-completion response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseRaw {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: serde_json::Value,
}

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
///
/// Used to keep tool-output previews in job logs (SPEC_FULL.md's structured
/// tool-call audit metadata) and oversized tool results bounded before they
/// re-enter the conversation history.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_tools_block_when_empty() {
        let req = CompletionRequest::new("gpt-4o", vec![user_message("hi")]);
        let json = req.to_json();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn request_includes_tools_and_choice_when_present() {
        let tools = vec![ToolDefinition {
            name: "final_answer".into(),
            description: "finish the task".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let req = CompletionRequest::new("gpt-4o", vec![user_message("hi")]).with_tools(tools);
        let json = req.to_json();
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["tools"][0]["function"]["name"], "final_answer");
    }

    #[test]
    fn completion_message_extracts_content_and_tool_calls() {
        let raw = serde_json::json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{"id": "call_1", "function": {"name": "x", "arguments": "{}"}}]
        });
        let msg = CompletionMessage::from_raw(raw);
        assert!(msg.content.is_none());
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn truncate_to_char_boundary_respects_utf8() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }
}
