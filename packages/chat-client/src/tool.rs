//! Tool-calling traits and types for function-calling chat completions.
//!
//! Provides a type-safe, ergonomic API for defining tools the model can call.
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use chat_client::Tool;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct SearchArgs {
//!     query: String,
//! }
//!
//! struct WebSearch;
//!
//! #[async_trait]
//! impl Tool for WebSearch {
//!     const NAME: &'static str = "web_search";
//!     type Args = SearchArgs;
//!     type Output = Vec<String>;
//!     type Error = anyhow::Error;
//!
//!     fn description(&self) -> &str {
//!         "Search the web for information"
//!     }
//!
//!     async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
//!         Ok(vec![format!("Results for: {}", args.query)])
//!     }
//! }
//! ```

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::schema::StructuredOutput;

/// A tool that can be called by the model.
///
/// Tools have typed arguments and outputs, with automatic schema generation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique, stable name the model refers to this tool by.
    const NAME: &'static str;

    /// The argument type for this tool (must derive `Deserialize` and `JsonSchema`).
    type Args: DeserializeOwned + JsonSchema + Send;

    /// The output type for this tool (must derive `Serialize`).
    type Output: Serialize + Send;

    /// The error type for this tool.
    type Error: std::error::Error + Send + Sync + 'static;

    /// A description of what this tool does, shown to the model.
    fn description(&self) -> &str;

    /// Execute the tool with the given arguments.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Generate the function-calling definition for this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: self.description().to_string(),
            parameters: Self::Args::openai_schema(),
        }
    }
}

/// Function-calling tool definition, OpenAI wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Convert to the `{"type": "function", "function": {...}}` wire shape.
    pub fn to_openai_format(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// The id of this tool call, to be echoed back in the matching tool message.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// The arguments, as a JSON-encoded string.
    pub arguments: String,
}

impl ToolCall {
    /// Parse a tool call out of an assistant message's `tool_calls[]` entry.
    pub fn from_openai_value(value: &serde_json::Value) -> Option<Self> {
        Some(Self {
            id: value.get("id")?.as_str()?.to_string(),
            name: value.get("function")?.get("name")?.as_str()?.to_string(),
            arguments: value
                .get("function")?
                .get("arguments")?
                .as_str()?
                .to_string(),
        })
    }

    /// Parse the arguments into a typed struct.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Type-erased tool for storing heterogeneous tools in one collection.
#[async_trait]
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn call_erased(&self, arguments: &str) -> Result<String, ToolCallError>;
}

/// Error from dispatching a type-erased tool call.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("failed to parse arguments: {0}")]
    ArgumentParse(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("failed to serialize output: {0}")]
    OutputSerialize(String),
}

/// Blanket implementation of `ErasedTool` for all `Tool` implementors.
#[async_trait]
impl<T: Tool> ErasedTool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    async fn call_erased(&self, arguments: &str) -> Result<String, ToolCallError> {
        let args: T::Args = serde_json::from_str(arguments)
            .map_err(|e| ToolCallError::ArgumentParse(e.to_string()))?;

        let output = self
            .call(args)
            .await
            .map_err(|e| ToolCallError::Execution(e.to_string()))?;

        serde_json::to_string(&output).map_err(|e| ToolCallError::OutputSerialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        message: String,
    }

    #[derive(Serialize)]
    struct EchoOutput {
        echoed: String,
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        const NAME: &'static str = "echo";
        type Args = EchoArgs;
        type Output = EchoOutput;
        type Error = std::convert::Infallible;

        fn description(&self) -> &str {
            "Echo back the input message"
        }

        async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
            Ok(EchoOutput {
                echoed: args.message,
            })
        }
    }

    #[test]
    fn tool_definition_matches_name_and_description() {
        let def = Tool::definition(&EchoTool);
        assert_eq!(def.name, "echo");
        assert_eq!(def.description, "Echo back the input message");
        assert!(def.parameters.is_object());
    }

    #[test]
    fn tool_definition_openai_format_wraps_function() {
        let def = Tool::definition(&EchoTool);
        let openai_format = def.to_openai_format();
        assert_eq!(openai_format["type"], "function");
        assert_eq!(openai_format["function"]["name"], "echo");
    }

    #[test]
    fn tool_call_parses_from_openai_value() {
        let value = serde_json::json!({
            "id": "call_123",
            "function": {
                "name": "echo",
                "arguments": "{\"message\": \"hello\"}"
            }
        });

        let call = ToolCall::from_openai_value(&value).unwrap();
        assert_eq!(call.id, "call_123");
        assert_eq!(call.name, "echo");

        let args: EchoArgs = call.parse_args().unwrap();
        assert_eq!(args.message, "hello");
    }

    #[test]
    fn tool_call_parsing_fails_on_missing_function() {
        let value = serde_json::json!({"id": "call_1"});
        assert!(ToolCall::from_openai_value(&value).is_none());
    }

    #[tokio::test]
    async fn erased_tool_roundtrips_json() {
        let tool: Box<dyn ErasedTool> = Box::new(EchoTool);
        assert_eq!(tool.name(), "echo");

        let result = tool.call_erased(r#"{"message": "test"}"#).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["echoed"], "test");
    }

    #[tokio::test]
    async fn erased_tool_reports_argument_parse_errors() {
        let tool: Box<dyn ErasedTool> = Box::new(EchoTool);
        let err = tool.call_erased("not json").await.unwrap_err();
        assert!(matches!(err, ToolCallError::ArgumentParse(_)));
    }
}
