//! Schema generation for an agent's tool-call argument structs.
//!
//! Uses `schemars` to turn a tool's argument struct (e.g. the job engine's
//! `FetchUrlArgs`, `RunPythonArgs`) into the JSON schema a chat-completions
//! `ToolDefinition` carries. Argument types get this via the blanket impl
//! below; see [`crate::Tool::definition`].

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Trait for tool argument types that can be turned into a function-calling
/// parameter schema.
///
/// Automatically implemented for any type that implements `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Generate the provider-compatible JSON schema for this argument type.
    ///
    /// Strict function-calling mode requires `additionalProperties: false`,
    /// which this method ensures is set.
    fn openai_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        ensure_no_additional_properties(&mut value);

        value
    }

    /// Get the schema name for this type.
    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

// Blanket implementation for all types that satisfy the bounds
impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Recursively set `additionalProperties: false` on all object schemas.
///
/// OpenAI's strict mode requires this for proper validation.
fn ensure_no_additional_properties(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        // If this is an object type schema, add additionalProperties: false
        if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
            map.insert(
                "additionalProperties".to_string(),
                serde_json::Value::Bool(false),
            );
        }

        // Recurse into nested schemas
        for (_, v) in map.iter_mut() {
            ensure_no_additional_properties(v);
        }
    } else if let serde_json::Value::Array(arr) = value {
        for item in arr.iter_mut() {
            ensure_no_additional_properties(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct FetchHeader {
        name: String,
        value: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct FetchRequest {
        url: String,
        headers: Vec<FetchHeader>,
    }

    #[test]
    fn schema_generation_produces_an_object() {
        let schema = FetchRequest::openai_schema();
        assert!(schema.is_object());

        let schema_obj = schema.as_object().unwrap();
        assert!(schema_obj.contains_key("$schema") || schema_obj.contains_key("type"));
    }

    #[test]
    fn additional_properties_is_disabled_on_every_object() {
        let schema = FetchRequest::openai_schema();
        let schema_str = serde_json::to_string(&schema).unwrap();
        assert!(schema_str.contains("additionalProperties"));
    }

    #[test]
    fn nested_struct_fields_still_produce_a_schema() {
        let schema = FetchRequest::openai_schema();
        assert!(schema.is_object());
    }
}
