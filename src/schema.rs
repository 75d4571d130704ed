//! JSON schemas for tool arguments and structured agent output.

use schemars::JsonSchema;
use serde_json::Value;

/// A structured-output schema declared by an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    /// Name advertised to the model, e.g. `YarGuardOutput`
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derive the schema from a Rust type.
    pub fn of<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let name = root
            .schema
            .metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| "output".to_string());
        // RootSchema always serializes
        let schema = serde_json::to_value(&root).unwrap_or(Value::Null);
        Self { name, schema }
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_against_schema(&self.schema, value)
    }
}

/// Argument schema of a typed tool.
pub fn parameters_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Validate `value` against `schema`, joining every violation into one message.
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), String> {
    let validator =
        jsonschema::Validator::new(schema).map_err(|e| format!("invalid schema: {e}"))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Verdict {
        is_blocked: bool,
        reasoning: String,
    }

    #[test]
    fn test_output_schema_from_type() {
        let schema = OutputSchema::of::<Verdict>();
        assert_eq!(schema.name, "Verdict");
        assert!(schema
            .validate(&json!({"is_blocked": true, "reasoning": "off topic"}))
            .is_ok());
    }

    #[test]
    fn test_output_schema_rejects_mismatch() {
        let schema = OutputSchema::of::<Verdict>();
        let err = schema.validate(&json!({"is_blocked": "yes"})).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_validate_against_handwritten_schema() {
        let schema = json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        });
        assert!(validate_against_schema(&schema, &json!({"query": "warp"})).is_ok());
        assert!(validate_against_schema(&schema, &json!({})).is_err());
    }
}
