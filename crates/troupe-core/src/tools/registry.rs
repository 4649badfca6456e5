//! Tool registry with hook lists and schema validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::model::ToolDeclaration;

use super::hooks::{ErrorHook, PostToolHook, PreToolHook};
use super::Tool;

/// Default tool execution timeout (2 minutes).
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Registry for the tools one agent exposes, plus its interception hooks.
///
/// Built once at agent construction and shared immutably afterwards, so no
/// lock is needed on the execution path.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
    pre_hooks: Vec<Arc<dyn PreToolHook>>,
    post_hooks: Vec<Arc<dyn PostToolHook>>,
    error_hooks: Vec<Arc<dyn ErrorHook>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            error_hooks: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn add_pre_hook(&mut self, hook: Arc<dyn PreToolHook>) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: Arc<dyn PostToolHook>) {
        self.post_hooks.push(hook);
    }

    pub fn add_error_hook(&mut self, hook: Arc<dyn ErrorHook>) {
        self.error_hooks.push(hook);
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn timeout(&self) -> Duration {
        self.default_timeout
    }

    pub(crate) fn pre_hooks(&self) -> &[Arc<dyn PreToolHook>] {
        &self.pre_hooks
    }

    pub(crate) fn post_hooks(&self) -> &[Arc<dyn PostToolHook>] {
        &self.post_hooks
    }

    pub(crate) fn error_hooks(&self) -> &[Arc<dyn ErrorHook>] {
        &self.error_hooks
    }

    /// Declarations for every registered tool, sorted by name so request
    /// assembly is deterministic.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate call arguments against a declared JSON schema.
///
/// Checks the subset of JSON Schema the tool declarations use: top-level
/// object shape, `required` fields, per-property `type`, and
/// `additionalProperties: false`. A mismatch is reported as an error string
/// which the executor converts into a `validation_error` tool result.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = properties {
        for (name, value) in object {
            let Some(declared) = properties.get(name) else {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(format!("unknown field '{name}'"));
                }
                continue;
            };
            if let Some(expected) = declared.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "field '{name}' expected type '{expected}', got '{}'",
                        json_type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_args() {
        assert!(validate_args(&schema(), &json!({"query": "x", "limit": 3})).is_ok());
        assert!(validate_args(&schema(), &json!({"query": "x"})).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate_args(&schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.contains("query"));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate_args(&schema(), &json!({"query": 7})).unwrap_err();
        assert!(err.contains("expected type 'string'"));
    }

    #[test]
    fn rejects_unknown_field_when_closed() {
        let err = validate_args(&schema(), &json!({"query": "x", "extra": true})).unwrap_err();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn rejects_non_object_args() {
        assert!(validate_args(&schema(), &json!("just a string")).is_err());
    }

    #[test]
    fn declarations_are_sorted_by_name() {
        use crate::tools::{Tool, ToolContext};
        use async_trait::async_trait;

        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "test"
            }
            fn parameters_schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
                Ok(json!({}))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(Named("zeta")));
        registry.register(std::sync::Arc::new(Named("alpha")));

        let names: Vec<_> = registry.declarations().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
