//! Tool system: calls, results, and the `Tool` trait.
//!
//! A tool is an arbitrary external callable keyed by name and schema. The
//! engine's contract with a tool body is `call(args, ctx) -> Result<Value>`;
//! everything else (validation, hooks, confirmation, fault containment)
//! happens in the registry and executor around it.

pub mod builtin;
pub mod executor;
pub mod hooks;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::context::InvocationContext;
use crate::event::Branch;

pub use executor::execute_calls;
pub use hooks::{ErrorHook, HookOutcome, LoggingHook, PostToolHook, PreToolHook};
pub use registry::{validate_args, ToolRegistry};

/// One function invocation requested by a model turn (or synthesized by the
/// framework for the reserved calls).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            args,
        }
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Outcome of one tool call. Faults are carried as structured error values,
/// never as panics or engine errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub value: Value,
    pub is_error: bool,
    /// Structured stop signal: the surrounding Loop agent stops iterating
    /// when a turn carries this.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,
}

impl ToolResult {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
            escalate: false,
        }
    }

    /// A successful result that also signals escalation (loop exit).
    pub fn escalating(value: Value) -> Self {
        Self {
            value,
            is_error: false,
            escalate: true,
        }
    }

    /// Structured error with a stable code; surfaced to the model as a
    /// function response with `is_error` set.
    pub fn error_with_code(code: &str, message: impl std::fmt::Display) -> Self {
        Self {
            value: json!({
                "error": { "code": code, "message": message.to_string() }
            }),
            is_error: true,
            escalate: false,
        }
    }

    pub fn validation_error(message: impl std::fmt::Display) -> Self {
        Self::error_with_code(crate::error::tool_codes::VALIDATION_ERROR, message)
    }

    pub fn fault(message: impl std::fmt::Display) -> Self {
        Self::error_with_code(crate::error::tool_codes::TOOL_FAULT, message)
    }

    /// The error code, if this is a structured error result.
    pub fn error_code(&self) -> Option<&str> {
        self.value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
    }
}

/// Preconditions a tool declares before it may execute.
#[derive(Debug, Clone, Default)]
pub struct ToolRequirements {
    /// Credential key that must be granted for this invocation.
    pub credential: Option<String>,
    /// Whether each call must be confirmed externally before running.
    pub confirmation: bool,
}

/// Context handed to a tool body.
#[derive(Clone)]
pub struct ToolContext {
    pub invocation: InvocationContext,
    pub agent: String,
    pub branch: Branch,
    pub call_id: String,
}

impl ToolContext {
    /// Read a value from the shared session state.
    pub fn state(&self, key: &str) -> Option<Value> {
        self.invocation.state_get(key)
    }

    /// Write a value to the shared session state.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.invocation.state_set(key, value);
    }
}

/// Trait for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id).
    fn name(&self) -> &str;

    /// Tool description for the model.
    fn description(&self) -> &str;

    /// JSON schema for the arguments.
    fn parameters_schema(&self) -> Value;

    /// Preconditions checked before execution.
    fn requirements(&self) -> ToolRequirements {
        ToolRequirements::default()
    }

    /// Serial tools never run concurrently with other calls from the same
    /// turn; they execute in call order.
    fn serial(&self) -> bool {
        false
    }

    /// Whether a successful call carries the escalation (loop exit) signal.
    fn escalates(&self) -> bool {
        false
    }

    /// Execute the tool. A returned error is contained by the executor and
    /// becomes a structured error result.
    async fn call(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_carries_code_and_message() {
        let result = ToolResult::validation_error("missing field 'q'");
        assert!(result.is_error);
        assert_eq!(result.error_code(), Some("validation_error"));
        assert_eq!(
            result.value["error"]["message"],
            json!("missing field 'q'")
        );
    }

    #[test]
    fn ok_result_has_no_code() {
        let result = ToolResult::ok(json!({"answer": 42}));
        assert!(!result.is_error);
        assert_eq!(result.error_code(), None);
    }
}
