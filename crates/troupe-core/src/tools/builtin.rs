//! Reserved call names and built-in tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext};

/// Reserved delegation call: hands execution control to another agent in
/// the tree. Handled by the flow loop, never dispatched to a tool body.
pub const TRANSFER_TO_AGENT: &str = "transfer_to_agent";

/// Reserved framework-synthesized call issued when a tool declares an unmet
/// credential requirement. Never issued by the model.
pub const REQUEST_CREDENTIAL: &str = "request_credential";

/// Reserved framework-synthesized call issued when a tool requires external
/// confirmation. Never issued by the model.
pub const REQUEST_CONFIRMATION: &str = "request_confirmation";

/// Reserved call produced by the code-execution response stage for a code
/// block detected in model output; routed to the configured code executor.
pub const EXECUTE_CODE: &str = "execute_code";

/// Whether a call name is one of the framework-reserved side-channel calls
/// that request external input.
pub fn is_side_channel(name: &str) -> bool {
    name == REQUEST_CREDENTIAL || name == REQUEST_CONFIRMATION
}

/// Tool that lets the model exit the surrounding Loop agent early.
///
/// Returns a successful result carrying the escalation signal; the Loop
/// agent stops iterating when the turn's events carry it.
pub struct ExitLoopTool;

#[async_trait]
impl Tool for ExitLoopTool {
    fn name(&self) -> &str {
        "exit_loop"
    }

    fn description(&self) -> &str {
        "Exit the current loop. Call this when the task is complete and no further iterations are needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn escalates(&self) -> bool {
        true
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        Ok(json!({"exiting": true}))
    }
}
