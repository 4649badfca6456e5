//! Engine error types.
//!
//! `EngineError` covers the failures that terminate a flow or invocation.
//! Tool-level faults (bad arguments, unknown transfer targets, tool body
//! panics) are deliberately *not* represented here: they are converted into
//! structured error results and fed back to the model, so the flow itself
//! never crashes from a tool fault. See `tools::ToolResult`.

use thiserror::Error;

/// Failures that terminate the current flow or invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The model backend failed irrecoverably for this turn.
    #[error("model backend failure: {0}")]
    Model(String),

    /// The configured model-call budget was exhausted.
    #[error("model call limit of {limit} exceeded")]
    CostLimitExceeded { limit: usize },

    /// An external collaborator (instruction provider, planner) failed
    /// while assembling a turn.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// The agent tree is malformed (duplicate names, unknown root child).
    #[error("agent tree error: {0}")]
    Tree(String),

    /// The downstream event consumer went away.
    #[error("event channel closed")]
    ChannelClosed,

    /// The invocation was cancelled via its end signal.
    #[error("invocation ended")]
    Ended,
}

impl EngineError {
    /// Stable machine-readable kind, carried on terminal error events.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Model(_) => "model_fault",
            EngineError::CostLimitExceeded { .. } => "cost_limit_exceeded",
            EngineError::Collaborator(_) => "collaborator_fault",
            EngineError::Tree(_) => "tree_error",
            EngineError::ChannelClosed => "channel_closed",
            EngineError::Ended => "ended",
        }
    }
}

/// Error codes attached to tool-error results. These surface to the model
/// inside a function response and are self-correctable; none of them abort
/// the flow.
pub mod tool_codes {
    /// Arguments did not match the declared parameter schema.
    pub const VALIDATION_ERROR: &str = "validation_error";
    /// A transfer call named an agent that does not exist in the tree.
    pub const TRANSFER_ERROR: &str = "transfer_error";
    /// Unhandled fault inside a tool body.
    pub const TOOL_FAULT: &str = "tool_fault";
    /// No tool registered under the called name.
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    /// Tool execution exceeded its timeout.
    pub const TIMEOUT: &str = "timeout";
    /// The user denied a requested confirmation.
    pub const CONFIRMATION_DENIED: &str = "confirmation_denied";
    /// No external response arrived for a credential/confirmation request.
    pub const INPUT_TIMEOUT: &str = "input_timeout";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EngineError::Model("boom".into()).kind(), "model_fault");
        assert_eq!(
            EngineError::CostLimitExceeded { limit: 2 }.kind(),
            "cost_limit_exceeded"
        );
    }

    #[test]
    fn display_includes_limit() {
        let err = EngineError::CostLimitExceeded { limit: 5 };
        assert!(err.to_string().contains('5'));
    }
}
