//! Hook system for tool execution.
//!
//! Interception happens at fixed extension points as ordered lists of
//! optional hooks, each able to short-circuit or transform:
//! - `PreToolHook` runs before execution and may substitute a result,
//!   skipping the tool entirely.
//! - `PostToolHook` runs after a successful execution and may transform the
//!   result.
//! - `ErrorHook` is offered unhandled faults for recovery before they are
//!   converted into structured error results.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ToolContext, ToolResult};

/// Decision from a pre-execution hook.
#[derive(Debug)]
pub enum HookOutcome {
    /// Proceed with execution.
    Continue,
    /// Use this result instead; the tool body never runs.
    Respond(ToolResult),
}

/// Hook called before a tool executes.
#[async_trait]
pub trait PreToolHook: Send + Sync {
    async fn before_call(&self, name: &str, args: &Value, ctx: &ToolContext) -> HookOutcome;
}

/// Hook called after a tool executes successfully. Returns the (possibly
/// transformed) result.
#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_call(
        &self,
        name: &str,
        args: &Value,
        result: ToolResult,
        duration: Duration,
    ) -> ToolResult;
}

/// Hook offered unhandled tool faults. Returning `Some` recovers the call
/// with that result; `None` lets the fault become a structured error.
#[async_trait]
pub trait ErrorHook: Send + Sync {
    async fn on_error(
        &self,
        name: &str,
        args: &Value,
        error: &anyhow::Error,
        ctx: &ToolContext,
    ) -> Option<ToolResult>;
}

/// Logs every tool execution with timing.
pub struct LoggingHook;

impl LoggingHook {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostToolHook for LoggingHook {
    async fn after_call(
        &self,
        name: &str,
        _args: &Value,
        result: ToolResult,
        duration: Duration,
    ) -> ToolResult {
        tracing::info!(
            tool = name,
            duration_ms = duration.as_millis() as u64,
            is_error = result.is_error,
            "Tool execution completed"
        );
        result
    }
}
