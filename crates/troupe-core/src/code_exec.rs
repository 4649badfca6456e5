//! Code-execution collaborator.
//!
//! When configured on a leaf agent, the flow prepares the model for code
//! execution during request assembly and, on the response side, converts a
//! detected code block into a reserved `execute_code` call so the normal
//! tool machinery (events, pairing, next turn) carries the result back.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:[a-zA-Z0-9_+-]*)\n(.*?)```").expect("code fence regex")
});

/// Executes model-produced code and returns its output.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Instruction block telling the model how to request execution.
    fn instruction(&self) -> Option<String> {
        Some(
            "You may run code by writing it in a fenced code block; the execution result will be returned to you."
                .to_string(),
        )
    }

    /// Run one code block. Faults are contained like any tool fault.
    async fn execute(&self, code: &str) -> anyhow::Result<String>;
}

/// Extract the first fenced code block from model text, if any.
pub fn extract_code(text: &str) -> Option<String> {
    CODE_FENCE
        .captures(text)
        .map(|caps| caps[1].trim_end().to_string())
}
