//! Children in order, same accumulated context forward.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::event::Branch;

use super::channel::EventSender;
use super::context::InvocationContext;
use super::state::AgentState;
use super::{Agent, RunOutcome};

/// Runs its children one after another on the parent branch, so each child
/// sees everything its earlier siblings emitted. Checkpoints the index of
/// the child about to run; a resumed invocation skips completed children and
/// re-runs the one that was in flight.
pub struct SequentialAgent {
    name: String,
    description: String,
    children: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.children.clone()
    }

    async fn run(
        &self,
        ctx: InvocationContext,
        branch: Branch,
        out: EventSender,
    ) -> Result<RunOutcome, EngineError> {
        let start = match ctx.checkpoint(&self.name) {
            Some(AgentState::Sequential { current_index }) => current_index,
            _ => 0,
        };
        if start > 0 {
            tracing::info!(agent = %self.name, skip = start, "Resuming past completed children");
        }

        for (index, child) in self.children.iter().enumerate().skip(start) {
            ctx.set_checkpoint(&self.name, AgentState::Sequential { current_index: index });
            tracing::debug!(agent = %self.name, child = %child.name(), index, "Running child");

            match child.run(ctx.clone(), branch.clone(), out.clone()).await? {
                RunOutcome::Completed => {
                    ctx.set_checkpoint(
                        &self.name,
                        AgentState::Sequential { current_index: index + 1 },
                    );
                }
                RunOutcome::Escalated => {
                    tracing::info!(agent = %self.name, child = %child.name(), "Child escalated");
                    ctx.clear_checkpoint(&self.name);
                    return Ok(RunOutcome::Escalated);
                }
            }
        }

        ctx.clear_checkpoint(&self.name);
        Ok(RunOutcome::Completed)
    }
}
