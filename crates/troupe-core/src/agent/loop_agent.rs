//! Repeated sequential body with an iteration cap and escalation stop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::event::Branch;

use super::channel::EventSender;
use super::context::InvocationContext;
use super::state::AgentState;
use super::{Agent, RunOutcome};

/// Runs its children in order, over and over, up to `max_iterations` (or
/// forever without a cap), on the parent branch. A child's escalation ends
/// the loop early. Checkpoints `{iteration, current_index}` so a resumed
/// invocation picks up mid-iteration.
pub struct LoopAgent {
    name: String,
    description: String,
    children: Vec<Arc<dyn Agent>>,
    max_iterations: Option<usize>,
}

impl LoopAgent {
    pub fn new(
        name: impl Into<String>,
        children: Vec<Arc<dyn Agent>>,
        max_iterations: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children,
            max_iterations,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Agent for LoopAgent {
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
        let (mut iteration, mut start_index) = match ctx.checkpoint(&self.name) {
            Some(AgentState::Loop {
                iteration,
                current_index,
            }) => (iteration, current_index),
            _ => (0, 0),
        };
        if iteration > 0 || start_index > 0 {
            tracing::info!(agent = %self.name, iteration, start_index, "Resuming loop mid-flight");
        }

        while self.max_iterations.map_or(true, |max| iteration < max) {
            for (index, child) in self.children.iter().enumerate().skip(start_index) {
                ctx.set_checkpoint(
                    &self.name,
                    AgentState::Loop {
                        iteration,
                        current_index: index,
                    },
                );

                match child.run(ctx.clone(), branch.clone(), out.clone()).await? {
                    RunOutcome::Completed => {}
                    RunOutcome::Escalated => {
                        tracing::info!(agent = %self.name, iteration, child = %child.name(), "Loop stopped by escalation");
                        ctx.clear_checkpoint(&self.name);
                        return Ok(RunOutcome::Escalated);
                    }
                }
            }
            start_index = 0;
            iteration += 1;
        }

        ctx.clear_checkpoint(&self.name);
        Ok(RunOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::channel::event_channel;
    use crate::agent::tree::AgentTree;
    use crate::test_support::{drain, texts, EmitAgent, EscalateOnRun};

    #[tokio::test]
    async fn runs_children_max_iterations_times() {
        let loop_agent = Arc::new(LoopAgent::new(
            "refine",
            vec![Arc::new(EmitAgent::new("worker", &["pass"]))],
            Some(3),
        ));
        let tree = Arc::new(AgentTree::new(loop_agent.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { loop_agent.run(ctx, Branch::root(), tx).await })
        };
        let events = drain(rx).await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Completed);
        assert_eq!(texts(&events), vec!["pass", "pass", "pass"]);
        assert_eq!(ctx.checkpoint("refine"), None);
    }

    #[tokio::test]
    async fn escalation_stops_before_the_cap() {
        let stopper = Arc::new(EscalateOnRun::new("stopper", 2));
        let loop_agent = Arc::new(LoopAgent::new(
            "refine",
            vec![stopper.clone()],
            Some(3),
        ));
        let tree = Arc::new(AgentTree::new(loop_agent.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { loop_agent.run(ctx, Branch::root(), tx).await })
        };
        drain(rx).await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Escalated);
        // Escalated on the second iteration of three.
        assert_eq!(stopper.runs(), 2);
    }

    #[tokio::test]
    async fn resume_continues_from_checkpointed_iteration() {
        let loop_agent = Arc::new(LoopAgent::new(
            "refine",
            vec![Arc::new(EmitAgent::new("worker", &["pass"]))],
            Some(3),
        ));
        let tree = Arc::new(AgentTree::new(loop_agent.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        ctx.set_checkpoint(
            "refine",
            AgentState::Loop {
                iteration: 2,
                current_index: 0,
            },
        );
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { loop_agent.run(ctx, Branch::root(), tx).await })
        };
        let events = drain(rx).await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Completed);
        // Only the final iteration remained.
        assert_eq!(texts(&events), vec!["pass"]);
    }
}
