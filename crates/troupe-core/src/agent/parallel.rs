//! Forked branch-isolated children with a merged, backpressured view.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use crate::error::EngineError;
use crate::event::{Branch, Event, EventContent};

use super::channel::{event_channel, EventSender};
use super::context::InvocationContext;
use super::{Agent, RunOutcome};

/// Runs every child concurrently, each in its own task under a derived
/// branch and behind its own single-slot channel, merging the streams
/// downstream. Per-child order is preserved by construction; inter-child
/// interleaving is whatever the scheduler produces.
///
/// Failure policy is continue-and-report: a failing child surfaces as a
/// terminal error event under its branch and the siblings run to
/// completion. No mid-run checkpoint exists, so a resumed invocation
/// re-runs the whole block.
pub struct ParallelAgent {
    name: String,
    description: String,
    children: Vec<Arc<dyn Agent>>,
}

impl ParallelAgent {
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
impl Agent for ParallelAgent {
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
        let mut streams = Vec::with_capacity(self.children.len());
        let mut handles = Vec::with_capacity(self.children.len());

        for child in &self.children {
            let child_branch = branch.child(child.name());
            let (tx, rx) = event_channel(ctx.log().clone());
            let child = child.clone();
            let task_ctx = ctx.clone();
            tracing::debug!(agent = %self.name, child = %child.name(), "Forking child branch");
            handles.push(tokio::spawn(async move {
                run_child(child, task_ctx, child_branch, tx).await
            }));
            streams.push(rx);
        }

        // Children already appended to the shared log through their own
        // senders; only forward downstream here.
        let mut merged = futures::stream::select_all(streams);
        while let Some(event) = merged.next().await {
            out.forward(event).await?;
        }

        let mut escalated = false;
        for handle in handles {
            match handle.await {
                Ok(outcome) => escalated |= outcome == RunOutcome::Escalated,
                Err(join_error) => {
                    return Err(EngineError::Tree(format!(
                        "parallel child task failed: {join_error}"
                    )));
                }
            }
        }

        // No partial-child resumption; drop any stale state.
        ctx.clear_checkpoint(&self.name);

        Ok(if escalated {
            RunOutcome::Escalated
        } else {
            RunOutcome::Completed
        })
    }
}

/// Drive one child to its outcome, reporting failure as a terminal error
/// event on the child's own branch instead of failing the block.
async fn run_child(
    child: Arc<dyn Agent>,
    ctx: InvocationContext,
    branch: Branch,
    tx: EventSender,
) -> RunOutcome {
    match child.run(ctx.clone(), branch.clone(), tx.clone()).await {
        Ok(outcome) => outcome,
        // A cancelled child stopped at a suspension point, nothing to report.
        Err(EngineError::Ended) | Err(EngineError::ChannelClosed) => RunOutcome::Completed,
        Err(err) => {
            tracing::warn!(child = %child.name(), error = %err, "Parallel child failed; siblings continue");
            if !matches!(err, EngineError::Model(_) | EngineError::CostLimitExceeded { .. }) {
                // Model and cost failures already emitted their terminal
                // event inside the flow.
                let event = Event::new(
                    ctx.invocation_id(),
                    child.name(),
                    branch,
                    EventContent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                )
                .final_event();
                let _ = tx.emit(event).await;
            }
            RunOutcome::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tree::AgentTree;
    use crate::test_support::{drain, EmitAgent, EscalateOnRun};

    #[tokio::test]
    async fn children_stream_on_derived_branches_in_per_child_order() {
        let par = Arc::new(ParallelAgent::new(
            "fanout",
            vec![
                Arc::new(EmitAgent::new("left", &["l1", "l2", "l3"])),
                Arc::new(EmitAgent::new("right", &["r1", "r2"])),
            ],
        ));
        let tree = Arc::new(AgentTree::new(par.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { par.run(ctx, Branch::root(), tx).await })
        };
        let events = drain(rx).await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Completed);

        let left_branch = Branch::root().child("left");
        let lefts: Vec<_> = events
            .iter()
            .filter(|e| e.branch == left_branch)
            .filter_map(|e| e.as_text())
            .collect();
        let rights: Vec<_> = events
            .iter()
            .filter(|e| e.branch == Branch::root().child("right"))
            .filter_map(|e| e.as_text())
            .collect();

        // Interleaving unspecified; per-child order is not.
        assert_eq!(lefts, vec!["l1", "l2", "l3"]);
        assert_eq!(rights, vec!["r1", "r2"]);
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn sibling_branches_are_mutually_invisible() {
        let par = Arc::new(ParallelAgent::new(
            "fanout",
            vec![
                Arc::new(EmitAgent::new("left", &["l"])),
                Arc::new(EmitAgent::new("right", &["r"])),
            ],
        ));
        let tree = Arc::new(AgentTree::new(par.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { par.run(ctx, Branch::root(), tx).await })
        };
        drain(rx).await;
        run.await.unwrap().unwrap();

        let seen_by_left = ctx.visible_events(&Branch::root().child("left"));
        assert!(seen_by_left.iter().all(|e| e.author != "right"));
        let seen_by_right = ctx.visible_events(&Branch::root().child("right"));
        assert!(seen_by_right.iter().all(|e| e.author != "left"));
    }

    #[tokio::test]
    async fn child_escalation_propagates_after_all_finish() {
        let par = Arc::new(ParallelAgent::new(
            "fanout",
            vec![
                Arc::new(EscalateOnRun::new("stopper", 1)),
                Arc::new(EmitAgent::new("steady", &["s1"])),
            ],
        ));
        let tree = Arc::new(AgentTree::new(par.clone()).unwrap());
        let (ctx, _inputs) = InvocationContext::new(tree, None);
        let (tx, rx) = event_channel(ctx.log().clone());

        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { par.run(ctx, Branch::root(), tx).await })
        };
        let events = drain(rx).await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Escalated);
        // The sibling still ran to completion.
        assert!(events.iter().any(|e| e.as_text() == Some("s1")));
    }
}
