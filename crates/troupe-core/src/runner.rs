//! Top-level invocation driver.
//!
//! `Runner` owns the agent tree and the persistence seam. Each `run` builds
//! a fresh invocation context, appends the user's message as the first
//! event, spawns the root agent, and hands back a [`RunHandle`] carrying the
//! backpressured event stream, the side-channel input sender, and the end
//! signal. `resume` does the same over a persisted snapshot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::agent::channel::{event_channel, EventStream};
use crate::agent::context::{ExternalInput, InvocationContext};
use crate::agent::tree::AgentTree;
use crate::agent::RunOutcome;
use crate::error::EngineError;
use crate::event::{Branch, Event, EventContent};
use crate::session::{SessionSnapshot, SessionStore};

/// Author recorded on user-originated events.
pub const USER_AUTHOR: &str = "user";

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Cap on model calls per invocation; `None` is unlimited.
    pub max_llm_calls: Option<usize>,
}

/// Drives invocations of one agent tree.
pub struct Runner {
    tree: Arc<AgentTree>,
    store: Option<Arc<dyn SessionStore>>,
    config: RunnerConfig,
}

/// A live invocation.
pub struct RunHandle {
    /// Backpressured stream of every event the invocation emits.
    pub events: EventStream,
    ctx: InvocationContext,
    inputs: mpsc::UnboundedSender<ExternalInput>,
    task: JoinHandle<Result<RunOutcome, EngineError>>,
}

impl RunHandle {
    pub fn context(&self) -> &InvocationContext {
        &self.ctx
    }

    /// Answer a pending side-channel request. Returns false once the
    /// invocation is gone.
    pub fn send_input(&self, input: ExternalInput) -> bool {
        self.inputs.send(input).is_ok()
    }

    /// Signal end-invocation: every branch stops at its next suspension
    /// point; in-flight tools finish.
    pub fn end(&self) {
        self.ctx.end();
    }

    /// Wait for the root agent's outcome. Drain `events` first (or
    /// concurrently): the stream is backpressured, so an unread event blocks
    /// the producer.
    pub async fn join(self) -> Result<RunOutcome, EngineError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(EngineError::Tree(format!(
                "invocation task failed: {join_error}"
            ))),
        }
    }

    /// Snapshot the invocation for later resumption.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.ctx.invocation_id().to_string(),
            events: self.ctx.log().all(),
            checkpoints: self.ctx.checkpoints_snapshot(),
            state: self.ctx.state_snapshot(),
        }
    }
}

impl Runner {
    pub fn new(tree: Arc<AgentTree>, config: RunnerConfig) -> Self {
        Self {
            tree,
            store: None,
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start a fresh invocation with `user_text` as the opening message.
    pub fn run(&self, user_text: impl Into<String>) -> RunHandle {
        let (ctx, inputs) = InvocationContext::new(self.tree.clone(), self.config.max_llm_calls);
        self.launch(ctx, inputs, Some(user_text.into()))
    }

    /// Resume a persisted invocation: reload its event log, checkpoints and
    /// session state, then re-run the root. Composites consult their own
    /// checkpoints and skip completed work; optional `user_text` opens the
    /// follow-up turn.
    pub fn resume(&self, snapshot: SessionSnapshot, user_text: Option<String>) -> RunHandle {
        let (ctx, inputs) = InvocationContext::resume(
            self.tree.clone(),
            self.config.max_llm_calls,
            snapshot.events,
            snapshot.checkpoints,
            snapshot.state,
        );
        self.launch(ctx, inputs, user_text)
    }

    fn launch(
        &self,
        ctx: InvocationContext,
        inputs: mpsc::UnboundedSender<ExternalInput>,
        user_text: Option<String>,
    ) -> RunHandle {
        let (sender, stream) = event_channel(ctx.log().clone());
        let root = self.tree.root();

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tracing::info!(
                    invocation_id = %ctx.invocation_id(),
                    agent = %root.name(),
                    "Invocation starting"
                );
                if let Some(text) = user_text {
                    sender
                        .emit(Event::text(
                            ctx.invocation_id(),
                            USER_AUTHOR,
                            Branch::root(),
                            text,
                        ))
                        .await?;
                }

                let result = root.run(ctx.clone(), Branch::root(), sender.clone()).await;
                match &result {
                    Ok(outcome) => {
                        tracing::info!(invocation_id = %ctx.invocation_id(), ?outcome, "Invocation finished")
                    }
                    Err(err) => {
                        tracing::warn!(invocation_id = %ctx.invocation_id(), error = %err, "Invocation failed");
                        // Model and cost failures already emitted a terminal
                        // error event inside the flow.
                        if !matches!(
                            err,
                            EngineError::Model(_)
                                | EngineError::CostLimitExceeded { .. }
                                | EngineError::ChannelClosed
                        ) {
                            let _ = sender
                                .emit(
                                    Event::new(
                                        ctx.invocation_id(),
                                        root.name(),
                                        Branch::root(),
                                        EventContent::Error {
                                            kind: err.kind().to_string(),
                                            message: err.to_string(),
                                        },
                                    )
                                    .final_event(),
                                )
                                .await;
                        }
                    }
                }
                result
            })
        };

        let events = match &self.store {
            Some(store) => persisting_stream(stream, store.clone(), ctx.clone()),
            None => stream,
        };

        RunHandle {
            events,
            ctx,
            inputs,
            task,
        }
    }
}

/// Interpose the store on the event stream: every event is appended before
/// it reaches the consumer, and a final snapshot (checkpoints + state) is
/// saved when the stream closes. Capacity stays at one slot so the
/// backpressure contract holds end to end.
fn persisting_stream(
    mut upstream: EventStream,
    store: Arc<dyn SessionStore>,
    ctx: InvocationContext,
) -> EventStream {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let session_id = ctx.invocation_id().to_string();
        while let Some(event) = upstream.next().await {
            if let Err(error) = store.append_event(&session_id, &event).await {
                tracing::warn!(%session_id, %error, "Failed to persist event");
            }
            if tx.send(event).await.is_err() {
                break;
            }
        }
        let snapshot = SessionSnapshot {
            session_id: session_id.clone(),
            events: ctx.log().all(),
            checkpoints: ctx.checkpoints_snapshot(),
            state: ctx.state_snapshot(),
        };
        if let Err(error) = store.save_snapshot(&snapshot).await {
            tracing::warn!(%session_id, %error, "Failed to persist snapshot");
        }
    });
    tokio_stream::wrappers::ReceiverStream::new(rx)
}
