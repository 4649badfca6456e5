//! Shared fixtures for the inline test modules.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use crate::agent::channel::{EventSender, EventStream};
use crate::agent::context::InvocationContext;
use crate::agent::tree::AgentTree;
use crate::agent::{Agent, RunOutcome};
use crate::error::EngineError;
use crate::event::{Branch, Event};
use crate::flow::LlmRequest;
use crate::model::{LlmResponse, ModelBackend};
use crate::tools::{Tool, ToolContext};

/// Agent that emits nothing and completes immediately.
pub struct NullAgent {
    name: String,
    children: Vec<Arc<dyn Agent>>,
}

impl NullAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

#[async_trait]
impl Agent for NullAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.children.clone()
    }

    async fn run(
        &self,
        _ctx: InvocationContext,
        _branch: Branch,
        _out: EventSender,
    ) -> Result<RunOutcome, EngineError> {
        Ok(RunOutcome::Completed)
    }
}

/// Agent that emits one text event per configured string, then completes.
pub struct EmitAgent {
    name: String,
    texts: Vec<String>,
}

impl EmitAgent {
    pub fn new(name: impl Into<String>, texts: &[&str]) -> Self {
        Self {
            name: name.into(),
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Agent for EmitAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: InvocationContext,
        branch: Branch,
        out: EventSender,
    ) -> Result<RunOutcome, EngineError> {
        for text in &self.texts {
            out.emit(Event::text(ctx.invocation_id(), &self.name, branch.clone(), text))
                .await?;
        }
        Ok(RunOutcome::Completed)
    }
}

/// Agent that escalates on its Nth run (1-based); completes before that.
/// Each run emits one text event so ordering is observable.
pub struct EscalateOnRun {
    name: String,
    escalate_on: usize,
    runs: AtomicUsize,
}

impl EscalateOnRun {
    pub fn new(name: impl Into<String>, escalate_on: usize) -> Self {
        Self {
            name: name.into(),
            escalate_on,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for EscalateOnRun {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: InvocationContext,
        branch: Branch,
        out: EventSender,
    ) -> Result<RunOutcome, EngineError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        out.emit(Event::text(
            ctx.invocation_id(),
            &self.name,
            branch,
            format!("run {run}"),
        ))
        .await?;
        if run >= self.escalate_on {
            Ok(RunOutcome::Escalated)
        } else {
            Ok(RunOutcome::Completed)
        }
    }
}

/// A context over a solo do-nothing tree, no cost cap. The input sender is
/// dropped, so side-channel waits would see a closed channel.
pub fn bare_context() -> InvocationContext {
    let tree = Arc::new(AgentTree::solo(Arc::new(NullAgent::new("root"))));
    let (ctx, _inputs) = InvocationContext::new(tree, None);
    ctx
}

/// Backend that replays a scripted response sequence and records every
/// assembled request for assertions.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted backend ran out of responses"))
    }
}

/// Tool that sleeps for `delay` and then echoes a fixed value.
pub struct SleepTool {
    name: String,
    delay: Duration,
    value: Value,
}

impl SleepTool {
    pub fn new(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self {
            name: name.into(),
            delay,
            value,
        }
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "sleeps, then answers"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(self.value.clone())
    }
}

/// Tool whose body always fails; exercises fault containment.
pub struct FaultyTool;

#[async_trait]
impl Tool for FaultyTool {
    fn name(&self) -> &str {
        "faulty"
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        anyhow::bail!("tool body blew up")
    }
}

/// Collect every event from a stream until it closes.
pub async fn drain(mut stream: EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Text payloads of the text events in `events`, in order.
pub fn texts(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e.as_text().map(str::to_string))
        .collect()
}

