//! Processor chain (flow) — one leaf agent's conversational turn(s).
//!
//! A `Flow` owns the fixed-order stage lists that assemble each model
//! request and post-process each response, plus the enclosing loop that
//! repeats turns until the model produces a final answer, the agent
//! escalates or transfers, or the cost budget runs out.
//!
//! Stage order is load-bearing: history assembly depends on instruction
//! resolution having already split cacheable from dynamic text; planning
//! injection depends on identity and history being finalized. The order is
//! fixed at construction and asserted by tests — no stage may be reordered
//! without violating a declared data dependency.

pub mod processors;
pub mod request;

use std::sync::Arc;

use serde_json::json;

use crate::agent::channel::EventSender;
use crate::agent::context::InvocationContext;
use crate::code_exec::CodeExecutor;
use crate::error::{tool_codes, EngineError};
use crate::event::{Branch, Event, EventContent};
use crate::instructions::InstructionProvider;
use crate::model::{GenerationConfig, LlmResponse, ModelBackend};
use crate::planner::Planner;
use crate::tools::builtin::TRANSFER_TO_AGENT;
use crate::tools::{execute_calls, ToolCall, ToolRegistry};

pub use processors::{RequestProcessor, ResponseProcessor};
pub use request::LlmRequest;

/// Everything the stages need to run one agent's turns.
pub struct FlowConfig {
    pub model: String,
    pub generation: GenerationConfig,
    pub backend: Arc<dyn ModelBackend>,
    pub instructions: Option<Arc<dyn InstructionProvider>>,
    pub planner: Option<Arc<dyn Planner>>,
    pub code_executor: Option<Arc<dyn CodeExecutor>>,
    pub output_schema: Option<serde_json::Value>,
    /// Session-state key the final answer is written to (emits a
    /// state-delta event).
    pub output_key: Option<String>,
    pub tools: Arc<ToolRegistry>,
    /// Whether this agent exposes the reserved transfer tool.
    pub transfer_enabled: bool,
}

/// Per-turn execution context handed to every stage.
pub struct TurnContext {
    pub ctx: InvocationContext,
    pub branch: Branch,
    pub agent_name: String,
    pub agent_description: String,
}

impl TurnContext {
    /// New event authored by this agent on this branch.
    pub fn event(&self, content: EventContent) -> Event {
        Event::new(
            self.ctx.invocation_id(),
            self.agent_name.clone(),
            self.branch.clone(),
            content,
        )
    }
}

/// How a flow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Final response emitted; no further action.
    Completed,
    /// A tool raised the structured stop signal.
    Escalated,
    /// The model issued a valid transfer; control passes to `target`.
    Transfer { target: String },
}

/// The fixed processor chain for one leaf agent.
pub struct Flow {
    config: FlowConfig,
    request_processors: Vec<Arc<dyn RequestProcessor>>,
    response_processors: Vec<Arc<dyn ResponseProcessor>>,
}

impl Flow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            request_processors: processors::request_chain(),
            response_processors: processors::response_chain(),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Stage names in execution order, for order assertions.
    pub fn request_stage_names(&self) -> Vec<&'static str> {
        self.request_processors.iter().map(|p| p.name()).collect()
    }

    pub fn response_stage_names(&self) -> Vec<&'static str> {
        self.response_processors.iter().map(|p| p.name()).collect()
    }

    /// Assemble one request by running every request stage in order.
    pub async fn assemble(&self, turn: &TurnContext) -> Result<LlmRequest, EngineError> {
        let mut request = LlmRequest::new();
        for stage in &self.request_processors {
            stage.process(turn, &self.config, &mut request).await?;
        }
        Ok(request)
    }

    /// Run turns until the flow settles. Terminal failures (model fault,
    /// cost limit) emit a final error event before returning the error;
    /// already-emitted events are retained.
    pub async fn run(
        &self,
        turn: &TurnContext,
        out: &EventSender,
    ) -> Result<FlowOutcome, EngineError> {
        loop {
            if turn.ctx.is_ended() {
                return Err(EngineError::Ended);
            }

            let request = self.assemble(turn).await?;

            if let Err(err) = turn.ctx.cost().charge() {
                tracing::warn!(
                    agent = %turn.agent_name,
                    calls = turn.ctx.cost().calls(),
                    "Model call budget exhausted"
                );
                self.emit_terminal_error(turn, out, &err).await?;
                return Err(err);
            }

            let mut response = match self.config.backend.generate(&request).await {
                Ok(response) => response,
                Err(e) => {
                    let err = EngineError::Model(e.to_string());
                    tracing::error!(agent = %turn.agent_name, error = %e, "Model backend failed");
                    self.emit_terminal_error(turn, out, &err).await?;
                    return Err(err);
                }
            };

            for stage in &self.response_processors {
                stage.process(turn, &self.config, &mut response).await?;
            }

            match self.settle_turn(turn, out, response).await? {
                Some(outcome) => return Ok(outcome),
                None => continue,
            }
        }
    }

    /// Emit this turn's events and execute its calls. Returns `None` when
    /// another turn is needed.
    async fn settle_turn(
        &self,
        turn: &TurnContext,
        out: &EventSender,
        response: LlmResponse,
    ) -> Result<Option<FlowOutcome>, EngineError> {
        let calls = response.function_calls();
        let text = response.joined_text();

        if calls.is_empty() && response.is_final {
            if let Some(key) = &self.config.output_key {
                turn.ctx.state_set(key.clone(), json!(text));
                out.emit(turn.event(EventContent::StateDelta {
                    key: key.clone(),
                    value: json!(text),
                }))
                .await?;
            }
            out.emit(
                turn.event(EventContent::Text { text }).final_event(),
            )
            .await?;
            return Ok(Some(FlowOutcome::Completed));
        }

        if !text.is_empty() {
            out.emit(turn.event(EventContent::Text { text })).await?;
        }

        for call in &calls {
            out.emit(turn.event(EventContent::FunctionCall { call: call.clone() }))
                .await?;
        }

        if calls.is_empty() {
            // Partial turn: the model has more to say.
            return Ok(None);
        }

        let (transfers, tool_calls): (Vec<ToolCall>, Vec<ToolCall>) = calls
            .into_iter()
            .partition(|c| c.name == TRANSFER_TO_AGENT);

        if !tool_calls.is_empty() {
            let outcomes = execute_calls(turn, &self.config, &tool_calls, out).await?;
            let mut escalated = false;
            for (call, result) in outcomes {
                escalated |= result.escalate;
                let mut event = turn.event(EventContent::FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: result.value,
                    is_error: result.is_error,
                });
                event.escalate = result.escalate;
                out.emit(event).await?;
            }
            if escalated {
                return Ok(Some(FlowOutcome::Escalated));
            }
        }

        if let Some((transfer, extras)) = transfers.split_first() {
            // One transfer per turn; the rest still get an id-paired error
            // response so no call is left dangling in history.
            for extra in extras {
                tracing::warn!(from = %turn.agent_name, call_id = %extra.id, "Extra transfer call ignored");
                out.emit(turn.event(EventContent::FunctionResponse {
                    id: extra.id.clone(),
                    name: extra.name.clone(),
                    response: json!({
                        "error": {
                            "code": tool_codes::TRANSFER_ERROR,
                            "message": "only one transfer per turn; this call was ignored",
                        }
                    }),
                    is_error: true,
                }))
                .await?;
            }
            if let Some(outcome) = self.settle_transfer(turn, out, transfer).await? {
                return Ok(Some(outcome));
            }
        }

        Ok(None)
    }

    /// Validate a transfer call. A known target ends this flow with a
    /// `Transfer` outcome; an unknown one becomes a tool-error response the
    /// model can correct on the next turn.
    async fn settle_transfer(
        &self,
        turn: &TurnContext,
        out: &EventSender,
        call: &ToolCall,
    ) -> Result<Option<FlowOutcome>, EngineError> {
        let target = call
            .args
            .get("agent_name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let known = !target.is_empty()
            && target != turn.agent_name
            && turn.ctx.find_agent(&target).is_some();

        if known {
            tracing::info!(from = %turn.agent_name, to = %target, "Transferring control");
            out.emit(turn.event(EventContent::FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({"transferring_to": target}),
                is_error: false,
            }))
            .await?;
            Ok(Some(FlowOutcome::Transfer { target }))
        } else {
            tracing::warn!(from = %turn.agent_name, to = %target, "Unknown transfer target");
            out.emit(turn.event(EventContent::FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({
                    "error": {
                        "code": tool_codes::TRANSFER_ERROR,
                        "message": format!("unknown transfer target '{target}'"),
                    }
                }),
                is_error: true,
            }))
            .await?;
            Ok(None)
        }
    }

    async fn emit_terminal_error(
        &self,
        turn: &TurnContext,
        out: &EventSender,
        err: &EngineError,
    ) -> Result<(), EngineError> {
        out.emit(
            turn.event(EventContent::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            })
            .final_event(),
        )
        .await?;
        Ok(())
    }
}
