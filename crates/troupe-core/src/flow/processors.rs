//! The fixed request/response stages.
//!
//! Request order: model/config setup → auth → tool-confirmation setup →
//! instruction resolution → identity → history assembly → cache
//! configuration → planning injection → code-execution preparation →
//! output-schema preparation. Response order: planning handling →
//! code-execution handling.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::code_exec::extract_code;
use crate::error::EngineError;
use crate::event::EventContent;
use crate::model::{ContentBlock, Part, Role, ToolDeclaration};
use crate::tools::builtin::{
    is_side_channel, EXECUTE_CODE, REQUEST_CONFIRMATION, REQUEST_CREDENTIAL, TRANSFER_TO_AGENT,
};

use super::request::LlmRequest;
use super::{FlowConfig, TurnContext};

/// One request-build stage.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError>;
}

/// One response-handling stage.
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        turn: &TurnContext,
        config: &FlowConfig,
        response: &mut crate::model::LlmResponse,
    ) -> Result<(), EngineError>;
}

/// The fixed request chain, in order.
pub fn request_chain() -> Vec<Arc<dyn RequestProcessor>> {
    vec![
        Arc::new(ModelSetup),
        Arc::new(AuthPreprocessor),
        Arc::new(ConfirmationPreprocessor),
        Arc::new(InstructionResolution),
        Arc::new(Identity),
        Arc::new(HistoryAssembly),
        Arc::new(CacheConfiguration),
        Arc::new(PlanningInjection),
        Arc::new(CodeExecutionPrep),
        Arc::new(OutputSchemaPrep),
    ]
}

/// The fixed response chain, in order.
pub fn response_chain() -> Vec<Arc<dyn ResponseProcessor>> {
    vec![Arc::new(PlanningResponse), Arc::new(CodeExecutionResponse)]
}

// ── Request stages ─────────────────────────────────────────────────────

/// Stage 1: model id, generation config, and tool declarations.
struct ModelSetup;

#[async_trait]
impl RequestProcessor for ModelSetup {
    fn name(&self) -> &'static str {
        "model_setup"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        request.model = config.model.clone();
        request.generation = config.generation.clone();

        for declaration in config.tools.declarations() {
            request.declare_tool(declaration);
        }

        if config.transfer_enabled {
            let targets: Vec<String> = turn
                .ctx
                .tree()
                .names()
                .into_iter()
                .filter(|n| n != &turn.agent_name)
                .collect();
            request.declare_tool(ToolDeclaration {
                name: TRANSFER_TO_AGENT.to_string(),
                description: "Transfer the conversation to another agent.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "agent_name": { "type": "string", "enum": targets }
                    },
                    "required": ["agent_name"],
                    "additionalProperties": false
                }),
            });
        }
        Ok(())
    }
}

/// Stage 2: fold credential responses from visible history back into the
/// invocation's grant store, so resumed invocations keep their grants.
struct AuthPreprocessor;

#[async_trait]
impl RequestProcessor for AuthPreprocessor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _config: &FlowConfig,
        _request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        for event in turn.ctx.visible_events(&turn.branch) {
            if let EventContent::FunctionResponse {
                name, response, is_error: false, ..
            } = &event.content
            {
                if name == REQUEST_CREDENTIAL {
                    if let (Some(key), Some(value)) = (
                        response.get("key").and_then(serde_json::Value::as_str),
                        response.get("value"),
                    ) {
                        turn.ctx.grant_credential(key, value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Stage 3: same as auth, for confirmation responses.
struct ConfirmationPreprocessor;

#[async_trait]
impl RequestProcessor for ConfirmationPreprocessor {
    fn name(&self) -> &'static str {
        "tool_confirmation"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _config: &FlowConfig,
        _request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        for event in turn.ctx.visible_events(&turn.branch) {
            if let EventContent::FunctionResponse {
                name, response, is_error: false, ..
            } = &event.content
            {
                if name == REQUEST_CONFIRMATION {
                    if let (Some(call_id), Some(approved)) = (
                        response.get("call_id").and_then(serde_json::Value::as_str),
                        response.get("approved").and_then(serde_json::Value::as_bool),
                    ) {
                        turn.ctx.grant_confirmation(call_id, approved);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Stage 4: resolved instructions, global → static (cacheable) → dynamic.
struct InstructionResolution;

#[async_trait]
impl RequestProcessor for InstructionResolution {
    fn name(&self) -> &'static str {
        "instructions"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        let Some(provider) = &config.instructions else {
            return Ok(());
        };
        let resolved = provider
            .resolve(&turn.ctx)
            .await
            .map_err(|e| EngineError::Collaborator(format!("instruction provider: {e}")))?;

        if let Some(global) = resolved.global {
            request.push_cacheable_system(global);
        }
        if let Some(static_text) = resolved.static_text {
            request.push_cacheable_system(static_text);
        }
        if let Some(dynamic) = resolved.dynamic {
            request.push_system(dynamic);
        }
        Ok(())
    }
}

/// Stage 5: who the agent is.
struct Identity;

#[async_trait]
impl RequestProcessor for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        let identity = if turn.agent_description.is_empty() {
            format!("You are {}.", turn.agent_name)
        } else {
            format!("You are {}. {}", turn.agent_name, turn.agent_description)
        };
        request.push_system(identity);
        Ok(())
    }
}

/// Stage 6: branch-filtered history becomes the ordered content blocks.
struct HistoryAssembly;

#[async_trait]
impl RequestProcessor for HistoryAssembly {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        _config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        for event in turn.ctx.visible_events(&turn.branch) {
            if let Some(block) = content_block_for(&event, &turn.agent_name) {
                request.push_content(block);
            }
        }
        Ok(())
    }
}

/// Map one visible event to a request content block. Side-channel traffic,
/// state deltas, and error events never reach the model.
fn content_block_for(event: &crate::event::Event, agent_name: &str) -> Option<ContentBlock> {
    match &event.content {
        EventContent::Text { text } => {
            let (role, text) = if event.author == agent_name {
                (Role::Assistant, text.clone())
            } else if event.author == "user" {
                (Role::User, text.clone())
            } else {
                // Another agent's words, attributed for context.
                (Role::User, format!("[{}] {}", event.author, text))
            };
            Some(ContentBlock::text(role, text))
        }
        EventContent::FunctionCall { call } if !is_side_channel(&call.name) => {
            Some(ContentBlock::new(
                Role::Assistant,
                vec![Part::FunctionCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                }],
            ))
        }
        EventContent::FunctionResponse {
            id,
            name,
            response,
            is_error,
        } if !is_side_channel(name) => Some(ContentBlock::new(
            Role::Tool,
            vec![Part::FunctionResponse {
                id: id.clone(),
                name: name.clone(),
                response: response.clone(),
                is_error: *is_error,
            }],
        )),
        _ => None,
    }
}

/// Stage 7: turn the instruction stage's marker into the cache directive.
struct CacheConfiguration;

#[async_trait]
impl RequestProcessor for CacheConfiguration {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process(
        &self,
        _turn: &TurnContext,
        _config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        if request.cacheable_system_blocks > 0 {
            request.cache_prefix_blocks = Some(request.cacheable_system_blocks);
        }
        Ok(())
    }
}

/// Stage 8: planner instruction, after identity and history are final.
struct PlanningInjection;

#[async_trait]
impl RequestProcessor for PlanningInjection {
    fn name(&self) -> &'static str {
        "planning"
    }

    async fn process(
        &self,
        turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        if let Some(planner) = &config.planner {
            if let Some(instruction) = planner.build_instruction(&turn.ctx) {
                request.push_system(instruction);
            }
        }
        Ok(())
    }
}

/// Stage 9: code-execution preparation.
struct CodeExecutionPrep;

#[async_trait]
impl RequestProcessor for CodeExecutionPrep {
    fn name(&self) -> &'static str {
        "code_execution"
    }

    async fn process(
        &self,
        _turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        if let Some(executor) = &config.code_executor {
            if let Some(instruction) = executor.instruction() {
                request.push_system(instruction);
            }
        }
        Ok(())
    }
}

/// Stage 10: structured output. A schema-bound turn expects one JSON
/// answer, so tool use is disabled.
struct OutputSchemaPrep;

#[async_trait]
impl RequestProcessor for OutputSchemaPrep {
    fn name(&self) -> &'static str {
        "output_schema"
    }

    async fn process(
        &self,
        _turn: &TurnContext,
        config: &FlowConfig,
        request: &mut LlmRequest,
    ) -> Result<(), EngineError> {
        if let Some(schema) = &config.output_schema {
            request.generation.response_schema = Some(schema.clone());
            request.generation.response_mime_type = Some("application/json".to_string());
            request.clear_tools();
        }
        Ok(())
    }
}

// ── Response stages ────────────────────────────────────────────────────

/// Response stage 1: let the planner separate reasoning from answer.
struct PlanningResponse;

#[async_trait]
impl ResponseProcessor for PlanningResponse {
    fn name(&self) -> &'static str {
        "planning_response"
    }

    async fn process(
        &self,
        _turn: &TurnContext,
        config: &FlowConfig,
        response: &mut crate::model::LlmResponse,
    ) -> Result<(), EngineError> {
        if let Some(planner) = &config.planner {
            response.parts = planner.process_response(std::mem::take(&mut response.parts));
        }
        Ok(())
    }
}

/// Response stage 2: a detected code block becomes a reserved
/// `execute_code` call, so the normal tool machinery runs it and the next
/// turn sees the output.
struct CodeExecutionResponse;

#[async_trait]
impl ResponseProcessor for CodeExecutionResponse {
    fn name(&self) -> &'static str {
        "code_execution_response"
    }

    async fn process(
        &self,
        _turn: &TurnContext,
        config: &FlowConfig,
        response: &mut crate::model::LlmResponse,
    ) -> Result<(), EngineError> {
        if config.code_executor.is_none() || !response.function_calls().is_empty() {
            return Ok(());
        }
        if let Some(code) = extract_code(&response.joined_text()) {
            response.parts.push(Part::FunctionCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: EXECUTE_CODE.to_string(),
                args: json!({ "code": code }),
            });
        }
        Ok(())
    }
}
