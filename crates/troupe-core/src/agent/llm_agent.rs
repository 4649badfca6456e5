//! Leaf agent: one processor chain around one model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::code_exec::CodeExecutor;
use crate::error::EngineError;
use crate::event::Branch;
use crate::flow::{Flow, FlowConfig, FlowOutcome, TurnContext};
use crate::instructions::InstructionProvider;
use crate::model::{GenerationConfig, ModelBackend};
use crate::planner::Planner;
use crate::tools::ToolRegistry;

use super::channel::EventSender;
use super::context::InvocationContext;
use super::{Agent, RunOutcome};

/// Construction-time configuration for an [`LlmAgent`].
pub struct LlmAgentConfig {
    pub name: String,
    pub description: String,
    pub model: String,
    pub generation: GenerationConfig,
    pub backend: Arc<dyn ModelBackend>,
    pub instructions: Option<Arc<dyn InstructionProvider>>,
    pub planner: Option<Arc<dyn Planner>>,
    pub code_executor: Option<Arc<dyn CodeExecutor>>,
    pub output_schema: Option<Value>,
    pub output_key: Option<String>,
    pub tools: Arc<ToolRegistry>,
    /// Expose the reserved transfer tool even without declared children
    /// (peer delegation anywhere in the tree).
    pub transfer: bool,
    pub sub_agents: Vec<Arc<dyn Agent>>,
}

impl LlmAgentConfig {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: model.into(),
            generation: GenerationConfig::default(),
            backend,
            instructions: None,
            planner: None,
            code_executor: None,
            output_schema: None,
            output_key: None,
            tools: Arc::new(ToolRegistry::new()),
            transfer: false,
            sub_agents: Vec::new(),
        }
    }
}

/// Leaf agent wrapping a [`Flow`]. With children (or `transfer` set) it also
/// acts as a delegation source: the model may hand control to any agent in
/// the tree via the reserved transfer tool.
pub struct LlmAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    flow: Flow,
}

impl LlmAgent {
    pub fn new(config: LlmAgentConfig) -> Self {
        let transfer_enabled = config.transfer || !config.sub_agents.is_empty();
        let flow = Flow::new(FlowConfig {
            model: config.model,
            generation: config.generation,
            backend: config.backend,
            instructions: config.instructions,
            planner: config.planner,
            code_executor: config.code_executor,
            output_schema: config.output_schema,
            output_key: config.output_key,
            tools: config.tools,
            transfer_enabled,
        });
        Self {
            name: config.name,
            description: config.description,
            sub_agents: config.sub_agents,
            flow,
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.sub_agents.clone()
    }

    async fn run(
        &self,
        ctx: InvocationContext,
        branch: Branch,
        out: EventSender,
    ) -> Result<RunOutcome, EngineError> {
        let turn = TurnContext {
            ctx: ctx.clone(),
            branch: branch.clone(),
            agent_name: self.name.clone(),
            agent_description: self.description.clone(),
        };
        tracing::debug!(agent = %self.name, branch = %branch, "LlmAgent starting");

        match self.flow.run(&turn, &out).await? {
            FlowOutcome::Completed => Ok(RunOutcome::Completed),
            FlowOutcome::Escalated => Ok(RunOutcome::Escalated),
            FlowOutcome::Transfer { target } => {
                // The flow already validated the target against the tree.
                let agent = ctx.find_agent(&target).ok_or_else(|| {
                    EngineError::Tree(format!("transfer target '{target}' disappeared"))
                })?;
                // The target runs on a derived branch; the parent's history
                // stays visible to it, not the other way around.
                agent.run(ctx.clone(), branch.child(&target), out).await
            }
        }
    }
}
