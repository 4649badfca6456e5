//! troupe-core
//!
//! Orchestration engine for trees of LLM-backed agents. A fixed processor
//! chain ([`flow::Flow`]) assembles each model turn; composition agents
//! ([`agent::SequentialAgent`], [`agent::ParallelAgent`],
//! [`agent::LoopAgent`], delegating [`agent::LlmAgent`]) combine leaves into
//! workflows over a branch-isolated, backpressured event log. Checkpoints
//! make interrupted invocations resumable, and the tool pipeline contains
//! every tool fault as a structured result the model can react to.
//!
//! External collaborators plug in at trait seams: [`model::ModelBackend`],
//! [`tools::Tool`], [`planner::Planner`], [`instructions::InstructionProvider`],
//! [`code_exec::CodeExecutor`], [`session::SessionStore`].

pub mod agent;
pub mod code_exec;
pub mod error;
pub mod event;
pub mod flow;
pub mod instructions;
pub mod model;
pub mod planner;
pub mod runner;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{
    Agent, AgentState, AgentTree, CostTracker, EventSender, EventStream, ExternalInput,
    InvocationContext, LlmAgent, LlmAgentConfig, LoopAgent, ParallelAgent, RunOutcome,
    SequentialAgent,
};
pub use error::EngineError;
pub use event::{Branch, Event, EventContent, EventLog};
pub use flow::{Flow, FlowConfig, FlowOutcome, LlmRequest};
pub use model::{ContentBlock, GenerationConfig, LlmResponse, ModelBackend, Part, Role};
pub use runner::{RunHandle, Runner, RunnerConfig};
pub use session::{InMemorySessionStore, SessionSnapshot, SessionStore};
pub use tools::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
