//! Agent composition.
//!
//! Every agent variant exposes the same contract: `run(ctx, branch, out)`
//! streams events downstream (with backpressure) and resolves to a
//! [`RunOutcome`]. Composition strategies each get their own concrete type
//! rather than a deep hierarchy:
//!
//! - [`llm_agent::LlmAgent`] — leaf wrapping one flow; optional delegation
//!   source via the reserved transfer tool
//! - [`sequential::SequentialAgent`] — children in order, checkpointed
//! - [`parallel::ParallelAgent`] — forked branch-isolated children, merged
//! - [`loop_agent::LoopAgent`] — repeated sequential body, escalation-aware

pub mod channel;
pub mod context;
pub mod llm_agent;
pub mod loop_agent;
pub mod parallel;
pub mod sequential;
pub mod state;
pub mod tree;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::event::Branch;

pub use channel::{event_channel, EventSender, EventStream};
pub use context::{CostTracker, ExternalInput, InvocationContext};
pub use llm_agent::{LlmAgent, LlmAgentConfig};
pub use loop_agent::LoopAgent;
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;
pub use state::AgentState;
pub use tree::AgentTree;

/// How an agent's execution ended (when it did not fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The agent (or a descendant) raised the structured stop signal.
    /// Composites skip their remaining work and propagate it upward; a Loop
    /// additionally stops iterating.
    Escalated,
}

/// Polymorphic agent contract.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Statically declared children. The tree walks these to build the
    /// name-lookup table used for delegation.
    fn sub_agents(&self) -> Vec<Arc<dyn Agent>> {
        Vec::new()
    }

    /// Execute under `branch`, streaming events through `out`.
    async fn run(
        &self,
        ctx: InvocationContext,
        branch: Branch,
        out: EventSender,
    ) -> Result<RunOutcome, EngineError>;
}
