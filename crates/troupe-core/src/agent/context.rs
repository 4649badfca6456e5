//! Per-invocation execution state.
//!
//! `InvocationContext` is created once per user-facing request and shared
//! by reference into every delegation and forked branch. The checkpoint map
//! and event log are the only shared-write structures; each agent name owns
//! a disjoint checkpoint key, so composite execution needs no cross-agent
//! locking beyond the log's own append safety.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::event::{Branch, Event, EventLog};

use super::state::AgentState;
use super::tree::AgentTree;
use super::Agent;

/// Atomic model-call counter with a configured cap.
pub struct CostTracker {
    calls: AtomicUsize,
    limit: Option<usize>,
}

impl CostTracker {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            limit,
        }
    }

    /// Charge one model call. Fails *before* the call when the budget is
    /// already spent, so a limit of N allows exactly N calls.
    pub fn charge(&self) -> Result<usize, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.limit {
            Some(limit) if n > limit => Err(EngineError::CostLimitExceeded { limit }),
            _ => Ok(n),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// External inputs fed back into a running invocation in response to the
/// reserved side-channel calls.
#[derive(Debug, Clone)]
pub enum ExternalInput {
    /// Grants a credential for the rest of the invocation.
    Credential { key: String, value: Value },
    /// Answers a confirmation request for one specific call.
    Confirmation { call_id: String, approved: bool },
}

struct ContextInner {
    invocation_id: String,
    log: Arc<EventLog>,
    cost: CostTracker,
    checkpoints: DashMap<String, AgentState>,
    state: DashMap<String, Value>,
    credentials: DashMap<String, Value>,
    confirmations: DashMap<String, bool>,
    /// Bumped on every grant write so concurrent waiters re-check their
    /// predicate even when a different waiter consumed the input.
    grants: watch::Sender<u64>,
    tree: Arc<AgentTree>,
    end: CancellationToken,
    inputs: Mutex<mpsc::UnboundedReceiver<ExternalInput>>,
}

/// Shared per-request execution state. Cheap to clone; all clones observe
/// the same log, cost counter, and checkpoint map.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

impl InvocationContext {
    /// Create a fresh context. Returns the input sender used to answer
    /// side-channel requests.
    pub fn new(
        tree: Arc<AgentTree>,
        max_llm_calls: Option<usize>,
    ) -> (Self, mpsc::UnboundedSender<ExternalInput>) {
        Self::with_log(tree, max_llm_calls, Arc::new(EventLog::new()), HashMap::new(), HashMap::new())
    }

    /// Rebuild a context from persisted state (resume path). The full event
    /// log is reloaded because branch filtering needs it.
    pub fn resume(
        tree: Arc<AgentTree>,
        max_llm_calls: Option<usize>,
        events: Vec<Event>,
        checkpoints: HashMap<String, AgentState>,
        state: HashMap<String, Value>,
    ) -> (Self, mpsc::UnboundedSender<ExternalInput>) {
        Self::with_log(
            tree,
            max_llm_calls,
            Arc::new(EventLog::from_events(events)),
            checkpoints,
            state,
        )
    }

    fn with_log(
        tree: Arc<AgentTree>,
        max_llm_calls: Option<usize>,
        log: Arc<EventLog>,
        checkpoints: HashMap<String, AgentState>,
        state: HashMap<String, Value>,
    ) -> (Self, mpsc::UnboundedSender<ExternalInput>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            inner: Arc::new(ContextInner {
                invocation_id: uuid::Uuid::new_v4().to_string(),
                log,
                cost: CostTracker::new(max_llm_calls),
                checkpoints: checkpoints.into_iter().collect(),
                state: state.into_iter().collect(),
                credentials: DashMap::new(),
                confirmations: DashMap::new(),
                grants: watch::channel(0).0,
                tree,
                end: CancellationToken::new(),
                inputs: Mutex::new(input_rx),
            }),
        };
        (ctx, input_tx)
    }

    pub fn invocation_id(&self) -> &str {
        &self.inner.invocation_id
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.inner.log
    }

    /// Events visible to an execution on `branch`.
    pub fn visible_events(&self, branch: &Branch) -> Vec<Event> {
        self.inner.log.visible(branch)
    }

    pub fn cost(&self) -> &CostTracker {
        &self.inner.cost
    }

    // ── Checkpoints ────────────────────────────────────────────────────

    pub fn checkpoint(&self, agent: &str) -> Option<AgentState> {
        self.inner.checkpoints.get(agent).map(|s| s.clone())
    }

    pub fn set_checkpoint(&self, agent: &str, state: AgentState) {
        self.inner.checkpoints.insert(agent.to_string(), state);
    }

    pub fn clear_checkpoint(&self, agent: &str) {
        self.inner.checkpoints.remove(agent);
    }

    pub fn checkpoints_snapshot(&self) -> HashMap<String, AgentState> {
        self.inner
            .checkpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ── Session state ──────────────────────────────────────────────────

    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.inner.state.get(key).map(|v| v.clone())
    }

    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        self.inner.state.insert(key.into(), value);
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ── Credential / confirmation grants ───────────────────────────────

    pub fn credential(&self, key: &str) -> Option<Value> {
        self.inner.credentials.get(key).map(|v| v.clone())
    }

    pub fn grant_credential(&self, key: impl Into<String>, value: Value) {
        self.inner.credentials.insert(key.into(), value);
        self.inner.grants.send_modify(|v| *v += 1);
    }

    pub fn confirmation(&self, call_id: &str) -> Option<bool> {
        self.inner.confirmations.get(call_id).map(|v| *v)
    }

    pub fn grant_confirmation(&self, call_id: impl Into<String>, approved: bool) {
        self.inner.confirmations.insert(call_id.into(), approved);
        self.inner.grants.send_modify(|v| *v += 1);
    }

    /// Subscribe to grant-store writes. Subscribe *before* checking a grant
    /// predicate: any write after the subscription is observed by
    /// [`watch::Receiver::changed`], so a waiter whose input was consumed
    /// (and folded) by another waiter still wakes up to re-check.
    pub fn grant_updates(&self) -> watch::Receiver<u64> {
        self.inner.grants.subscribe()
    }

    /// Fold one external input into the grant stores.
    pub fn apply_input(&self, input: ExternalInput) {
        match input {
            ExternalInput::Credential { key, value } => self.grant_credential(key, value),
            ExternalInput::Confirmation { call_id, approved } => {
                self.grant_confirmation(call_id, approved)
            }
        }
    }

    /// Await the next external input. Waiters hold the receiver lock one at
    /// a time; inputs meant for a different waiter are folded into the
    /// grant stores by [`apply_input`](Self::apply_input) so that waiter
    /// sees them on its next check.
    pub async fn next_input(&self) -> Option<ExternalInput> {
        self.inner.inputs.lock().await.recv().await
    }

    // ── Tree and lifecycle ─────────────────────────────────────────────

    pub fn tree(&self) -> &Arc<AgentTree> {
        &self.inner.tree
    }

    pub fn find_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.inner.tree.find(name)
    }

    pub fn end_signal(&self) -> &CancellationToken {
        &self.inner.end
    }

    /// Signal end-invocation: all active branches stop at their next
    /// suspension point; in-flight tools finish.
    pub fn end(&self) {
        self.inner.end.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.inner.end.is_cancelled()
    }
}
