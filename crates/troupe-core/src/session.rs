//! Persistence seam for resumable invocations.
//!
//! The engine persists two things: the append-only event log and a
//! key-value snapshot (checkpoints + session state). Storage format and
//! transport are the store's business; an in-memory implementation backs
//! tests and single-process use.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::state::AgentState;
use crate::event::Event;

/// Everything needed to resume an invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub events: Vec<Event>,
    pub checkpoints: HashMap<String, AgentState>,
    pub state: HashMap<String, Value>,
}

/// Append-log plus snapshot store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record one emitted event under `session_id`.
    async fn append_event(&self, session_id: &str, event: &Event) -> anyhow::Result<()>;

    /// Replace the stored snapshot for `session_id`.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;

    async fn load_snapshot(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append_event(&self, session_id: &str, event: &Event) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock();
        let snapshot = sessions.entry(session_id.to_string()).or_insert_with(|| {
            SessionSnapshot {
                session_id: session_id.to_string(),
                ..SessionSnapshot::default()
            }
        });
        snapshot.events.push(event.clone());
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .insert(snapshot.session_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        Ok(self.sessions.lock().get(session_id).cloned())
    }
}
