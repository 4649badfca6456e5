//! Event protocol for agent execution.
//!
//! `Event` is the single atomic unit of agent output. Every event carries
//! the branch it was produced under; the branch-prefix rule in
//! [`Branch::is_prefix_of`] is what keeps independently delegated
//! sub-conversations from seeing each other's history.
//!
//! Events are immutable once appended to the [`log::EventLog`]; the log
//! assigns the per-invocation sequence number at append time.

pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolCall;

pub use log::EventLog;

/// Dot-separated ancestor path identifying which sub-execution an event
/// belongs to. The root branch is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branch(String);

impl Branch {
    /// The root branch (empty path).
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Derive a child branch: `parent.name`, or just `name` at the root.
    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    /// Whether this branch is an ancestor of (or equal to) `other`.
    ///
    /// Events on branch B are visible to a consumer on branch C iff B is a
    /// prefix of C. The root branch is a prefix of everything.
    pub fn is_prefix_of(&self, other: &Branch) -> bool {
        if self.0.is_empty() {
            return true;
        }
        other.0 == self.0 || other.0.starts_with(&format!("{}.", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Branch {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Content of a single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventContent {
    /// Text produced by an agent (or the user).
    Text { text: String },

    /// A function call issued during a model turn. Reserved framework calls
    /// (`transfer_to_agent`, `request_credential`, `request_confirmation`)
    /// use the same shape.
    FunctionCall { call: ToolCall },

    /// The outcome of a function call, paired by `id` to its call.
    FunctionResponse {
        id: String,
        name: String,
        response: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A write to the shared session state.
    StateDelta { key: String, value: Value },

    /// A terminal failure, carrying the machine-readable kind.
    Error { kind: String, message: String },
}

/// One atomic unit of agent output.
///
/// `sequence` is zero until the event is appended to the log; the log is
/// the only party that assigns sequence numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// Name of the agent (or `"user"`) that produced this event.
    pub author: String,
    pub branch: Branch,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub content: EventContent,
    /// Set on the last event an execution produces.
    pub is_final: bool,
    /// Structured stop signal: a Loop ancestor stops iterating when it sees
    /// this.
    pub escalate: bool,
}

impl Event {
    pub fn new(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        branch: Branch,
        content: EventContent,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            branch,
            sequence: 0,
            timestamp: Utc::now(),
            content,
            is_final: false,
            escalate: false,
        }
    }

    pub fn text(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        branch: Branch,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            invocation_id,
            author,
            branch,
            EventContent::Text { text: text.into() },
        )
    }

    pub fn final_event(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }

    /// The text carried by this event, if any.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            EventContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.content, EventContent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_branch_is_prefix_of_everything() {
        let root = Branch::root();
        assert!(root.is_prefix_of(&root));
        assert!(root.is_prefix_of(&Branch::from("root.a")));
        assert!(root.is_prefix_of(&Branch::from("root.a.b")));
    }

    #[test]
    fn prefix_respects_segment_boundaries() {
        let a = Branch::from("root.a");
        assert!(a.is_prefix_of(&Branch::from("root.a")));
        assert!(a.is_prefix_of(&Branch::from("root.a.b")));
        assert!(!a.is_prefix_of(&Branch::from("root.ab")));
        assert!(!a.is_prefix_of(&Branch::from("root.b")));
        assert!(!a.is_prefix_of(&Branch::from("root")));
    }

    #[test]
    fn child_derivation() {
        assert_eq!(Branch::root().child("root").as_str(), "root");
        assert_eq!(Branch::from("root").child("a").as_str(), "root.a");
        assert_eq!(Branch::from("root.a").child("b").as_str(), "root.a.b");
    }

    #[test]
    fn event_content_round_trips_through_json() {
        let event = Event::text("inv-1", "writer", Branch::from("root.a"), "hello");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.author, "writer");
        assert_eq!(back.branch, Branch::from("root.a"));
        assert_eq!(back.as_text(), Some("hello"));
    }
}
