//! Composite-agent checkpoints.
//!
//! Each composite variant owns its own checkpoint shape, keyed by agent
//! name in the invocation's checkpoint map. A checkpoint is written only at
//! the variant's well-defined points; absence means start-from-beginning.

use serde::{Deserialize, Serialize};

/// Resumability snapshot for one composite agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentState {
    /// Written by a Sequential agent after each child completes.
    Sequential { current_index: usize },

    /// Written by a Loop agent after each child completes within an
    /// iteration.
    Loop {
        iteration: usize,
        current_index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_tag() {
        let state = AgentState::Loop {
            iteration: 2,
            current_index: 1,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["kind"], "loop");
        let back: AgentState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
