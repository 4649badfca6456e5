//! Planner collaborator.
//!
//! Distinguishes internal reasoning from user-visible text. The core treats
//! both directions as opaque: `build_instruction` contributes one system
//! block during request assembly, `process_response` filters the parts of a
//! model response before they become events.

use crate::agent::context::InvocationContext;
use crate::model::Part;

/// Planning collaborator plugged into the flow's fixed stages.
pub trait Planner: Send + Sync {
    /// Optional planning instruction, injected after identity and history
    /// are finalized.
    fn build_instruction(&self, ctx: &InvocationContext) -> Option<String>;

    /// Filter/transform response parts; typically strips internal
    /// reasoning so it never reaches user-visible events.
    fn process_response(&self, parts: Vec<Part>) -> Vec<Part>;
}

/// Tag-based planner: asks the model to mark reasoning with a prefix tag
/// and strips tagged segments from responses.
pub struct TaggedPlanner {
    reasoning_tag: String,
}

impl TaggedPlanner {
    pub fn new(reasoning_tag: impl Into<String>) -> Self {
        Self {
            reasoning_tag: reasoning_tag.into(),
        }
    }
}

impl Default for TaggedPlanner {
    fn default() -> Self {
        Self::new("/*REASONING*/")
    }
}

impl Planner for TaggedPlanner {
    fn build_instruction(&self, _ctx: &InvocationContext) -> Option<String> {
        Some(format!(
            "Before answering, plan your approach. Prefix any internal reasoning with {} on its own paragraph; it will not be shown to the user.",
            self.reasoning_tag
        ))
    }

    fn process_response(&self, parts: Vec<Part>) -> Vec<Part> {
        parts
            .into_iter()
            .filter(|part| match part {
                Part::Text { text } => !text.trim_start().starts_with(&self.reasoning_tag),
                _ => true,
            })
            .collect()
    }
}
