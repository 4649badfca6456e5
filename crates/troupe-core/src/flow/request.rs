//! Mutable request accumulator built by the request stages.
//!
//! Stage order is fixed; later stages may read but not reorder earlier
//! contributions, so every mutator here appends or sets — nothing removes
//! or reshuffles. `clear_tools` is the one sanctioned exception: the
//! output-schema stage disables tool use for structured-output turns.

use serde::{Deserialize, Serialize};

use crate::model::{ContentBlock, GenerationConfig, ToolDeclaration};

/// Assembled model request for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub generation: GenerationConfig,
    /// Ordered system/instruction blocks: global → static → dynamic →
    /// identity → planning → code-execution.
    pub system: Vec<String>,
    /// Ordered conversation blocks from branch-filtered history.
    pub contents: Vec<ContentBlock>,
    pub tools: Vec<ToolDeclaration>,
    /// Cache directive: number of leading system blocks safe to cache
    /// across turns. Set by the cache-configuration stage from the marker
    /// the instruction stage left behind.
    pub cache_prefix_blocks: Option<usize>,
    /// Marker written by the instruction stage: how many of the system
    /// blocks pushed so far are static (cacheable) text.
    pub(crate) cacheable_system_blocks: usize,
}

impl LlmRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, block: impl Into<String>) {
        self.system.push(block.into());
    }

    /// Push a system block and extend the cacheable prefix over it.
    pub fn push_cacheable_system(&mut self, block: impl Into<String>) {
        self.system.push(block.into());
        self.cacheable_system_blocks = self.system.len();
    }

    pub fn push_content(&mut self, block: ContentBlock) {
        self.contents.push(block);
    }

    pub fn declare_tool(&mut self, tool: ToolDeclaration) {
        self.tools.push(tool);
    }

    pub fn clear_tools(&mut self) {
        self.tools.clear();
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}
