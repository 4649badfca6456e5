//! Static agent tree with name lookup.
//!
//! The tree is built once from the root's statically declared children and
//! is acyclic by construction. Transfer edges are resolved at runtime by
//! name lookup against this table, never by live references, so agents may
//! delegate to ancestors, descendants, or siblings without holding cycles.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;

use super::Agent;

/// Statically defined agent tree for one runner.
pub struct AgentTree {
    root: Arc<dyn Agent>,
    by_name: HashMap<String, Arc<dyn Agent>>,
}

impl AgentTree {
    /// Build the lookup table by walking `sub_agents` recursively.
    /// Duplicate names are rejected: each name must own a disjoint
    /// checkpoint key.
    pub fn new(root: Arc<dyn Agent>) -> Result<Self, EngineError> {
        let mut by_name = HashMap::new();
        let mut stack = vec![root.clone()];
        while let Some(agent) = stack.pop() {
            let name = agent.name().to_string();
            if by_name.insert(name.clone(), agent.clone()).is_some() {
                return Err(EngineError::Tree(format!("duplicate agent name '{name}'")));
            }
            stack.extend(agent.sub_agents());
        }
        Ok(Self { root, by_name })
    }

    /// Tree containing a single agent with no children.
    pub fn solo(root: Arc<dyn Agent>) -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(root.name().to_string(), root.clone());
        Self { root, by_name }
    }

    pub fn root(&self) -> Arc<dyn Agent> {
        self.root.clone()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.by_name.get(name).cloned()
    }

    /// All agent names, sorted for deterministic tool declarations.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}
