//! Instruction/template collaborator.
//!
//! Resolves global, static, and dynamic instruction text for a turn. The
//! core consumes only the resolved blocks, injected in the fixed order
//! global → static → dynamic; static text is the cacheable prefix, dynamic
//! text changes per turn and is never cached.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::context::InvocationContext;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder regex"));

/// Resolved instruction blocks for one turn.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInstructions {
    /// Workflow-wide instruction, shared by every agent.
    pub global: Option<String>,
    /// Agent instruction that does not change across turns (cacheable).
    pub static_text: Option<String>,
    /// Per-turn instruction, after variable substitution.
    pub dynamic: Option<String>,
}

/// Collaborator that resolves instruction text and performs variable
/// substitution. Output is opaque to the core.
#[async_trait]
pub trait InstructionProvider: Send + Sync {
    async fn resolve(&self, ctx: &InvocationContext) -> anyhow::Result<ResolvedInstructions>;
}

/// Substitute `{key}` placeholders from the shared session state.
/// Unknown keys are left in place so prompt bugs stay visible.
pub fn substitute(template: &str, ctx: &InvocationContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match ctx.state_get(key) {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Template-backed provider: fixed global/static text plus a dynamic
/// template substituted from session state each turn.
#[derive(Debug, Clone, Default)]
pub struct TemplateInstructions {
    pub global: Option<String>,
    pub static_text: Option<String>,
    pub dynamic_template: Option<String>,
}

impl TemplateInstructions {
    pub fn static_only(text: impl Into<String>) -> Self {
        Self {
            static_text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl InstructionProvider for TemplateInstructions {
    async fn resolve(&self, ctx: &InvocationContext) -> anyhow::Result<ResolvedInstructions> {
        Ok(ResolvedInstructions {
            global: self.global.clone(),
            static_text: self.static_text.clone(),
            dynamic: self
                .dynamic_template
                .as_deref()
                .map(|t| substitute(t, ctx)),
        })
    }
}
