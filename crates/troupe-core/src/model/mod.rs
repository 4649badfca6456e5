//! Model backend seam.
//!
//! These are wire-adjacent types for talking to an LLM backend, not domain
//! types. The engine assembles an [`crate::flow::LlmRequest`], hands it to a
//! [`ModelBackend`], and consumes the [`LlmResponse`] through the response
//! stages. The backend itself (HTTP, streaming, retries) lives outside the
//! core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::LlmRequest;
use crate::tools::ToolCall;

/// Message role in assembled request content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One part of a content block or model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },

    FunctionCall {
        id: String,
        name: String,
        args: Value,
    },

    FunctionResponse {
        id: String,
        name: String,
        response: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An ordered block of request content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ContentBlock {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }
}

/// Tool definition declared to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Generation configuration forwarded to the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Structured-output schema; when set the turn expects a single JSON
    /// answer and declares no tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

/// Model output for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub parts: Vec<Part>,
    /// Finish indicator: the model considers this turn complete.
    pub is_final: bool,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
            is_final: true,
        }
    }

    /// Function calls issued in this response, in part order.
    pub fn function_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { id, name, args } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text parts.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Opaque model collaborator: consumes an assembled request, returns one
/// response. Synchronous-or-streaming is the backend's business; the core
/// only sees the settled turn.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}
