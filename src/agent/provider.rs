//! Language-model provider seam.
//!
//! The runtime never talks to a model endpoint directly; everything goes
//! through [`ModelProvider`]. The bundled [`EchoModel`] is a
//! deterministic development implementation; real providers live outside
//! the core and are selected by configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{HistoryEntry, ResponseContent};

/// Declared signature of one agent-facing tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// One model invocation.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryEntry>,
    pub user_text: String,
    pub tools: Vec<ToolDescriptor>,
}

/// Result of one tool call made by the model.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub tool_name: String,
    pub success: bool,
    pub contents: Vec<ResponseContent>,
}

/// Structured output of one model invocation.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    /// The model's final text.
    pub text: String,
    pub tool_calls: Vec<ToolCallOutcome>,
    /// Set when the model asks for a new skill to be generated.
    pub needs_learning: bool,
    pub learning_topic: Option<String>,
}

/// Provider failures, all transient from the pipeline's point of view.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model provider unavailable: {0}")]
    Unavailable(String),

    #[error("model request failed: {0}")]
    Request(String),

    #[error("model request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// An external language-model endpoint.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier for logs and telemetry.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError>;
}

/// Deterministic development provider: echoes the user text and calls no
/// tools. Keeps the full pipeline exercisable without a model endpoint.
#[derive(Debug, Clone, Default)]
pub struct EchoModel;

#[async_trait]
impl ModelProvider for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError> {
        Ok(ModelOutput {
            text: format!("Echo: {}", request.user_text),
            ..ModelOutput::default()
        })
    }
}
