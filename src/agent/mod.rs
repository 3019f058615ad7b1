//! The agent layer: model provider seam, layered prompt assembly,
//! summarization, and the brain that ties them together.

pub mod brain;
pub mod prompt;
pub mod provider;
pub mod summarizer;

pub use brain::{AgentBrain, BrainConfig, BrainError};
pub use prompt::{PromptBuilder, PromptSection};
pub use provider::{
    EchoModel, ModelOutput, ModelProvider, ModelRequest, ProviderError, ToolCallOutcome,
    ToolDescriptor,
};
pub use summarizer::{ConversationSummary, Summarizer};
