//! Conversation summarization through the model provider.
//!
//! Produces the dual summary pair: who the user is, and what has been
//! discussed. Any internal failure yields empty summaries instead of an
//! error; the caller decides whether empties are worth persisting.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::{SummaryError, SummarySource, SummaryUpdate};
use crate::messages::HistoryEntry;

use super::provider::{ModelProvider, ModelRequest};

const SUMMARIZATION_PROMPT: &str = r#"You are a conversation summarization agent.

Rules:
1. Be concise and objective.
2. Do not invent information; use only the provided text.
3. At most 2-3 sentences per summary.
4. Return ONLY a JSON object with keys "user_summary" and "conversation_summary".

Create two summaries:
- user_summary: who the user is, what they want, their main interest
- conversation_summary: the conversation context and main topics discussed"#;

/// The dual summary pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(default)]
    pub user_summary: String,
    #[serde(default)]
    pub conversation_summary: String,
}

/// Summarizes turn lists (or observation lists) into the dual pair.
pub struct Summarizer {
    provider: Arc<dyn ModelProvider>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Summarize conversation turns, folding in the existing summaries.
    pub async fn summarize(
        &self,
        turns: &[HistoryEntry],
        existing_user_summary: Option<&str>,
        existing_conversation_summary: Option<&str>,
    ) -> ConversationSummary {
        let mut parts = Vec::new();
        if let Some(existing) = existing_user_summary {
            parts.push(format!("Previous user summary: {existing}"));
        }
        if let Some(existing) = existing_conversation_summary {
            parts.push(format!("Previous conversation summary: {existing}"));
        }
        parts.push("\nConversation to summarize:".to_string());
        for turn in turns {
            parts.push(format!("{}: {}", turn.role.to_uppercase(), turn.content));
        }

        self.run(parts.join("\n")).await
    }

    /// Same interface for an observation list.
    pub async fn summarize_observations(
        &self,
        observations: &[(String, String)],
        existing_user_summary: Option<&str>,
    ) -> ConversationSummary {
        let mut parts = Vec::new();
        if let Some(existing) = existing_user_summary {
            parts.push(format!("Previous summary: {existing}"));
        }
        parts.push("\nObservations:".to_string());
        for (kind, text) in observations {
            parts.push(format!("{kind}: {text}"));
        }

        self.run(parts.join("\n")).await
    }

    async fn run(&self, input: String) -> ConversationSummary {
        let request = ModelRequest {
            system_prompt: SUMMARIZATION_PROMPT.to_string(),
            user_text: input,
            ..ModelRequest::default()
        };

        match self.provider.complete(&request).await {
            Ok(output) => parse_summary(&output.text),
            Err(error) => {
                warn!(%error, "summarization call failed");
                ConversationSummary::default()
            }
        }
    }
}

/// Parse the model's text as the summary JSON; tolerate surrounding
/// prose by trying the first `{...}` block. Unparseable output yields
/// empty summaries.
fn parse_summary(text: &str) -> ConversationSummary {
    if let Ok(summary) = serde_json::from_str::<ConversationSummary>(text) {
        return summary;
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(summary) = serde_json::from_str::<ConversationSummary>(&text[start..=end]) {
                return summary;
            }
        }
    }

    warn!("summarizer output not parseable as summary JSON");
    ConversationSummary::default()
}

#[async_trait]
impl SummarySource for Summarizer {
    async fn summarize(
        &self,
        turns: &[HistoryEntry],
        existing_user_summary: Option<&str>,
        existing_conversation_summary: Option<&str>,
    ) -> Result<SummaryUpdate, SummaryError> {
        let summary = Summarizer::summarize(
            self,
            turns,
            existing_user_summary,
            existing_conversation_summary,
        )
        .await;
        Ok(SummaryUpdate {
            user_summary: summary.user_summary,
            conversation_summary: summary.conversation_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::{ModelOutput, ProviderError};

    struct ScriptedModel {
        reply: String,
        fail: bool,
    }

    #[async_trait]
    impl ModelProvider for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &ModelRequest) -> Result<ModelOutput, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unavailable("down".to_string()));
            }
            Ok(ModelOutput {
                text: self.reply.clone(),
                ..ModelOutput::default()
            })
        }
    }

    fn turns() -> Vec<HistoryEntry> {
        vec![
            HistoryEntry {
                role: "user".to_string(),
                content: "I am building a boat".to_string(),
            },
            HistoryEntry {
                role: "assistant".to_string(),
                content: "Nice, what kind?".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn parses_clean_json_reply() {
        let summarizer = Summarizer::new(Arc::new(ScriptedModel {
            reply: r#"{"user_summary": "boat builder", "conversation_summary": "boats"}"#
                .to_string(),
            fail: false,
        }));
        let summary = summarizer.summarize(&turns(), None, None).await;
        assert_eq!(summary.user_summary, "boat builder");
        assert_eq!(summary.conversation_summary, "boats");
    }

    #[tokio::test]
    async fn extracts_json_from_surrounding_prose() {
        let summarizer = Summarizer::new(Arc::new(ScriptedModel {
            reply: r#"Here you go: {"user_summary": "u", "conversation_summary": "c"} done"#
                .to_string(),
            fail: false,
        }));
        let summary = summarizer.summarize(&turns(), None, None).await;
        assert_eq!(summary.user_summary, "u");
    }

    #[tokio::test]
    async fn provider_failure_yields_empty_summaries() {
        let summarizer = Summarizer::new(Arc::new(ScriptedModel {
            reply: String::new(),
            fail: true,
        }));
        let summary = summarizer.summarize(&turns(), Some("prior"), None).await;
        assert_eq!(summary.user_summary, "");
        assert_eq!(summary.conversation_summary, "");
    }

    #[tokio::test]
    async fn garbage_output_yields_empty_summaries() {
        let summarizer = Summarizer::new(Arc::new(ScriptedModel {
            reply: "not json at all".to_string(),
            fail: false,
        }));
        let summary = summarizer.summarize(&turns(), None, None).await;
        assert_eq!(summary.user_summary, "");
    }
}
