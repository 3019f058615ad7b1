//! Attachment processing: convert non-text attachments to text via
//! external providers.
//!
//! Conversions run concurrently per message and the processor waits for
//! all of them. A failed conversion never fails the message: the
//! attachment is ignored with a warning recorded in its metadata.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::warn;

use crate::messages::{Attachment, InboundMessage};

/// Failure from a conversion backend.
#[derive(Debug, Error)]
#[error("transcription failed: {0}")]
pub struct TranscriptionError(pub String);

/// External audio-to-text converter.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, attachment: &Attachment) -> Result<String, TranscriptionError>;
}

/// Converts a message's convertible attachments into appended text.
#[derive(Default)]
pub struct AttachmentProcessor {
    transcriber: Option<Arc<dyn TranscriptionProvider>>,
}

impl AttachmentProcessor {
    pub fn new(transcriber: Option<Arc<dyn TranscriptionProvider>>) -> Self {
        Self { transcriber }
    }

    /// Process every convertible attachment. Appends each transcript to
    /// the message's cleaned text with a per-attachment marker.
    pub async fn process(&self, message: &mut InboundMessage) {
        let Some(transcriber) = &self.transcriber else {
            return;
        };

        let convertible: Vec<usize> = message
            .attachments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_audio())
            .map(|(i, _)| i)
            .collect();
        if convertible.is_empty() {
            return;
        }

        let conversions = convertible.iter().map(|&index| {
            let attachment = message.attachments[index].clone();
            let transcriber = Arc::clone(transcriber);
            async move { (index, transcriber.transcribe(&attachment).await) }
        });

        let mut transcripts: Vec<(usize, String)> = Vec::new();
        for (index, outcome) in join_all(conversions).await {
            match outcome {
                Ok(text) => transcripts.push((index, text)),
                Err(error) => {
                    let attachment = &mut message.attachments[index];
                    warn!(
                        message_id = %message.id,
                        filename = %attachment.filename,
                        %error,
                        "attachment conversion failed, ignoring attachment"
                    );
                    attachment.metadata.insert(
                        "transcription_failed".to_string(),
                        serde_json::Value::String(error.to_string()),
                    );
                }
            }
        }

        for (index, text) in transcripts {
            let marker = format!(
                "[transcript:{}] {}",
                message.attachments[index].filename, text
            );
            append_text(message, &marker);
        }
    }
}

fn append_text(message: &mut InboundMessage, addition: &str) {
    if let Some(directives) = &mut message.directives {
        if directives.clean_text.is_empty() {
            directives.clean_text = addition.to_string();
        } else {
            directives.clean_text = format!("{} {addition}", directives.clean_text);
        }
        return;
    }

    match &mut message.text {
        Some(text) if !text.is_empty() => *text = format!("{text} {addition}"),
        _ => message.text = Some(addition.to_string()),
    }
}
