//! Inbound message validation.
//!
//! The validator rejects messages that violate size, attachment, or user
//! policies before any further processing. It never mutates the message.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::messages::InboundMessage;

/// Kind tag for a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    TextTooLong,
    TextEmpty,
    TooManyAttachments,
    AttachmentTooLarge,
    InvalidAttachmentType,
    InvalidChannel,
    InvalidUser,
}

/// A single validation failure with a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    pub field: Option<String>,
}

/// Outcome of validating one message.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable messages for building a rejection response.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    fn push(&mut self, kind: ValidationErrorKind, message: impl Into<String>, field: &str) {
        self.errors.push(ValidationError {
            kind,
            message: message.into(),
            field: Some(field.to_string()),
        });
    }
}

/// Validation limits and policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub max_text_length: usize,
    pub max_attachments: usize,
    pub max_attachment_size: u64,
    pub require_text: bool,
    pub allowed_attachment_types: HashSet<String>,
    pub blocked_users: HashSet<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        let allowed = [
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "audio/mpeg",
            "audio/wav",
            "audio/ogg",
            "audio/webm",
            "audio/mp4",
            "video/mp4",
            "video/webm",
            "video/quicktime",
            "application/pdf",
            "text/plain",
            "text/markdown",
            "application/json",
        ];
        Self {
            max_text_length: 50_000,
            max_attachments: 10,
            max_attachment_size: 50 * 1024 * 1024,
            require_text: false,
            allowed_attachment_types: allowed.iter().map(|s| (*s).to_string()).collect(),
            blocked_users: HashSet::new(),
        }
    }
}

/// Validates incoming messages before processing.
#[derive(Debug, Clone, Default)]
pub struct MessageValidator {
    config: ValidatorConfig,
}

impl MessageValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a message against the configured policies.
    pub fn validate(&self, message: &InboundMessage) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.check_text(message, &mut result);
        self.check_attachments(message, &mut result);
        self.check_channel(message, &mut result);
        self.check_user(message, &mut result);

        if !result.is_valid() {
            warn!(
                message_id = %message.id,
                errors = ?result.errors.iter().map(|e| e.kind).collect::<Vec<_>>(),
                "message validation failed"
            );
        }

        result
    }

    fn check_text(&self, message: &InboundMessage, result: &mut ValidationResult) {
        let text = message.text.as_deref().unwrap_or("");

        if self.config.require_text && text.is_empty() && !message.has_attachments() {
            result.push(
                ValidationErrorKind::TextEmpty,
                "Message text is required",
                "text",
            );
            return;
        }

        if text.len() > self.config.max_text_length {
            result.push(
                ValidationErrorKind::TextTooLong,
                format!(
                    "Message text exceeds maximum length of {} characters",
                    self.config.max_text_length
                ),
                "text",
            );
        }
    }

    fn check_attachments(&self, message: &InboundMessage, result: &mut ValidationResult) {
        if message.attachments.is_empty() {
            return;
        }

        if message.attachments.len() > self.config.max_attachments {
            result.push(
                ValidationErrorKind::TooManyAttachments,
                format!("Too many attachments (max: {})", self.config.max_attachments),
                "attachments",
            );
        }

        for (i, attachment) in message.attachments.iter().enumerate() {
            if attachment.size > self.config.max_attachment_size {
                result.push(
                    ValidationErrorKind::AttachmentTooLarge,
                    format!("Attachment '{}' exceeds maximum size", attachment.filename),
                    &format!("attachments[{i}]"),
                );
            }

            if !self.type_allowed(&attachment.content_type) {
                result.push(
                    ValidationErrorKind::InvalidAttachmentType,
                    format!("Attachment type '{}' not allowed", attachment.content_type),
                    &format!("attachments[{i}]"),
                );
            }
        }
    }

    // Allowed either as an exact type or via a `kind/*` category wildcard.
    fn type_allowed(&self, content_type: &str) -> bool {
        if self.config.allowed_attachment_types.is_empty() {
            return true;
        }
        if self.config.allowed_attachment_types.contains(content_type) {
            return true;
        }
        content_type
            .split('/')
            .next()
            .map(|category| {
                self.config
                    .allowed_attachment_types
                    .contains(&format!("{category}/*"))
            })
            .unwrap_or(false)
    }

    fn check_channel(&self, message: &InboundMessage, result: &mut ValidationResult) {
        if message.channel_id.as_ref().trim().is_empty() {
            result.push(
                ValidationErrorKind::InvalidChannel,
                "Channel ID is required",
                "channel_id",
            );
        }
    }

    fn check_user(&self, message: &InboundMessage, result: &mut ValidationResult) {
        if let Some(user_id) = &message.user_id {
            if self.config.blocked_users.contains(user_id) {
                result.push(ValidationErrorKind::InvalidUser, "User is blocked", "user_id");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::ChannelId;
    use crate::messages::{Attachment, GatewayKind};

    fn message_with_text(text: &str) -> InboundMessage {
        let mut msg = InboundMessage::new(
            ChannelId::try_new("sock-1".to_string()).unwrap(),
            GatewayKind::Socket,
        );
        msg.text = Some(text.to_string());
        msg
    }

    #[test]
    fn accepts_plain_text() {
        let validator = MessageValidator::default();
        assert!(validator.validate(&message_with_text("hello")).is_valid());
    }

    #[test]
    fn rejects_oversized_text() {
        let validator = MessageValidator::new(ValidatorConfig {
            max_text_length: 8,
            ..ValidatorConfig::default()
        });
        let result = validator.validate(&message_with_text("far too long for the limit"));
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].kind, ValidationErrorKind::TextTooLong);
    }

    #[test]
    fn rejects_blocked_user() {
        let mut config = ValidatorConfig::default();
        config.blocked_users.insert("mallory".to_string());
        let validator = MessageValidator::new(config);

        let mut msg = message_with_text("hi");
        msg.user_id = Some("mallory".to_string());
        let result = validator.validate(&msg);
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].kind, ValidationErrorKind::InvalidUser);
    }

    #[test]
    fn rejects_disallowed_attachment_type() {
        let validator = MessageValidator::default();
        let mut msg = message_with_text("with file");
        msg.attachments
            .push(Attachment::from_bytes("x.bin", "application/x-msdownload", vec![0u8; 4]));
        let result = validator.validate(&msg);
        assert!(!result.is_valid());
        assert_eq!(
            result.errors[0].kind,
            ValidationErrorKind::InvalidAttachmentType
        );
    }

    #[test]
    fn category_wildcard_allows_whole_kind() {
        let mut config = ValidatorConfig::default();
        config.allowed_attachment_types = ["image/*".to_string()].into();
        let validator = MessageValidator::new(config);

        let mut msg = message_with_text("pic");
        msg.attachments
            .push(Attachment::from_bytes("p.png", "image/png", vec![0u8; 4]));
        assert!(validator.validate(&msg).is_valid());

        let mut msg = message_with_text("song");
        msg.attachments
            .push(Attachment::from_bytes("s.mp3", "audio/mpeg", vec![0u8; 4]));
        assert!(!validator.validate(&msg).is_valid());
    }

    #[test]
    fn rejects_too_many_attachments() {
        let validator = MessageValidator::new(ValidatorConfig {
            max_attachments: 1,
            ..ValidatorConfig::default()
        });
        let mut msg = message_with_text("files");
        for i in 0..2 {
            msg.attachments.push(Attachment::from_bytes(
                format!("f{i}.txt"),
                "text/plain",
                vec![0u8; 4],
            ));
        }
        let result = validator.validate(&msg);
        assert!(result
            .errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::TooManyAttachments));
    }

    #[test]
    fn require_text_accepts_attachment_only_messages() {
        let validator = MessageValidator::new(ValidatorConfig {
            require_text: true,
            ..ValidatorConfig::default()
        });
        let mut msg = message_with_text("");
        msg.text = None;
        msg.attachments
            .push(Attachment::from_bytes("n.txt", "text/plain", vec![1, 2]));
        assert!(validator.validate(&msg).is_valid());
    }

    #[test]
    fn require_text_rejects_empty_messages() {
        let validator = MessageValidator::new(ValidatorConfig {
            require_text: true,
            ..ValidatorConfig::default()
        });
        let mut msg = message_with_text("");
        msg.text = None;
        let result = validator.validate(&msg);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::TextEmpty);
    }
}
