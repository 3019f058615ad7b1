//! Message types flowing between gateways, the bus, and the pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directives::{ParsedDirectives, PromptMode, ToolProfile};
use crate::domain_types::{ChannelId, CorrelationId, MessageId};

/// Kind of content an inbound message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Audio,
    Image,
    Video,
    File,
}

/// Processing status of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

/// Transport tag for a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Terminal,
    Socket,
}

impl GatewayKind {
    /// Prefix applied to channel ids originating from this gateway.
    pub fn channel_prefix(self) -> &'static str {
        match self {
            GatewayKind::Terminal => "term",
            GatewayKind::Socket => "sock",
        }
    }
}

/// Response kinds a gateway can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCapability {
    Text,
    Audio,
    Image,
    Video,
}

/// Kind of a single content item in an agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseContentKind {
    Error,
    Warning,
    Info,
    Success,
    Text,
    Image,
    Video,
    Audio,
    File,
}

/// Binary or referenced payload attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub url: Option<String>,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Attachment {
    /// Creates an attachment holding in-memory bytes.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            content_type: content_type.into(),
            size: data.len() as u64,
            url: None,
            data: Some(data),
            metadata: HashMap::new(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.content_type.starts_with("audio/")
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video/")
    }
}

/// A message received from a transport, alive for one pipeline traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: Option<String>,
    pub gateway: GatewayKind,
    pub kind: MessageKind,
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<MessageId>,
    pub directives: Option<ParsedDirectives>,
}

impl InboundMessage {
    /// Creates a pending text message on the given channel.
    pub fn new(channel_id: ChannelId, gateway: GatewayKind) -> Self {
        Self {
            id: MessageId::generate(),
            channel_id,
            user_id: None,
            gateway,
            kind: MessageKind::Text,
            text: None,
            attachments: Vec::new(),
            status: MessageStatus::Pending,
            metadata: HashMap::new(),
            correlation_id: CorrelationId::generate(),
            timestamp: Utc::now(),
            reply_to: None,
            directives: None,
        }
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// The message content the pipeline should act on: the directive-free
    /// cleaned text once directives were parsed, the raw text otherwise.
    pub fn content(&self) -> &str {
        match &self.directives {
            Some(d) if !d.clean_text.is_empty() => &d.clean_text,
            _ => self.text.as_deref().unwrap_or(""),
        }
    }

    pub fn prompt_mode(&self) -> PromptMode {
        self.directives
            .as_ref()
            .map(|d| d.prompt_mode)
            .unwrap_or_default()
    }

    pub fn tool_profile(&self) -> ToolProfile {
        self.directives
            .as_ref()
            .map(|d| d.tool_profile)
            .unwrap_or_default()
    }

    pub fn elevated(&self) -> bool {
        self.directives.as_ref().is_some_and(|d| d.elevated)
    }
}

/// A response on its way back through a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub reply_to: Option<MessageId>,
    pub gateway: GatewayKind,
    pub response_type: ResponseCapability,
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
}

/// One typed content item produced by the agent or a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseContent {
    pub kind: ResponseContentKind,
    pub text: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ResponseContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseContentKind::Text,
            text: Some(text.into()),
            url: None,
            path: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseContentKind::Error,
            text: Some(text.into()),
            url: None,
            path: None,
            metadata: HashMap::new(),
        }
    }
}

/// Structured output of one agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub contents: Vec<ResponseContent>,
    pub tools_called: Vec<String>,
    pub skills_used: Vec<String>,
    pub needs_learning: bool,
    pub learning_topic: Option<String>,
}

impl AgentResponse {
    pub fn add_text(&mut self, text: impl Into<String>) {
        self.contents.push(ResponseContent::text(text));
    }

    pub fn add_error(&mut self, text: impl Into<String>) {
        self.contents.push(ResponseContent::error(text));
    }

    /// All textual content (including error/warning text) joined with
    /// newlines; what a text-only gateway delivers.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Down-convert into an outbound message the target gateway can
    /// deliver. Non-text contents are carried as attachments only when
    /// the gateway declares the matching capability; otherwise they
    /// degrade to a textual reference.
    pub fn to_outbound(
        &self,
        channel_id: ChannelId,
        gateway: GatewayKind,
        capabilities: &std::collections::HashSet<ResponseCapability>,
        reply_to: Option<MessageId>,
        correlation_id: CorrelationId,
    ) -> OutboundMessage {
        let mut text_parts: Vec<String> = Vec::new();
        let mut attachments = Vec::new();

        for content in &self.contents {
            let capability = match content.kind {
                ResponseContentKind::Image => Some(ResponseCapability::Image),
                ResponseContentKind::Audio => Some(ResponseCapability::Audio),
                ResponseContentKind::Video => Some(ResponseCapability::Video),
                _ => None,
            };

            match capability {
                Some(cap) if capabilities.contains(&cap) => {
                    if let Some(url) = &content.url {
                        attachments.push(Attachment {
                            id: Uuid::new_v4(),
                            filename: content
                                .path
                                .clone()
                                .unwrap_or_else(|| "attachment".to_string()),
                            content_type: media_type_for(cap).to_string(),
                            size: 0,
                            url: Some(url.clone()),
                            data: None,
                            metadata: content.metadata.clone(),
                        });
                    } else if let Some(text) = &content.text {
                        text_parts.push(text.clone());
                    }
                }
                Some(_) => {
                    // Gateway cannot deliver this media kind.
                    if let Some(reference) = content.url.as_ref().or(content.path.as_ref()) {
                        text_parts.push(format!("[media: {reference}]"));
                    }
                }
                None => {
                    if let Some(text) = &content.text {
                        text_parts.push(text.clone());
                    }
                }
            }
        }

        OutboundMessage {
            id: MessageId::generate(),
            channel_id,
            reply_to,
            gateway,
            response_type: ResponseCapability::Text,
            text: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            attachments,
            metadata: HashMap::new(),
            correlation_id: Some(correlation_id),
            timestamp: Utc::now(),
        }
    }
}

fn media_type_for(capability: ResponseCapability) -> &'static str {
    match capability {
        ResponseCapability::Text => "text/plain",
        ResponseCapability::Image => "image/png",
        ResponseCapability::Audio => "audio/mpeg",
        ResponseCapability::Video => "video/mp4",
    }
}

/// Context handed to the agent brain for one invocation.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub history: Vec<HistoryEntry>,
    pub summary: Option<String>,
    pub user_summary: Option<String>,
    pub conversation_summary: Option<String>,
    pub available_tools: Vec<String>,
    pub estimated_tokens: usize,
    pub prompt_mode: PromptMode,
    pub tool_profile: ToolProfile,
    pub show_reasoning: bool,
    pub elevated: bool,
}

/// One prior turn as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Outcome of one pipeline traversal.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub success: bool,
    pub response: Option<OutboundMessage>,
    pub error: Option<String>,
    pub tools_called: Vec<String>,
    pub skills_used: Vec<String>,
    pub processing_time_ms: u64,
    pub turn_persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn channel() -> ChannelId {
        ChannelId::try_new("sock-test".to_string()).unwrap()
    }

    #[test]
    fn content_prefers_clean_text() {
        let mut msg = InboundMessage::new(channel(), GatewayKind::Socket);
        msg.text = Some("/verbose hello".to_string());
        msg.directives = Some(crate::directives::parse_directives("/verbose hello"));
        assert_eq!(msg.content(), "hello");
    }

    #[test]
    fn content_falls_back_to_raw_text() {
        let mut msg = InboundMessage::new(channel(), GatewayKind::Socket);
        msg.text = Some("hello".to_string());
        assert_eq!(msg.content(), "hello");
    }

    #[test]
    fn to_outbound_joins_text_contents() {
        let mut response = AgentResponse::default();
        response.add_text("first");
        response.add_text("second");

        let caps: HashSet<ResponseCapability> = [ResponseCapability::Text].into();
        let correlation = CorrelationId::generate();
        let out = response.to_outbound(channel(), GatewayKind::Socket, &caps, None, correlation);

        assert_eq!(out.text.as_deref(), Some("first\nsecond"));
        assert_eq!(out.correlation_id, Some(correlation));
        assert!(out.attachments.is_empty());
    }

    #[test]
    fn to_outbound_degrades_unsupported_media_to_text_reference() {
        let mut response = AgentResponse::default();
        response.contents.push(ResponseContent {
            kind: ResponseContentKind::Image,
            text: None,
            url: Some("http://example/img.png".to_string()),
            path: None,
            metadata: HashMap::new(),
        });

        let caps: HashSet<ResponseCapability> = [ResponseCapability::Text].into();
        let out = response.to_outbound(
            channel(),
            GatewayKind::Terminal,
            &caps,
            None,
            CorrelationId::generate(),
        );

        assert!(out.attachments.is_empty());
        assert_eq!(out.text.as_deref(), Some("[media: http://example/img.png]"));
    }

    #[test]
    fn to_outbound_keeps_supported_media_as_attachment() {
        let mut response = AgentResponse::default();
        response.contents.push(ResponseContent {
            kind: ResponseContentKind::Image,
            text: None,
            url: Some("http://example/img.png".to_string()),
            path: None,
            metadata: HashMap::new(),
        });

        let caps: HashSet<ResponseCapability> =
            [ResponseCapability::Text, ResponseCapability::Image].into();
        let out = response.to_outbound(
            channel(),
            GatewayKind::Socket,
            &caps,
            None,
            CorrelationId::generate(),
        );

        assert_eq!(out.attachments.len(), 1);
        assert_eq!(
            out.attachments[0].url.as_deref(),
            Some("http://example/img.png")
        );
    }
}
