//! Bidirectional socket gateway over WebSocket.
//!
//! Each connection gets a fresh `sock-<uuid>` channel identity. Inbound
//! frames are JSON per the wire contract; outbound delivery resolves the
//! connection by channel id. Unknown targets are a logged drop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain_types::ChannelId;
use crate::messages::{
    Attachment, GatewayKind, InboundMessage, MessageKind, OutboundMessage, ResponseCapability,
};

use super::{
    GatewayError, GatewayProvider, MessageHandler, StopSignal, kind_for_media_type,
    media_type_for_extension,
};

/// One inbound wire frame.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    /// Accepted aliases for `text`.
    content: Option<String>,
    message: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    filename: Option<String>,
    content_type: Option<String>,
    data: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// State shared with connection handlers.
struct SocketShared {
    handler: RwLock<Option<MessageHandler>>,
    clients: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl SocketShared {
    fn dispatch(&self, message: InboundMessage) {
        let handler = self.handler.read().expect("handler lock").clone();
        match handler {
            Some(handler) => handler(message),
            None => error!(message_id = %message.id, "no message handler installed"),
        }
    }

    fn process_raw(&self, raw: &str, client_id: &str, channel_id: &str) {
        let Ok(channel) = ChannelId::try_new(channel_id.to_string()) else {
            return;
        };

        let Ok(frame) = serde_json::from_str::<InboundFrame>(raw) else {
            // Not JSON: treat the whole frame as plain text.
            let mut message = InboundMessage::new(channel, GatewayKind::Socket);
            message.text = Some(raw.to_string());
            message
                .metadata
                .insert("client_id".to_string(), client_id.into());
            self.dispatch(message);
            return;
        };

        let text = frame.text.or(frame.content).or(frame.message);
        let mut kind = match frame.kind.as_deref() {
            Some("image") => MessageKind::Image,
            Some("video") => MessageKind::Video,
            Some("audio") => MessageKind::Audio,
            Some("file") => MessageKind::File,
            _ => MessageKind::Text,
        };

        let mut attachments = Vec::new();
        for raw_attachment in frame.attachments {
            let Some(attachment) = decode_attachment(raw_attachment) else {
                continue;
            };
            if kind == MessageKind::Text {
                kind = kind_for_media_type(&attachment.content_type);
            }
            attachments.push(attachment);
        }

        if text.as_deref().unwrap_or("").is_empty() && attachments.is_empty() {
            return;
        }

        let mut message = InboundMessage::new(channel, GatewayKind::Socket);
        message.user_id = frame.user_id;
        message.kind = kind;
        message.text = text;
        message.attachments = attachments;
        message
            .metadata
            .insert("client_id".to_string(), client_id.into());

        info!(
            message_id = %message.id,
            client_id,
            attachments = message.attachments.len(),
            "socket message received"
        );
        self.dispatch(message);
    }
}

fn decode_attachment(raw: RawAttachment) -> Option<Attachment> {
    let filename = raw.filename?;
    let data = BASE64.decode(raw.data?.as_bytes()).ok()?;

    let content_type = raw
        .content_type
        .unwrap_or_else(|| media_type_for_extension(std::path::Path::new(&filename)).to_string());

    let mut attachment = Attachment::from_bytes(filename, content_type, data);
    attachment.metadata = raw.metadata;
    Some(attachment)
}

fn outbound_frame(message: &OutboundMessage, frame_type: &str) -> String {
    let mut frame = serde_json::json!({
        "type": frame_type,
        "id": message.id,
        "text": message.text,
        "timestamp": message.timestamp.to_rfc3339(),
    });
    if let Some(reply_to) = message.reply_to {
        frame["reply_to"] = serde_json::json!(reply_to);
    }
    if !message.attachments.is_empty() {
        frame["attachments"] = serde_json::json!(
            message
                .attachments
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "id": a.id,
                        "filename": a.filename,
                        "content_type": a.content_type,
                        "url": a.url,
                    })
                })
                .collect::<Vec<_>>()
        );
    }
    frame.to_string()
}

/// WebSocket server gateway.
pub struct SocketGateway {
    name: String,
    host: String,
    port: u16,
    shared: Arc<SocketShared>,
    stop: StopSignal,
    server: Mutex<Option<JoinHandle<()>>>,
    bound_addr: RwLock<Option<SocketAddr>>,
}

impl SocketGateway {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            shared: Arc::new(SocketShared {
                handler: RwLock::new(None),
                clients: DashMap::new(),
            }),
            stop: StopSignal::new(),
            server: Mutex::new(None),
            bound_addr: RwLock::new(None),
        }
    }

    /// The actually bound address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.read().expect("addr lock")
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    /// Send a frame to every connected client; returns how many accepted
    /// it.
    pub fn broadcast(&self, message: &OutboundMessage) -> usize {
        let frame = outbound_frame(message, "broadcast");
        let mut delivered = 0;
        for entry in self.shared.clients.iter() {
            if entry.value().send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

async fn ws_entry(
    State(shared): State<Arc<SocketShared>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_connection(shared, socket))
}

async fn handle_connection(shared: Arc<SocketShared>, socket: WebSocket) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let channel_id = format!("sock-{client_id}");

    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    shared.clients.insert(channel_id.clone(), outbox.clone());
    info!(client_id, channel_id, "socket client connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "client_id": client_id,
        "channel_id": channel_id,
    });
    let _ = outbox.send(welcome.to_string());

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => shared.process_raw(text.as_str(), &client_id, &channel_id),
            Message::Binary(bytes) => {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    shared.process_raw(text, &client_id, &channel_id);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    shared.clients.remove(&channel_id);
    writer.abort();
    info!(client_id, "socket client disconnected");
}

#[async_trait]
impl GatewayProvider for SocketGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn gateway_kind(&self) -> GatewayKind {
        GatewayKind::Socket
    }

    fn response_capabilities(&self) -> std::collections::HashSet<ResponseCapability> {
        [
            ResponseCapability::Text,
            ResponseCapability::Image,
            ResponseCapability::Audio,
            ResponseCapability::Video,
        ]
        .into()
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.shared.handler.write().expect("handler lock") = Some(handler);
    }

    fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), GatewayError> {
        self.stop.reset();

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Bind { addr: addr.clone(), source })?;
        let bound = listener.local_addr().map_err(GatewayError::Io)?;
        *self.bound_addr.write().expect("addr lock") = Some(bound);

        let app = Router::new()
            .route("/", get(ws_entry))
            .route("/ws", get(ws_entry))
            .with_state(Arc::clone(&self.shared));

        let stop = self.stop.clone();
        let server = tokio::spawn(async move {
            let shutdown = async move { stop.wait().await };
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(%error, "socket gateway server error");
            }
        });
        *self.server.lock().expect("server lock") = Some(server);

        info!(gateway = %self.name, %bound, "socket gateway started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.stop.trigger();

        let server = self.server.lock().expect("server lock").take();
        if let Some(mut server) = server {
            // Graceful shutdown first, then a hard stop.
            if tokio::time::timeout(std::time::Duration::from_secs(5), &mut server)
                .await
                .is_err()
            {
                warn!(gateway = %self.name, "socket server did not stop in time");
                server.abort();
            }
        }

        self.shared.clients.clear();
        info!(gateway = %self.name, "socket gateway stopped");
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        let channel_key = message.channel_id.as_ref();
        let Some(client) = self.shared.clients.get(channel_key) else {
            warn!(channel_id = %message.channel_id, "no socket client for channel");
            return false;
        };

        let frame = outbound_frame(message, "message");
        match client.send(frame) {
            Ok(()) => {
                info!(message_id = %message.id, channel_id = %message.channel_id, "socket message sent");
                true
            }
            Err(error) => {
                error!(%error, channel_id = %message.channel_id, "socket send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn shared_with_sink() -> (Arc<SocketShared>, Arc<StdMutex<Vec<InboundMessage>>>) {
        let shared = Arc::new(SocketShared {
            handler: RwLock::new(None),
            clients: DashMap::new(),
        });
        let seen: Arc<StdMutex<Vec<InboundMessage>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        *shared.handler.write().unwrap() = Some(Arc::new(move |msg| {
            sink.lock().unwrap().push(msg);
        }) as MessageHandler);
        (shared, seen)
    }

    #[tokio::test]
    async fn parses_text_frames() {
        let (shared, seen) = shared_with_sink();
        shared.process_raw(
            r#"{"type": "text", "text": "hello", "user_id": "u1"}"#,
            "client",
            "sock-client",
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text.as_deref(), Some("hello"));
        assert_eq!(seen[0].user_id.as_deref(), Some("u1"));
        assert_eq!(seen[0].kind, MessageKind::Text);
    }

    #[tokio::test]
    async fn accepts_text_aliases() {
        let (shared, seen) = shared_with_sink();
        shared.process_raw(r#"{"content": "aliased"}"#, "client", "sock-client");
        assert_eq!(seen.lock().unwrap()[0].text.as_deref(), Some("aliased"));
    }

    #[tokio::test]
    async fn non_json_frames_become_plain_text() {
        let (shared, seen) = shared_with_sink();
        shared.process_raw("just words", "client", "sock-client");
        assert_eq!(seen.lock().unwrap()[0].text.as_deref(), Some("just words"));
    }

    #[tokio::test]
    async fn decodes_base64_attachments_and_detects_kind() {
        let (shared, seen) = shared_with_sink();
        let payload = BASE64.encode(b"binary image data");
        shared.process_raw(
            &format!(
                r#"{{"attachments": [{{"filename": "shot.png", "content_type": "image/png", "data": "{payload}"}}]}}"#
            ),
            "client",
            "sock-client",
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, MessageKind::Image);
        assert_eq!(seen[0].attachments[0].size, 17);
        assert_eq!(
            seen[0].attachments[0].data.as_deref(),
            Some(b"binary image data".as_slice())
        );
    }

    #[tokio::test]
    async fn attachment_without_declared_type_is_guessed() {
        let (shared, seen) = shared_with_sink();
        let payload = BASE64.encode(b"pdfpdf");
        shared.process_raw(
            &format!(r#"{{"attachments": [{{"filename": "doc.pdf", "data": "{payload}"}}]}}"#),
            "client",
            "sock-client",
        );
        assert_eq!(
            seen.lock().unwrap()[0].attachments[0].content_type,
            "application/pdf"
        );
    }

    #[tokio::test]
    async fn empty_frames_are_dropped() {
        let (shared, seen) = shared_with_sink();
        shared.process_raw(r#"{"type": "text"}"#, "client", "sock-client");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbound_frame_contains_contract_fields() {
        let message = OutboundMessage {
            id: crate::domain_types::MessageId::generate(),
            channel_id: ChannelId::try_new("sock-x".to_string()).unwrap(),
            reply_to: Some(crate::domain_types::MessageId::generate()),
            gateway: GatewayKind::Socket,
            response_type: ResponseCapability::Text,
            text: Some("hi".to_string()),
            attachments: Vec::new(),
            metadata: HashMap::new(),
            correlation_id: None,
            timestamp: chrono::Utc::now(),
        };
        let frame: serde_json::Value =
            serde_json::from_str(&outbound_frame(&message, "message")).unwrap();
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["text"], "hi");
        assert!(frame["reply_to"].is_string());
        assert!(frame["timestamp"].is_string());
        assert!(frame.get("attachments").is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_channel_returns_false() {
        let gateway = SocketGateway::new("sock-test", "127.0.0.1", 0);
        let message = OutboundMessage {
            id: crate::domain_types::MessageId::generate(),
            channel_id: ChannelId::try_new("sock-nobody".to_string()).unwrap(),
            reply_to: None,
            gateway: GatewayKind::Socket,
            response_type: ResponseCapability::Text,
            text: Some("hello?".to_string()),
            attachments: Vec::new(),
            metadata: HashMap::new(),
            correlation_id: None,
            timestamp: chrono::Utc::now(),
        };
        assert!(!gateway.send(&message).await);
    }
}
