//! Transport gateways: the provider contract, the built-in transports,
//! and the lifecycle supervisor.

pub mod socket;
pub mod supervisor;
pub mod terminal;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::messages::{GatewayKind, InboundMessage, OutboundMessage, ResponseCapability};

pub use socket::SocketGateway;
pub use supervisor::{GatewayStatus, GatewaySupervisor, SupervisorError};
pub use terminal::TerminalGateway;

/// Callback invoked for every message a gateway receives. Gateways never
/// call into the orchestrator except through this.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Gateway failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway is not running")]
    NotRunning,

    #[error("gateway run loop failed: {0}")]
    Run(String),
}

/// Cooperative stop signal shared between a gateway and its run loop.
#[derive(Debug, Clone)]
pub struct StopSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request a stop; every waiter wakes.
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }

    /// Re-arm for a restart.
    pub fn reset(&self) {
        let _ = self.sender.send(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until the stop is requested.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

/// A transport provider with an independent run loop.
///
/// The run loop must observe the stop signal at every iteration boundary
/// and terminate cleanly; errors it returns propagate to the supervisor,
/// which decides on restart.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    fn name(&self) -> &str;

    fn gateway_kind(&self) -> GatewayKind;

    /// Which response kinds this transport can deliver.
    fn response_capabilities(&self) -> HashSet<ResponseCapability>;

    /// Install the inbound-message callback.
    fn set_message_handler(&self, handler: MessageHandler);

    /// The gateway's stop signal; the supervisor triggers it on stop.
    fn stop_signal(&self) -> StopSignal;

    async fn initialize(&self) -> Result<(), GatewayError>;

    async fn start(&self) -> Result<(), GatewayError>;

    async fn stop(&self) -> Result<(), GatewayError>;

    /// Deliver one outbound message. Returns false on unknown targets or
    /// transport failure; both are logged, never raised.
    async fn send(&self, message: &OutboundMessage) -> bool;

    /// Long-lived run loop. The default implementation just waits for
    /// the stop signal, for transports whose work happens in connection
    /// handlers.
    async fn run(&self) -> Result<(), GatewayError> {
        self.stop_signal().wait().await;
        Ok(())
    }

    /// Prefixed, globally unique channel id for a transport-local
    /// identifier.
    fn build_channel_id(&self, identifier: &str) -> String {
        format!("{}-{identifier}", self.gateway_kind().channel_prefix())
    }
}

/// Media type guessed from a filename extension; the transports use this
/// when the sender declares none.
pub(crate) fn media_type_for_extension(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("md" | "markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Message kind implied by a media type.
pub(crate) fn kind_for_media_type(content_type: &str) -> crate::messages::MessageKind {
    use crate::messages::MessageKind;
    if content_type.starts_with("image/") {
        MessageKind::Image
    } else if content_type.starts_with("audio/") {
        MessageKind::Audio
    } else if content_type.starts_with("video/") {
        MessageKind::Video
    } else {
        MessageKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_signal_wakes_waiters() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        assert!(!signal.is_triggered());
        signal.trigger();
        task.await.unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn stop_signal_resets_for_restart() {
        let signal = StopSignal::new();
        signal.trigger();
        assert!(signal.is_triggered());
        signal.reset();
        assert!(!signal.is_triggered());
    }
}
