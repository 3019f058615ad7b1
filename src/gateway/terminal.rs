//! Interactive terminal gateway: reads lines from stdin, prints
//! responses to stdout.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::domain_types::ChannelId;
use crate::messages::{
    Attachment, GatewayKind, InboundMessage, MessageKind, OutboundMessage, ResponseCapability,
};

use super::{
    GatewayError, GatewayProvider, MessageHandler, StopSignal, kind_for_media_type,
    media_type_for_extension,
};

const EXIT_WORDS: &[&str] = &["quit", "exit", "bye"];

/// Interactive stdin/stdout gateway. One fixed channel per process.
pub struct TerminalGateway {
    name: String,
    channel_id: ChannelId,
    handler: RwLock<Option<MessageHandler>>,
    stop: StopSignal,
    running: AtomicBool,
}

impl Default for TerminalGateway {
    fn default() -> Self {
        Self::new("terminal")
    }
}

impl TerminalGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_id: ChannelId::try_new("term-session".to_string())
                .expect("static channel id is non-empty"),
            handler: RwLock::new(None),
            stop: StopSignal::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    fn dispatch(&self, message: InboundMessage) {
        let handler = self.handler.read().expect("handler lock").clone();
        match handler {
            Some(handler) => handler(message),
            None => error!(message_id = %message.id, "no message handler installed"),
        }
    }

    fn text_message(&self, text: &str) -> InboundMessage {
        let mut message = InboundMessage::new(self.channel_id.clone(), GatewayKind::Terminal);
        message.user_id = Some("terminal-user".to_string());
        message.text = Some(text.to_string());
        message
    }

    /// Handle `/file <path> [text]`: read the file and build an inbound
    /// message carrying it as an attachment.
    async fn process_file_command(&self, args: &str) -> Option<InboundMessage> {
        let args = args.trim();
        if args.is_empty() {
            println!("Error: please specify a file path");
            return None;
        }

        let (raw_path, text) = match args.split_once(' ') {
            Some((path, rest)) => (path, Some(rest.trim().to_string())),
            None => (args, None),
        };
        let path = PathBuf::from(raw_path.trim_matches('"').trim_matches('\''));

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(error) => {
                println!("Error reading file {}: {error}", path.display());
                return None;
            }
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let content_type = media_type_for_extension(&path);

        println!(
            "Sending file: {filename} ({content_type}, {} bytes)",
            data.len()
        );

        let mut message = self.text_message(text.as_deref().unwrap_or(""));
        message.text = text;
        message.kind = kind_for_media_type(content_type);
        message
            .attachments
            .push(Attachment::from_bytes(filename, content_type, data));
        Some(message)
    }

    fn print_banner(&self) {
        println!();
        println!("{}", "=".repeat(50));
        println!("switchboard terminal");
        println!("{}", "=".repeat(50));
        println!("Type a message and press Enter.");
        println!("  /file <path> [message]  send a file");
        println!("  quit, exit              leave");
        println!("{}", "=".repeat(50));
        println!();
    }
}

#[async_trait]
impl GatewayProvider for TerminalGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn gateway_kind(&self) -> GatewayKind {
        GatewayKind::Terminal
    }

    fn response_capabilities(&self) -> HashSet<ResponseCapability> {
        [ResponseCapability::Text].into()
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.write().expect("handler lock") = Some(handler);
    }

    fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), GatewayError> {
        self.stop.reset();
        self.running.store(true, Ordering::SeqCst);
        info!(gateway = %self.name, "terminal gateway started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.running.store(false, Ordering::SeqCst);
        self.stop.trigger();
        info!(gateway = %self.name, "terminal gateway stopped");
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        if let Some(text) = &message.text {
            println!("\nAssistant: {text}\n");
        }
        for attachment in &message.attachments {
            if let Some(url) = &attachment.url {
                println!("  [{}] {url}", attachment.filename);
            }
        }
        true
    }

    /// Line-at-a-time read loop racing the stop signal, so the scheduler
    /// is never monopolized.
    async fn run(&self) -> Result<(), GatewayError> {
        self.print_banner();

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            let line = tokio::select! {
                () = self.stop.wait() => break,
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                // stdin closed
                self.stop.trigger();
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
                println!("\nGoodbye!\n");
                self.stop.trigger();
                break;
            }

            if let Some(args) = input.strip_prefix("/file ") {
                if let Some(message) = self.process_file_command(args).await {
                    self.dispatch(message);
                }
                continue;
            }

            self.dispatch(self.text_message(input));
        }

        Ok(())
    }
}
