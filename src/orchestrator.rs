//! The end-to-end message pipeline.
//!
//! Each inbound message flows through validation, directive parsing,
//! attachment conversion, security filtering, context assembly,
//! compaction, tool policy, and the agent brain, then one outbound
//! response is sent back through the originating gateway. Work on the
//! same channel is serialized through a channel-keyed lock; different
//! channels interleave freely.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{Instrument, error, info, info_span, warn};

use crate::agent::AgentBrain;
use crate::attachments::AttachmentProcessor;
use crate::bus::{BusConsumer, BusError, BusStats, MessageBus};
use crate::context::{ContextStore, TurnRole};
use crate::directives::parse_directives;
use crate::domain_types::{ChannelId, MessageId};
use crate::gateway::{GatewaySupervisor, MessageHandler, StopSignal};
use crate::messages::{
    AgentResponse, InboundMessage, MessageContext, MessageStatus, ProcessingResult,
    ResponseCapability,
};
use crate::security::SecurityFilter;
use crate::tokens::estimate_tokens;
use crate::tool_policy::{ToolInfo, ToolPolicy};
use crate::validator::MessageValidator;

/// Drives the pipeline for every message on the bus.
pub struct Orchestrator {
    bus: MessageBus,
    consumer: tokio::sync::Mutex<Option<BusConsumer>>,
    context_store: Arc<ContextStore>,
    validator: MessageValidator,
    security: SecurityFilter,
    attachments: AttachmentProcessor,
    brain: Arc<AgentBrain>,
    tool_policy: ToolPolicy,
    tool_catalog: Vec<ToolInfo>,
    supervisor: Arc<GatewaySupervisor>,
    channel_locks: DashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>,
    summarizing: DashMap<ChannelId, ()>,
    stop: StopSignal,
    loop_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: MessageBus,
        consumer: BusConsumer,
        context_store: Arc<ContextStore>,
        validator: MessageValidator,
        security: SecurityFilter,
        attachments: AttachmentProcessor,
        brain: Arc<AgentBrain>,
        tool_policy: ToolPolicy,
        tool_catalog: Vec<ToolInfo>,
        supervisor: Arc<GatewaySupervisor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            consumer: tokio::sync::Mutex::new(Some(consumer)),
            context_store,
            validator,
            security,
            attachments,
            brain,
            tool_policy,
            tool_catalog,
            supervisor,
            channel_locks: DashMap::new(),
            summarizing: DashMap::new(),
            stop: StopSignal::new(),
            loop_task: std::sync::Mutex::new(None),
        })
    }

    /// Enqueue a message for processing.
    pub fn enqueue_message(&self, message: InboundMessage) -> Result<MessageId, BusError> {
        self.bus.enqueue(message)
    }

    /// The callback gateways invoke for every received message.
    pub fn handler(self: &Arc<Self>) -> MessageHandler {
        let orchestrator = Arc::clone(self);
        Arc::new(move |message| {
            if let Err(error) = orchestrator.enqueue_message(message) {
                error!(%error, "inbound message rejected by bus");
            }
        })
    }

    /// Queue statistics.
    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Start the consumer loop. Each message is processed on its own
    /// task; per-channel ordering comes from the channel lock.
    pub async fn start(self: &Arc<Self>) {
        let Some(mut consumer) = self.consumer.lock().await.take() else {
            warn!("orchestrator already started");
            return;
        };

        let orchestrator = Arc::clone(self);
        let stop = self.stop.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = stop.wait() => break,
                    message = consumer.recv() => message,
                };
                let Some(message) = message else { break };
                let worker = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    worker.handle_message(message).await;
                });
            }
            info!("orchestrator loop exited");
        });
        *self.loop_task.lock().expect("loop task lock") = Some(task);
        info!("orchestrator started");
    }

    /// Stop the consumer loop, draining briefly.
    pub async fn stop(&self, drain_deadline: Duration) {
        self.stop.trigger();
        let task = self.loop_task.lock().expect("loop task lock").take();
        if let Some(mut task) = task {
            if tokio::time::timeout(drain_deadline, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("orchestrator stopped");
    }

    async fn handle_message(self: Arc<Self>, message: InboundMessage) {
        let span = info_span!(
            "message_processing",
            message_id = %message.id,
            correlation_id = %message.correlation_id,
            channel_id = %message.channel_id,
        );
        let result = self.process_message(message).instrument(span).await;
        if !result.success {
            if let Some(error) = &result.error {
                info!(%error, "message processing ended in rejection");
            }
        }
    }

    /// Run the full pipeline for one message. Always sends exactly one
    /// outbound response for an accepted message.
    pub async fn process_message(self: &Arc<Self>, mut message: InboundMessage) -> ProcessingResult {
        let started = Instant::now();
        message.status = MessageStatus::Processing;

        // Validation rejections short-circuit with a structured reply.
        let validation = self.validator.validate(&message);
        if !validation.is_valid() {
            message.status = MessageStatus::Rejected;
            let reason = validation.error_messages().join("; ");
            let mut rejection = AgentResponse::default();
            rejection.add_error(&reason);
            let response = self.send_response(&message, &rejection).await;
            return ProcessingResult {
                success: false,
                response,
                error: Some(reason),
                processing_time_ms: started.elapsed().as_millis() as u64,
                ..ProcessingResult::default()
            };
        }

        if let Some(text) = &message.text {
            message.directives = Some(parse_directives(text));
        }

        if message.has_attachments() {
            self.attachments.process(&mut message).await;
        }

        let content = message.content().to_string();
        if !content.is_empty() {
            if let Err(violation) = self.security.check(&content) {
                warn!(kind = ?violation.kind, rule = %violation.rule, "message rejected by security filter");
                message.status = MessageStatus::Rejected;
                let mut rejection = AgentResponse::default();
                rejection.add_error(self.security.rejection_message());
                let response = self.send_response(&message, &rejection).await;
                return ProcessingResult {
                    success: false,
                    response,
                    error: Some(self.security.rejection_message().to_string()),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    ..ProcessingResult::default()
                };
            }
        }

        // Steps 6-14 are atomic with respect to the next message on the
        // same channel.
        let channel_id = message.channel_id.clone();
        let lock = self
            .channel_locks
            .entry(channel_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let context = self.context_store.load(&channel_id).await;
        let budget = self.context_store.max_history_tokens();
        let (history, compacted_summary, resummarize) =
            self.context_store.get_compacted(&context, budget);

        let history_tokens: usize = history.iter().map(|h| estimate_tokens(&h.content)).sum();
        let estimated_tokens = estimate_tokens(&content) + history_tokens;

        let prompt_mode = message.prompt_mode();
        let tool_profile = message.tool_profile();
        let elevated = message.elevated();
        let show_reasoning = message
            .directives
            .as_ref()
            .is_some_and(|d| d.has_reasoning());

        let available_tools =
            self.tool_policy
                .tool_names(&self.tool_catalog, tool_profile, elevated);

        let summary = context.combined_summary().or(compacted_summary);

        let msg_context = MessageContext {
            history,
            summary,
            user_summary: context.user_summary.clone(),
            conversation_summary: context.conversation_summary.clone(),
            available_tools,
            estimated_tokens,
            prompt_mode,
            tool_profile,
            show_reasoning,
            elevated,
        };

        let response = match self.brain.process(&message, &msg_context).await {
            Ok(response) => response,
            Err(error) => {
                error!(%error, "agent brain rejected the message");
                let mut degraded = AgentResponse::default();
                degraded.add_error("The assistant is not available right now.");
                degraded
            }
        };

        if response.needs_learning {
            if let Some(topic) = response.learning_topic.clone() {
                if let Some(skill) = self.brain.learn_skill(&topic, &msg_context).await {
                    info!(skill_id = %skill.id, topic, "skill learned from message");
                }
            }
        }

        // Persist both turns; a persistence failure degrades to a
        // telemetry flag, the response is still sent.
        let mut turn_persisted = true;
        if let Err(error) = self
            .context_store
            .add_turn(&channel_id, TurnRole::User, &content, Default::default())
            .await
        {
            error!(%error, "failed to persist user turn");
            turn_persisted = false;
        }
        let assistant_text = response.text();
        let updated_context = match self
            .context_store
            .add_turn(&channel_id, TurnRole::Assistant, &assistant_text, Default::default())
            .await
        {
            Ok(updated) => Some(updated),
            Err(error) => {
                error!(%error, "failed to persist assistant turn");
                turn_persisted = false;
                None
            }
        };

        let needs_summarization = resummarize
            || updated_context
                .as_ref()
                .is_some_and(|ctx| self.context_store.needs_summarization(ctx));

        drop(guard);

        message.status = MessageStatus::Completed;
        let outbound = self.send_response(&message, &response).await;

        // Scheduled after the response is out so summarization latency
        // never shows up in reply latency.
        if needs_summarization {
            self.schedule_summarization(channel_id);
        }

        ProcessingResult {
            success: true,
            response: outbound,
            error: None,
            tools_called: response.tools_called.clone(),
            skills_used: response.skills_used.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            turn_persisted,
        }
    }

    /// Resolve the originating gateway, down-convert to its capability
    /// set, and send. Returns the outbound message that was sent.
    async fn send_response(
        &self,
        message: &InboundMessage,
        response: &AgentResponse,
    ) -> Option<crate::messages::OutboundMessage> {
        let provider = self.supervisor.find_by_kind(message.gateway).await;

        let capabilities: HashSet<ResponseCapability> = match &provider {
            Some(provider) => provider.response_capabilities(),
            None => [ResponseCapability::Text].into(),
        };

        let outbound = response.to_outbound(
            message.channel_id.clone(),
            message.gateway,
            &capabilities,
            Some(message.id),
            message.correlation_id,
        );

        match provider {
            Some(provider) => {
                if !provider.send(&outbound).await {
                    warn!(channel_id = %message.channel_id, "gateway send failed");
                }
            }
            None => {
                warn!(gateway = ?message.gateway, "no gateway registered for response");
            }
        }

        Some(outbound)
    }

    /// Fire-and-forget summarization with per-channel coalescing: at
    /// most one in flight per channel.
    fn schedule_summarization(self: &Arc<Self>, channel_id: ChannelId) {
        if self.summarizing.insert(channel_id.clone(), ()).is_some() {
            return;
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let summarized = orchestrator
                .context_store
                .trigger_summarization(&channel_id)
                .await;
            if summarized {
                info!(channel_id = %channel_id, "background summarization completed");
            }
            orchestrator.summarizing.remove(&channel_id);
        });
    }
}
