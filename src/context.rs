//! Per-channel conversation context: persistent turn history, dual
//! summaries, and compaction.
//!
//! History persists as a framed markdown file (`# Conversation History`
//! header, one `## Role - timestamp` header per turn); summaries persist
//! as a small JSON record. Both are replaced atomically via
//! write-temp-then-rename. A per-channel cache is authoritative until
//! eviction and is kept equivalent to disk by every successful mutator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::compaction::Compactor;
use crate::domain_types::ChannelId;
use crate::messages::HistoryEntry;
use crate::tokens::estimate_tokens;

const HISTORY_HEADER: &str = "# Conversation History";

/// Role of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    fn display_name(self) -> &'static str {
        match self {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One user or assistant message within a channel's history.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Cached state for one channel.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub channel_id: ChannelId,
    pub history: Vec<ConversationTurn>,
    /// Legacy single summary; superseded by the dual summaries but still
    /// honored when only it is present.
    pub summary: Option<String>,
    pub user_summary: Option<String>,
    pub conversation_summary: Option<String>,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub total_tokens: usize,
}

impl ChannelContext {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            history: Vec::new(),
            summary: None,
            user_summary: None,
            conversation_summary: None,
            summary_updated_at: None,
            total_tokens: 0,
        }
    }

    /// Combined user-profile + conversation summary, falling back to the
    /// legacy single summary.
    pub fn combined_summary(&self) -> Option<String> {
        if self.user_summary.is_some() || self.conversation_summary.is_some() {
            let mut parts = Vec::new();
            if let Some(user) = &self.user_summary {
                parts.push(format!("USER PROFILE: {user}"));
            }
            if let Some(conversation) = &self.conversation_summary {
                parts.push(format!("CONTEXT: {conversation}"));
            }
            return Some(parts.join("\n"));
        }
        self.summary.clone()
    }

    /// History as role/content entries for the compactor and the model.
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .map(|turn| HistoryEntry {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            })
            .collect()
    }
}

/// Persisted summary record; exactly these keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryRecord {
    user_summary: Option<String>,
    conversation_summary: Option<String>,
    updated_at: DateTime<Utc>,
}

/// New dual summaries produced by a summarization backend.
#[derive(Debug, Clone, Default)]
pub struct SummaryUpdate {
    pub user_summary: String,
    pub conversation_summary: String,
}

/// Summarization backend failure.
#[derive(Debug, Error)]
#[error("summarization failed: {0}")]
pub struct SummaryError(pub String);

/// Seam to the summarizer; the store never talks to a model directly.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn summarize(
        &self,
        turns: &[HistoryEntry],
        existing_user_summary: Option<&str>,
        existing_conversation_summary: Option<&str>,
    ) -> Result<SummaryUpdate, SummaryError>;
}

/// Context store errors.
#[derive(Debug, Error)]
pub enum ContextStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("summary serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct ContextStoreConfig {
    pub memory_path: PathBuf,
    pub max_history_tokens: usize,
    pub summary_threshold_tokens: usize,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            memory_path: PathBuf::from("./memory"),
            max_history_tokens: 50_000,
            summary_threshold_tokens: 30_000,
        }
    }
}

/// Store and manage per-channel conversation context.
pub struct ContextStore {
    config: ContextStoreConfig,
    compactor: Compactor,
    summarizer: Arc<dyn SummarySource>,
    cache: DashMap<ChannelId, ChannelContext>,
}

impl ContextStore {
    pub fn new(
        config: ContextStoreConfig,
        compactor: Compactor,
        summarizer: Arc<dyn SummarySource>,
    ) -> Self {
        Self {
            config,
            compactor,
            summarizer,
            cache: DashMap::new(),
        }
    }

    pub fn max_history_tokens(&self) -> usize {
        self.config.max_history_tokens
    }

    fn history_path(&self, channel_id: &ChannelId) -> PathBuf {
        self.config
            .memory_path
            .join(format!("{}.md", channel_id.storage_key()))
    }

    fn summary_path(&self, channel_id: &ChannelId) -> PathBuf {
        self.config
            .memory_path
            .join(format!("{}_summary.json", channel_id.storage_key()))
    }

    /// Load a channel's context from cache or disk. Unreadable records
    /// are treated as no prior state.
    pub async fn load(&self, channel_id: &ChannelId) -> ChannelContext {
        if let Some(cached) = self.cache.get(channel_id) {
            return cached.clone();
        }

        let mut context = ChannelContext::new(channel_id.clone());

        let history_path = self.history_path(channel_id);
        match tokio::fs::read_to_string(&history_path).await {
            Ok(content) => {
                context.history = parse_history(&content);
                context.total_tokens = estimate_tokens(&content);
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                error!(channel_id = %channel_id, %error, "failed to load history");
            }
        }

        let summary_path = self.summary_path(channel_id);
        match tokio::fs::read_to_string(&summary_path).await {
            Ok(content) => match serde_json::from_str::<SummaryRecord>(&content) {
                Ok(record) => {
                    context.user_summary = record.user_summary;
                    context.conversation_summary = record.conversation_summary;
                    context.summary_updated_at = Some(record.updated_at);
                    context.summary = context.combined_summary();
                }
                Err(error) => {
                    warn!(channel_id = %channel_id, %error, "summary record not parseable");
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                error!(channel_id = %channel_id, %error, "failed to load summary");
            }
        }

        self.cache.insert(channel_id.clone(), context.clone());
        context
    }

    /// Atomically persist a channel's history and refresh the cache.
    pub async fn save(&self, context: &mut ChannelContext) -> Result<(), ContextStoreError> {
        let content = serialize_history(&context.history);
        let path = self.history_path(&context.channel_id);
        atomic_write(&path, content.as_bytes()).await?;

        context.total_tokens = estimate_tokens(&content);
        self.cache
            .insert(context.channel_id.clone(), context.clone());

        info!(
            channel_id = %context.channel_id,
            turns = context.history.len(),
            tokens = context.total_tokens,
            "context saved"
        );
        Ok(())
    }

    /// Append one turn and persist. Returns the updated context.
    pub async fn add_turn(
        &self,
        channel_id: &ChannelId,
        role: TurnRole,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<ChannelContext, ContextStoreError> {
        let mut context = self.load(channel_id).await;
        context.history.push(ConversationTurn {
            role,
            // Trimmed so the framed format round-trips exactly.
            content: content.trim().to_string(),
            timestamp: Utc::now().trunc_subsecs(6),
            metadata,
        });
        self.save(&mut context).await?;
        Ok(context)
    }

    /// Atomically replace the summary record and update the cache.
    pub async fn save_summary(
        &self,
        channel_id: &ChannelId,
        user_summary: Option<String>,
        conversation_summary: Option<String>,
    ) -> Result<(), ContextStoreError> {
        let record = SummaryRecord {
            user_summary: user_summary.clone(),
            conversation_summary: conversation_summary.clone(),
            updated_at: Utc::now().trunc_subsecs(6),
        };
        let payload = serde_json::to_string_pretty(&record)?;
        atomic_write(&self.summary_path(channel_id), payload.as_bytes()).await?;

        if let Some(mut cached) = self.cache.get_mut(channel_id) {
            cached.user_summary = user_summary;
            cached.conversation_summary = conversation_summary;
            cached.summary_updated_at = Some(record.updated_at);
            cached.summary = cached.combined_summary();
        }

        info!(channel_id = %channel_id, "summary saved");
        Ok(())
    }

    /// True when the cached token total exceeds the threshold.
    pub fn needs_summarization(&self, context: &ChannelContext) -> bool {
        context.total_tokens > self.config.summary_threshold_tokens
    }

    /// Summarize the channel when it needs it. Returns whether
    /// summarization occurred.
    pub async fn trigger_summarization(&self, channel_id: &ChannelId) -> bool {
        let context = self.load(channel_id).await;
        if !self.needs_summarization(&context) {
            return false;
        }

        let turns = context.history_entries();
        let result = self
            .summarizer
            .summarize(
                &turns,
                context.user_summary.as_deref(),
                context.conversation_summary.as_deref(),
            )
            .await;

        match result {
            Ok(update) => {
                let saved = self
                    .save_summary(
                        channel_id,
                        Some(update.user_summary),
                        Some(update.conversation_summary),
                    )
                    .await;
                match saved {
                    Ok(()) => {
                        info!(channel_id = %channel_id, "summarization completed");
                        true
                    }
                    Err(error) => {
                        error!(channel_id = %channel_id, %error, "summary persist failed");
                        false
                    }
                }
            }
            Err(error) => {
                error!(channel_id = %channel_id, %error, "summarization failed");
                false
            }
        }
    }

    /// Compact the channel's history into the token budget. Returns the
    /// kept entries, the summary to present, and whether that summary is
    /// an aggregate still needing a model call.
    pub fn get_compacted(
        &self,
        context: &ChannelContext,
        token_budget: usize,
    ) -> (Vec<HistoryEntry>, Option<String>, bool) {
        let entries = context.history_entries();

        if !self.compactor.needs_compaction(&entries, token_budget) {
            return (entries, context.summary.clone(), false);
        }

        let result = self
            .compactor
            .compact(&entries, token_budget, context.summary.as_deref());

        info!(
            channel_id = %context.channel_id,
            tokens_before = result.tokens_before,
            tokens_after = result.tokens_after,
            messages_removed = result.messages_removed,
            "context compacted"
        );

        (result.messages, result.summary, result.summary_updated)
    }

    /// Remove both records and evict the cache entry.
    pub async fn clear(&self, channel_id: &ChannelId) -> bool {
        let mut ok = true;
        for path in [self.history_path(channel_id), self.summary_path(channel_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    error!(channel_id = %channel_id, %error, path = %path.display(), "clear failed");
                    ok = false;
                }
            }
        }
        self.cache.remove(channel_id);
        if ok {
            info!(channel_id = %channel_id, "context cleared");
        }
        ok
    }

    /// Storage keys of every channel with a persisted record.
    pub async fn list_channels(&self) -> Vec<String> {
        let mut channels = std::collections::BTreeSet::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.memory_path).await else {
            return Vec::new();
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some("md") => {
                    channels.insert(stem.to_string());
                }
                Some("json") => {
                    if let Some(stripped) = stem.strip_suffix("_summary") {
                        channels.insert(stripped.to_string());
                    }
                }
                _ => {}
            }
        }
        channels.into_iter().collect()
    }
}

/// Write via a temp file in the same directory then rename, so readers
/// only ever see complete records.
async fn atomic_write(path: &PathBuf, bytes: &[u8]) -> Result<(), ContextStoreError> {
    let io_err = |source| ContextStoreError::Io {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

/// Serialize history into the framed markdown format.
pub fn serialize_history(history: &[ConversationTurn]) -> String {
    let mut out = String::from(HISTORY_HEADER);
    out.push('\n');

    for turn in history {
        out.push('\n');
        out.push_str(&format!(
            "## {} - {}\n",
            turn.role.display_name(),
            turn.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
        ));
        out.push_str(&turn.content);
        out.push('\n');
    }

    out
}

/// Parse the framed markdown format back into turns.
pub fn parse_history(content: &str) -> Vec<ConversationTurn> {
    let mut history = Vec::new();
    let mut current: Option<(TurnRole, DateTime<Utc>, Vec<&str>)> = None;

    for line in content.split('\n') {
        let role = if line.starts_with("## User") {
            Some(TurnRole::User)
        } else if line.starts_with("## Assistant") {
            Some(TurnRole::Assistant)
        } else {
            None
        };

        if let Some(role) = role {
            if let Some((prev_role, prev_ts, lines)) = current.take() {
                history.push(finish_turn(prev_role, prev_ts, &lines));
            }
            let timestamp = line
                .split_once(" - ")
                .and_then(|(_, ts)| DateTime::parse_from_rfc3339(ts.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc::now().trunc_subsecs(6));
            current = Some((role, timestamp, Vec::new()));
        } else if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((role, ts, lines)) = current.take() {
        history.push(finish_turn(role, ts, &lines));
    }

    history
}

fn finish_turn(role: TurnRole, timestamp: DateTime<Utc>, lines: &[&str]) -> ConversationTurn {
    ConversationTurn {
        role,
        content: lines.join("\n").trim().to_string(),
        timestamp,
        metadata: HashMap::new(),
    }
}
