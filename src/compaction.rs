//! History compaction: fit conversation history plus summary within a
//! token budget.
//!
//! Three strategies:
//! - `Adaptive` keeps the newest turns that fit, with a floor on how few
//!   may remain.
//! - `Progressive` keeps recent turns in 70% of the budget and returns
//!   the older remainder concatenated for summarization by the caller.
//! - `Truncate` keeps the newest turns that fit, no floor.
//!
//! All strategies preserve the original order of kept turns and prefer
//! the newer turn when two compete for the same budget.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::messages::HistoryEntry;
use crate::tokens::estimate_tokens;

/// Strategy selector for one compaction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    #[default]
    Adaptive,
    Progressive,
    Truncate,
}

/// Compaction tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub strategy: CompactionStrategy,
    pub min_messages_to_keep: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Adaptive,
            min_messages_to_keep: 4,
        }
    }
}

/// Result of one compaction run.
#[derive(Debug, Clone, Default)]
pub struct CompactionResult {
    pub messages: Vec<HistoryEntry>,
    pub summary: Option<String>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_removed: usize,
    /// True when `summary` is an un-summarized aggregate that still needs
    /// a model call.
    pub summary_updated: bool,
}

/// Applies the configured strategy to a turn list.
#[derive(Debug, Clone, Default)]
pub struct Compactor {
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Whether the history exceeds the budget at all.
    pub fn needs_compaction(&self, messages: &[HistoryEntry], token_budget: usize) -> bool {
        total_tokens(messages) > token_budget
    }

    /// Compact `messages` to fit `token_budget`, accounting for the
    /// existing summary.
    pub fn compact(
        &self,
        messages: &[HistoryEntry],
        token_budget: usize,
        existing_summary: Option<&str>,
    ) -> CompactionResult {
        match self.config.strategy {
            CompactionStrategy::Adaptive => {
                self.compact_adaptive(messages, token_budget, existing_summary)
            }
            CompactionStrategy::Progressive => {
                self.compact_progressive(messages, token_budget, existing_summary)
            }
            CompactionStrategy::Truncate => {
                self.compact_truncate(messages, token_budget, existing_summary)
            }
        }
    }

    fn compact_adaptive(
        &self,
        messages: &[HistoryEntry],
        token_budget: usize,
        existing_summary: Option<&str>,
    ) -> CompactionResult {
        let tokens_before = total_tokens(messages);
        let summary_tokens = existing_summary.map(estimate_tokens).unwrap_or(0);
        let available = token_budget.saturating_sub(summary_tokens);

        let (mut kept, mut current_tokens, mut removed) = keep_newest_within(messages, available);

        if kept.len() < self.config.min_messages_to_keep {
            let floor = self.config.min_messages_to_keep.min(messages.len());
            kept = messages[messages.len() - floor..].to_vec();
            current_tokens = total_tokens(&kept);
            removed = messages.len() - kept.len();
        }

        let tokens_after = current_tokens + summary_tokens;
        info!(
            tokens_before,
            tokens_after,
            messages_removed = removed,
            "adaptive compaction complete"
        );

        CompactionResult {
            messages: kept,
            summary: existing_summary.map(str::to_string),
            tokens_before,
            tokens_after,
            messages_removed: removed,
            summary_updated: false,
        }
    }

    fn compact_progressive(
        &self,
        messages: &[HistoryEntry],
        token_budget: usize,
        existing_summary: Option<&str>,
    ) -> CompactionResult {
        let tokens_before = total_tokens(messages);
        let recent_budget = (token_budget as f64 * 0.7) as usize;

        // Walk newest-to-oldest and stop at the first turn that does not
        // fit; everything older goes to the summarizer-preparer.
        let mut kept: Vec<HistoryEntry> = Vec::new();
        let mut current_tokens = 0usize;
        let mut cutoff = messages.len();

        for (i, msg) in messages.iter().rev().enumerate() {
            let cost = estimate_tokens(&msg.content);
            if current_tokens + cost <= recent_budget {
                kept.insert(0, msg.clone());
                current_tokens += cost;
                cutoff = messages.len() - i - 1;
            } else {
                break;
            }
        }

        let to_summarize = &messages[..cutoff];
        let removed = to_summarize.len();

        let new_summary = if to_summarize.is_empty() {
            None
        } else {
            Some(prepare_for_summarization(to_summarize, existing_summary))
        };

        let tokens_after =
            current_tokens + new_summary.as_deref().map(estimate_tokens).unwrap_or(0);
        info!(
            tokens_before,
            tokens_after,
            messages_summarized = removed,
            "progressive compaction complete"
        );

        CompactionResult {
            summary_updated: new_summary.is_some(),
            messages: kept,
            summary: new_summary,
            tokens_before,
            tokens_after,
            messages_removed: removed,
        }
    }

    fn compact_truncate(
        &self,
        messages: &[HistoryEntry],
        token_budget: usize,
        existing_summary: Option<&str>,
    ) -> CompactionResult {
        let tokens_before = total_tokens(messages);
        let summary_tokens = existing_summary.map(estimate_tokens).unwrap_or(0);
        let available = token_budget.saturating_sub(summary_tokens);

        let (kept, current_tokens, removed) = keep_newest_within(messages, available);

        let tokens_after = current_tokens + summary_tokens;
        info!(
            tokens_before,
            tokens_after,
            messages_removed = removed,
            "truncate compaction complete"
        );

        CompactionResult {
            messages: kept,
            summary: existing_summary.map(str::to_string),
            tokens_before,
            tokens_after,
            messages_removed: removed,
            summary_updated: false,
        }
    }
}

/// Walk newest-to-oldest, prepending each turn that still fits. Returns
/// the kept turns in original order, their token total, and the number of
/// turns dropped.
fn keep_newest_within(
    messages: &[HistoryEntry],
    available: usize,
) -> (Vec<HistoryEntry>, usize, usize) {
    let mut kept: Vec<HistoryEntry> = Vec::new();
    let mut current_tokens = 0usize;
    let mut removed = 0usize;

    for msg in messages.iter().rev() {
        let cost = estimate_tokens(&msg.content);
        if current_tokens + cost <= available {
            kept.insert(0, msg.clone());
            current_tokens += cost;
        } else {
            removed += 1;
        }
    }

    (kept, current_tokens, removed)
}

fn total_tokens(messages: &[HistoryEntry]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Deterministic concatenation of the turns destined for summarization,
/// folding in the previous summary when present.
pub fn prepare_for_summarization(
    messages: &[HistoryEntry],
    existing_summary: Option<&str>,
) -> String {
    let mut parts = Vec::with_capacity(messages.len() + 2);

    if let Some(summary) = existing_summary {
        parts.push(format!("Previous summary:\n{summary}\n"));
    }
    parts.push("Messages to incorporate:".to_string());

    for msg in messages {
        parts.push(format!("[{}]: {}", msg.role, msg.content));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> HistoryEntry {
        HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    fn turns(n: usize, words_each: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| turn(if i % 2 == 0 { "user" } else { "assistant" }, &format!("turn{i} {}", "word ".repeat(words_each))))
            .collect()
    }

    fn compactor(strategy: CompactionStrategy, min_keep: usize) -> Compactor {
        Compactor::new(CompactionConfig {
            strategy,
            min_messages_to_keep: min_keep,
        })
    }

    #[test]
    fn adaptive_keeps_everything_under_budget() {
        let c = compactor(CompactionStrategy::Adaptive, 4);
        let history = turns(4, 2);
        let result = c.compact(&history, 10_000, None);
        assert_eq!(result.messages.len(), 4);
        assert_eq!(result.messages_removed, 0);
        assert!(!result.summary_updated);
    }

    #[test]
    fn adaptive_enforces_minimum_floor_over_budget() {
        // Two giant turns, tiny budget, floor of 4: both turns are kept
        // because they are the only turns present.
        let c = compactor(CompactionStrategy::Adaptive, 4);
        let history = turns(2, 5_000);
        let result = c.compact(&history, 100, None);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages_removed, 0);
        assert_eq!(result.summary, None);
        assert!(!result.summary_updated);
    }

    #[test]
    fn adaptive_floor_keeps_exactly_min_when_more_exist() {
        let c = compactor(CompactionStrategy::Adaptive, 4);
        let history = turns(10, 1_000);
        let result = c.compact(&history, 50, None);
        assert_eq!(result.messages.len(), 4);
        assert_eq!(result.messages_removed, 6);
        // The floor keeps the newest turns in order.
        assert_eq!(result.messages[0].content, history[6].content);
        assert_eq!(result.messages[3].content, history[9].content);
    }

    #[test]
    fn adaptive_reserves_summary_tokens() {
        let c = compactor(CompactionStrategy::Adaptive, 0);
        let history = turns(6, 20);
        let summary = "s ".repeat(50);
        let with_summary = c.compact(&history, 200, Some(&summary));
        let without_summary = c.compact(&history, 200, None);
        assert!(with_summary.messages.len() <= without_summary.messages.len());
        assert_eq!(with_summary.summary.as_deref(), Some(summary.as_str()));
    }

    #[test]
    fn truncate_never_enforces_floor() {
        let c = compactor(CompactionStrategy::Truncate, 4);
        let history = turns(2, 5_000);
        let result = c.compact(&history, 100, None);
        assert!(result.messages.is_empty());
        assert_eq!(result.messages_removed, 2);
    }

    #[test]
    fn truncate_keeps_newest_that_fit() {
        let c = compactor(CompactionStrategy::Truncate, 0);
        let history = turns(8, 100);
        let result = c.compact(&history, 300, None);
        assert!(!result.messages.is_empty());
        assert!(result.messages.len() < 8);
        // Kept turns are the newest, in original order.
        let first_kept = &result.messages[0].content;
        let idx = history.iter().position(|t| &t.content == first_kept).unwrap();
        for (offset, kept) in result.messages.iter().enumerate() {
            assert_eq!(kept.content, history[idx + offset].content);
        }
    }

    #[test]
    fn progressive_summarizes_older_turns() {
        let c = compactor(CompactionStrategy::Progressive, 0);
        let history = turns(10, 100);
        let result = c.compact(&history, 400, None);
        assert!(result.summary_updated);
        let summary = result.summary.expect("aggregate summary");
        assert!(summary.contains("Messages to incorporate:"));
        // The oldest turn lands in the summary, not the kept list.
        assert!(summary.contains("turn0"));
        assert!(result.messages.iter().all(|m| !m.content.contains("turn0 ")));
        assert_eq!(result.messages.len() + result.messages_removed, 10);
    }

    #[test]
    fn progressive_incorporates_existing_summary() {
        let c = compactor(CompactionStrategy::Progressive, 0);
        let history = turns(10, 100);
        let result = c.compact(&history, 400, Some("prior context"));
        let summary = result.summary.expect("aggregate summary");
        assert!(summary.starts_with("Previous summary:\nprior context"));
    }

    #[test]
    fn progressive_no_summary_when_everything_fits() {
        let c = compactor(CompactionStrategy::Progressive, 0);
        let history = turns(2, 2);
        let result = c.compact(&history, 10_000, None);
        assert!(!result.summary_updated);
        assert_eq!(result.summary, None);
        assert_eq!(result.messages.len(), 2);
    }

    #[test]
    fn budget_invariant_holds_without_floor() {
        let c = compactor(CompactionStrategy::Truncate, 0);
        let history = turns(20, 50);
        let budget = 500;
        let result = c.compact(&history, budget, Some("short summary"));
        let kept: usize = result
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        let summary_cost = result.summary.as_deref().map(estimate_tokens).unwrap_or(0);
        assert!(kept + summary_cost <= budget);
    }
}
