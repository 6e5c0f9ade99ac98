//! History compaction.
//!
//! Invoked at most once per LLM-bearing node call, immediately before the
//! request is built. When the history crosses the threshold the middle is
//! replaced by one summary message; if summarization itself fails the
//! strategy degrades to truncation rather than failing the node.

use super::token_counter::{
    build_summarization_prompt, count_messages, split_messages_for_compaction, TokenCounter,
};
use crate::error::Result;
use crate::llm::{ChatMessage, ChatOptions, ChatProvider, MessageRole};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller-provided compaction function: takes the compactable middle,
/// returns its replacement messages.
pub type CustomCompactor =
    dyn Fn(Vec<ChatMessage>) -> BoxFuture<'static, Result<Vec<ChatMessage>>> + Send + Sync;

/// How the middle of an over-threshold history is reduced.
#[derive(Clone, Default)]
pub enum CompactionStrategy {
    /// Summarize the middle with one LLM call (default).
    #[default]
    Summarize,
    /// Drop oldest non-system messages until under threshold.
    Truncate,
    /// Caller-provided function with the summarize signature.
    Custom(Arc<CustomCompactor>),
}

impl std::fmt::Debug for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Summarize => write!(f, "Summarize"),
            CompactionStrategy::Truncate => write!(f, "Truncate"),
            CompactionStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Compaction configuration.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub strategy: CompactionStrategy,
    /// Explicit token threshold; when unset, `model limit - headroom`.
    pub threshold_tokens: Option<usize>,
    /// Headroom subtracted from the model limit for the implicit threshold.
    pub headroom: usize,
    /// Most-recent messages preserved verbatim.
    pub preserve_recent: usize,
    /// Model used for summarization; defaults to the calling node's model.
    pub summarize_model: Option<String>,
    /// Custom summarization prompt.
    pub summarize_prompt: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Summarize,
            threshold_tokens: None,
            headroom: 10_000,
            preserve_recent: 5,
            summarize_model: None,
            summarize_prompt: None,
        }
    }
}

impl CompactionConfig {
    /// Effective threshold for a model.
    pub fn threshold(&self, counter: &dyn TokenCounter, model: &str) -> usize {
        self.threshold_tokens
            .unwrap_or_else(|| counter.limit(model).saturating_sub(self.headroom))
    }
}

/// Emitted through `onContextCompacted` after a successful compaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_compacted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Compact `history` in place when it crosses the threshold.
///
/// Returns the report when compaction ran, `None` when it was not needed.
pub async fn compact_if_needed(
    history: &mut Vec<ChatMessage>,
    model: &str,
    provider: &dyn ChatProvider,
    counter: &dyn TokenCounter,
    config: &CompactionConfig,
    signal: &CancellationToken,
) -> Result<Option<CompactionReport>> {
    let threshold = config.threshold(counter, model);
    let tokens_before = count_messages(counter, history, Some(model));
    if tokens_before < threshold {
        return Ok(None);
    }

    let split = split_messages_for_compaction(history, config.preserve_recent);
    if split.to_compact.is_empty() {
        debug!(tokens_before, threshold, "history over threshold but nothing compactable");
        return Ok(None);
    }

    let replacement = match &config.strategy {
        CompactionStrategy::Summarize => {
            let summarize_model = config.summarize_model.as_deref().unwrap_or(model);
            match summarize(
                provider,
                summarize_model,
                &split.to_compact,
                config.summarize_prompt.as_deref(),
                signal,
            )
            .await
            {
                Ok(text) => Some(vec![ChatMessage::summary(text)]),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "summarization failed, falling back to truncation");
                    None
                }
            }
        }
        CompactionStrategy::Truncate => None,
        CompactionStrategy::Custom(f) => Some(f(split.to_compact.clone()).await?),
    };

    let report = match replacement {
        Some(replacement) => {
            let messages_compacted = split.to_compact.len();
            let summary = replacement
                .iter()
                .find(|m| m.summary)
                .map(|m| m.content.clone());
            let mut compacted =
                Vec::with_capacity(replacement.len() + split.to_preserve.len() + 1);
            if let Some(system) = split.leading_system {
                compacted.push(system);
            }
            compacted.extend(replacement);
            compacted.extend(split.to_preserve);
            *history = compacted;
            CompactionReport {
                tokens_before,
                tokens_after: count_messages(counter, history, Some(model)),
                messages_compacted,
                summary,
            }
        }
        // Truncation path: drop oldest non-system messages until the
        // history fits under the threshold.
        None => {
            let dropped = truncate_to_threshold(history, counter, model, threshold);
            CompactionReport {
                tokens_before,
                tokens_after: count_messages(counter, history, Some(model)),
                messages_compacted: dropped,
                summary: None,
            }
        }
    };

    info!(
        tokens_before = report.tokens_before,
        tokens_after = report.tokens_after,
        messages_compacted = report.messages_compacted,
        "context compacted"
    );
    Ok(Some(report))
}

async fn summarize(
    provider: &dyn ChatProvider,
    model: &str,
    to_compact: &[ChatMessage],
    prompt: Option<&str>,
    signal: &CancellationToken,
) -> Result<String> {
    let request = vec![ChatMessage::user(build_summarization_prompt(
        to_compact, prompt,
    ))];
    let outcome = provider
        .chat(model, &request, ChatOptions::new(signal.clone()))
        .await?;
    Ok(outcome.content)
}

/// True for messages truncation may drop (everything but system prompts).
fn droppable(message: &ChatMessage) -> bool {
    message.role != MessageRole::System || message.summary
}

/// Drop oldest droppable messages until the history fits under `threshold`.
pub fn truncate_to_threshold(
    history: &mut Vec<ChatMessage>,
    counter: &dyn TokenCounter,
    model: &str,
    threshold: usize,
) -> usize {
    let mut dropped = 0;
    while count_messages(counter, history, Some(model)) >= threshold {
        match history.iter().position(droppable) {
            Some(idx) => {
                history.remove(idx);
                dropped += 1;
            }
            None => break,
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_counter::CharTokenCounter;
    use crate::error::{EngineError, ProviderFailure};
    use crate::llm::ChatOutcome;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct SummarizingProvider {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatProvider for SummarizingProvider {
        async fn chat(
            &self,
            model: &str,
            _messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> Result<ChatOutcome> {
            self.calls.lock().push(model.to_string());
            if self.fail {
                Err(EngineError::Provider(ProviderFailure::from_status(
                    500, "broken",
                )))
            } else {
                Ok(ChatOutcome {
                    content: "the summary".into(),
                    ..Default::default()
                })
            }
        }
    }

    fn long_history() -> Vec<ChatMessage> {
        let mut history = vec![ChatMessage::system("be brief")];
        for i in 0..10 {
            history.push(ChatMessage::user(format!("question {} {}", i, "x".repeat(40))));
            history.push(ChatMessage::assistant(format!("answer {} {}", i, "y".repeat(40))));
        }
        history
    }

    fn config(threshold: usize) -> CompactionConfig {
        CompactionConfig {
            threshold_tokens: Some(threshold),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn below_threshold_is_noop() {
        let provider = SummarizingProvider {
            fail: false,
            calls: Mutex::new(Vec::new()),
        };
        let counter = CharTokenCounter::default();
        let mut history = long_history();
        let before = history.len();

        let report = compact_if_needed(
            &mut history,
            "openai/gpt-4o-mini",
            &provider,
            &counter,
            &config(1_000_000),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.is_none());
        assert_eq!(history.len(), before);
        assert!(provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn summarizes_middle_and_preserves_structure() {
        let provider = SummarizingProvider {
            fail: false,
            calls: Mutex::new(Vec::new()),
        };
        let counter = CharTokenCounter::default();
        let mut history = long_history();

        let report = compact_if_needed(
            &mut history,
            "openai/gpt-4o-mini",
            &provider,
            &counter,
            &config(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .expect("compaction should run");

        // system + summary + 5 preserved
        assert_eq!(history.len(), 7);
        assert_eq!(history[0].content, "be brief");
        assert!(history[1].summary);
        assert_eq!(history[1].content, "the summary");
        assert_eq!(report.messages_compacted, 15);
        assert!(report.tokens_after < report.tokens_before);
        assert_eq!(report.summary.as_deref(), Some("the summary"));
    }

    #[tokio::test]
    async fn summarize_failure_falls_back_to_truncate() {
        let provider = SummarizingProvider {
            fail: true,
            calls: Mutex::new(Vec::new()),
        };
        let counter = CharTokenCounter::default();
        let mut history = long_history();

        let report = compact_if_needed(
            &mut history,
            "openai/gpt-4o-mini",
            &provider,
            &counter,
            &config(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .expect("compaction should still run");

        // Oldest non-system messages dropped until under threshold.
        assert_eq!(history[0].content, "be brief");
        assert!(history.len() < 21);
        assert!(report.messages_compacted > 0);
        assert!(report.summary.is_none());
        let counter = CharTokenCounter::default();
        assert!(count_messages(&counter, &history, Some("m")) < 50);
    }

    #[tokio::test]
    async fn preserve_recent_covering_history_is_noop() {
        let provider = SummarizingProvider {
            fail: false,
            calls: Mutex::new(Vec::new()),
        };
        let counter = CharTokenCounter::default();
        let mut history = long_history();
        let cfg = CompactionConfig {
            threshold_tokens: Some(1),
            preserve_recent: 100,
            ..Default::default()
        };

        let report = compact_if_needed(
            &mut history,
            "openai/gpt-4o-mini",
            &provider,
            &counter,
            &cfg,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.is_none());
        assert_eq!(history.len(), 21);
    }

    #[tokio::test]
    async fn custom_strategy_replaces_middle() {
        let provider = SummarizingProvider {
            fail: false,
            calls: Mutex::new(Vec::new()),
        };
        let counter = CharTokenCounter::default();
        let mut history = long_history();
        let cfg = CompactionConfig {
            threshold_tokens: Some(50),
            strategy: CompactionStrategy::Custom(Arc::new(|middle| {
                Box::pin(async move {
                    Ok(vec![ChatMessage::summary(format!(
                        "[{} messages elided]",
                        middle.len()
                    ))])
                })
            })),
            ..Default::default()
        };

        compact_if_needed(
            &mut history,
            "openai/gpt-4o-mini",
            &provider,
            &counter,
            &cfg,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .expect("compaction should run");

        assert_eq!(history[1].content, "[15 messages elided]");
        assert!(provider.calls.lock().is_empty());
    }

    #[test]
    fn truncate_drops_oldest_non_system_first() {
        let counter = CharTokenCounter::default();
        let mut history = long_history();
        let dropped = truncate_to_threshold(&mut history, &counter, "m", 60);
        assert!(dropped > 0);
        assert_eq!(history[0].content, "be brief");
    }
}
