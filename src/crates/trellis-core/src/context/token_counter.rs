//! Token counting for context-window management.
//!
//! The default counter is a character-ratio approximation; callers that need
//! exact counts plug in their own [`TokenCounter`]. Limits come from a
//! static table keyed by provider-qualified model id.

use crate::llm::ChatMessage;

/// Fallback context window when a model is not in the table.
pub const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// Per-message formatting overhead added by chat templates.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Context windows for common provider-qualified model ids.
static MODEL_LIMITS: &[(&str, usize)] = &[
    ("openai/gpt-4o", 128_000),
    ("openai/gpt-4o-mini", 128_000),
    ("openai/gpt-4.1", 1_047_576),
    ("openai/gpt-4.1-mini", 1_047_576),
    ("openai/o3-mini", 200_000),
    ("anthropic/claude-3-opus", 200_000),
    ("anthropic/claude-3.5-sonnet", 200_000),
    ("anthropic/claude-3.5-haiku", 200_000),
    ("google/gemini-1.5-pro", 2_000_000),
    ("google/gemini-1.5-flash", 1_000_000),
    ("google/gemini-2.0-flash-001", 1_000_000),
    ("meta-llama/llama-3.1-70b-instruct", 131_072),
    ("meta-llama/llama-3.1-8b-instruct", 131_072),
    ("mistralai/mistral-large", 128_000),
    ("deepseek/deepseek-chat", 64_000),
];

/// Token estimation contract.
pub trait TokenCounter: Send + Sync {
    /// Estimate tokens in a text, optionally model-aware.
    fn count(&self, text: &str, model: Option<&str>) -> usize;

    /// Context window of a model.
    fn limit(&self, model: &str) -> usize {
        MODEL_LIMITS
            .iter()
            .find(|(id, _)| *id == model)
            .map(|(_, limit)| *limit)
            .unwrap_or(DEFAULT_CONTEXT_LIMIT)
    }
}

/// Character-ratio token counter: `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone)]
pub struct CharTokenCounter {
    chars_per_token: usize,
}

impl CharTokenCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharTokenCounter {
    fn count(&self, text: &str, _model: Option<&str>) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }
}

/// Estimate tokens across a message history, including per-message
/// formatting overhead.
pub fn count_messages(
    counter: &dyn TokenCounter,
    messages: &[ChatMessage],
    model: Option<&str>,
) -> usize {
    messages
        .iter()
        .map(|m| counter.count(&m.content, model) + MESSAGE_OVERHEAD_TOKENS)
        .sum()
}

/// History split into the parts compaction keeps and replaces.
#[derive(Debug, Clone)]
pub struct CompactionSplit {
    /// The leading system prompt, preserved verbatim when present.
    pub leading_system: Option<ChatMessage>,
    /// Middle messages to be replaced by a summary.
    pub to_compact: Vec<ChatMessage>,
    /// The most recent messages, preserved verbatim.
    pub to_preserve: Vec<ChatMessage>,
}

/// Split a history at `preserve_recent`, keeping the leading system prompt
/// out of the compactable middle.
pub fn split_messages_for_compaction(
    messages: &[ChatMessage],
    preserve_recent: usize,
) -> CompactionSplit {
    use crate::llm::MessageRole;

    let (leading_system, rest) = match messages.first() {
        Some(first) if first.role == MessageRole::System && !first.summary => {
            (Some(first.clone()), &messages[1..])
        }
        _ => (None, messages),
    };

    if rest.len() <= preserve_recent {
        return CompactionSplit {
            leading_system,
            to_compact: Vec::new(),
            to_preserve: rest.to_vec(),
        };
    }

    let split = rest.len() - preserve_recent;
    CompactionSplit {
        leading_system,
        to_compact: rest[..split].to_vec(),
        to_preserve: rest[split..].to_vec(),
    }
}

/// Prompt used when no custom summarization prompt is configured.
pub const DEFAULT_SUMMARIZE_PROMPT: &str = "Summarize the conversation below for use as \
context in a continuing session. Preserve key facts, decisions, named entities, and any \
unresolved questions. Be concise; do not add commentary.";

/// Build the summarization request for the compactable middle.
pub fn build_summarization_prompt(messages: &[ChatMessage], custom: Option<&str>) -> String {
    let mut prompt = String::from(custom.unwrap_or(DEFAULT_SUMMARIZE_PROMPT));
    prompt.push_str("\n\n");
    for message in messages {
        let role = match message.role {
            crate::llm::MessageRole::System => "system",
            crate::llm::MessageRole::User => "user",
            crate::llm::MessageRole::Assistant => "assistant",
            crate::llm::MessageRole::Tool => "tool",
        };
        prompt.push_str(role);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}
