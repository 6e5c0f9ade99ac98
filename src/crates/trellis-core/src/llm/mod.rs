//! Provider contract for chat-based language models.
//!
//! The engine is an orchestration library, not an LLM client: this module
//! defines the trait and message types the scheduler talks to, and provider
//! crates implement them for their particular API. Streaming is part of the
//! contract — when a token callback is supplied the provider must deliver
//! tokens in the order produced — and every call races the run's
//! cancellation token.

mod tool_loop;

pub use tool_loop::{chat_with_tools, ToolInvoker, ToolLoopOutcome};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a conversation history.
///
/// The engine keeps the system prompt (when present) at index 0 and
/// alternates user/assistant after it. Compaction summaries are `system`
/// messages tagged with `summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the tool call a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// True for compaction summary messages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            summary: false,
        }
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// A tool result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// A compaction summary message.
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            summary: true,
            ..Self::new(MessageRole::System, content)
        }
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token usage reported for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage from prompt/completion counts.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Accumulate another call's usage.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Callback receiving streamed fragments in production order.
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call options handed to a provider.
#[derive(Clone)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Tools offered to the model for this call.
    pub tools: Vec<ToolDefinition>,
    /// Cancellation token for the run; providers must abort in-flight
    /// requests when it fires and resolve with a cancellation error.
    pub signal: CancellationToken,
    /// When set, the provider must stream and deliver each content fragment
    /// here, in order.
    pub on_token: Option<TokenCallback>,
    /// Streamed reasoning fragments, for models that separate them.
    pub on_reasoning: Option<TokenCallback>,
}

impl ChatOptions {
    /// Options bound to a cancellation token, everything else unset.
    pub fn new(signal: CancellationToken) -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            signal,
            on_token: None,
            on_reasoning: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_on_token(mut self, on_token: Option<TokenCallback>) -> Self {
        self.on_token = on_token;
        self
    }

    pub fn with_on_reasoning(mut self, on_reasoning: Option<TokenCallback>) -> Self {
        self.on_reasoning = on_reasoning;
        self
    }
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tools", &self.tools.len())
            .field("streaming", &self.on_token.is_some())
            .finish()
    }
}

/// Result of one provider call.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Assistant content (the concatenation of streamed fragments when
    /// streaming).
    pub content: String,
    /// Tool calls the model requested instead of, or alongside, content.
    pub tool_calls: Vec<ToolCall>,
    /// Usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Input modality a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    File,
}

/// Static capabilities of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    pub input_modalities: Vec<Modality>,
    pub context_length: u32,
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

impl ModelCapabilities {
    /// True when the model accepts the given modality.
    pub fn supports_modality(&self, modality: Modality) -> bool {
        self.input_modalities.contains(&modality)
    }
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            input_modalities: vec![Modality::Text],
            context_length: 128_000,
            supports_tools: false,
            supports_streaming: true,
        }
    }
}

/// Chat provider contract.
///
/// Implementations convert messages to their wire format, make the call,
/// stream fragments through `options.on_token` when set, and map transport
/// failures onto the engine's error taxonomy. Aborting via `options.signal`
/// must resolve with a cancellation error, never a successful empty
/// response.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one chat completion.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome>;

    /// Capabilities of a model. Statically inferred by default
    /// implementations; must be cheap to call repeatedly.
    fn capabilities(&self, model: &str) -> ModelCapabilities {
        let _ = model;
        ModelCapabilities::default()
    }
}
