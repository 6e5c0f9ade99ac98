//! SSE parsing for OpenAI-compatible streaming chat completions.
//!
//! Two layers: a line buffer that reassembles `data:` payloads from
//! arbitrary byte chunks, and a parser state that folds delta payloads into
//! the final content, reasoning, tool calls, and usage.

use serde_json::Value;
use std::collections::BTreeMap;
use trellis_core::error::{EngineError, ErrorCode, ProviderFailure, Result};
use trellis_core::llm::{TokenUsage, ToolCall};

/// Reassembles SSE `data:` payloads from partial network chunks.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the complete `data:` payloads it finished.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim_start();
                if !payload.is_empty() {
                    payloads.push(payload.to_string());
                }
            }
        }
        payloads
    }
}

/// Incremental fragment surfaced while parsing a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content(String),
    Reasoning(String),
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds streamed delta payloads into a complete response.
#[derive(Debug, Default)]
pub struct StreamState {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u64, PartialToolCall>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel arrived.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Parse one `data:` payload (without the prefix).
    pub fn parse_payload(&mut self, payload: &str) -> Result<Vec<StreamEvent>> {
        if payload.trim() == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let data: Value = serde_json::from_str(payload).map_err(|e| {
            EngineError::Provider(ProviderFailure::from_message(
                ErrorCode::LlmError,
                format!("malformed stream payload: {}", e),
            ))
        })?;

        if let Some(usage) = data.get("usage") {
            self.usage = parse_usage(usage).or(self.usage);
        }

        let Some(choice) = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
        else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        let delta = choice.get("delta");

        if let Some(content) = delta
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            if !content.is_empty() {
                self.content.push_str(content);
                events.push(StreamEvent::Content(content.to_string()));
            }
        }

        if let Some(reasoning) = delta
            .and_then(|d| d.get("reasoning"))
            .and_then(|r| r.as_str())
        {
            if !reasoning.is_empty() {
                self.reasoning.push_str(reasoning);
                events.push(StreamEvent::Reasoning(reasoning.to_string()));
            }
        }

        if let Some(tool_calls) = delta
            .and_then(|d| d.get("tool_calls"))
            .and_then(|tc| tc.as_array())
        {
            for tool_call in tool_calls {
                let index = tool_call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = tool_call.get("id").and_then(|v| v.as_str()) {
                    partial.id.get_or_insert_with(|| id.to_string());
                }
                if let Some(function) = tool_call.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        partial.name.get_or_insert_with(|| name.to_string());
                    }
                    if let Some(fragment) = function.get("arguments").and_then(|a| a.as_str()) {
                        partial.arguments.push_str(fragment);
                    }
                }
            }
        }

        Ok(events)
    }

    /// Final accumulated response.
    pub fn finish(self) -> (String, Vec<ToolCall>, Option<TokenUsage>) {
        let tool_calls = self
            .tool_calls
            .into_values()
            .filter_map(|partial| {
                let name = partial.name?;
                let arguments = if partial.arguments.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments)
                        .unwrap_or(Value::String(partial.arguments))
                };
                Some(ToolCall {
                    id: partial.id.unwrap_or_default(),
                    name,
                    arguments,
                })
            })
            .collect();
        (self.content, tool_calls, self.usage)
    }

    /// Reasoning text accumulated so far.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

/// Usage object from a response or final stream chunk.
pub fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    let input = usage.get("prompt_tokens")?.as_u64()?;
    let output = usage.get("completion_tokens")?.as_u64()?;
    Some(TokenUsage::new(input, output))
}
