//! OpenRouter client.
//!
//! Speaks the OpenAI-compatible chat completions API (OpenRouter routes to
//! many upstream providers behind one endpoint). Streaming is SSE over
//! `bytes_stream`; every await races the run's cancellation token, and an
//! aborted call resolves with a cancellation error rather than a partial
//! success.

use crate::capabilities::infer_capabilities;
use crate::config::RemoteLlmConfig;
use crate::sse::{parse_usage, SseLineBuffer, StreamEvent, StreamState};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use trellis_core::error::{
    EngineError, ErrorCode, ProviderFailure, RateLimitInfo, Result,
};
use trellis_core::llm::{
    ChatMessage, ChatOptions, ChatOutcome, ChatProvider, MessageRole, ModelCapabilities,
    ToolCall, ToolDefinition,
};
use tracing::debug;

/// OpenRouter API client.
pub struct OpenRouterClient {
    config: RemoteLlmConfig,
    client: Client,
    capabilities: Mutex<HashMap<String, ModelCapabilities>>,
}

impl OpenRouterClient {
    /// Create a client from configuration.
    pub fn new(config: RemoteLlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            client,
            capabilities: Mutex::new(HashMap::new()),
        }
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                }
                .to_string(),
                content: m.content.clone(),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|call| ApiToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: ApiFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|tool| ApiTool {
                kind: "function".to_string(),
                function: ApiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    async fn consume_stream(
        &self,
        response: Response,
        options: &ChatOptions,
    ) -> Result<ChatOutcome> {
        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut state = StreamState::new();

        loop {
            let chunk = tokio::select! {
                _ = options.signal.cancelled() => return Err(EngineError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for payload in buffer.push(&text) {
                        for event in state.parse_payload(&payload)? {
                            match event {
                                StreamEvent::Content(fragment) => {
                                    if let Some(cb) = &options.on_token {
                                        cb(&fragment);
                                    }
                                }
                                StreamEvent::Reasoning(fragment) => {
                                    if let Some(cb) = &options.on_reasoning {
                                        cb(&fragment);
                                    }
                                }
                            }
                        }
                    }
                    if state.is_done() {
                        break;
                    }
                }
                Some(Err(e)) => return Err(map_transport_error(e)),
                None => break,
            }
        }

        let (content, tool_calls, usage) = state.finish();
        Ok(ChatOutcome {
            content,
            tool_calls,
            usage,
        })
    }

    async fn parse_complete(&self, response: Response) -> Result<ChatOutcome> {
        let body: ApiResponse = response.json().await.map_err(|e| {
            EngineError::Provider(ProviderFailure::from_message(
                ErrorCode::LlmError,
                format!("invalid response body: {}", e),
            ))
        })?;
        let choice = body.choices.into_iter().next().ok_or_else(|| {
            EngineError::Provider(ProviderFailure::from_message(
                ErrorCode::LlmError,
                "response contained no choices",
            ))
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        Ok(ChatOutcome {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: body.usage.as_ref().and_then(parse_usage),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenRouterClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome> {
        let streaming = options.on_token.is_some();
        let url = format!("{}/chat/completions", self.config.base_url);

        let body = ApiRequest {
            model,
            messages: Self::convert_messages(messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tools: Self::convert_tools(&options.tools),
            stream: streaming,
            stream_options: streaming.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let mut request = self
            .client
            .post(&url)
            .json(&body)
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(app_name) = &self.config.app_name {
            request = request.header("HTTP-Referer", app_name);
            request = request.header("X-Title", app_name);
        }

        debug!(model, streaming, messages = messages.len(), "chat completion request");
        let response = tokio::select! {
            _ = options.signal.cancelled() => return Err(EngineError::Cancelled),
            result = request.send() => result.map_err(map_transport_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            let rate_limit = rate_limit_from_headers(response.headers());
            let text = response.text().await.unwrap_or_default();
            let mut failure = ProviderFailure::from_status(
                status.as_u16(),
                format!("OpenRouter API error {}: {}", status, text),
            );
            if rate_limit != RateLimitInfo::default() {
                failure = failure.with_rate_limit(rate_limit);
            }
            return Err(EngineError::Provider(failure));
        }

        if streaming {
            self.consume_stream(response, &options).await
        } else {
            tokio::select! {
                _ = options.signal.cancelled() => Err(EngineError::Cancelled),
                outcome = self.parse_complete(response) => outcome,
            }
        }
    }

    fn capabilities(&self, model: &str) -> ModelCapabilities {
        let mut cache = self.capabilities.lock();
        cache
            .entry(model.to_string())
            .or_insert_with(|| infer_capabilities(model))
            .clone()
    }
}

fn map_transport_error(error: reqwest::Error) -> EngineError {
    let code = if error.is_timeout() {
        ErrorCode::Timeout
    } else {
        ErrorCode::Network
    };
    EngineError::Provider(ProviderFailure::from_message(code, error.to_string()))
}

fn rate_limit_from_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header_f64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
    };
    let header_u32 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
    };

    RateLimitInfo {
        limit: header_u32("x-ratelimit-limit"),
        remaining: header_u32("x-ratelimit-remaining"),
        reset_at: header_f64("x-ratelimit-reset")
            .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64)),
        retry_after: header_f64("retry-after"),
    }
}

// OpenRouter wire types (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ApiResponseFunctionCall {
    name: String,
    arguments: String,
}
