//! Shared test fixtures: a scripted provider and a callback recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use trellis_core::error::{EngineError, ProviderFailure, RateLimitInfo, Result};
use trellis_core::llm::{ChatMessage, ChatOptions, ChatOutcome, ChatProvider, TokenUsage};
use trellis_core::{ExecutionCallbacks, Workflow};

/// One scripted provider response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub content: String,
    pub fragments: Option<Vec<String>>,
    pub error: Option<(u16, Option<f64>)>,
    pub delay: Option<Duration>,
    pub usage: Option<TokenUsage>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            fragments: None,
            error: None,
            delay: None,
            usage: None,
        }
    }

    pub fn streamed(content: impl Into<String>, fragments: &[&str]) -> Self {
        Self {
            fragments: Some(fragments.iter().map(|f| f.to_string()).collect()),
            ..Self::text(content)
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            error: Some((code, None)),
            ..Self::text("")
        }
    }

    pub fn rate_limited(retry_after: f64) -> Self {
        Self {
            error: Some((429, Some(retry_after))),
            ..Self::text("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_usage(mut self, input: u64, output: u64) -> Self {
        self.usage = Some(TokenUsage::new(input, output));
        self
    }
}

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub streaming: bool,
}

/// Provider that replays a scripted queue of replies and records calls.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome> {
        self.calls.lock().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            streaming: options.on_token.is_some(),
        });

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::text(""));

        if let Some(delay) = reply.delay {
            tokio::select! {
                _ = options.signal.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if options.signal.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if let Some((status, retry_after)) = reply.error {
            let mut failure = ProviderFailure::from_status(status, "scripted failure");
            if let Some(retry_after) = retry_after {
                failure = failure.with_rate_limit(RateLimitInfo {
                    retry_after: Some(retry_after),
                    ..Default::default()
                });
            }
            return Err(EngineError::Provider(failure));
        }

        if let Some(cb) = &options.on_token {
            match &reply.fragments {
                Some(fragments) => {
                    for fragment in fragments {
                        cb(fragment);
                    }
                }
                None if !reply.content.is_empty() => cb(&reply.content),
                None => {}
            }
        }

        Ok(ChatOutcome {
            content: reply.content,
            tool_calls: Vec::new(),
            usage: reply.usage,
        })
    }
}

/// Records callback firings as ordered event strings.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    /// Callbacks that record every event this recorder understands.
    pub fn callbacks(&self) -> ExecutionCallbacks {
        let r = self.clone();
        let callbacks = ExecutionCallbacks::new()
            .with_on_node_start(Arc::new({
                let r = r.clone();
                move |id| r.push(format!("start:{}", id))
            }))
            .with_on_node_finish(Arc::new({
                let r = r.clone();
                move |id, output| r.push(format!("finish:{}:{}", id, output))
            }))
            .with_on_node_error(Arc::new({
                let r = r.clone();
                move |envelope| r.push(format!("error:{}:{}", envelope.node_id, envelope.code))
            }))
            .with_on_token(Arc::new({
                let r = r.clone();
                move |id, fragment| r.push(format!("token:{}:{}", id, fragment))
            }))
            .with_on_route_selected(Arc::new({
                let r = r.clone();
                move |id, route| r.push(format!("route:{}:{}", id, route))
            }))
            .with_on_token_usage(Arc::new({
                let r = r.clone();
                move |event| r.push(format!("usage:{}", event.node_id))
            }))
            .with_on_context_compacted(Arc::new({
                let r = r.clone();
                move |report| r.push(format!("compacted:{}", report.messages_compacted))
            }))
            .with_on_branch_start(Arc::new({
                let r = r.clone();
                move |node, branch, _label| r.push(format!("branch_start:{}:{}", node, branch))
            }))
            .with_on_branch_token(Arc::new({
                let r = r.clone();
                move |node, branch, fragment| {
                    r.push(format!("branch_token:{}:{}:{}", node, branch, fragment))
                }
            }))
            .with_on_branch_complete(Arc::new({
                let r = r.clone();
                move |node, branch, result| {
                    let state = match result {
                        Ok(output) => format!("ok:{}", output),
                        Err(envelope) => format!("err:{}", envelope.code),
                    };
                    r.push(format!("branch_complete:{}:{}:{}", node, branch, state))
                }
            }));
        callbacks
    }
}

/// Parse a workflow document from JSON.
pub fn wf(doc: serde_json::Value) -> Workflow {
    serde_json::from_value(doc).expect("workflow document should parse")
}
