//! Bounded tool-calling conversation.
//!
//! When an agent node has tools enabled, each model response may request
//! tool calls. The loop invokes the host's tool callback, appends the
//! results as `tool` messages, and asks the model again, up to a hard
//! iteration cap. What happens at the cap is the caller's policy decision.

use super::{ChatMessage, ChatOptions, ChatOutcome, ChatProvider};
use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host callback resolving one tool call to its string result.
pub type ToolInvoker =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Result of a tool-calling conversation.
#[derive(Debug)]
pub struct ToolLoopOutcome {
    /// The final model response (last content when exhausted).
    pub outcome: ChatOutcome,
    /// Tool iterations performed.
    pub iterations: u32,
    /// True when the cap was hit while the model still wanted tools.
    pub exhausted: bool,
    /// Messages appended to the conversation during the loop.
    pub transcript: Vec<ChatMessage>,
}

/// Drive a chat with tool calls until the model answers with content or the
/// iteration cap is hit.
///
/// `messages` is the full request; tool-call rounds are appended to a local
/// copy and returned in `transcript` so the caller decides what enters the
/// shared history. Tool invocation failures are fed back to the model as
/// error text rather than aborting the conversation.
pub async fn chat_with_tools(
    provider: &dyn ChatProvider,
    model: &str,
    messages: &[ChatMessage],
    options: &ChatOptions,
    invoker: &ToolInvoker,
    max_iterations: u32,
) -> Result<ToolLoopOutcome> {
    let mut conversation = messages.to_vec();
    let mut transcript = Vec::new();
    let mut iterations = 0u32;

    loop {
        let outcome = provider
            .chat(model, &conversation, options.clone())
            .await?;

        if outcome.tool_calls.is_empty() {
            return Ok(ToolLoopOutcome {
                outcome,
                iterations,
                exhausted: false,
                transcript,
            });
        }

        if iterations >= max_iterations {
            warn!(model, iterations, "tool loop cap reached with pending tool calls");
            return Ok(ToolLoopOutcome {
                outcome,
                iterations,
                exhausted: true,
                transcript,
            });
        }
        iterations += 1;

        let mut assistant = ChatMessage::assistant(outcome.content.clone());
        assistant.tool_calls = outcome.tool_calls.clone();
        conversation.push(assistant.clone());
        transcript.push(assistant);

        for call in &outcome.tool_calls {
            debug!(tool = %call.name, call_id = %call.id, "invoking tool");
            let result = match invoker(call.name.clone(), call.arguments.clone()).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool invocation failed");
                    format!("Error: {}", e)
                }
            };
            let msg = ChatMessage::tool(call.id.clone(), result);
            conversation.push(msg.clone());
            transcript.push(msg);
        }
    }
}
