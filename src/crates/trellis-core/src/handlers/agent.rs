//! Agent node: one LLM call (or bounded tool-calling conversation) over the
//! shared history.
//!
//! Request shape is `[system(prompt), ...history, user(input)]`. Compaction
//! runs once, immediately before the request is built; provider calls go
//! through the retry loop; on success the `(user, assistant)` pair is
//! appended to the shared history.

use super::{NodeHandler, NodeOutcome};
use crate::config::ToolLimitBehavior;
use crate::context::compact_if_needed;
use crate::error::{EngineError, Result};
use crate::hitl::{HitlAction, HitlRequestContext};
use crate::llm::{chat_with_tools, ChatMessage, ToolDefinition};
use crate::retry::retry_with_backoff;
use crate::runtime::ExecutionContext;
use crate::validator::ValidationIssue;
use crate::workflow::{AgentData, HitlMode, HitlSettings, Node, NodeKind, Workflow};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

pub struct AgentHandler;

impl AgentHandler {
    /// Tool definitions for the ids this agent enables. Ids without a
    /// configured definition get a permissive object schema so the host
    /// invoker still sees the call.
    fn resolve_tools(ctx: &ExecutionContext, data: &AgentData) -> Vec<ToolDefinition> {
        data.tools
            .iter()
            .map(|id| {
                ctx.tool_definitions
                    .iter()
                    .find(|d| &d.name == id)
                    .cloned()
                    .unwrap_or_else(|| ToolDefinition {
                        name: id.clone(),
                        description: String::new(),
                        parameters: json!({ "type": "object" }),
                    })
            })
            .collect()
    }

    /// Tool-loop exhaustion with the `hitl` policy: ask a human for the
    /// final response, falling back to the model's last draft.
    async fn escalate_exhaustion(
        ctx: &ExecutionContext,
        node: &Node,
        last_content: String,
    ) -> Result<String> {
        let settings = HitlSettings {
            enabled: true,
            mode: HitlMode::Input,
            prompt: Some(
                "Tool iteration limit reached; provide the final response or approve the last draft."
                    .to_string(),
            ),
            ..Default::default()
        };
        let request = ctx.hitl.build_request(
            &node.id,
            node.label(),
            &settings,
            HitlRequestContext {
                input: ctx.current_input.clone(),
                output: Some(last_content.clone()),
                workflow_name: ctx.workflow.meta.name.clone(),
                session_id: ctx.session_id.clone(),
            },
        );
        let handler = ctx.callbacks.on_hitl_request.clone();
        let response = ctx
            .hitl
            .await_response(request, handler.as_ref(), None, &ctx.signal)
            .await?;
        match response.action {
            HitlAction::Submit | HitlAction::Modify => {
                Ok(response.text_data().unwrap_or(last_content))
            }
            HitlAction::Reject => Err(EngineError::Extension(
                "agent tool loop exceeded max iterations".to_string(),
            )),
            _ => Ok(last_content),
        }
    }
}

#[async_trait]
impl NodeHandler for AgentHandler {
    fn validate(&self, node: &Node, _workflow: &Workflow) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if let NodeKind::Agent(data) = &node.kind {
            if data.prompt.trim().is_empty() {
                issues.push(ValidationIssue::warning(
                    Some(&node.id),
                    "agent has an empty system prompt",
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Agent(data) = &node.kind else {
            return Err(EngineError::Extension(
                "agent handler invoked for a non-agent node".to_string(),
            ));
        };
        let model = ctx.model_for(data.model.as_deref());

        let report = compact_if_needed(
            &mut ctx.history,
            &model,
            ctx.provider.as_ref(),
            ctx.counter.as_ref(),
            &ctx.config.compaction,
            &ctx.signal,
        )
        .await?;
        if let Some(report) = report {
            if let Some(cb) = &ctx.callbacks.on_context_compacted {
                cb(&report);
            }
        }

        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        if !data.prompt.is_empty() {
            messages.push(ChatMessage::system(data.prompt.clone()));
        }
        messages.extend(ctx.history.iter().cloned());
        messages.push(ChatMessage::user(ctx.current_input.clone()));

        // Tools are only offered when a host invoker can answer them.
        let tool_definitions = if ctx.tools.is_some() {
            Self::resolve_tools(ctx, data)
        } else {
            Vec::new()
        };
        let options = ctx
            .chat_options()
            .with_temperature(data.temperature)
            .with_max_tokens(data.max_tokens)
            .with_tools(tool_definitions)
            .with_on_token(ctx.token_callback_for(&node.id))
            .with_on_reasoning(ctx.reasoning_callback_for(&node.id));
        let plan = ctx.retry_plan_for(node);

        let content = match (ctx.tools.clone(), data.tools.is_empty()) {
            (Some(invoker), false) => {
                let provider = ctx.provider.clone();
                let max_iterations = ctx.config.max_tool_iterations;
                let messages_slice: &[ChatMessage] = &messages;
                let model_name: &str = &model;
                let (result, trace) =
                    retry_with_backoff(&plan, &ctx.signal, &node.id, move |_attempt| {
                        let provider = provider.clone();
                        let options = options.clone();
                        let invoker = invoker.clone();
                        async move {
                            chat_with_tools(
                                provider.as_ref(),
                                model_name,
                                messages_slice,
                                &options,
                                &invoker,
                                max_iterations,
                            )
                            .await
                        }
                    })
                    .await;

                let loop_outcome = match result {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(ctx.node_failure(node, &e, Some(trace)).into()),
                };
                ctx.record_usage(&node.id, &model, loop_outcome.outcome.usage);

                if loop_outcome.exhausted {
                    match ctx.config.on_max_tool_iterations {
                        ToolLimitBehavior::Warning => {
                            warn!(node_id = %node.id, "tool loop exhausted, returning last content");
                            loop_outcome.outcome.content
                        }
                        ToolLimitBehavior::Error => {
                            return Err(EngineError::Extension(
                                "agent tool loop exceeded max iterations".to_string(),
                            ));
                        }
                        ToolLimitBehavior::Hitl => {
                            Self::escalate_exhaustion(ctx, node, loop_outcome.outcome.content)
                                .await?
                        }
                    }
                } else {
                    loop_outcome.outcome.content
                }
            }
            _ => {
                let (result, trace) = ctx
                    .chat_with_retry(&node.id, &plan, &model, &messages, &options)
                    .await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(ctx.node_failure(node, &e, Some(trace)).into()),
                };
                ctx.record_usage(&node.id, &model, outcome.usage);
                outcome.content
            }
        };

        ctx.history
            .push(ChatMessage::user(ctx.current_input.clone()));
        ctx.history.push(ChatMessage::assistant(content.clone()));

        Ok(NodeOutcome::forward(
            content,
            ctx.workflow.default_targets(&node.id),
        ))
    }
}
