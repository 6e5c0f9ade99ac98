//! While-loop node: bounded iteration over a body subgraph.
//!
//! The condition is evaluated exactly once per iteration boundary, before
//! the cap check, so "cap reached while the condition still holds" is
//! observable and `onMaxIterations` can apply. No re-check happens inside
//! the step.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::llm::ChatMessage;
use crate::runtime::ExecutionContext;
use crate::scheduler::execute_subgraph;
use crate::workflow::{
    LoopMode, LoopOutputMode, Node, NodeKind, OnMaxIterations, WhileLoopData, BODY_HANDLE,
    DONE_HANDLE,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

pub struct WhileLoopHandler;

impl WhileLoopHandler {
    /// Parse a boolean from a condition response: the first token that
    /// reads as yes/true/no/false decides, case-insensitively.
    fn parse_condition(response: &str) -> Option<bool> {
        for token in response
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if token.eq_ignore_ascii_case("yes") || token.eq_ignore_ascii_case("true") {
                return Some(true);
            }
            if token.eq_ignore_ascii_case("no") || token.eq_ignore_ascii_case("false") {
                return Some(false);
            }
        }
        None
    }

    fn condition_request(
        data: &WhileLoopData,
        iteration: u32,
        current_input: &str,
        accumulated: &[String],
    ) -> Vec<ChatMessage> {
        let question = data
            .condition_prompt
            .as_deref()
            .unwrap_or("Should the loop run another iteration?");
        let mut body = format!(
            "{}\n\nIteration about to run: {}\nCurrent value:\n{}\n",
            question, iteration, current_input
        );
        if !accumulated.is_empty() {
            body.push_str("\nPrevious iteration outputs:\n");
            for (index, output) in accumulated.iter().enumerate() {
                body.push_str(&format!("{}. {}\n", index + 1, output));
            }
        }
        body.push_str("\nAnswer yes or no.");
        vec![
            ChatMessage::system(
                "You decide whether a loop should continue. Answer with yes or no only.",
            ),
            ChatMessage::user(body),
        ]
    }

    async fn evaluate_condition(
        ctx: &mut ExecutionContext,
        node: &Node,
        data: &WhileLoopData,
        iteration: u32,
        current_input: &str,
        accumulated: &[String],
    ) -> Result<bool> {
        let model = ctx.model_for(data.model.as_deref());
        let messages = Self::condition_request(data, iteration, current_input, accumulated);
        let options = ctx.chat_options();
        let plan = ctx.retry_plan_for(node);
        let (result, trace) = ctx
            .chat_with_retry(&node.id, &plan, &model, &messages, &options)
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(ctx.node_failure(node, &e, Some(trace)).into()),
        };
        ctx.record_usage(&node.id, &model, outcome.usage);

        match Self::parse_condition(&outcome.content) {
            Some(decision) => {
                debug!(node_id = %node.id, iteration, decision, "loop condition evaluated");
                Ok(decision)
            }
            None => Err(EngineError::Extension(format!(
                "could not parse a boolean from loop condition response: '{}'",
                outcome.content.trim()
            ))),
        }
    }
}

#[async_trait]
impl NodeHandler for WhileLoopHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::WhileLoop(data) = &node.kind else {
            return Err(EngineError::Extension(
                "while-loop handler invoked for a non-loop node".to_string(),
            ));
        };

        let workflow = ctx.workflow.clone();
        let body_start = workflow
            .handle_targets(&node.id, BODY_HANDLE)
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "while-loop '{}' has no edge on its 'body' handle",
                    node.id
                ))
            })?;
        let done_targets = workflow.handle_targets(&node.id, DONE_HANDLE);

        let arrival_input = ctx.current_input.clone();
        let mut body_ctx = ctx.child_for_loop_body();
        let mut current = arrival_input.clone();
        let mut accumulated: Vec<String> = Vec::new();
        let mut iteration: u32 = 0;
        let mut capped = false;

        loop {
            let condition = match data.loop_mode {
                LoopMode::Fixed => iteration < data.max_iterations,
                LoopMode::Condition => {
                    Self::evaluate_condition(ctx, node, data, iteration, &current, &accumulated)
                        .await?
                }
            };
            if !condition {
                break;
            }
            if iteration >= data.max_iterations {
                capped = true;
                break;
            }

            let body_output =
                execute_subgraph(&mut body_ctx, body_start.clone(), current.clone()).await?;
            accumulated.push(body_output.clone());
            current = body_output;
            iteration += 1;
        }

        ctx.absorb_child_accounting(&mut body_ctx);
        for (id, value) in body_ctx.outputs.drain() {
            ctx.outputs.insert(id, value);
        }

        if capped {
            match data.on_max_iterations {
                OnMaxIterations::Error => {
                    return Err(EngineError::Extension(format!(
                        "while-loop '{}' reached maxIterations ({}) with the condition still true",
                        node.id, data.max_iterations
                    )));
                }
                OnMaxIterations::Warning => {
                    warn!(node_id = %node.id, max_iterations = data.max_iterations, "loop capped while condition still true");
                }
                OnMaxIterations::Continue => {}
            }
        }

        let output = match data.output_mode {
            LoopOutputMode::Last => accumulated.last().cloned().unwrap_or(arrival_input),
            LoopOutputMode::Accumulate => accumulated.join("\n\n"),
        };

        Ok(NodeOutcome::forward(output, done_targets)
            .with_metadata(json!({ "iterations": iteration, "capped": capped })))
    }
}
