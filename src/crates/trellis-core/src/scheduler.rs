//! Graph scheduler.
//!
//! A bounded BFS over `(node, input)` arrivals. Each step runs pre-HITL,
//! the node handler, post-HITL, then records the output and enqueues
//! successors. A node executes at most once per arrival; only explicit
//! self-re-entry (loop nodes) clears the executed mark. The iteration cap
//! bounds total steps regardless of document shape.

use crate::error::{EngineError, ErrorCode, ExecutionError, Result};
use crate::handlers::{NodeOutcome, NextStep};
use crate::hitl::{HitlAction, HitlRequestContext, validate_response_data};
use crate::runtime::ExecutionContext;
use crate::workflow::{ErrorMode, HitlMode, Node};
use futures::future::BoxFuture;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Run a whole workflow from its start node.
pub async fn execute_workflow(ctx: &mut ExecutionContext, input: String) -> Result<String> {
    let workflow = ctx.workflow.clone();
    let start = workflow.start_node().ok_or_else(|| {
        EngineError::Validation("workflow must have exactly one start node".to_string())
    })?;
    execute_subgraph(ctx, start.id.clone(), input).await
}

/// Run the subgraph rooted at `start`. Returns the output of the last node
/// that finished, which for well-formed documents is the terminal output
/// node.
pub fn execute_subgraph(
    ctx: &mut ExecutionContext,
    start: String,
    input: String,
) -> BoxFuture<'_, Result<String>> {
    Box::pin(run_subgraph(ctx, start, input))
}

async fn run_subgraph(
    ctx: &mut ExecutionContext,
    start: String,
    input: String,
) -> Result<String> {
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    let mut executed: HashSet<String> = HashSet::new();
    let mut iterations: u32 = 0;
    let mut last_output = input.clone();
    queue.push_back((start, input));

    while let Some((node_id, arrival_input)) = queue.pop_front() {
        if ctx.signal.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if iterations >= ctx.config.max_iterations {
            return Err(EngineError::Extension(
                "scheduler iteration cap exceeded".to_string(),
            ));
        }
        iterations += 1;

        if executed.contains(&node_id) {
            continue;
        }

        let workflow = ctx.workflow.clone();
        let Some(node) = workflow.node(&node_id) else {
            return Err(EngineError::Validation(format!(
                "edge references missing node '{}'",
                node_id
            )));
        };
        let Some(handler) = ctx.registry.get(node.node_type()) else {
            return Err(EngineError::Validation(format!(
                "no handler registered for node type '{}'",
                node.node_type()
            )));
        };

        if ctx.config.debug {
            debug!(node_id = %node.id, node_type = %node.node_type(), step = iterations, "scheduler step");
        }
        if let Some(cb) = &ctx.callbacks.on_node_start {
            cb(&node.id);
        }
        ctx.current_input = arrival_input;

        // Pre-body pause (approval/input modes).
        let mut skip_body = false;
        match run_pre_hitl(ctx, node).await? {
            PreDecision::Proceed => {}
            PreDecision::SkipBody => skip_body = true,
            PreDecision::Fail(envelope) => {
                if handle_failure(ctx, node, envelope, &mut queue)? {
                    executed.insert(node_id);
                }
                continue;
            }
        }

        let result = if skip_body {
            // Skip passes the input through unchanged to downstream nodes.
            Ok(NodeOutcome::forward(
                ctx.current_input.clone(),
                workflow.default_targets(&node.id),
            ))
        } else {
            handler.execute(ctx, node).await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                let envelope = ctx.node_failure(node, &e, None);
                if handle_failure(ctx, node, envelope, &mut queue)? {
                    executed.insert(node_id);
                }
                continue;
            }
        };

        // Post-body pause (review mode).
        let outcome = match run_post_hitl(ctx, node, outcome).await? {
            PostDecision::Keep(outcome) => outcome,
            PostDecision::Fail(envelope) => {
                if handle_failure(ctx, node, envelope, &mut queue)? {
                    executed.insert(node_id);
                }
                continue;
            }
        };

        ctx.outputs.insert(node.id.clone(), outcome.output.clone());
        if let Some(cb) = &ctx.callbacks.on_node_finish {
            cb(&node.id, &outcome.output);
        }
        ctx.node_chain.push(node.id.clone());
        emit_pending_usage(ctx);
        last_output = outcome.output.clone();

        // Loop self-re-entry clears the executed mark for the next arrival.
        let re_enters_self = outcome.next.iter().any(|s| s.target == node.id);
        if re_enters_self {
            executed.remove(&node.id);
        } else {
            executed.insert(node.id.clone());
        }

        for NextStep { target, input } in outcome.next {
            let next_input = input.unwrap_or_else(|| outcome.output.clone());
            queue.push_back((target, next_input));
        }
    }

    Ok(last_output)
}

/// Emit queued `onTokenUsage` events; fires after `onNodeFinish`.
fn emit_pending_usage(ctx: &mut ExecutionContext) {
    if ctx.pending_usage.is_empty() {
        return;
    }
    let events: Vec<_> = ctx.pending_usage.drain(..).collect();
    if let Some(cb) = &ctx.callbacks.on_token_usage {
        for event in &events {
            cb(event);
        }
    }
}

/// Apply a node's `errorHandling.mode` to a terminal failure.
///
/// Returns `Ok(true)` when the run continues (the node counts as executed),
/// `Err` when the run must end with the envelope.
fn handle_failure(
    ctx: &mut ExecutionContext,
    node: &Node,
    envelope: ExecutionError,
    queue: &mut VecDeque<(String, String)>,
) -> Result<bool> {
    if let Some(cb) = &ctx.callbacks.on_node_error {
        cb(&envelope);
    }

    let mode = node
        .error_handling()
        .map(|eh| eh.mode)
        .unwrap_or(ErrorMode::Stop);

    match mode {
        ErrorMode::Stop => Err(envelope.into()),
        ErrorMode::Continue => {
            warn!(node_id = %node.id, code = %envelope.code, "node failed, continuing with empty output");
            ctx.outputs.insert(node.id.clone(), String::new());
            for target in ctx.workflow.clone().default_targets(&node.id) {
                queue.push_back((target, String::new()));
            }
            Ok(true)
        }
        ErrorMode::Branch => {
            let targets = ctx.workflow.clone().error_targets(&node.id);
            if targets.is_empty() {
                // No error wiring behaves as stop.
                return Err(envelope.into());
            }
            warn!(node_id = %node.id, code = %envelope.code, "node failed, following error branch");
            ctx.outputs.insert(node.id.clone(), String::new());
            let payload = envelope.to_branch_input();
            for target in targets {
                queue.push_back((target, payload.clone()));
            }
            Ok(true)
        }
    }
}

enum PreDecision {
    Proceed,
    SkipBody,
    Fail(ExecutionError),
}

async fn run_pre_hitl(ctx: &mut ExecutionContext, node: &Node) -> Result<PreDecision> {
    let Some(settings) = node.hitl().filter(|s| s.enabled) else {
        return Ok(PreDecision::Proceed);
    };
    if !matches!(settings.mode, HitlMode::Approval | HitlMode::Input) {
        return Ok(PreDecision::Proceed);
    }

    let request = ctx.hitl.build_request(
        &node.id,
        node.label(),
        settings,
        HitlRequestContext {
            input: ctx.current_input.clone(),
            output: None,
            workflow_name: ctx.workflow.meta.name.clone(),
            session_id: ctx.session_id.clone(),
        },
    );
    let schema = settings.input_schema.clone();
    let handler = ctx.callbacks.on_hitl_request.clone();
    let signal = ctx.signal.clone();
    let response = ctx
        .hitl
        .await_response(request, handler.as_ref(), settings.default_action, &signal)
        .await?;

    let rejection = |message: &str| {
        PreDecision::Fail(ExecutionError::new(
            node.id.clone(),
            node.node_type().to_string(),
            ErrorCode::Validation,
            message,
        ))
    };

    match response.action {
        HitlAction::Reject => Ok(rejection("rejected by human reviewer")),
        HitlAction::Skip => Ok(PreDecision::SkipBody),
        HitlAction::Approve | HitlAction::Custom => {
            if let Some(data) = &response.data {
                if let Some(schema) = &schema {
                    if let Err(e) = validate_response_data(schema, data) {
                        return Ok(rejection(&e.to_string()));
                    }
                }
                if let Some(text) = response.text_data() {
                    ctx.current_input = text;
                }
            }
            Ok(PreDecision::Proceed)
        }
        HitlAction::Submit | HitlAction::Modify => match &response.data {
            Some(data) => {
                if let Some(schema) = &schema {
                    if let Err(e) = validate_response_data(schema, data) {
                        return Ok(rejection(&e.to_string()));
                    }
                }
                if let Some(text) = response.text_data() {
                    ctx.current_input = text;
                }
                Ok(PreDecision::Proceed)
            }
            None if settings.mode == HitlMode::Input => {
                Ok(rejection("no input data provided"))
            }
            None => Ok(PreDecision::Proceed),
        },
    }
}

enum PostDecision {
    Keep(NodeOutcome),
    Fail(ExecutionError),
}

async fn run_post_hitl(
    ctx: &mut ExecutionContext,
    node: &Node,
    mut outcome: NodeOutcome,
) -> Result<PostDecision> {
    let Some(settings) = node.hitl().filter(|s| s.enabled) else {
        return Ok(PostDecision::Keep(outcome));
    };
    if settings.mode != HitlMode::Review {
        return Ok(PostDecision::Keep(outcome));
    }

    let request = ctx.hitl.build_request(
        &node.id,
        node.label(),
        settings,
        HitlRequestContext {
            input: ctx.current_input.clone(),
            output: Some(outcome.output.clone()),
            workflow_name: ctx.workflow.meta.name.clone(),
            session_id: ctx.session_id.clone(),
        },
    );
    let schema = settings.input_schema.clone();
    let handler = ctx.callbacks.on_hitl_request.clone();
    let signal = ctx.signal.clone();
    let response = ctx
        .hitl
        .await_response(request, handler.as_ref(), settings.default_action, &signal)
        .await?;

    match response.action {
        HitlAction::Reject => Ok(PostDecision::Fail(ExecutionError::new(
            node.id.clone(),
            node.node_type().to_string(),
            ErrorCode::Validation,
            "output rejected by human reviewer",
        ))),
        HitlAction::Modify | HitlAction::Submit => {
            if let Some(data) = &response.data {
                if let Some(schema) = &schema {
                    if let Err(e) = validate_response_data(schema, data) {
                        return Ok(PostDecision::Fail(ExecutionError::new(
                            node.id.clone(),
                            node.node_type().to_string(),
                            ErrorCode::Validation,
                            e.to_string(),
                        )));
                    }
                }
                if let Some(text) = response.text_data() {
                    outcome.output = text;
                }
            }
            Ok(PostDecision::Keep(outcome))
        }
        HitlAction::Approve | HitlAction::Skip | HitlAction::Custom => {
            Ok(PostDecision::Keep(outcome))
        }
    }
}
