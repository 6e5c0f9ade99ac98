//! Parallel node: concurrent fan-out over declared branches, with optional
//! merge.
//!
//! Each branch runs its subgraph on a child context (copied `outputs`,
//! cloned `history`). The join is settled: a failing branch is recorded
//! without disturbing the others, and the node itself fails only when every
//! branch failed. Only the primary branch (first declared) appends its
//! conversation turns to the shared history after the join.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, ErrorCode, ExecutionError, ProviderFailure, Result};
use crate::llm::ChatMessage;
use crate::runtime::{BranchScope, ExecutionContext};
use crate::scheduler::execute_subgraph;
use crate::workflow::{Branch, Node, NodeKind, MERGED_HANDLE};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, warn};

pub struct ParallelHandler;

impl ParallelHandler {
    fn labelled_concat(results: &[(Branch, String)]) -> String {
        results
            .iter()
            .map(|(branch, output)| format!("### {}\n{}", branch.label, output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Parallel(data) = &node.kind else {
            return Err(EngineError::Extension(
                "parallel handler invoked for a non-parallel node".to_string(),
            ));
        };

        let workflow = ctx.workflow.clone();
        // Branches run only when their handle is wired.
        let jobs: Vec<(Branch, String)> = data
            .branches
            .iter()
            .filter_map(|branch| {
                workflow
                    .handle_targets(&node.id, &branch.id)
                    .first()
                    .map(|target| (branch.clone(), target.clone()))
            })
            .collect();
        if jobs.is_empty() {
            return Err(EngineError::Validation(format!(
                "parallel node '{}' has no wired branches",
                node.id
            )));
        }

        let input = ctx.current_input.clone();
        let base_history_len = ctx.history.len();
        let branch_timeout = ctx.config.branch_timeout;

        let mut futures = Vec::with_capacity(jobs.len());
        for (branch, start) in &jobs {
            if let Some(cb) = &ctx.callbacks.on_branch_start {
                cb(&node.id, &branch.id, &branch.label);
            }
            let mut child = ctx.child_for_branch(BranchScope {
                parallel_node_id: node.id.clone(),
                branch_id: branch.id.clone(),
                branch_label: branch.label.clone(),
            });
            let start = start.clone();
            let input = input.clone();
            futures.push(async move {
                let result = match branch_timeout {
                    Some(limit) => {
                        match tokio::time::timeout(
                            limit,
                            execute_subgraph(&mut child, start, input),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(EngineError::Provider(ProviderFailure::from_message(
                                ErrorCode::Timeout,
                                "branch timed out",
                            ))),
                        }
                    }
                    None => execute_subgraph(&mut child, start, input).await,
                };
                (child, result)
            });
        }

        // Settled join: every branch resolves, failures captured per branch.
        let settled = join_all(futures).await;

        let mut results: Vec<(Branch, std::result::Result<String, ExecutionError>)> =
            Vec::with_capacity(jobs.len());
        for (index, ((branch, _), (mut child, result))) in
            jobs.iter().zip(settled).enumerate()
        {
            match result {
                Ok(output) => {
                    if let Some(cb) = &ctx.callbacks.on_branch_complete {
                        cb(&node.id, &branch.id, Ok(&output));
                    }
                    // One-writer convention: only the primary branch's
                    // conversation turns enter the shared history.
                    if index == 0 && child.history.len() > base_history_len {
                        let suffix = child.history.split_off(base_history_len);
                        ctx.history.extend(suffix);
                    }
                    for (id, value) in child.outputs.drain() {
                        ctx.outputs.insert(id, value);
                    }
                    ctx.absorb_child_accounting(&mut child);
                    results.push((branch.clone(), Ok(output)));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    let envelope = ctx.node_failure(node, &e, None);
                    warn!(node_id = %node.id, branch = %branch.id, code = %envelope.code, "branch failed");
                    if let Some(cb) = &ctx.callbacks.on_branch_complete {
                        cb(&node.id, &branch.id, Err(&envelope));
                    }
                    ctx.absorb_child_accounting(&mut child);
                    results.push((branch.clone(), Err(envelope)));
                }
            }
        }

        let successes: Vec<(Branch, String)> = results
            .iter()
            .filter_map(|(branch, result)| {
                result
                    .as_ref()
                    .ok()
                    .map(|output| (branch.clone(), output.clone()))
            })
            .collect();

        if successes.is_empty() {
            // All branches failed: surface the first branch's error.
            let envelope = results
                .into_iter()
                .find_map(|(_, result)| result.err())
                .expect("at least one failure when no branch succeeded");
            return Err(envelope.into());
        }

        let metadata = json!({
            "branches": results
                .iter()
                .map(|(branch, result)| json!({ "id": branch.id.clone(), "ok": result.is_ok() }))
                .collect::<Vec<_>>(),
        });

        if !data.merge_enabled {
            // Branch subgraphs already routed their outputs onward; the
            // node itself contributes no aggregate.
            debug!(node_id = %node.id, "parallel fan-out complete without merge");
            return Ok(NodeOutcome::terminal(String::new()).with_metadata(metadata));
        }

        let merged = match &data.prompt {
            Some(prompt) => {
                let model = ctx.model_for(data.model.as_deref());
                let mut body = String::new();
                for (branch, output) in &successes {
                    body.push_str(&format!("### {}\n{}\n\n", branch.label, output));
                }
                let messages = vec![
                    ChatMessage::system(prompt.clone()),
                    ChatMessage::user(body),
                ];
                let options = ctx
                    .chat_options()
                    .with_on_token(ctx.token_callback_for(&node.id));
                let plan = ctx.retry_plan_for(node);
                let (result, trace) = ctx
                    .chat_with_retry(&node.id, &plan, &model, &messages, &options)
                    .await;
                match result {
                    Ok(outcome) => {
                        ctx.record_usage(&node.id, &model, outcome.usage);
                        outcome.content
                    }
                    Err(e) => return Err(ctx.node_failure(node, &e, Some(trace)).into()),
                }
            }
            None => Self::labelled_concat(&successes),
        };

        Ok(NodeOutcome::forward(
            merged,
            workflow.handle_targets(&node.id, MERGED_HANDLE),
        )
        .with_metadata(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_concat_keeps_declaration_order() {
        let results = vec![
            (
                Branch {
                    id: "b1".into(),
                    label: "One".into(),
                },
                "x".to_string(),
            ),
            (
                Branch {
                    id: "b2".into(),
                    label: "Two".into(),
                },
                "y".to_string(),
            ),
        ];
        let merged = ParallelHandler::labelled_concat(&results);
        assert_eq!(merged, "### One\nx\n\n### Two\ny");
    }
}
