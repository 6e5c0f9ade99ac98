//! Memory node: store/query against the long-term memory adapter.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::memory::{MemoryQuery, MemoryRecord};
use crate::runtime::ExecutionContext;
use crate::validator::ValidationIssue;
use crate::workflow::{MemoryOperation, Node, NodeKind, Workflow};
use async_trait::async_trait;
use tracing::debug;

/// Hits returned when a query omits `limit`.
const DEFAULT_QUERY_LIMIT: usize = 5;

pub struct MemoryHandler;

#[async_trait]
impl NodeHandler for MemoryHandler {
    fn validate(&self, node: &Node, _workflow: &Workflow) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if let NodeKind::Memory(data) = &node.kind {
            if data.limit == Some(0) {
                issues.push(ValidationIssue::warning(
                    Some(&node.id),
                    "memory query with limit 0 always returns the fallback",
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Memory(data) = &node.kind else {
            return Err(EngineError::Extension(
                "memory handler invoked for a non-memory node".to_string(),
            ));
        };
        let Some(memory) = ctx.memory.clone() else {
            return Err(EngineError::Extension(
                "no memory adapter configured".to_string(),
            ));
        };

        let output = match data.operation {
            MemoryOperation::Query => {
                let hits = memory
                    .query(MemoryQuery {
                        text: ctx.current_input.clone(),
                        limit: data.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
                        session_id: ctx.session_id.clone(),
                    })
                    .await?;
                debug!(node_id = %node.id, hits = hits.len(), "memory query");
                if hits.is_empty() {
                    data.fallback.clone().unwrap_or_default()
                } else {
                    hits.iter()
                        .map(|h| format!("- {}", h.text))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            MemoryOperation::Store => {
                memory
                    .store(MemoryRecord {
                        text: ctx.current_input.clone(),
                        metadata: None,
                        session_id: ctx.session_id.clone(),
                    })
                    .await?;
                debug!(node_id = %node.id, "memory store");
                // Store passes its input through.
                ctx.current_input.clone()
            }
        };

        Ok(NodeOutcome::forward(
            output,
            ctx.workflow.default_targets(&node.id),
        ))
    }
}
