//! Tool node: one host tool invocation.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::runtime::ExecutionContext;
use crate::validator::ValidationIssue;
use crate::workflow::{Node, NodeKind, Workflow};
use async_trait::async_trait;
use tracing::debug;

pub struct ToolHandler;

#[async_trait]
impl NodeHandler for ToolHandler {
    fn validate(&self, node: &Node, _workflow: &Workflow) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if let NodeKind::Tool(data) = &node.kind {
            if data.tool_id.is_empty() {
                issues.push(ValidationIssue::error(
                    Some(&node.id),
                    "tool node has no toolId",
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Tool(data) = &node.kind else {
            return Err(EngineError::Extension(
                "tool handler invoked for a non-tool node".to_string(),
            ));
        };
        let Some(invoker) = ctx.tools.clone() else {
            return Err(EngineError::Extension(
                "no tool invoker configured".to_string(),
            ));
        };

        debug!(node_id = %node.id, tool_id = %data.tool_id, "invoking tool node");
        let output = invoker(data.tool_id.clone(), data.config.clone()).await?;

        Ok(NodeOutcome::forward(
            output,
            ctx.workflow.default_targets(&node.id),
        ))
    }
}
