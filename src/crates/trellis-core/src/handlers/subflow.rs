//! Subflow node: runs a nested workflow with bounded recursion.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::runtime::ExecutionContext;
use crate::scheduler::execute_workflow;
use crate::workflow::{InputMapping, MappingSource, Node, NodeKind, SubflowData};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub struct SubflowHandler;

impl SubflowHandler {
    /// Static projection of the input mappings over the parent's outputs
    /// and current input.
    fn map_input(ctx: &ExecutionContext, data: &SubflowData) -> String {
        if data.input_mappings.is_empty() {
            return ctx.current_input.clone();
        }

        let resolve = |mapping: &InputMapping| -> String {
            match &mapping.source {
                MappingSource::Input => ctx.current_input.clone(),
                MappingSource::NodeOutput { node_id } => {
                    ctx.outputs.get(node_id).cloned().unwrap_or_default()
                }
                MappingSource::Literal { value } => value.clone(),
            }
        };

        // A single unkeyed mapping passes the bare value through.
        if data.input_mappings.len() == 1 && data.input_mappings[0].key.is_empty() {
            return resolve(&data.input_mappings[0]);
        }

        data.input_mappings
            .iter()
            .map(|mapping| format!("{}: {}", mapping.key, resolve(mapping)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl NodeHandler for SubflowHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Subflow(data) = &node.kind else {
            return Err(EngineError::Extension(
                "subflow handler invoked for a non-subflow node".to_string(),
            ));
        };

        if ctx.subflow_depth >= ctx.config.max_subflow_depth {
            return Err(EngineError::Validation(format!(
                "subflow depth limit ({}) exceeded at node '{}'",
                ctx.config.max_subflow_depth, node.id
            )));
        }
        let Some(registry) = ctx.subflows.clone() else {
            return Err(EngineError::Validation(
                "no subflow registry configured".to_string(),
            ));
        };
        let Some(subflow) = registry.resolve(&data.subflow_id) else {
            return Err(EngineError::Validation(format!(
                "subflow '{}' cannot be resolved",
                data.subflow_id
            )));
        };

        let mapped_input = Self::map_input(ctx, data);
        debug!(node_id = %node.id, subflow_id = %data.subflow_id, depth = ctx.subflow_depth + 1, share_session = data.share_session, "entering subflow");

        let mut child = ctx.child_for_subflow(subflow, data.share_session);
        let output = execute_workflow(&mut child, mapped_input).await?;

        if data.share_session {
            // A shared-session subflow continues the parent conversation.
            ctx.history = std::mem::take(&mut child.history);
        }
        ctx.absorb_child_accounting(&mut child);

        Ok(NodeOutcome::forward(
            output,
            ctx.workflow.default_targets(&node.id),
        )
        .with_metadata(json!({ "subflowId": data.subflow_id.clone() })))
    }
}
