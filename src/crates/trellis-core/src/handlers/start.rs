//! Start node: passes the run input through unchanged.

use super::{NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::runtime::ExecutionContext;
use crate::workflow::Node;
use async_trait::async_trait;

pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        Ok(NodeOutcome::forward(
            ctx.current_input.clone(),
            ctx.workflow.default_targets(&node.id),
        ))
    }
}
