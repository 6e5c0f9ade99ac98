//! Node handler registry.
//!
//! Each node type registers a handler with `validate` and `execute`. The
//! set of built-in types is closed; unknown types are a load-time
//! validation error, never a runtime dispatch hazard. Hosts may register
//! replacement or additional handlers before constructing the executor.

pub mod agent;
pub mod memory;
pub mod output;
pub mod parallel;
pub mod router;
pub mod start;
pub mod subflow;
pub mod tool;
pub mod while_loop;

use crate::error::Result;
use crate::runtime::ExecutionContext;
use crate::validator::ValidationIssue;
use crate::workflow::{Node, NodeType, Workflow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One scheduled successor of a node.
#[derive(Debug, Clone)]
pub struct NextStep {
    pub target: String,
    /// Input delivered to the target; `None` means the node's output.
    pub input: Option<String>,
}

impl NextStep {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            input: None,
        }
    }

    pub fn with_input(target: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            input: Some(input.into()),
        }
    }
}

/// Result of executing one node.
#[derive(Debug, Clone, Default)]
pub struct NodeOutcome {
    pub output: String,
    pub next: Vec<NextStep>,
    /// Handler-specific details surfaced in traces.
    pub metadata: Option<Value>,
}

impl NodeOutcome {
    /// Terminal outcome with no successors.
    pub fn terminal(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            next: Vec::new(),
            metadata: None,
        }
    }

    /// Outcome forwarding the output to each target.
    pub fn forward(output: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            output: output.into(),
            next: targets.into_iter().map(NextStep::to).collect(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-node-type execution contract.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Node-level configuration checks, merged into preflight validation.
    fn validate(&self, node: &Node, workflow: &Workflow) -> Vec<ValidationIssue> {
        let _ = (node, workflow);
        Vec::new()
    }

    /// Execute the node against the current context.
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome>;
}

/// Registry mapping node types to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with all built-in node types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Start, Arc::new(start::StartHandler));
        registry.register(NodeType::Agent, Arc::new(agent::AgentHandler));
        registry.register(NodeType::Router, Arc::new(router::RouterHandler));
        registry.register(NodeType::Parallel, Arc::new(parallel::ParallelHandler));
        registry.register(NodeType::WhileLoop, Arc::new(while_loop::WhileLoopHandler));
        registry.register(NodeType::Memory, Arc::new(memory::MemoryHandler));
        registry.register(NodeType::Tool, Arc::new(tool::ToolHandler));
        registry.register(NodeType::Subflow, Arc::new(subflow::SubflowHandler));
        registry.register(NodeType::Output, Arc::new(output::OutputHandler));
        registry
    }

    /// Register (or replace) the handler for a node type.
    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type, handler);
    }

    /// Handler for a node type.
    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
