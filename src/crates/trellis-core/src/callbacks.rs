//! Observability callbacks for a run.
//!
//! One [`ExecutionCallbacks`] record is passed by reference through the
//! whole run. Within a sequential region callbacks fire in scheduler order;
//! per-branch callbacks are ordered within their branch and interleave
//! freely across branches.

use crate::context::CompactionReport;
use crate::error::ExecutionError;
use crate::hitl::HitlHandler;
use crate::llm::TokenUsage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Usage recorded for one provider call, emitted after `onNodeFinish`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageEvent {
    pub node_id: String,
    pub model: String,
    pub usage: TokenUsage,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsageEvent {
    pub fn new(node_id: impl Into<String>, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            node_id: node_id.into(),
            model: model.into(),
            usage,
            timestamp: Utc::now(),
        }
    }
}

/// `(node_id)` — node entered.
pub type NodeStartCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// `(node_id, output)` — node finished successfully.
pub type NodeFinishCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Failure envelope for a node that raised a terminal error.
pub type NodeErrorCallback = Arc<dyn Fn(&ExecutionError) + Send + Sync>;
/// `(node_id, fragment)` — streamed content, in production order.
pub type StreamCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// `(node_id, route_id)` — route chosen by a router node.
pub type RouteCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Per-call token usage.
pub type UsageCallback = Arc<dyn Fn(&TokenUsageEvent) + Send + Sync>;
/// History compaction report.
pub type CompactionCallback = Arc<dyn Fn(&CompactionReport) + Send + Sync>;
/// `(node_id, branch_id, branch_label)` — branch began executing.
pub type BranchStartCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;
/// `(node_id, branch_id, fragment)` — streamed branch content.
pub type BranchStreamCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;
/// `(node_id, branch_id, result)` — branch settled.
pub type BranchCompleteCallback =
    Arc<dyn Fn(&str, &str, std::result::Result<&str, &ExecutionError>) + Send + Sync>;

/// Callback fan-out for one `execute()` call. All fields optional.
#[derive(Default, Clone)]
pub struct ExecutionCallbacks {
    pub on_node_start: Option<NodeStartCallback>,
    pub on_node_finish: Option<NodeFinishCallback>,
    pub on_node_error: Option<NodeErrorCallback>,
    pub on_token: Option<StreamCallback>,
    pub on_reasoning: Option<StreamCallback>,
    pub on_route_selected: Option<RouteCallback>,
    pub on_token_usage: Option<UsageCallback>,
    pub on_context_compacted: Option<CompactionCallback>,
    pub on_branch_start: Option<BranchStartCallback>,
    pub on_branch_token: Option<BranchStreamCallback>,
    pub on_branch_reasoning: Option<BranchStreamCallback>,
    pub on_branch_complete: Option<BranchCompleteCallback>,
    /// Invoked when a node pauses for human input.
    pub on_hitl_request: Option<HitlHandler>,
}

impl ExecutionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_node_start(mut self, f: NodeStartCallback) -> Self {
        self.on_node_start = Some(f);
        self
    }

    pub fn with_on_node_finish(mut self, f: NodeFinishCallback) -> Self {
        self.on_node_finish = Some(f);
        self
    }

    pub fn with_on_node_error(mut self, f: NodeErrorCallback) -> Self {
        self.on_node_error = Some(f);
        self
    }

    pub fn with_on_token(mut self, f: StreamCallback) -> Self {
        self.on_token = Some(f);
        self
    }

    pub fn with_on_reasoning(mut self, f: StreamCallback) -> Self {
        self.on_reasoning = Some(f);
        self
    }

    pub fn with_on_route_selected(mut self, f: RouteCallback) -> Self {
        self.on_route_selected = Some(f);
        self
    }

    pub fn with_on_token_usage(mut self, f: UsageCallback) -> Self {
        self.on_token_usage = Some(f);
        self
    }

    pub fn with_on_context_compacted(mut self, f: CompactionCallback) -> Self {
        self.on_context_compacted = Some(f);
        self
    }

    pub fn with_on_branch_start(mut self, f: BranchStartCallback) -> Self {
        self.on_branch_start = Some(f);
        self
    }

    pub fn with_on_branch_token(mut self, f: BranchStreamCallback) -> Self {
        self.on_branch_token = Some(f);
        self
    }

    pub fn with_on_branch_reasoning(mut self, f: BranchStreamCallback) -> Self {
        self.on_branch_reasoning = Some(f);
        self
    }

    pub fn with_on_branch_complete(mut self, f: BranchCompleteCallback) -> Self {
        self.on_branch_complete = Some(f);
        self
    }

    pub fn with_on_hitl_request(mut self, f: HitlHandler) -> Self {
        self.on_hitl_request = Some(f);
        self
    }
}

impl std::fmt::Debug for ExecutionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCallbacks")
            .field("on_node_start", &self.on_node_start.is_some())
            .field("on_node_finish", &self.on_node_finish.is_some())
            .field("on_token", &self.on_token.is_some())
            .field("on_hitl_request", &self.on_hitl_request.is_some())
            .finish_non_exhaustive()
    }
}
