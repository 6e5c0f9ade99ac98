//! Executor configuration.

use crate::context::CompactionConfig;
use std::time::Duration;

/// Behaviour when the agent tool loop hits its iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolLimitBehavior {
    /// Log and return the last content.
    #[default]
    Warning,
    /// Fail the node.
    Error,
    /// Escalate to the HITL coordinator with mode `input`.
    Hitl,
}

/// Configuration recognised by the execution facade.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Model used when a node omits one.
    pub default_model: String,
    /// Default retries per node, overridable per node.
    pub max_retries: u32,
    /// Default base delay for backoff.
    pub retry_delay: Duration,
    /// Scheduler safety cap on steps per subgraph run.
    pub max_iterations: u32,
    /// Maximum subflow nesting depth.
    pub max_subflow_depth: u32,
    /// Maximum tool-calling iterations per agent call.
    pub max_tool_iterations: u32,
    pub on_max_tool_iterations: ToolLimitBehavior,
    /// Context compaction settings.
    pub compaction: CompactionConfig,
    /// Optional per-branch timeout for parallel nodes.
    pub branch_timeout: Option<Duration>,
    /// Validate the document before running any node.
    pub preflight: bool,
    /// Verbose scheduler-step logging.
    pub debug: bool,
    /// Session id threaded through memory and HITL requests.
    pub session_id: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_model: "openai/gpt-4o-mini".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_iterations: 1000,
            max_subflow_depth: 10,
            max_tool_iterations: 10,
            on_max_tool_iterations: ToolLimitBehavior::Warning,
            compaction: CompactionConfig::default(),
            branch_timeout: None,
            preflight: true,
            debug: false,
            session_id: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = cap;
        self
    }

    pub fn with_max_subflow_depth(mut self, depth: u32) -> Self {
        self.max_subflow_depth = depth;
        self
    }

    pub fn with_max_tool_iterations(mut self, cap: u32) -> Self {
        self.max_tool_iterations = cap;
        self
    }

    pub fn with_on_max_tool_iterations(mut self, behavior: ToolLimitBehavior) -> Self {
        self.on_max_tool_iterations = behavior;
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_branch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.branch_timeout = timeout;
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
