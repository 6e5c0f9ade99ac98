//! Per-run execution context.
//!
//! One [`ExecutionContext`] is created per `execute()` call; the parallel
//! coordinator and the loop/subflow drivers derive child contexts from it.
//! Children always share the cancellation token, provider, callbacks, and
//! configuration; what else they share is the isolation contract: branches
//! copy `outputs` and clone `history`, subflows isolate everything unless
//! `shareSession` is set.

use crate::callbacks::{ExecutionCallbacks, TokenUsageEvent};
use crate::config::ExecutorConfig;
use crate::context::{CompactionConfig, TokenCounter};
use crate::error::{ExecutionError, EngineError, Result, RetryTrace};
use crate::handlers::HandlerRegistry;
use crate::hitl::HitlCoordinator;
use crate::llm::{
    ChatMessage, ChatOptions, ChatOutcome, ChatProvider, TokenCallback, TokenUsage,
    ToolDefinition, ToolInvoker,
};
use crate::memory::MemoryAdapter;
use crate::retry::{retry_with_backoff, RetryPlan};
use crate::workflow::{Node, Workflow};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Resolves subflow ids to workflow documents.
pub trait SubflowRegistry: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Arc<Workflow>>;
}

/// Map-backed subflow registry.
#[derive(Default)]
pub struct InMemorySubflowRegistry {
    flows: HashMap<String, Arc<Workflow>>,
}

impl InMemorySubflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, workflow: Workflow) {
        self.flows.insert(id.into(), Arc::new(workflow));
    }
}

impl SubflowRegistry for InMemorySubflowRegistry {
    fn resolve(&self, id: &str) -> Option<Arc<Workflow>> {
        self.flows.get(id).cloned()
    }
}

/// Identifies the parallel branch a context is running under.
#[derive(Debug, Clone)]
pub struct BranchScope {
    pub parallel_node_id: String,
    pub branch_id: String,
    pub branch_label: String,
}

/// Mutable state and shared services for one scheduler frame.
pub struct ExecutionContext {
    pub workflow: Arc<Workflow>,
    pub registry: Arc<HandlerRegistry>,
    pub provider: Arc<dyn ChatProvider>,
    pub callbacks: Arc<ExecutionCallbacks>,
    pub config: Arc<ExecutorConfig>,
    pub counter: Arc<dyn TokenCounter>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
    pub hitl: HitlCoordinator,
    pub subflows: Option<Arc<dyn SubflowRegistry>>,
    pub tools: Option<ToolInvoker>,
    /// Definitions offered to the model when an agent enables tools.
    pub tool_definitions: Vec<ToolDefinition>,
    pub signal: CancellationToken,
    pub session_id: Option<String>,
    /// Attachment references forwarded to providers that accept them.
    pub attachments: Vec<String>,
    /// The value flowing along the edge currently being traversed.
    pub current_input: String,
    /// Conversation so far; leading system prompt at index 0 when present.
    pub history: Vec<ChatMessage>,
    /// Most recent output per node in this run.
    pub outputs: HashMap<String, String>,
    /// Nodes completed so far, in completion order.
    pub node_chain: Vec<String>,
    /// Current subflow nesting depth.
    pub subflow_depth: u32,
    /// All usage events recorded during the run.
    pub usage_events: Vec<TokenUsageEvent>,
    /// Usage events not yet emitted through `onTokenUsage`.
    pub pending_usage: Vec<TokenUsageEvent>,
    /// Set while executing inside a parallel branch.
    pub branch: Option<BranchScope>,
}

impl ExecutionContext {
    /// Root context for a run.
    pub fn new(
        workflow: Arc<Workflow>,
        registry: Arc<HandlerRegistry>,
        provider: Arc<dyn ChatProvider>,
        callbacks: Arc<ExecutionCallbacks>,
        config: Arc<ExecutorConfig>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let session_id = config.session_id.clone();
        Self {
            workflow,
            registry,
            provider,
            callbacks,
            config,
            counter,
            memory: None,
            hitl: HitlCoordinator::default(),
            subflows: None,
            tools: None,
            tool_definitions: Vec::new(),
            signal: CancellationToken::new(),
            session_id,
            attachments: Vec::new(),
            current_input: String::new(),
            history: Vec::new(),
            outputs: HashMap::new(),
            node_chain: Vec::new(),
            subflow_depth: 0,
            usage_events: Vec::new(),
            pending_usage: Vec::new(),
            branch: None,
        }
    }

    pub fn with_memory(mut self, memory: Option<Arc<dyn MemoryAdapter>>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_hitl(mut self, hitl: HitlCoordinator) -> Self {
        self.hitl = hitl;
        self
    }

    pub fn with_subflows(mut self, subflows: Option<Arc<dyn SubflowRegistry>>) -> Self {
        self.subflows = subflows;
        self
    }

    pub fn with_tools(mut self, tools: Option<ToolInvoker>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_definitions(mut self, definitions: Vec<ToolDefinition>) -> Self {
        self.tool_definitions = definitions;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    /// Model for a node, falling back to the executor default.
    pub fn model_for(&self, node_model: Option<&str>) -> String {
        node_model
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_model.clone())
    }

    /// Compaction configuration for this run.
    pub fn compaction(&self) -> &CompactionConfig {
        &self.config.compaction
    }

    /// Child context for one parallel branch: copied `outputs`, cloned
    /// `history`, shared services and signal, fresh trace state.
    pub fn child_for_branch(&self, scope: BranchScope) -> Self {
        Self {
            workflow: self.workflow.clone(),
            registry: self.registry.clone(),
            provider: self.provider.clone(),
            callbacks: self.callbacks.clone(),
            config: self.config.clone(),
            counter: self.counter.clone(),
            memory: self.memory.clone(),
            hitl: self.hitl.clone(),
            subflows: self.subflows.clone(),
            tools: self.tools.clone(),
            tool_definitions: self.tool_definitions.clone(),
            signal: self.signal.clone(),
            session_id: self.session_id.clone(),
            attachments: self.attachments.clone(),
            current_input: self.current_input.clone(),
            history: self.history.clone(),
            outputs: self.outputs.clone(),
            node_chain: Vec::new(),
            subflow_depth: self.subflow_depth,
            usage_events: Vec::new(),
            pending_usage: Vec::new(),
            branch: Some(scope),
        }
    }

    /// Child context for a while-loop body: isolated copies of the mutable
    /// state, shared services.
    pub fn child_for_loop_body(&self) -> Self {
        let mut child = self.child_for_branch(BranchScope {
            parallel_node_id: String::new(),
            branch_id: String::new(),
            branch_label: String::new(),
        });
        child.branch = self.branch.clone();
        child
    }

    /// Child context for a subflow. When `share_session` is false the child
    /// gets a fresh session id, a private memory store, empty history, and
    /// empty outputs; when true it shares memory/session and starts from a
    /// clone of the parent history.
    pub fn child_for_subflow(&self, workflow: Arc<Workflow>, share_session: bool) -> Self {
        let mut child = self.child_for_branch(BranchScope {
            parallel_node_id: String::new(),
            branch_id: String::new(),
            branch_label: String::new(),
        });
        child.branch = None;
        child.workflow = workflow;
        child.subflow_depth = self.subflow_depth + 1;
        child.outputs = HashMap::new();
        child.node_chain = Vec::new();
        if !share_session {
            child.history = Vec::new();
            child.session_id = Some(Uuid::new_v4().to_string());
            child.memory = Some(Arc::new(crate::memory::InMemoryMemoryStore::new()));
        }
        child
    }

    /// Merge a finished child's bookkeeping back into this context.
    pub fn absorb_child_accounting(&mut self, child: &mut ExecutionContext) {
        self.usage_events.append(&mut child.usage_events);
        self.pending_usage.append(&mut child.pending_usage);
        self.node_chain.append(&mut child.node_chain);
    }

    /// Base chat options bound to this run's cancellation token.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions::new(self.signal.clone())
    }

    /// Streaming callback for a node, routed to branch callbacks when this
    /// context runs inside a parallel branch (global `onToken` stays quiet
    /// for branch content).
    pub fn token_callback_for(&self, node_id: &str) -> Option<TokenCallback> {
        match &self.branch {
            Some(scope) => self.callbacks.on_branch_token.clone().map(|cb| {
                let parallel = scope.parallel_node_id.clone();
                let branch = scope.branch_id.clone();
                Arc::new(move |fragment: &str| cb(&parallel, &branch, fragment)) as TokenCallback
            }),
            None => self.callbacks.on_token.clone().map(|cb| {
                let node = node_id.to_string();
                Arc::new(move |fragment: &str| cb(&node, fragment)) as TokenCallback
            }),
        }
    }

    /// Streaming reasoning callback, routed the same way as tokens.
    pub fn reasoning_callback_for(&self, node_id: &str) -> Option<TokenCallback> {
        match &self.branch {
            Some(scope) => self.callbacks.on_branch_reasoning.clone().map(|cb| {
                let parallel = scope.parallel_node_id.clone();
                let branch = scope.branch_id.clone();
                Arc::new(move |fragment: &str| cb(&parallel, &branch, fragment)) as TokenCallback
            }),
            None => self.callbacks.on_reasoning.clone().map(|cb| {
                let node = node_id.to_string();
                Arc::new(move |fragment: &str| cb(&node, fragment)) as TokenCallback
            }),
        }
    }

    /// Record a provider call's usage for later `onTokenUsage` emission.
    pub fn record_usage(&mut self, node_id: &str, model: &str, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            let event = TokenUsageEvent::new(node_id, model, usage);
            self.usage_events.push(event.clone());
            self.pending_usage.push(event);
        }
    }

    /// Retry plan for a node, resolved against the executor defaults.
    pub fn retry_plan_for(&self, node: &Node) -> RetryPlan {
        RetryPlan::resolve(
            node.error_handling().and_then(|eh| eh.retry.as_ref()),
            self.config.max_retries,
            self.config.retry_delay,
        )
    }

    /// Run one provider call through the retry loop.
    pub async fn chat_with_retry(
        &self,
        label: &str,
        plan: &RetryPlan,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> (Result<ChatOutcome>, RetryTrace) {
        let provider = self.provider.clone();
        retry_with_backoff(plan, &self.signal, label, move |_attempt| {
            let provider = provider.clone();
            let options = options.clone();
            async move { provider.chat(model, messages, options).await }
        })
        .await
    }

    /// Build the failure envelope for a node from a raw error plus retry
    /// trace.
    pub fn node_failure(
        &self,
        node: &Node,
        error: &EngineError,
        trace: Option<RetryTrace>,
    ) -> ExecutionError {
        if let EngineError::Node(envelope) = error {
            return (**envelope).clone();
        }
        let mut envelope = ExecutionError::new(
            node.id.clone(),
            node.node_type().to_string(),
            error.code(),
            error.to_string(),
        );
        envelope.status_code = error.status();
        envelope.rate_limit = error.rate_limit().cloned();
        envelope.retry = trace.filter(|t| !t.history.is_empty());
        envelope
    }
}
