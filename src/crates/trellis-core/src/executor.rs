//! Execution facade.
//!
//! [`WorkflowExecutor`] owns the wiring (provider, adapters, registry,
//! configuration), runs preflight validation, constructs the root context,
//! and drives the scheduler. `stop()` cancels the in-flight run: provider
//! calls abort, sleeps wake, and the scheduler returns a partial result
//! tagged `cancelled`.

use crate::callbacks::{ExecutionCallbacks, TokenUsageEvent};
use crate::config::ExecutorConfig;
use crate::context::{CharTokenCounter, TokenCounter};
use crate::error::{EngineError, ErrorCode, ExecutionError};
use crate::handlers::HandlerRegistry;
use crate::hitl::{HitlAdapter, HitlCoordinator};
use crate::llm::{ChatProvider, Modality, ModelCapabilities, TokenUsage, ToolDefinition, ToolInvoker};
use crate::memory::MemoryAdapter;
use crate::runtime::{ExecutionContext, SubflowRegistry};
use crate::scheduler::execute_workflow;
use crate::validator::validate_workflow;
use crate::workflow::Workflow;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Final result of one `execute()` call. JSON-serializable for callers
/// that persist traces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Output of the terminal node (partial last output when cancelled).
    pub output: String,
    pub node_outputs: HashMap<String, String>,
    #[serde(rename = "duration_ms")]
    pub duration_ms: u64,
    /// Aggregate usage across every provider call in the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub token_usage_details: Vec<TokenUsageEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

/// Runs workflows against a provider with the configured adapters.
pub struct WorkflowExecutor {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<HandlerRegistry>,
    config: Arc<ExecutorConfig>,
    counter: Arc<dyn TokenCounter>,
    memory: Option<Arc<dyn MemoryAdapter>>,
    hitl: HitlCoordinator,
    subflows: Option<Arc<dyn SubflowRegistry>>,
    tools: Option<ToolInvoker>,
    tool_definitions: Vec<ToolDefinition>,
    running: AtomicBool,
    signal: Mutex<Option<CancellationToken>>,
}

impl WorkflowExecutor {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            registry: Arc::new(HandlerRegistry::with_defaults()),
            config: Arc::new(ExecutorConfig::default()),
            counter: Arc::new(CharTokenCounter::default()),
            memory: None,
            hitl: HitlCoordinator::default(),
            subflows: None,
            tools: None,
            tool_definitions: Vec::new(),
            running: AtomicBool::new(false),
            signal: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_hitl_adapter(mut self, adapter: Arc<dyn HitlAdapter>) -> Self {
        self.hitl = HitlCoordinator::new(adapter);
        self
    }

    pub fn with_subflow_registry(mut self, subflows: Arc<dyn SubflowRegistry>) -> Self {
        self.subflows = Some(subflows);
        self
    }

    pub fn with_tool_invoker(mut self, invoker: ToolInvoker) -> Self {
        self.tools = Some(invoker);
        self
    }

    pub fn with_tool_definitions(mut self, definitions: Vec<ToolDefinition>) -> Self {
        self.tool_definitions = definitions;
        self
    }

    /// Execute a workflow. Always resolves to an [`ExecutionResult`]; errors
    /// are reported through `success=false` plus the failure envelope.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        input: impl Into<String>,
        callbacks: ExecutionCallbacks,
    ) -> ExecutionResult {
        let started = Instant::now();
        let input = input.into();

        if self.config.preflight {
            let report =
                validate_workflow(workflow, Some(self.registry.as_ref()), self.subflows.as_deref());
            if !report.is_valid {
                let detail = report
                    .errors
                    .iter()
                    .map(|issue| issue.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                return ExecutionResult {
                    success: false,
                    output: String::new(),
                    node_outputs: HashMap::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    usage: None,
                    token_usage_details: Vec::new(),
                    error: Some(ExecutionError::new(
                        String::new(),
                        "workflow",
                        ErrorCode::Validation,
                        format!("preflight validation failed: {}", detail),
                    )),
                    cancelled: false,
                };
            }
        }

        let signal = CancellationToken::new();
        *self.signal.lock() = Some(signal.clone());
        self.running.store(true, Ordering::SeqCst);
        info!(workflow = %workflow.meta.name, "execution started");

        let mut ctx = ExecutionContext::new(
            Arc::new(workflow.clone()),
            self.registry.clone(),
            self.provider.clone(),
            Arc::new(callbacks),
            self.config.clone(),
            self.counter.clone(),
        )
        .with_memory(self.memory.clone())
        .with_hitl(self.hitl.clone())
        .with_subflows(self.subflows.clone())
        .with_tools(self.tools.clone())
        .with_tool_definitions(self.tool_definitions.clone())
        .with_signal(signal);

        let outcome = execute_workflow(&mut ctx, input).await;

        self.running.store(false, Ordering::SeqCst);
        *self.signal.lock() = None;

        let duration_ms = started.elapsed().as_millis() as u64;
        let usage = aggregate_usage(&ctx.usage_events);
        let token_usage_details = std::mem::take(&mut ctx.usage_events);
        let node_outputs = std::mem::take(&mut ctx.outputs);

        match outcome {
            Ok(output) => {
                info!(workflow = %workflow.meta.name, duration_ms, "execution finished");
                ExecutionResult {
                    success: true,
                    output,
                    node_outputs,
                    duration_ms,
                    usage,
                    token_usage_details,
                    error: None,
                    cancelled: false,
                }
            }
            Err(e) if e.is_cancelled() => {
                info!(workflow = %workflow.meta.name, duration_ms, "execution cancelled");
                let output = ctx
                    .node_chain
                    .last()
                    .and_then(|id| node_outputs.get(id).cloned())
                    .unwrap_or_default();
                ExecutionResult {
                    success: false,
                    output,
                    node_outputs,
                    duration_ms,
                    usage,
                    token_usage_details,
                    error: None,
                    cancelled: true,
                }
            }
            Err(e) => {
                let envelope = match e {
                    EngineError::Node(envelope) => *envelope,
                    other => ExecutionError::new(
                        String::new(),
                        "workflow",
                        other.code(),
                        other.to_string(),
                    ),
                };
                info!(workflow = %workflow.meta.name, duration_ms, code = %envelope.code, "execution failed");
                ExecutionResult {
                    success: false,
                    output: String::new(),
                    node_outputs,
                    duration_ms,
                    usage,
                    token_usage_details,
                    error: Some(envelope),
                    cancelled: false,
                }
            }
        }
    }

    /// Cancel the in-flight run, if any. In-flight provider calls abort,
    /// backoff sleeps wake, and `execute()` settles with `cancelled=true`.
    pub fn stop(&self) {
        if let Some(signal) = self.signal.lock().as_ref() {
            signal.cancel();
        }
    }

    /// True while an `execute()` call is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Capabilities of a model, delegated to the provider adapter.
    pub fn model_capabilities(&self, model: &str) -> ModelCapabilities {
        self.provider.capabilities(model)
    }

    /// True when the model accepts the given input modality.
    pub fn supports_modality(&self, model: &str, modality: Modality) -> bool {
        self.provider
            .capabilities(model)
            .supports_modality(modality)
    }
}

fn aggregate_usage(events: &[TokenUsageEvent]) -> Option<TokenUsage> {
    if events.is_empty() {
        return None;
    }
    let mut total = TokenUsage::default();
    for event in events {
        total.add(event.usage);
    }
    Some(total)
}
