//! # trellis-core — workflow execution engine for agent pipelines
//!
//! Trellis runs directed graphs of AI-agent nodes: LLM agents, routers,
//! parallel fan-outs, while-loops, nested subflows, memory operations, tool
//! calls, and terminal outputs. The engine is a single-threaded,
//! cooperative, event-emitting graph interpreter; only I/O (provider calls,
//! adapters, sleeps) suspends.
//!
//! ## What the engine provides
//!
//! - **Bounded BFS scheduling** with per-node-type semantics, loop
//!   re-entry, and a hard iteration cap
//! - **Streaming LLM calls** through a pluggable [`llm::ChatProvider`],
//!   with retry/backoff and rate-limit-aware delays
//! - **Per-node error policy** (`stop` / `continue` / `branch`) with a
//!   serializable failure envelope
//! - **Human-in-the-loop pauses** (approval, input, review) with wall-clock
//!   deadlines and a pluggable persistence adapter
//! - **Automatic history compaction** against model context limits
//! - **Cooperative cancellation**: `stop()` aborts provider calls, wakes
//!   sleeps, and settles the run with a partial result
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use trellis_core::{ExecutionCallbacks, WorkflowExecutor, Workflow};
//! use std::sync::Arc;
//!
//! let workflow: Workflow = serde_json::from_str(document_json)?;
//! let executor = WorkflowExecutor::new(Arc::new(provider));
//!
//! let callbacks = ExecutionCallbacks::new()
//!     .with_on_token(Arc::new(|node, fragment| print!("{}", fragment)));
//!
//! let result = executor.execute(&workflow, "hello", callbacks).await;
//! println!("{}", result.output);
//! ```
//!
//! The engine never talks to a concrete API itself; pair it with a provider
//! implementation (see the `trellis-llm` crate) or any [`llm::ChatProvider`]
//! of your own.

pub mod callbacks;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod validator;
pub mod workflow;

pub use callbacks::{ExecutionCallbacks, TokenUsageEvent};
pub use config::{ExecutorConfig, ToolLimitBehavior};
pub use context::{CompactionConfig, CompactionReport, CompactionStrategy};
pub use error::{EngineError, ErrorCode, ExecutionError, Result};
pub use executor::{ExecutionResult, WorkflowExecutor};
pub use handlers::{HandlerRegistry, NodeHandler, NodeOutcome};
pub use hitl::{
    HitlAction, HitlAdapter, HitlCoordinator, HitlRequest, HitlResponse, InMemoryHitlAdapter,
};
pub use llm::{
    ChatMessage, ChatOptions, ChatOutcome, ChatProvider, MessageRole, Modality,
    ModelCapabilities, TokenUsage, ToolCall, ToolDefinition, ToolInvoker,
};
pub use memory::{InMemoryMemoryStore, MemoryAdapter, MemoryHit, MemoryQuery, MemoryRecord};
pub use runtime::{ExecutionContext, InMemorySubflowRegistry, SubflowRegistry};
pub use validator::{validate_workflow, ValidationIssue, ValidationReport};
pub use workflow::{Edge, Node, NodeKind, NodeType, Workflow, WorkflowMeta};
