//! Workflow document model.
//!
//! Defines the node/edge document the visual editor produces and the engine
//! consumes. The document is immutable during a run: nodes carry a
//! type-tagged `data` record, edges attach to named source handles (a
//! router's route id, a parallel branch id, `body`/`done` on loops, or
//! `error`).

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source handle reserved for error-branch edges.
pub const ERROR_HANDLE: &str = "error";
/// Source handle for a while-loop's body subgraph.
pub const BODY_HANDLE: &str = "body";
/// Source handle for a while-loop's exit edge.
pub const DONE_HANDLE: &str = "done";
/// Source handle for a parallel node's merged output.
pub const MERGED_HANDLE: &str = "merged";

/// A complete workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Document metadata.
    pub meta: WorkflowMeta,
    /// All nodes, in editor order.
    pub nodes: Vec<Node>,
    /// All edges, in editor order. Edge order is the deterministic
    /// tie-breaker for scheduling.
    pub edges: Vec<Edge>,
}

/// Workflow metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMeta {
    /// Display name.
    pub name: String,
    /// Document schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

/// Canvas position of a node. Carried through untouched; the engine never
/// reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single node in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub id: String,
    /// Type tag plus the type-specific `data` record.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Canvas position.
    #[serde(default)]
    pub position: Position,
}

impl Node {
    /// The node's type discriminant.
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Display label: the configured label when present, else the id.
    pub fn label(&self) -> &str {
        let label = match &self.kind {
            NodeKind::Agent(d) => d.label.as_deref(),
            NodeKind::Router(d) => d.label.as_deref(),
            NodeKind::Parallel(d) => d.label.as_deref(),
            NodeKind::WhileLoop(d) => d.label.as_deref(),
            NodeKind::Subflow(d) => d.label.as_deref(),
            NodeKind::Memory(d) => d.label.as_deref(),
            NodeKind::Tool(d) => d.label.as_deref(),
            NodeKind::Output(d) => d.label.as_deref(),
            NodeKind::Start(_) => None,
        };
        label.unwrap_or(&self.id)
    }

    /// Error handling configuration, when the node carries one.
    pub fn error_handling(&self) -> Option<&ErrorHandling> {
        match &self.kind {
            NodeKind::Agent(d) => d.error_handling.as_ref(),
            NodeKind::Router(d) => d.error_handling.as_ref(),
            NodeKind::Parallel(d) => d.error_handling.as_ref(),
            NodeKind::WhileLoop(d) => d.error_handling.as_ref(),
            NodeKind::Subflow(d) => d.error_handling.as_ref(),
            NodeKind::Memory(d) => d.error_handling.as_ref(),
            NodeKind::Tool(d) => d.error_handling.as_ref(),
            _ => None,
        }
    }

    /// HITL configuration, when the node carries one.
    pub fn hitl(&self) -> Option<&HitlSettings> {
        match &self.kind {
            NodeKind::Agent(d) => d.hitl.as_ref(),
            NodeKind::Router(d) => d.hitl.as_ref(),
            NodeKind::Parallel(d) => d.hitl.as_ref(),
            NodeKind::WhileLoop(d) => d.hitl.as_ref(),
            NodeKind::Subflow(d) => d.hitl.as_ref(),
            NodeKind::Memory(d) => d.hitl.as_ref(),
            NodeKind::Tool(d) => d.hitl.as_ref(),
            _ => None,
        }
    }
}

/// Node type discriminant, used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Start,
    Agent,
    Router,
    Parallel,
    WhileLoop,
    Memory,
    Tool,
    Subflow,
    Output,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Start => "start",
            NodeType::Agent => "agent",
            NodeType::Router => "router",
            NodeType::Parallel => "parallel",
            NodeType::WhileLoop => "whileLoop",
            NodeType::Memory => "memory",
            NodeType::Tool => "tool",
            NodeType::Subflow => "subflow",
            NodeType::Output => "output",
        };
        write!(f, "{}", name)
    }
}

/// Type tag plus type-specific payload, matching the editor wire format
/// (`{"type": "agent", "data": {...}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum NodeKind {
    Start(StartData),
    Agent(AgentData),
    Router(RouterData),
    Parallel(ParallelData),
    WhileLoop(WhileLoopData),
    Memory(MemoryData),
    Tool(ToolData),
    Subflow(SubflowData),
    Output(OutputData),
}

impl NodeKind {
    /// The matching [`NodeType`] discriminant.
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start(_) => NodeType::Start,
            NodeKind::Agent(_) => NodeType::Agent,
            NodeKind::Router(_) => NodeType::Router,
            NodeKind::Parallel(_) => NodeType::Parallel,
            NodeKind::WhileLoop(_) => NodeType::WhileLoop,
            NodeKind::Memory(_) => NodeType::Memory,
            NodeKind::Tool(_) => NodeType::Tool,
            NodeKind::Subflow(_) => NodeType::Subflow,
            NodeKind::Output(_) => NodeType::Output,
        }
    }
}

/// Start node: passes the run input through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartData {}

/// Agent node: one LLM call with the node's system prompt over the shared
/// conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Model id; falls back to the executor's default model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt.
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool ids this agent may call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// One selectable route on a router node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Route id; doubles as the edge source handle.
    pub id: String,
    /// Human label presented to the routing model.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Router node: asks the model to pick one of the declared routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extra routing instructions prepended to the generated prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// One declared branch of a parallel node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Branch id; doubles as the edge source handle.
    pub id: String,
    pub label: String,
}

/// Parallel node: fans the input out to every branch concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub branches: Vec<Branch>,
    /// Merge branch outputs into one aggregate output (default true).
    #[serde(default = "default_true")]
    pub merge_enabled: bool,
    /// Optional synthesis prompt; when present the merge is one LLM call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

impl Default for ParallelData {
    fn default() -> Self {
        Self {
            label: None,
            branches: Vec::new(),
            merge_enabled: true,
            prompt: None,
            model: None,
            error_handling: None,
            hitl: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// How a while-loop decides whether to run another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    /// Ask the model with `conditionPrompt` at each boundary.
    #[default]
    Condition,
    /// Run exactly `maxIterations` iterations.
    Fixed,
}

/// What the loop emits when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopOutputMode {
    /// The last body output (or the arrival input if no iteration ran).
    #[default]
    Last,
    /// All body outputs joined.
    Accumulate,
}

/// Behaviour when the iteration cap is hit while the condition is still true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnMaxIterations {
    /// Fail the node.
    Error,
    /// Log and exit normally.
    #[default]
    Warning,
    /// Exit normally.
    Continue,
}

/// While-loop node: runs its `body` subgraph until the condition turns false
/// or the iteration cap is reached, then exits on `done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileLoopData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Condition question for `loopMode=condition`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_prompt: Option<String>,
    /// Hard iteration cap. Required and bounded.
    pub max_iterations: u32,
    #[serde(default)]
    pub on_max_iterations: OnMaxIterations,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub output_mode: LoopOutputMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// Memory node operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryOperation {
    Query,
    Store,
}

/// Memory node: long-term store/query through the memory adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub operation: MemoryOperation,
    /// Max hits returned by a query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Output when a query returns nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// Tool node: one host tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tool_id: String,
    /// Tool-specific configuration forwarded verbatim.
    #[serde(default)]
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// Where a subflow input mapping reads its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "from")]
pub enum MappingSource {
    /// The input arriving at the subflow node.
    Input,
    /// A prior node's recorded output.
    NodeOutput { node_id: String },
    /// A fixed string.
    Literal { value: String },
}

/// One key of the subflow's mapped input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    /// Key name; empty key passes the bare value through.
    #[serde(default)]
    pub key: String,
    #[serde(flatten)]
    pub source: MappingSource,
}

/// Subflow node: runs a nested workflow resolved through the subflow
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubflowData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub subflow_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_mappings: Vec<InputMapping>,
    /// Share memory, session, and history with the parent run.
    #[serde(default)]
    pub share_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlSettings>,
}

/// How an output node combines its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    /// Concatenate source outputs with optional intro/outro text.
    #[default]
    Combine,
    /// One LLM call synthesizing the sources.
    Synthesis,
}

/// Output node: the terminal node producing the run's final text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Output format hint carried through to the caller.
    #[serde(default)]
    pub format: String,
    /// Optional template; `{output}` and `{input}` are substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Node ids to read outputs from; defaults to the arrival input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outro_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// What to do when a node fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorMode {
    /// End the run with the failure envelope.
    #[default]
    Stop,
    /// Treat the node as producing empty output and proceed.
    Continue,
    /// Follow the node's `error`-handle edges.
    Branch,
}

/// Per-node retry settings; unset fields fall back to executor defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
    /// Only these codes are retried; empty means all non-skipped codes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<ErrorCode>,
    /// Never retry these codes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_on: Vec<ErrorCode>,
}

/// Error handling configuration on an executable node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandling {
    #[serde(default)]
    pub mode: ErrorMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
}

/// HITL interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HitlMode {
    /// Approve/reject before the node body runs.
    #[default]
    Approval,
    /// Solicit data before the node body runs.
    Input,
    /// Review (and possibly modify) the node's output.
    Review,
}

/// One preset option shown to the human.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlOption {
    pub value: String,
    pub label: String,
}

/// HITL configuration on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: HitlMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// JSON schema for structured `input`/`modify` data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<HitlOption>,
    /// Deadline in milliseconds; 0 or absent means wait forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Action synthesized when the deadline passes (default reject).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_action: Option<crate::hitl::HitlAction>,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Which output port emitted this edge; `None` is the default port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Which input port receives this edge; unused by most node types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Edge {
    /// True when this edge hangs off the `error` handle.
    pub fn is_error_edge(&self) -> bool {
        self.source_handle.as_deref() == Some(ERROR_HANDLE)
    }
}

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The unique start node, when the document has exactly one.
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self
            .nodes
            .iter()
            .filter(|n| n.node_type() == NodeType::Start);
        match (starts.next(), starts.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    /// Outgoing edges of `source`, optionally filtered by handle, in
    /// document order.
    pub fn outgoing(&self, source: &str, handle: Option<&str>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.source == source)
            .filter(|e| match handle {
                Some(h) => e.source_handle.as_deref() == Some(h),
                None => true,
            })
            .collect()
    }

    /// Targets of `source`'s non-error edges, in document order.
    pub fn default_targets(&self, source: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.source == source && !e.is_error_edge())
            .map(|e| e.target.clone())
            .collect()
    }

    /// Targets of `source`'s `error`-handle edges, in document order.
    pub fn error_targets(&self, source: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.source == source && e.is_error_edge())
            .map(|e| e.target.clone())
            .collect()
    }

    /// Targets of edges on a specific handle, in document order.
    pub fn handle_targets(&self, source: &str, handle: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.source == source && e.source_handle.as_deref() == Some(handle))
            .map(|e| e.target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        serde_json::from_value(json!({
            "meta": {"name": "sample"},
            "nodes": [
                {"id": "start-1", "type": "start", "data": {}},
                {
                    "id": "agent-1",
                    "type": "agent",
                    "data": {
                        "prompt": "You are helpful.",
                        "model": "openai/gpt-4o-mini",
                        "temperature": 0.2
                    }
                },
                {
                    "id": "out-1",
                    "type": "output",
                    "data": {"format": "text"}
                }
            ],
            "edges": [
                {"id": "e1", "source": "start-1", "target": "agent-1"},
                {"id": "e2", "source": "agent-1", "target": "out-1"},
                {"id": "e3", "source": "agent-1", "target": "out-1", "sourceHandle": "error"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parses_editor_document() {
        let wf = sample_workflow();
        assert_eq!(wf.nodes.len(), 3);
        assert_eq!(wf.node("agent-1").unwrap().node_type(), NodeType::Agent);
        match &wf.node("agent-1").unwrap().kind {
            NodeKind::Agent(data) => {
                assert_eq!(data.model.as_deref(), Some("openai/gpt-4o-mini"));
                assert_eq!(data.temperature, Some(0.2));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn round_trips_type_tag() {
        let wf = sample_workflow();
        let json = serde_json::to_value(&wf).unwrap();
        assert_eq!(json["nodes"][1]["type"], "agent");
        assert_eq!(json["nodes"][1]["data"]["prompt"], "You are helpful.");
        let back: Workflow = serde_json::from_value(json).unwrap();
        assert_eq!(back.nodes[1].id, "agent-1");
    }

    #[test]
    fn unknown_node_type_fails_to_parse() {
        let doc = json!({
            "meta": {"name": "bad"},
            "nodes": [{"id": "x", "type": "teleport", "data": {}}],
            "edges": []
        });
        assert!(serde_json::from_value::<Workflow>(doc).is_err());
    }

    #[test]
    fn start_node_requires_uniqueness() {
        let mut wf = sample_workflow();
        assert_eq!(wf.start_node().unwrap().id, "start-1");
        wf.nodes.push(Node {
            id: "start-2".into(),
            kind: NodeKind::Start(StartData::default()),
            position: Position::default(),
        });
        assert!(wf.start_node().is_none());
    }

    #[test]
    fn edge_queries_respect_handles() {
        let wf = sample_workflow();
        assert_eq!(wf.default_targets("agent-1"), vec!["out-1"]);
        assert_eq!(wf.error_targets("agent-1"), vec!["out-1"]);
        assert_eq!(wf.outgoing("agent-1", Some(ERROR_HANDLE)).len(), 1);
        assert_eq!(wf.outgoing("start-1", None).len(), 1);
    }

    #[test]
    fn parallel_merge_defaults_on() {
        let data: ParallelData = serde_json::from_value(json!({
            "branches": [{"id": "b1", "label": "One"}]
        }))
        .unwrap();
        assert!(data.merge_enabled);
    }

    #[test]
    fn while_loop_defaults() {
        let data: WhileLoopData = serde_json::from_value(json!({
            "maxIterations": 3
        }))
        .unwrap();
        assert_eq!(data.loop_mode, LoopMode::Condition);
        assert_eq!(data.output_mode, LoopOutputMode::Last);
        assert_eq!(data.on_max_iterations, OnMaxIterations::Warning);
    }

    #[test]
    fn retry_settings_parse_codes() {
        let eh: ErrorHandling = serde_json::from_value(json!({
            "mode": "branch",
            "retry": {
                "maxRetries": 2,
                "baseDelay": 100,
                "retryOn": ["RATE_LIMIT", "TIMEOUT"],
                "skipOn": ["AUTH"]
            }
        }))
        .unwrap();
        assert_eq!(eh.mode, ErrorMode::Branch);
        let retry = eh.retry.unwrap();
        assert_eq!(retry.retry_on, vec![ErrorCode::RateLimit, ErrorCode::Timeout]);
        assert_eq!(retry.skip_on, vec![ErrorCode::Auth]);
    }
}
