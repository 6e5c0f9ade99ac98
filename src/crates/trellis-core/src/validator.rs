//! Structural workflow validation.
//!
//! Pure function over the document, run as preflight before the first node
//! executes. Error-severity issues abort the run; warnings are surfaced but
//! do not.

use crate::handlers::HandlerRegistry;
use crate::runtime::SubflowRegistry;
use crate::workflow::{
    Edge, Node, NodeKind, NodeType, Workflow, BODY_HANDLE, DONE_HANDLE, ERROR_HANDLE,
    MERGED_HANDLE,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            node_id: node_id.map(Into::into),
            message: message.into(),
        }
    }

    pub fn warning(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            node_id: node_id.map(Into::into),
            message: message.into(),
        }
    }
}

/// Outcome of validating a document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// Output handles a node declares for its outgoing edges.
#[derive(Debug, Clone, Default)]
pub struct HandleSet {
    /// The unnamed default handle is accepted.
    pub default_allowed: bool,
    /// Named handles (route ids, branch ids, `body`/`done`, `merged`).
    pub named: Vec<String>,
    /// The node may emit on `error`.
    pub error_allowed: bool,
}

/// Handles declared by a node, derived from its kind.
pub fn declared_handles(node: &Node) -> HandleSet {
    match &node.kind {
        NodeKind::Start(_)
        | NodeKind::Agent(_)
        | NodeKind::Memory(_)
        | NodeKind::Tool(_)
        | NodeKind::Subflow(_) => HandleSet {
            default_allowed: true,
            named: Vec::new(),
            error_allowed: true,
        },
        NodeKind::Router(data) => HandleSet {
            default_allowed: false,
            named: data.routes.iter().map(|r| r.id.clone()).collect(),
            error_allowed: true,
        },
        NodeKind::Parallel(data) => {
            let mut named: Vec<String> = data.branches.iter().map(|b| b.id.clone()).collect();
            named.push(MERGED_HANDLE.to_string());
            HandleSet {
                default_allowed: false,
                named,
                error_allowed: true,
            }
        }
        NodeKind::WhileLoop(_) => HandleSet {
            default_allowed: false,
            named: vec![BODY_HANDLE.to_string(), DONE_HANDLE.to_string()],
            error_allowed: true,
        },
        NodeKind::Output(_) => HandleSet::default(),
    }
}

fn handle_is_declared(handles: &HandleSet, handle: Option<&str>) -> bool {
    match handle {
        None => handles.default_allowed,
        Some(ERROR_HANDLE) => handles.error_allowed,
        Some(named) => handles.named.iter().any(|h| h == named),
    }
}

/// Validate a workflow document.
///
/// `registry` enables the node-type-is-registered check; `subflows` enables
/// subflow reference resolution.
pub fn validate_workflow(
    workflow: &Workflow,
    registry: Option<&HandlerRegistry>,
    subflows: Option<&dyn SubflowRegistry>,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_start_uniqueness(workflow, &mut errors);
    check_node_ids_unique(workflow, &mut errors);
    check_edges(workflow, &mut errors, &mut warnings);
    check_reachability(workflow, &mut errors);

    for node in &workflow.nodes {
        if let Some(registry) = registry {
            match registry.get(node.node_type()) {
                Some(handler) => {
                    for issue in handler.validate(node, workflow) {
                        match issue.severity {
                            Severity::Error => errors.push(issue),
                            Severity::Warning => warnings.push(issue),
                        }
                    }
                }
                None => errors.push(ValidationIssue::error(
                    Some(&node.id),
                    format!("no handler registered for node type '{}'", node.node_type()),
                )),
            }
        }
        check_node_config(workflow, node, subflows, &mut errors);
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_start_uniqueness(workflow: &Workflow, errors: &mut Vec<ValidationIssue>) {
    let starts: Vec<&Node> = workflow
        .nodes
        .iter()
        .filter(|n| n.node_type() == NodeType::Start)
        .collect();
    match starts.len() {
        0 => errors.push(ValidationIssue::error(None, "workflow has no start node")),
        1 => {}
        n => errors.push(ValidationIssue::error(
            None,
            format!("workflow has {} start nodes, expected exactly one", n),
        )),
    }
}

fn check_node_ids_unique(workflow: &Workflow, errors: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationIssue::error(
                Some(&node.id),
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
}

fn check_edges(
    workflow: &Workflow,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    let mut seen_handles: HashMap<(&str, &str), u32> = HashMap::new();

    for edge in &workflow.edges {
        let source = workflow.node(&edge.source);
        if source.is_none() {
            errors.push(edge_error(edge, "references missing source node"));
        }
        if workflow.node(&edge.target).is_none() {
            errors.push(edge_error(edge, "references missing target node"));
        }

        if let Some(source) = source {
            let handles = declared_handles(source);
            if !handle_is_declared(&handles, edge.source_handle.as_deref()) {
                errors.push(edge_error(
                    edge,
                    &format!(
                        "source handle '{}' is not declared by node '{}'",
                        edge.source_handle.as_deref().unwrap_or("<default>"),
                        edge.source
                    ),
                ));
            }
        }

        if let Some(handle) = edge.source_handle.as_deref() {
            let count = seen_handles.entry((edge.source.as_str(), handle)).or_insert(0);
            *count += 1;
            if *count == 2 {
                warnings.push(ValidationIssue::warning(
                    Some(&edge.source),
                    format!(
                        "multiple edges leave node '{}' on handle '{}'",
                        edge.source, handle
                    ),
                ));
            }
        }
    }
}

fn edge_error(edge: &Edge, message: &str) -> ValidationIssue {
    ValidationIssue::error(None, format!("edge '{}' {}", edge.id, message))
}

fn check_reachability(workflow: &Workflow, errors: &mut Vec<ValidationIssue>) {
    let Some(start) = workflow.start_node() else {
        return;
    };

    let mut reached = HashSet::new();
    let mut queue = VecDeque::new();
    reached.insert(start.id.as_str());
    queue.push_back(start.id.as_str());
    while let Some(current) = queue.pop_front() {
        for edge in workflow.edges.iter().filter(|e| e.source == current) {
            if workflow.node(&edge.target).is_some() && reached.insert(edge.target.as_str()) {
                queue.push_back(edge.target.as_str());
            }
        }
    }

    for node in &workflow.nodes {
        if !reached.contains(node.id.as_str()) {
            errors.push(ValidationIssue::error(
                Some(&node.id),
                format!("node '{}' is not reachable from the start node", node.id),
            ));
        }
    }
}

fn check_node_config(
    workflow: &Workflow,
    node: &Node,
    subflows: Option<&dyn SubflowRegistry>,
    errors: &mut Vec<ValidationIssue>,
) {
    match &node.kind {
        NodeKind::Router(data) => {
            if data.routes.is_empty() {
                errors.push(ValidationIssue::error(
                    Some(&node.id),
                    "router declares no routes",
                ));
            }
        }
        NodeKind::Parallel(data) => {
            if data.branches.is_empty() {
                errors.push(ValidationIssue::error(
                    Some(&node.id),
                    "parallel node declares no branches",
                ));
            }
        }
        NodeKind::WhileLoop(data) => {
            if data.max_iterations == 0 {
                errors.push(ValidationIssue::error(
                    Some(&node.id),
                    "while-loop maxIterations must be greater than zero",
                ));
            }
            if workflow.handle_targets(&node.id, BODY_HANDLE).is_empty() {
                errors.push(ValidationIssue::error(
                    Some(&node.id),
                    "while-loop has no edge on its 'body' handle",
                ));
            }
            if workflow.handle_targets(&node.id, DONE_HANDLE).is_empty() {
                errors.push(ValidationIssue::error(
                    Some(&node.id),
                    "while-loop has no edge on its 'done' handle",
                ));
            }
        }
        NodeKind::Subflow(data) => {
            if let Some(subflows) = subflows {
                if subflows.resolve(&data.subflow_id).is_none() {
                    errors.push(ValidationIssue::error(
                        Some(&node.id),
                        format!("subflow '{}' cannot be resolved", data.subflow_id),
                    ));
                }
            }
        }
        _ => {}
    }
}
