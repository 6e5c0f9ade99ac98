//! Parallel fan-out, branch streaming, settled join, and merge.

mod common;

use common::{wf, Recorder, Reply, ScriptedProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{ErrorCode, ExecutionCallbacks, WorkflowExecutor};

fn parallel_workflow(data: serde_json::Value) -> trellis_core::Workflow {
    wf(json!({
        "meta": {"name": "parallel"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "par-1", "type": "parallel", "data": data},
            {"id": "agent-1", "type": "agent", "data": {
                "prompt": "one",
                "errorHandling": {"mode": "stop", "retry": {"maxRetries": 0, "baseDelay": 1}}
            }},
            {"id": "agent-2", "type": "agent", "data": {
                "prompt": "two",
                "errorHandling": {"mode": "stop", "retry": {"maxRetries": 0, "baseDelay": 1}}
            }},
            {"id": "out-1", "type": "output", "data": {"format": "text"}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "par-1"},
            {"id": "e2", "source": "par-1", "target": "agent-1", "sourceHandle": "b1"},
            {"id": "e3", "source": "par-1", "target": "agent-2", "sourceHandle": "b2"},
            {"id": "e4", "source": "par-1", "target": "out-1", "sourceHandle": "merged"}
        ]
    }))
}

fn branches() -> serde_json::Value {
    json!({
        "branches": [
            {"id": "b1", "label": "One"},
            {"id": "b2", "label": "Two"}
        ],
        "mergeEnabled": true
    })
}

#[tokio::test]
async fn merge_collects_both_branches() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("x").with_delay(Duration::from_millis(20)),
        Reply::text("y"),
    ]));
    let executor = WorkflowExecutor::new(provider);
    let recorder = Recorder::new();

    let result = executor
        .execute(&parallel_workflow(branches()), "go", recorder.callbacks())
        .await;

    assert!(result.success, "error: {:?}", result.error);
    // Exactly k branch starts and k completions.
    assert_eq!(recorder.count("branch_start:par-1"), 2);
    assert_eq!(recorder.count("branch_complete:par-1"), 2);

    // The aggregate carries both outputs, labelled, in declaration order.
    let merged = &result.node_outputs["par-1"];
    assert!(merged.contains("### One"));
    assert!(merged.contains("x"));
    assert!(merged.contains("### Two"));
    assert!(merged.contains("y"));
    assert!(merged.find("### One").unwrap() < merged.find("### Two").unwrap());

    // onNodeFinish(parallel) follows every branch completion.
    let finish = recorder
        .events()
        .iter()
        .position(|e| e.starts_with("finish:par-1"))
        .unwrap();
    for (index, event) in recorder.events().iter().enumerate() {
        if event.starts_with("branch_complete:par-1") {
            assert!(index < finish);
        }
    }

    // Branch content streams through branch callbacks, not global onToken.
    assert_eq!(recorder.count("branch_token:par-1:b1:x"), 1);
    assert_eq!(recorder.count("branch_token:par-1:b2:y"), 1);
    assert_eq!(recorder.count("token:agent-1"), 0);
    assert_eq!(recorder.count("token:agent-2"), 0);
}

#[tokio::test]
async fn merge_prompt_synthesizes_with_one_call() {
    let mut data = branches();
    data["prompt"] = json!("Blend the drafts.");
    // Scripted: two branch agents, then the synthesis call.
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("x"),
        Reply::text("y"),
        Reply::text("blended"),
    ]));
    let executor = WorkflowExecutor::new(provider.clone());

    let result = executor
        .execute(&parallel_workflow(data), "go", ExecutionCallbacks::new())
        .await;

    assert!(result.success);
    assert_eq!(result.node_outputs["par-1"], "blended");
    assert_eq!(result.output, "blended");
    assert_eq!(provider.call_count(), 3);
    let synthesis = &provider.calls()[2];
    assert_eq!(synthesis.messages[0].content, "Blend the drafts.");
    assert!(synthesis.messages[1].content.contains("x"));
    assert!(synthesis.messages[1].content.contains("y"));
}

#[tokio::test]
async fn failed_branch_is_isolated() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::status(500),
        Reply::text("y"),
    ]));
    let executor = WorkflowExecutor::new(provider);
    let recorder = Recorder::new();

    let result = executor
        .execute(&parallel_workflow(branches()), "go", recorder.callbacks())
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(recorder.count("branch_complete:par-1:b1:err"), 1);
    assert_eq!(recorder.count("branch_complete:par-1:b2:ok"), 1);
    // The merge carries the surviving branch only.
    let merged = &result.node_outputs["par-1"];
    assert!(merged.contains("### Two"));
    assert!(!merged.contains("### One"));
}

#[tokio::test]
async fn all_branches_failing_fails_the_node() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::status(500),
        Reply::status(503),
    ]));
    let executor = WorkflowExecutor::new(provider);

    let result = executor
        .execute(&parallel_workflow(branches()), "go", ExecutionCallbacks::new())
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    // The first declared branch's error surfaces.
    assert_eq!(error.code, ErrorCode::LlmError);
    assert_eq!(error.node_id, "agent-1");
}

#[tokio::test]
async fn merge_disabled_produces_no_aggregate() {
    let data = json!({
        "branches": [
            {"id": "b1", "label": "One"},
            {"id": "b2", "label": "Two"}
        ],
        "mergeEnabled": false
    });
    let workflow = wf(json!({
        "meta": {"name": "parallel-nomerge"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "par-1", "type": "parallel", "data": data},
            {"id": "agent-1", "type": "agent", "data": {"prompt": "one"}},
            {"id": "agent-2", "type": "agent", "data": {"prompt": "two"}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "par-1"},
            {"id": "e2", "source": "par-1", "target": "agent-1", "sourceHandle": "b1"},
            {"id": "e3", "source": "par-1", "target": "agent-2", "sourceHandle": "b2"}
        ]
    }));
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("x"),
        Reply::text("y"),
    ]));
    let executor = WorkflowExecutor::new(provider);
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "go", recorder.callbacks()).await;

    assert!(result.success);
    // The parallel node itself reports an empty display output; branch
    // results are still recorded per node.
    assert_eq!(result.node_outputs["par-1"], "");
    assert_eq!(recorder.count("branch_complete:par-1"), 2);
    let agent_outputs: Vec<&str> = ["agent-1", "agent-2"]
        .iter()
        .map(|id| result.node_outputs[*id].as_str())
        .collect();
    assert_eq!(agent_outputs, vec!["x", "y"]);
}
