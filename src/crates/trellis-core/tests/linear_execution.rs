//! Linear workflows: pass-through, callback ordering, preflight, and
//! compaction during a run.

mod common;

use common::{wf, Recorder, Reply, ScriptedProvider};
use serde_json::json;
use std::sync::Arc;
use trellis_core::context::CompactionConfig;
use trellis_core::{ExecutionCallbacks, ExecutorConfig, WorkflowExecutor};

#[tokio::test]
async fn start_to_output_is_identity() {
    let workflow = wf(json!({
        "meta": {"name": "identity"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "out-1", "type": "output", "data": {"format": "text"}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "out-1"}
        ]
    }));
    let executor = WorkflowExecutor::new(Arc::new(ScriptedProvider::default()));

    let result = executor
        .execute(&workflow, "hello world", ExecutionCallbacks::new())
        .await;

    assert!(result.success);
    assert_eq!(result.output, "hello world");
    assert_eq!(result.node_outputs["out-1"], "hello world");
}

#[tokio::test]
async fn linear_agent_callback_ordering() {
    let workflow = wf(json!({
        "meta": {"name": "echo"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "agent-1", "type": "agent", "data": {
                "model": "openai/gpt-4o-mini",
                "prompt": "Echo."
            }}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "agent-1"}
        ]
    }));
    let provider = Arc::new(ScriptedProvider::new(vec![Reply::text("hi")]));
    let executor = WorkflowExecutor::new(provider.clone());
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "hi", recorder.callbacks()).await;

    assert!(result.success);
    assert_eq!(result.output, "hi");
    assert_eq!(
        recorder.events(),
        vec![
            "start:start-1",
            "finish:start-1:hi",
            "start:agent-1",
            "token:agent-1:hi",
            "finish:agent-1:hi",
        ]
    );

    // The agent request is [system, user] with the configured model.
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "openai/gpt-4o-mini");
    assert_eq!(calls[0].messages.len(), 2);
    assert_eq!(calls[0].messages[0].content, "Echo.");
    assert_eq!(calls[0].messages[1].content, "hi");
    assert!(calls[0].streaming);
}

#[tokio::test]
async fn token_usage_fires_after_node_finish() {
    let workflow = wf(json!({
        "meta": {"name": "usage"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "agent-1", "type": "agent", "data": {"prompt": "p"}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "agent-1"}
        ]
    }));
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("answer").with_usage(12, 4),
    ]));
    let executor = WorkflowExecutor::new(provider);
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "q", recorder.callbacks()).await;

    assert!(result.success);
    let finish = recorder.position("finish:agent-1:answer").unwrap();
    let usage = recorder.position("usage:agent-1").unwrap();
    assert!(usage > finish);
    assert_eq!(result.usage.unwrap().total_tokens, 16);
    assert_eq!(result.token_usage_details.len(), 1);
}

#[tokio::test]
async fn preflight_failure_runs_no_node() {
    // Two start nodes: structurally invalid.
    let workflow = wf(json!({
        "meta": {"name": "broken"},
        "nodes": [
            {"id": "s1", "type": "start", "data": {}},
            {"id": "s2", "type": "start", "data": {}}
        ],
        "edges": []
    }));
    let provider = Arc::new(ScriptedProvider::default());
    let executor = WorkflowExecutor::new(provider.clone());
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "x", recorder.callbacks()).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, trellis_core::ErrorCode::Validation);
    assert!(recorder.events().is_empty());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn compaction_runs_before_second_agent_call() {
    let workflow = wf(json!({
        "meta": {"name": "compact"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "agent-1", "type": "agent", "data": {"prompt": "First."}},
            {"id": "agent-2", "type": "agent", "data": {"prompt": "Second."}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "agent-1"},
            {"id": "e2", "source": "agent-1", "target": "agent-2"}
        ]
    }));
    // Scripted in call order: agent-1, then the summarizer, then agent-2.
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("a long first answer that pads out the shared history"),
        Reply::text("summary-of-earlier-turns"),
        Reply::text("final"),
    ]));
    let config = ExecutorConfig::new().with_compaction(CompactionConfig {
        threshold_tokens: Some(10),
        preserve_recent: 1,
        ..Default::default()
    });
    let executor = WorkflowExecutor::new(provider.clone()).with_config(config);
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "q", recorder.callbacks()).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.output, "final");
    assert_eq!(recorder.count("compacted:"), 1);

    // onContextCompacted fires between the node's start and its first token.
    let start = recorder.position("start:agent-2").unwrap();
    let compacted = recorder.events().iter().position(|e| e.starts_with("compacted:")).unwrap();
    let token = recorder.position("token:agent-2:final").unwrap();
    assert!(start < compacted && compacted < token);

    // The second agent call saw the summary, not the raw first exchange.
    let calls = provider.calls();
    assert_eq!(calls.len(), 3);
    let final_call = &calls[2];
    assert!(final_call
        .messages
        .iter()
        .any(|m| m.summary && m.content == "summary-of-earlier-turns"));
}
