//! While-loop iteration accounting and output modes.

mod common;

use common::{wf, Recorder, Reply, ScriptedProvider};
use serde_json::json;
use std::sync::Arc;
use trellis_core::{ErrorCode, ExecutionCallbacks, ExecutorConfig, WorkflowExecutor};

fn loop_workflow(data: serde_json::Value) -> trellis_core::Workflow {
    wf(json!({
        "meta": {"name": "loop"},
        "nodes": [
            {"id": "start-1", "type": "start", "data": {}},
            {"id": "loop-1", "type": "whileLoop", "data": data},
            {"id": "body-agent", "type": "agent", "data": {"prompt": "refine"}},
            {"id": "out-1", "type": "output", "data": {"format": "text"}}
        ],
        "edges": [
            {"id": "e1", "source": "start-1", "target": "loop-1"},
            {"id": "e2", "source": "loop-1", "target": "body-agent", "sourceHandle": "body"},
            {"id": "e3", "source": "loop-1", "target": "out-1", "sourceHandle": "done"}
        ]
    }))
}

#[tokio::test]
async fn condition_true_true_false_runs_body_twice() {
    let workflow = loop_workflow(json!({
        "conditionPrompt": "Keep going?",
        "maxIterations": 3,
        "loopMode": "condition",
        "outputMode": "last"
    }));
    // Call order: condition, body, condition, body, condition.
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("yes"),
        Reply::text("draft one"),
        Reply::text("yes"),
        Reply::text("draft two"),
        Reply::text("no"),
    ]));
    let executor = WorkflowExecutor::new(provider.clone());
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "seed", recorder.callbacks()).await;

    assert!(result.success, "error: {:?}", result.error);
    // Body ran exactly twice; output under `last` is the second draft.
    assert_eq!(recorder.count("start:body-agent"), 2);
    assert_eq!(result.output, "draft two");
    assert_eq!(provider.call_count(), 5);

    // Each iteration's body received the previous iteration's output.
    let calls = provider.calls();
    assert_eq!(calls[1].messages.last().unwrap().content, "seed");
    assert_eq!(calls[3].messages.last().unwrap().content, "draft one");
}

#[tokio::test]
async fn fixed_mode_runs_exactly_max_iterations() {
    let workflow = loop_workflow(json!({
        "maxIterations": 3,
        "loopMode": "fixed",
        "outputMode": "accumulate"
    }));
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("one"),
        Reply::text("two"),
        Reply::text("three"),
    ]));
    let executor = WorkflowExecutor::new(provider.clone());
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "seed", recorder.callbacks()).await;

    assert!(result.success);
    assert_eq!(recorder.count("start:body-agent"), 3);
    assert_eq!(result.output, "one\n\ntwo\n\nthree");
    // Fixed mode makes no condition calls.
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn zero_max_iterations_passes_input_through() {
    let workflow = loop_workflow(json!({
        "maxIterations": 0,
        "loopMode": "fixed",
        "outputMode": "last"
    }));
    let provider = Arc::new(ScriptedProvider::default());
    // maxIterations=0 is a preflight error; bypass preflight to exercise
    // the boundary behaviour itself.
    let executor = WorkflowExecutor::new(provider.clone())
        .with_config(ExecutorConfig::new().with_preflight(false));
    let recorder = Recorder::new();

    let result = executor.execute(&workflow, "seed", recorder.callbacks()).await;

    assert!(result.success);
    assert_eq!(recorder.count("start:body-agent"), 0);
    assert_eq!(result.output, "seed");
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn zero_max_iterations_accumulate_yields_empty() {
    let workflow = loop_workflow(json!({
        "maxIterations": 0,
        "loopMode": "fixed",
        "outputMode": "accumulate"
    }));
    let executor = WorkflowExecutor::new(Arc::new(ScriptedProvider::default()))
        .with_config(ExecutorConfig::new().with_preflight(false));

    let result = executor
        .execute(&workflow, "seed", ExecutionCallbacks::new())
        .await;

    assert!(result.success);
    assert_eq!(result.output, "");
}

#[tokio::test]
async fn cap_with_condition_still_true_applies_error_policy() {
    let workflow = loop_workflow(json!({
        "conditionPrompt": "More?",
        "maxIterations": 1,
        "loopMode": "condition",
        "onMaxIterations": "error",
        "outputMode": "last"
    }));
    // condition yes, body, condition yes again at the cap boundary.
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::text("yes"),
        Reply::text("body output"),
        Reply::text("yes"),
    ]));
    let executor = WorkflowExecutor::new(provider);

    let result = executor
        .execute(&workflow, "seed", ExecutionCallbacks::new())
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ExtensionValidationError);
    assert_eq!(error.node_id, "loop-1");
}

#[tokio::test]
async fn unparseable_condition_is_an_extension_error() {
    let workflow = loop_workflow(json!({
        "conditionPrompt": "More?",
        "maxIterations": 3,
        "loopMode": "condition"
    }));
    let provider = Arc::new(ScriptedProvider::new(vec![Reply::text("perhaps!")]));
    let executor = WorkflowExecutor::new(provider);

    let result = executor
        .execute(&workflow, "seed", ExecutionCallbacks::new())
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.unwrap().code,
        ErrorCode::ExtensionValidationError
    );
}
