//! Human-in-the-loop coordination.
//!
//! A node with HITL enabled pauses before (approval/input) or after
//! (review) its body. Requests go through an adapter so deployments can
//! persist them; responses arrive either from the caller's handler or
//! out-of-band through the adapter. Deadlines are wall-clock comparisons
//! checked on a tick, not fire-and-forget timers, so a host that sleeps
//! through the deadline still times out correctly on wake.

use crate::error::{EngineError, Result};
use crate::workflow::{HitlMode, HitlOption, HitlSettings};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Poll interval for adapter responses and deadline checks.
const RESPONSE_TICK: Duration = Duration::from_millis(20);

/// Action taken by the human (or synthesized on timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HitlAction {
    Approve,
    Reject,
    Submit,
    Modify,
    Skip,
    Custom,
}

/// Run context shown to the human alongside the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequestContext {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub workflow_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A pending human interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub id: String,
    pub node_id: String,
    pub node_label: String,
    pub mode: HitlMode,
    pub prompt: String,
    pub context: HitlRequestContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<HitlOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The human's answer to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlResponse {
    pub request_id: String,
    pub action: HitlAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<String>,
    pub responded_at: DateTime<Utc>,
}

impl HitlResponse {
    /// Response synthesized when the deadline passes.
    fn timed_out(request_id: impl Into<String>, action: HitlAction) -> Self {
        Self {
            request_id: request_id.into(),
            action,
            data: None,
            responded_by: Some("system:timeout".into()),
            responded_at: Utc::now(),
        }
    }

    /// The replacement text carried by `modify`/`submit` responses.
    pub fn text_data(&self) -> Option<String> {
        match &self.data {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// Persistence hook for HITL requests.
///
/// The default is in-memory; production deployments can back it with
/// durable storage and resume pending requests across restarts. Adapters
/// must be reentrancy-safe.
#[async_trait]
pub trait HitlAdapter: Send + Sync {
    async fn store(&self, request: HitlRequest) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<HitlRequest>>;
    async fn respond(&self, id: &str, response: HitlResponse) -> Result<()>;
    async fn get_pending(
        &self,
        workflow_name: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Vec<HitlRequest>>;
    async fn get_response(&self, id: &str) -> Result<Option<HitlResponse>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory reference adapter.
#[derive(Default)]
pub struct InMemoryHitlAdapter {
    entries: RwLock<HashMap<String, (HitlRequest, Option<HitlResponse>)>>,
}

impl InMemoryHitlAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HitlAdapter for InMemoryHitlAdapter {
    async fn store(&self, request: HitlRequest) -> Result<()> {
        self.entries
            .write()
            .insert(request.id.clone(), (request, None));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<HitlRequest>> {
        Ok(self.entries.read().get(id).map(|(r, _)| r.clone()))
    }

    async fn respond(&self, id: &str, response: HitlResponse) -> Result<()> {
        match self.entries.write().get_mut(id) {
            Some(entry) => {
                entry.1 = Some(response);
                Ok(())
            }
            None => Err(EngineError::Validation(format!(
                "unknown HITL request: {}",
                id
            ))),
        }
    }

    async fn get_pending(
        &self,
        workflow_name: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Vec<HitlRequest>> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|(_, response)| response.is_none())
            .filter(|(request, _)| {
                workflow_name.map_or(true, |w| request.context.workflow_name == w)
            })
            .filter(|(request, _)| {
                session_id.map_or(true, |s| request.context.session_id.as_deref() == Some(s))
            })
            .map(|(request, _)| request.clone())
            .collect())
    }

    async fn get_response(&self, id: &str) -> Result<Option<HitlResponse>> {
        Ok(self
            .entries
            .read()
            .get(id)
            .and_then(|(_, response)| response.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Caller hook invoked when a node pauses. Resolving to `None` leaves the
/// decision to out-of-band adapter responses (or the deadline).
pub type HitlHandler =
    Arc<dyn Fn(HitlRequest) -> BoxFuture<'static, Option<HitlResponse>> + Send + Sync>;

/// Coordinates request lifecycle, response racing, and deadlines.
#[derive(Clone)]
pub struct HitlCoordinator {
    adapter: Arc<dyn HitlAdapter>,
}

impl HitlCoordinator {
    pub fn new(adapter: Arc<dyn HitlAdapter>) -> Self {
        Self { adapter }
    }

    /// The adapter backing this coordinator.
    pub fn adapter(&self) -> &Arc<dyn HitlAdapter> {
        &self.adapter
    }

    /// Build a request from a node's settings.
    pub fn build_request(
        &self,
        node_id: &str,
        node_label: &str,
        settings: &HitlSettings,
        context: HitlRequestContext,
    ) -> HitlRequest {
        let created_at = Utc::now();
        let expires_at = settings
            .timeout
            .filter(|t| *t > 0)
            .map(|t| created_at + ChronoDuration::milliseconds(t as i64));
        HitlRequest {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            node_label: node_label.to_string(),
            mode: settings.mode,
            prompt: settings
                .prompt
                .clone()
                .unwrap_or_else(|| default_prompt(settings.mode)),
            context,
            options: settings.options.clone(),
            input_schema: settings.input_schema.clone(),
            created_at,
            expires_at,
        }
    }

    /// Store the request, notify the handler, and wait for a response.
    ///
    /// The handler future races against out-of-band adapter responses, the
    /// wall-clock deadline, and run cancellation. On deadline a response
    /// with the configured default action (reject when unset) is
    /// synthesized and recorded.
    pub async fn await_response(
        &self,
        request: HitlRequest,
        handler: Option<&HitlHandler>,
        default_action: Option<HitlAction>,
        signal: &CancellationToken,
    ) -> Result<HitlResponse> {
        let id = request.id.clone();
        let expires_at = request.expires_at;
        self.adapter.store(request.clone()).await?;
        info!(request_id = %id, node_id = %request.node_id, mode = ?request.mode, "HITL pause");

        let mut handler_future: BoxFuture<'static, Option<HitlResponse>> = match handler {
            Some(h) => h(request),
            None => Box::pin(futures::future::pending()),
        };

        loop {
            tokio::select! {
                _ = signal.cancelled() => return Err(EngineError::Cancelled),
                answer = &mut handler_future => {
                    match answer {
                        Some(response) => {
                            self.adapter.respond(&id, response.clone()).await?;
                            debug!(request_id = %id, action = ?response.action, "HITL handler responded");
                            return Ok(response);
                        }
                        // Handler declined to decide; keep polling the adapter.
                        None => handler_future = Box::pin(futures::future::pending()),
                    }
                }
                _ = tokio::time::sleep(RESPONSE_TICK) => {
                    if let Some(response) = self.adapter.get_response(&id).await? {
                        debug!(request_id = %id, action = ?response.action, "HITL adapter responded");
                        return Ok(response);
                    }
                    if let Some(deadline) = expires_at {
                        if Utc::now() >= deadline {
                            let action = default_action.unwrap_or(HitlAction::Reject);
                            warn!(request_id = %id, action = ?action, "HITL deadline passed, synthesizing default");
                            let response = HitlResponse::timed_out(&id, action);
                            self.adapter.respond(&id, response.clone()).await?;
                            return Ok(response);
                        }
                    }
                }
            }
        }
    }
}

impl Default for HitlCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryHitlAdapter::new()))
    }
}

fn default_prompt(mode: HitlMode) -> String {
    match mode {
        HitlMode::Approval => "Approve this step to continue.".to_string(),
        HitlMode::Input => "Provide input to continue.".to_string(),
        HitlMode::Review => "Review the output before it continues downstream.".to_string(),
    }
}

/// Validate structured response data against the request's input schema.
#[cfg(feature = "json-validation")]
pub fn validate_response_data(schema: &Value, data: &Value) -> Result<()> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| EngineError::Validation(format!("invalid input schema: {}", e)))?;
    if let Err(errors) = compiled.validate(data) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(EngineError::Validation(format!(
            "HITL data does not match input schema: {}",
            detail.join("; ")
        )));
    }
    Ok(())
}

/// Schema validation is a no-op without the `json-validation` feature.
#[cfg(not(feature = "json-validation"))]
pub fn validate_response_data(_schema: &Value, _data: &Value) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(timeout: Option<u64>) -> HitlSettings {
        HitlSettings {
            enabled: true,
            mode: HitlMode::Approval,
            timeout,
            ..Default::default()
        }
    }

    fn coordinator() -> HitlCoordinator {
        HitlCoordinator::default()
    }

    fn request(coordinator: &HitlCoordinator, timeout: Option<u64>) -> HitlRequest {
        coordinator.build_request(
            "agent-1",
            "Agent",
            &settings(timeout),
            HitlRequestContext {
                input: "proceed?".into(),
                workflow_name: "wf".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn handler_response_wins() {
        let coordinator = coordinator();
        let req = request(&coordinator, None);
        let handler: HitlHandler = Arc::new(|req| {
            Box::pin(async move {
                Some(HitlResponse {
                    request_id: req.id,
                    action: HitlAction::Approve,
                    data: None,
                    responded_by: Some("tester".into()),
                    responded_at: Utc::now(),
                })
            })
        });

        let response = coordinator
            .await_response(req, Some(&handler), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.action, HitlAction::Approve);
    }

    #[tokio::test]
    async fn deadline_synthesizes_default_action() {
        let coordinator = coordinator();
        let req = request(&coordinator, Some(50));
        let id = req.id.clone();

        let started = std::time::Instant::now();
        let response = coordinator
            .await_response(req, None, Some(HitlAction::Skip), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.action, HitlAction::Skip);
        assert_eq!(response.responded_by.as_deref(), Some("system:timeout"));
        assert!(started.elapsed() >= Duration::from_millis(40));
        // The synthesized response is recorded on the adapter too.
        let stored = coordinator.adapter().get_response(&id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn default_action_defaults_to_reject() {
        let coordinator = coordinator();
        let req = request(&coordinator, Some(30));
        let response = coordinator
            .await_response(req, None, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.action, HitlAction::Reject);
    }

    #[tokio::test]
    async fn out_of_band_adapter_response_is_picked_up() {
        let coordinator = coordinator();
        let req = request(&coordinator, None);
        let id = req.id.clone();
        let adapter = coordinator.adapter().clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            adapter
                .respond(
                    &id,
                    HitlResponse {
                        request_id: id.clone(),
                        action: HitlAction::Modify,
                        data: Some(serde_json::json!("new input")),
                        responded_by: Some("reviewer".into()),
                        responded_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        });

        let response = coordinator
            .await_response(req, None, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.action, HitlAction::Modify);
        assert_eq!(response.text_data().as_deref(), Some("new input"));
    }

    #[tokio::test]
    async fn cancellation_unblocks_wait() {
        let coordinator = coordinator();
        let req = request(&coordinator, None);
        let signal = CancellationToken::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = coordinator.await_response(req, None, None, &signal).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn pending_listing_filters_by_workflow() {
        let coordinator = coordinator();
        let req = request(&coordinator, None);
        coordinator.adapter().store(req.clone()).await.unwrap();

        let pending = coordinator
            .adapter()
            .get_pending(Some("wf"), None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        let none = coordinator
            .adapter()
            .get_pending(Some("other"), None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
