//! Error taxonomy, classification, and failure envelopes.
//!
//! Every failure the engine can surface is mapped onto a closed set of
//! [`ErrorCode`]s. Classification prefers the HTTP status when one is
//! available and falls back to message inspection, mirroring how provider
//! gateways report errors in practice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Closed set of error kinds recognised by the engine.
///
/// Serialized with the wire names the editor and trace consumers expect
/// (`LLM_ERROR`, `RATE_LIMIT`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Provider-side failure (5xx).
    LlmError,
    /// Request timed out (408/504 or client-side timeout).
    Timeout,
    /// Rate limit exceeded (429).
    RateLimit,
    /// Authentication or authorization failure (401/403).
    Auth,
    /// Invalid request or document (other 4xx, schema failures).
    Validation,
    /// Failure reported by a node handler itself.
    ExtensionValidationError,
    /// Connection-level failure (DNS, refused, reset).
    Network,
    /// Anything that could not be classified.
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::LlmError => "LLM_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::Auth => "AUTH",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::ExtensionValidationError => "EXTENSION_VALIDATION_ERROR",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Classify an HTTP status code.
///
/// This is the preferred classification path; message inspection is only a
/// fallback for errors that never carried a status.
pub fn classify_status(status: u16) -> ErrorCode {
    match status {
        408 | 504 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimit,
        401 | 403 => ErrorCode::Auth,
        400..=499 => ErrorCode::Validation,
        500..=599 => ErrorCode::LlmError,
        _ => ErrorCode::Unknown,
    }
}

/// Classify an error message when no status code is available.
pub fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
    {
        return ErrorCode::RateLimit;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        return ErrorCode::Timeout;
    }
    if lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        return ErrorCode::Auth;
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
        || lower.contains("refused")
    {
        return ErrorCode::Network;
    }
    if lower.contains("internal server error")
        || lower.contains("service unavailable")
        || lower.contains("bad gateway")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
    {
        return ErrorCode::LlmError;
    }
    if lower.contains("bad request") || lower.contains("invalid request") || lower.contains("400") {
        return ErrorCode::Validation;
    }

    ErrorCode::Unknown
}

/// Rate limit details reported by the provider alongside a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Request quota for the current window, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Requests remaining in the current window, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// Instant at which the window resets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
    /// Provider-suggested wait in seconds (`Retry-After`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

/// A single failed attempt recorded by the retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Error message for this attempt.
    pub error: String,
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
}

/// Retry history carried on the failure envelope for post-mortems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryTrace {
    /// Attempts actually made.
    pub attempts: u32,
    /// Attempts the policy allowed.
    pub max_attempts: u32,
    /// One entry per failed attempt.
    pub history: Vec<RetryAttempt>,
}

impl RetryTrace {
    /// Record a failed attempt.
    pub fn record(&mut self, attempt: u32, error: impl Into<String>) {
        self.attempts = attempt;
        self.history.push(RetryAttempt {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Failure raised by a provider call, before any node context is attached.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    /// Classified error kind.
    pub code: ErrorCode,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Human-readable message.
    pub message: String,
    /// Rate limit details, when reported.
    pub rate_limit: Option<RateLimitInfo>,
}

impl ProviderFailure {
    /// Build a failure from an HTTP status and body text.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: classify_status(status),
            status: Some(status),
            message: message.into(),
            rate_limit: None,
        }
    }

    /// Build a failure from a message alone (connection errors, parse errors).
    pub fn from_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: None,
            message: message.into(),
            rate_limit: None,
        }
    }

    /// Attach rate limit details.
    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limit = Some(info);
        self
    }
}

/// The JSON failure envelope surfaced to callers and to `error`-branch nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    /// Node where the failure occurred.
    pub node_id: String,
    /// Type of that node.
    pub node_type: String,
    /// Classified error kind.
    pub code: ErrorCode,
    /// HTTP status, when one was involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Human-readable message.
    pub message: String,
    /// Retry history, when the node was retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryTrace>,
    /// Rate limit details, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ExecutionError {
    /// Build an envelope for a node failure.
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            code,
            status_code: None,
            message: message.into(),
            retry: None,
            rate_limit: None,
        }
    }

    /// Serialize the envelope for consumption by downstream error-handler
    /// nodes.
    pub fn to_branch_input(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "node '{}' ({}) failed with {}: {}",
            self.node_id, self.node_type, self.code, self.message
        )
    }
}

/// Errors that can occur while executing a workflow.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A provider call failed.
    #[error("provider call failed with {}: {}", .0.code, .0.message)]
    Provider(ProviderFailure),

    /// A node failed terminally; carries the full envelope.
    #[error("{0}")]
    Node(Box<ExecutionError>),

    /// The workflow document or a node configuration is invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A handler reported a failure of its own contract.
    #[error("handler error: {0}")]
    Extension(String),

    /// The run was cancelled via `stop()`.
    #[error("execution cancelled")]
    Cancelled,

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Classify this error onto the closed taxonomy.
    ///
    /// Precedence: HTTP status, then error shape, then message inspection.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Provider(f) => match f.status {
                Some(status) => classify_status(status),
                None if f.code != ErrorCode::Unknown => f.code,
                None => classify_message(&f.message),
            },
            EngineError::Node(e) => e.code,
            EngineError::Validation(_) => ErrorCode::Validation,
            EngineError::Extension(_) => ErrorCode::ExtensionValidationError,
            EngineError::Cancelled => ErrorCode::Unknown,
            EngineError::Serialization(_) => ErrorCode::Validation,
        }
    }

    /// HTTP status attached to this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::Provider(f) => f.status,
            EngineError::Node(e) => e.status_code,
            _ => None,
        }
    }

    /// Rate limit details attached to this error, when reported.
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        match self {
            EngineError::Provider(f) => f.rate_limit.as_ref(),
            EngineError::Node(e) => e.rate_limit.as_ref(),
            _ => None,
        }
    }

    /// True if this is the cancellation sentinel.
    ///
    /// Cancellation unwinds past per-node error handling; callers must check
    /// this before applying `errorHandling` semantics.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Wrap a provider failure.
    pub fn provider(failure: ProviderFailure) -> Self {
        EngineError::Provider(failure)
    }
}

impl From<ExecutionError> for EngineError {
    fn from(e: ExecutionError) -> Self {
        EngineError::Node(Box::new(e))
    }
}
