use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::redaction::redact;

/// Error-kind taxonomy from §7. Codes, not types — stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Validation,
    Configuration,
    Storage,
    Vault,
    Mapping,
    Cucumber,
    Producer,
    Consumer,
    Timeout,
    ServiceUnavailable,
    NotFound,
    Internal,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::Configuration
            | ErrorCode::Storage
            | ErrorCode::Vault
            | ErrorCode::Mapping
            | ErrorCode::Cucumber
            | ErrorCode::Producer
            | ErrorCode::Consumer
            | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The child-subsystem / queue-layer error surfaced to a client. Carries a
/// stable code, a redacted message, optional structured details, an optional
/// retry hint, and a millisecond timestamp for log correlation (§6).
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ProbeError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after_ms: Option<u64>,
}

impl ProbeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: redact(&message.into()),
            details: None,
            retry_after_ms: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message).with_retry_after_ms(30_000)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    timestamp_ms: i64,
}

impl IntoResponse for ProbeError {
    fn into_response(self) -> Response {
        tracing::error!(code = ?self.code, message = %self.message, "request failed");
        let status = self.code.status();
        let body = ErrorBody {
            code: self.code,
            message: self.message,
            details: self.details,
            retry_after_ms: self.retry_after_ms,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
