//! Error types for adapters and the orchestrator.

use account_ledger::{AttemptState, LedgerError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Number broker failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("No number available at or under the price ceiling")]
    NoNumberAvailable,

    #[error("Timed out waiting for an SMS code")]
    CodeTimeout,

    #[error("Broker service error: {0}")]
    Service(String),
}

/// Device messaging client failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device not ready: {0}")]
    NotReady(String),

    #[error("Number rejected by the platform: {0}")]
    NumberRejected(String),

    #[error("Timed out waiting for an in-app code")]
    CodeTimeout,

    #[error("Verification code rejected")]
    CodeRejected,

    #[error("Two-factor password rejected")]
    TwoFactorRejected,

    #[error("Automation error: {0}")]
    Automation(String),
}

/// Desktop messaging client failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DesktopError {
    #[error("Desktop login failed: {0}")]
    LoginFailed(String),
}

/// Mail provider failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("Mailbox registration failed: {0}")]
    Registration(String),

    #[error("Timed out waiting for a confirmation code")]
    Timeout,

    #[error("Mail service error: {0}")]
    Service(String),
}

/// Errors surfaced to the caller of the orchestrator.
///
/// Pipeline failures are not errors: they come back as a finalized
/// `AttemptReport`. Only bookkeeping problems end up here.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: AttemptState, to: AttemptState },

    #[error("Phone number already assigned to this attempt")]
    NumberAlreadySet,
}

/// Errors returned by the audit API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Attempt not found: {0}")]
    NotFound(String),

    #[error("Attempt {0} has no credential")]
    NoCredential(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::NoCredential(_) => (StatusCode::NOT_FOUND, "NO_CREDENTIAL"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => ApiError::NotFound(id.to_string()),
            other => ApiError::Storage(other.to_string()),
        }
    }
}
