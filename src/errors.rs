//! Crate-wide error type.
//!
//! Named by meaning rather than by failure site, so a collaborator sees
//! `{message, kind}` instead of an implementation detail. `DraftVerificationMismatch`
//! and `GoldenTicketFailed` are deliberately absent here: the former drives the
//! accept/correct state machine and the latter is a ledger-mutation outcome, neither
//! is a session error (see the speculative loop and golden ticket modules).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("engine load failed: {0}")]
    EngineLoadFailed(String),

    #[error("engine eval failed: {0}")]
    EngineEvalFailed(String),

    #[error("logits unavailable: {0}")]
    LogitsUnavailable(String),

    #[error("snapshot invalid: {0}")]
    SnapshotInvalid(String),

    #[error("control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    #[error("scout banned: {0}")]
    ScoutBanned(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardError {
    /// Stable machine-readable kind name for the `{message, kind}` envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ShardError::EngineLoadFailed(_) => "EngineLoadFailed",
            ShardError::EngineEvalFailed(_) => "EngineEvalFailed",
            ShardError::LogitsUnavailable(_) => "LogitsUnavailable",
            ShardError::SnapshotInvalid(_) => "SnapshotInvalid",
            ShardError::ControlPlaneUnreachable(_) => "ControlPlaneUnreachable",
            ShardError::ScoutBanned(_) => "ScoutBanned",
            ShardError::PersistenceFailed(_) => "PersistenceFailed",
            ShardError::InvalidParameters(_) => "InvalidParameters",
            ShardError::InternalError(_) => "InternalError",
            ShardError::Io(_) => "Io",
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    message: String,
    kind: &'static str,
}

impl IntoResponse for ShardError {
    fn into_response(self) -> Response {
        let status = match &self {
            ShardError::EngineLoadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShardError::EngineEvalFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShardError::LogitsUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShardError::SnapshotInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ShardError::ControlPlaneUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ShardError::ScoutBanned(_) => StatusCode::FORBIDDEN,
            ShardError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShardError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            ShardError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ShardError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let envelope = ErrorEnvelope {
            message: self.to_string(),
            kind: self.kind(),
        };

        (status, Json(json!(envelope))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
