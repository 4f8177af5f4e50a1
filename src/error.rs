//! Domain error taxonomy
//!
//! Every storage, lifecycle and sync operation returns `GuardResult<T>`.
//! The API layer turns a `GuardError` straight into an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("version {reference} not found for workflow {workflow_id}")]
    VersionNotFound { workflow_id: Uuid, reference: String },

    #[error("workflow {0} has no stored versions")]
    NoVersions(Uuid),

    #[error("invalid version reference '{0}': expected a UUID or a version number")]
    InvalidVersionRef(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("upstream automation platform unavailable: {0}")]
    Upstream(String),

    #[error("could not allocate a version number for workflow {workflow_id} after {attempts} attempts")]
    VersionConflict { workflow_id: String, attempts: u32 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GuardError {
    /// Rejection for writes against a soft-deleted workflow.
    pub fn workflow_deleted(workflow_id: Uuid) -> Self {
        Self::Validation(format!("workflow {} is deleted; restore it first", workflow_id))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::WorkflowNotFound(_) | Self::VersionNotFound { .. } | Self::NoVersions(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidVersionRef(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::VersionConflict { .. } | Self::Database(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::NoVersions(_) => "no_versions",
            Self::InvalidVersionRef(_) => "invalid_version_ref",
            Self::Validation(_) => "validation_failed",
            Self::Unauthorized(_) => "unauthorized",
            Self::Upstream(_) => "upstream_unavailable",
            Self::VersionConflict { .. } => "version_conflict",
            Self::Database(_) => "database_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == StatusCode::NOT_FOUND
    }
}

/// True when the database rejected a write because of a UNIQUE constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// SQLite result codes for a writer that lost a lock race (BUSY, LOCKED and
/// their extended forms).
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// True for write failures worth retrying when allocating a version number.
pub fn is_retryable_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || db_err
                    .code()
                    .map(|code| SQLITE_CONTENTION_CODES.contains(&&*code))
                    .unwrap_or(false)
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        } else {
            tracing::debug!("↩️ Request rejected: {}", self);
        }

        // Internal details stay in the logs.
        let message = match &self {
            Self::Database(_) | Self::Serialization(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({ "error": self.code(), "message": message })),
        )
            .into_response()
    }
}
