//! HTTP API layer
//!
//! REST endpoints over the version history plus the upstream webhook
//! receiver. Authentication happens in front of this service; the caller
//! arrives as the `x-user-id` header.

pub mod webhooks;
pub mod workflows;

use crate::{
    error::GuardError,
    versioning::{SyncService, VersionManager},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

pub const USER_HEADER: &str = "x-user-id";

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<VersionManager>,
    pub sync: Arc<SyncService>,
}

/// Authenticated caller taken from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| OwnerId(value.to_string()))
            .ok_or_else(|| GuardError::Unauthorized(format!("missing {} header", USER_HEADER)))
    }
}
