//! Upstream automation platform access
//!
//! The core only needs three things from the platform: fetch one workflow
//! definition, list an owner's workflows, and recreate a deleted workflow.
//! `WorkflowSource` is that seam; `HubSpotClient` is the production
//! implementation.

pub mod client;

use async_trait::async_trait;
use serde_json::Value;

pub use client::HubSpotClient;

#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Current definition, `Ok(None)` when the platform does not know it.
    async fn fetch_workflow(&self, owner_id: &str, external_id: &str) -> anyhow::Result<Option<Value>>;

    /// Every workflow the owner currently has upstream.
    async fn list_workflows(&self, owner_id: &str) -> anyhow::Result<Vec<Value>>;

    /// Create a workflow from a stored definition and return its new id.
    async fn create_workflow(&self, owner_id: &str, definition: &Value) -> anyhow::Result<String>;
}

/// Upstream id of a workflow document (`id`, `workflowId` or `flowId`, number
/// or string; the first non-empty one wins).
pub fn external_id_of(doc: &Value) -> Option<String> {
    ["id", "workflowId", "flowId"]
        .iter()
        .filter_map(|key| doc.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
