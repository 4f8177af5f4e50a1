//! Upstream webhook receiver
//!
//! HubSpot posts batches of events. Change events trigger a sync tagged
//! `webhook`. Deletion events are confirmed upstream, then the final
//! definition is preserved before the workflow is marked deleted. Each event
//! is answered individually.

use crate::{
    api::AppState,
    error::GuardError,
    versioning::SyncOutcome,
    workflow::types::{SnapshotType, SYSTEM_ACTOR},
};
use axum::{extract::State, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub portal_id: Option<Value>,
    pub object_id: Value,
    pub subscription_type: String,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Change,
    Deletion,
    Ignored,
}

impl EventKind {
    pub fn classify(subscription_type: &str) -> Self {
        let suffix = subscription_type
            .rsplit_once('.')
            .map(|(_, suffix)| suffix)
            .unwrap_or(subscription_type);
        match suffix {
            "propertyChange" | "update" | "creation" => Self::Change,
            "deletion" => Self::Deletion,
            _ => Self::Ignored,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    pub object_id: String,
    pub subscription_type: String,
    /// `synced`, `deleted`, `skipped`, `ignored` or `error`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventResult {
    fn new(event: &WebhookEvent, object_id: String, status: &'static str) -> Self {
        Self {
            object_id,
            subscription_type: event.subscription_type.clone(),
            status,
            workflow_id: None,
            outcome: None,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub processed: usize,
    pub results: Vec<EventResult>,
}

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/hubspot", post(receive_hubspot_events))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// POST /webhooks/hubspot
/// Body: [{ "objectId": 123, "subscriptionType": "workflow.propertyChange", "ownerId": "u1" }]
async fn receive_hubspot_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<WebhookEvent>>,
) -> Json<WebhookResponse> {
    tracing::info!("📥 Received {} HubSpot webhook events", events.len());

    let mut results = Vec::with_capacity(events.len());
    for event in &events {
        results.push(handle_event(&state, event).await);
    }

    Json(WebhookResponse {
        processed: events.len(),
        results,
    })
}

async fn handle_event(state: &AppState, event: &WebhookEvent) -> EventResult {
    let object_id = id_string(&event.object_id).unwrap_or_default();
    let kind = EventKind::classify(&event.subscription_type);

    if kind == EventKind::Ignored {
        tracing::debug!("⏭️ Ignoring webhook event {}", event.subscription_type);
        return EventResult::new(event, object_id, "ignored").with_detail("unsupported subscription type");
    }

    let owner_id = event
        .owner_id
        .clone()
        .filter(|owner| !owner.is_empty())
        .or_else(|| event.portal_id.as_ref().and_then(id_string));
    let (Some(owner_id), false) = (owner_id, object_id.is_empty()) else {
        tracing::warn!("⚠️ Webhook event without owner or object id: {:?}", event);
        return EventResult::new(event, object_id, "error").with_detail("event has no owner or object id");
    };

    match kind {
        EventKind::Change => {
            match state
                .sync
                .sync_external(&owner_id, &object_id, SnapshotType::Webhook, SYSTEM_ACTOR)
                .await
            {
                Ok((workflow, outcome)) => {
                    let mut result = EventResult::new(event, object_id, "synced");
                    result.workflow_id = Some(workflow.id);
                    result.outcome = Some(outcome);
                    result
                }
                Err(err) => failed(event, object_id, err),
            }
        }
        EventKind::Deletion => {
            match state
                .sync
                .handle_external_deletion(&owner_id, &object_id, SnapshotType::Webhook, SYSTEM_ACTOR)
                .await
            {
                Ok((workflow, outcome)) => {
                    let (status, detail) = match &outcome {
                        SyncOutcome::Deleted { version: Some(number) } => {
                            ("deleted", format!("preserved as version {}", number))
                        }
                        SyncOutcome::Deleted { version: None } => {
                            ("deleted", "no new backup written".to_string())
                        }
                        SyncOutcome::Skipped { reason } => ("skipped", reason.clone()),
                        SyncOutcome::Created { .. } | SyncOutcome::Unchanged { .. } => {
                            tracing::info!(
                                "🔎 Deletion event for {} but the workflow still exists upstream",
                                object_id
                            );
                            ("synced", "workflow still exists upstream".to_string())
                        }
                    };
                    let mut result = EventResult::new(event, object_id, status).with_detail(detail);
                    result.workflow_id = Some(workflow.id);
                    result.outcome = Some(outcome);
                    result
                }
                Err(err) => failed(event, object_id, err),
            }
        }
        EventKind::Ignored => EventResult::new(event, object_id, "ignored"),
    }
}

fn failed(event: &WebhookEvent, object_id: String, err: GuardError) -> EventResult {
    if err.is_not_found() {
        tracing::debug!("⏭️ Webhook for unprotected workflow {}", object_id);
        return EventResult::new(event, object_id, "ignored").with_detail("workflow is not protected");
    }
    tracing::error!("❌ Webhook handling failed for {}: {}", object_id, err);
    EventResult::new(event, object_id, "error").with_detail(err.to_string())
}
