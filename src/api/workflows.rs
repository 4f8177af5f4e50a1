//! Workflow protection and version history endpoints
//!
//! Every route is scoped to the caller: a workflow owned by someone else
//! answers 404 exactly like a missing one.

use crate::{
    api::{AppState, OwnerId},
    error::{GuardError, GuardResult},
    versioning::{ProtectItem, ProtectReport, RollbackOutcome, SyncOutcome, SyncReport, VersionComparison},
    workflow::types::{AuditLogEntry, SnapshotType, VersionRef, VersionSummary, Workflow, WorkflowVersion},
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Workflow row plus its newest version metadata.
#[derive(Debug, Serialize)]
pub struct WorkflowOverview {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub latest_version: Option<VersionSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ProtectRequest {
    pub workflows: Vec<ProtectItem>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: String,
    pub to: String,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/protect", post(protect_workflows))
        .route("/api/workflows/sync", post(sync_all))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/sync", post(sync_workflow))
        .route("/api/workflows/{id}/save", post(save_workflow))
        .route("/api/workflows/{id}/rollback", post(rollback_workflow))
        .route("/api/workflows/{id}/restore", post(restore_deleted))
        .route("/api/workflows/{id}/versions", get(list_versions))
        .route("/api/workflows/{id}/versions/{version}", get(get_version))
        .route(
            "/api/workflows/{id}/versions/{version}/restore",
            post(restore_version),
        )
        .route("/api/workflows/{id}/compare", get(compare_versions))
        .route("/api/workflows/{id}/audit", get(audit_trail))
}

async fn owned_workflow(state: &AppState, id: Uuid, owner: &OwnerId) -> GuardResult<Workflow> {
    state
        .manager
        .storage()
        .get_owned_workflow(id, owner.as_str())
        .await?
        .ok_or_else(|| GuardError::WorkflowNotFound(id.to_string()))
}

fn parse_version_ref(raw: &str) -> GuardResult<VersionRef> {
    raw.parse::<VersionRef>().map_err(GuardError::InvalidVersionRef)
}

/// GET /api/workflows
async fn list_workflows(
    State(state): State<AppState>,
    owner: OwnerId,
) -> GuardResult<Json<Vec<WorkflowOverview>>> {
    let workflows = state
        .manager
        .storage()
        .list_workflows_by_owner(owner.as_str())
        .await?;

    let mut overviews = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        let latest_version = state
            .manager
            .latest_version(workflow.id)
            .await?
            .map(|version| version.summary());
        overviews.push(WorkflowOverview {
            workflow,
            latest_version,
        });
    }
    Ok(Json(overviews))
}

/// POST /api/workflows/protect
/// Body: { "workflows": [{ "externalId": "123", "name": "..." }] }
async fn protect_workflows(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(request): Json<ProtectRequest>,
) -> GuardResult<Json<ProtectReport>> {
    if request.workflows.is_empty() {
        return Err(GuardError::Validation("no workflows to protect".to_string()));
    }

    let report = state
        .sync
        .protect_workflows(owner.as_str(), &request.workflows, owner.as_str())
        .await;
    Ok(Json(report))
}

/// POST /api/workflows/sync
async fn sync_all(State(state): State<AppState>, owner: OwnerId) -> GuardResult<Json<SyncReport>> {
    let report = state
        .sync
        .sync_owner(owner.as_str(), SnapshotType::ManualSync, owner.as_str())
        .await?;
    Ok(Json(report))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<WorkflowOverview>> {
    let workflow = owned_workflow(&state, id, &owner).await?;
    let latest_version = state
        .manager
        .latest_version(id)
        .await?
        .map(|version| version.summary());
    Ok(Json(WorkflowOverview {
        workflow,
        latest_version,
    }))
}

/// POST /api/workflows/{id}/sync
async fn sync_workflow(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<SyncOutcome>> {
    let workflow = owned_workflow(&state, id, &owner).await?;
    let outcome = state
        .sync
        .sync_workflow(&workflow, SnapshotType::ManualSync, owner.as_str())
        .await?;
    Ok(Json(outcome))
}

/// POST /api/workflows/{id}/save
/// Body: the workflow definition to store
async fn save_workflow(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
    Json(definition): Json<Value>,
) -> GuardResult<Json<SyncOutcome>> {
    owned_workflow(&state, id, &owner).await?;
    let outcome = state
        .sync
        .manual_save(id, definition, owner.as_str())
        .await?;
    Ok(Json(outcome))
}

/// POST /api/workflows/{id}/rollback
async fn rollback_workflow(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<RollbackOutcome>> {
    owned_workflow(&state, id, &owner).await?;
    let outcome = state.manager.rollback_workflow(id, owner.as_str()).await?;
    Ok(Json(outcome))
}

/// POST /api/workflows/{id}/restore
async fn restore_deleted(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<WorkflowVersion>> {
    owned_workflow(&state, id, &owner).await?;
    let version = state
        .sync
        .restore_deleted_workflow(id, owner.as_str())
        .await?;
    Ok(Json(version))
}

/// GET /api/workflows/{id}/versions
async fn list_versions(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<Vec<VersionSummary>>> {
    owned_workflow(&state, id, &owner).await?;
    Ok(Json(state.manager.list_versions(id).await?))
}

/// GET /api/workflows/{id}/versions/{version}
/// `version` is either the version UUID or its number.
async fn get_version(
    State(state): State<AppState>,
    owner: OwnerId,
    Path((id, version)): Path<(Uuid, String)>,
) -> GuardResult<Json<WorkflowVersion>> {
    owned_workflow(&state, id, &owner).await?;
    let reference = parse_version_ref(&version)?;
    Ok(Json(state.manager.resolve_version(id, reference).await?))
}

/// POST /api/workflows/{id}/versions/{version}/restore
async fn restore_version(
    State(state): State<AppState>,
    owner: OwnerId,
    Path((id, version)): Path<(Uuid, String)>,
) -> GuardResult<Json<WorkflowVersion>> {
    owned_workflow(&state, id, &owner).await?;
    let reference = parse_version_ref(&version)?;
    let restored = state
        .manager
        .restore_workflow_version(id, reference, owner.as_str())
        .await?;
    Ok(Json(restored))
}

/// GET /api/workflows/{id}/compare?from=1&to=3
async fn compare_versions(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
    Query(query): Query<CompareQuery>,
) -> GuardResult<Json<VersionComparison>> {
    owned_workflow(&state, id, &owner).await?;
    let from = parse_version_ref(&query.from)?;
    let to = parse_version_ref(&query.to)?;
    Ok(Json(state.manager.compare_versions(id, from, to).await?))
}

/// GET /api/workflows/{id}/audit
async fn audit_trail(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(id): Path<Uuid>,
) -> GuardResult<Json<Vec<AuditLogEntry>>> {
    owned_workflow(&state, id, &owner).await?;
    Ok(Json(state.manager.audit_trail(id).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, request, test_app, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &TestApp, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let response = app
            .router
            .clone()
            .oneshot(request(method, uri, user, body))
            .await
            .unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    async fn protected(app: &TestApp, external_id: &str, doc: Value) -> String {
        app.source.put(external_id, doc);
        let (status, body) = call(
            app,
            Method::POST,
            "/api/workflows/protect",
            Some("u1"),
            Some(json!({ "workflows": [{ "externalId": external_id }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success_count"], json!(1));
        body["protected"][0]["workflow"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn missing_user_header_is_rejected() {
        let app = test_app().await;
        let (status, body) = call(&app, Method::GET, "/api/workflows", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], json!("unauthorized"));
    }

    #[tokio::test]
    async fn protect_then_list() {
        let app = test_app().await;
        protected(&app, "101", json!({ "id": 101, "name": "Welcome" })).await;

        let (status, body) = call(&app, Method::GET, "/api/workflows", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], json!("Welcome"));
        assert_eq!(body[0]["latest_version"]["version_number"], json!(1));
        assert_eq!(
            body[0]["latest_version"]["snapshot_type"],
            json!("Initial Protection")
        );

        let (_, other) = call(&app, Method::GET, "/api/workflows", Some("u2"), None).await;
        assert_eq!(other, json!([]));
    }

    #[tokio::test]
    async fn other_owner_gets_not_found() {
        let app = test_app().await;
        let id = protected(&app, "101", json!({ "id": 101, "name": "Welcome" })).await;

        let (status, body) = call(&app, Method::GET, &format!("/api/workflows/{}", id), Some("intruder"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("workflow_not_found"));

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{}/rollback", id),
            Some("intruder"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_unchanged_then_changed() {
        let app = test_app().await;
        let id = protected(&app, "1", json!({ "id": 1, "name": "A", "actions": [] })).await;
        let uri = format!("/api/workflows/{}/sync", id);

        let (status, body) = call(&app, Method::POST, &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("unchanged"));

        app.source.put("1", json!({ "id": 1, "name": "A", "actions": [{ "id": "x", "type": "EMAIL" }] }));
        let (_, body) = call(&app, Method::POST, &uri, Some("u1"), None).await;
        assert_eq!(body["status"], json!("created"));
        assert_eq!(body["version"]["version_number"], json!(2));
        assert_eq!(body["version"]["snapshot_type"], json!("Manual Sync"));
    }

    #[tokio::test]
    async fn rollback_compare_and_history() {
        let app = test_app().await;
        let id = protected(&app, "1", json!({ "name": "A", "actions": [] })).await;
        app.source.put("1", json!({ "name": "A", "actions": [{ "id": "x", "type": "EMAIL" }] }));
        call(&app, Method::POST, &format!("/api/workflows/{}/sync", id), Some("u1"), None).await;

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/workflows/{}/compare?from=1&to=2", id),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_changes"], json!(true));
        assert_eq!(body["diff"]["added"].as_array().unwrap().len(), 1);

        let (status, body) = call(&app, Method::POST, &format!("/api/workflows/{}/rollback", id), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("rolled_back"));
        assert_eq!(body["restored_from"], json!(1));
        assert_eq!(body["version"]["version_number"], json!(3));
        assert_eq!(body["version"]["data"], json!({ "name": "A", "actions": [] }));

        let (_, versions) = call(&app, Method::GET, &format!("/api/workflows/{}/versions", id), Some("u1"), None).await;
        let numbers: Vec<i64> = versions
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["version_number"].as_i64().unwrap())
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let (_, audit) = call(&app, Method::GET, &format!("/api/workflows/{}/audit", id), Some("u1"), None).await;
        assert_eq!(audit[0]["action"], json!("rollback"));
    }

    #[tokio::test]
    async fn version_lookup_accepts_number_and_uuid() {
        let app = test_app().await;
        let id = protected(&app, "1", json!({ "name": "A" })).await;

        let (status, by_number) = call(&app, Method::GET, &format!("/api/workflows/{}/versions/1", id), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        let version_id = by_number["id"].as_str().unwrap().to_string();

        let (status, by_id) = call(
            &app,
            Method::GET,
            &format!("/api/workflows/{}/versions/{}", id, version_id),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_id, by_number);

        let (status, body) = call(&app, Method::GET, &format!("/api/workflows/{}/versions/latest", id), Some("u1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("invalid_version_ref"));

        let (status, _) = call(&app, Method::GET, &format!("/api/workflows/{}/versions/9", id), Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restore_version_and_manual_save() {
        let app = test_app().await;
        let id = protected(&app, "1", json!({ "name": "A" })).await;

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{}/save", id),
            Some("u1"),
            Some(json!({ "name": "B" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"]["snapshot_type"], json!("Manual Save"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{}/versions/1/restore", id),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version_number"], json!(3));
        assert_eq!(body["snapshot_type"], json!("Restore"));
        assert_eq!(body["data"], json!({ "name": "A" }));
    }

    #[tokio::test]
    async fn empty_protect_request_is_rejected() {
        let app = test_app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/workflows/protect",
            Some("u1"),
            Some(json!({ "workflows": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("validation_failed"));
    }
}
