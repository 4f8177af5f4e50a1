//! Sync orchestration
//!
//! Pulls current definitions from the upstream platform, runs them through
//! the change detector and hands real changes to the `VersionManager`.
//! Batch operations never abort on a single workflow: every item ends up
//! either in the results or in the error list.

use crate::{
    compare::{detect_change, ChangeDecision},
    error::{GuardError, GuardResult},
    hubspot::{external_id_of, WorkflowSource},
    versioning::lifecycle::VersionManager,
    workflow::types::{NewVersion, SnapshotType, VersionSummary, Workflow, WorkflowVersion},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};
use uuid::Uuid;

/// What a sync did for one workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created {
        version: VersionSummary,
        decision: ChangeDecision,
    },
    Unchanged {
        latest_version: i64,
    },
    /// No decision possible on this pass; nothing was written.
    Skipped {
        reason: String,
    },
    /// Gone upstream; the deletion backup number when one was written.
    Deleted {
        version: Option<i64>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItem {
    pub workflow_id: Uuid,
    pub external_id: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub workflow_id: Option<Uuid>,
    pub external_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub created: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub results: Vec<SyncItem>,
    pub errors: Vec<ItemError>,
}

impl SyncReport {
    fn record(&mut self, workflow: &Workflow, outcome: GuardResult<SyncOutcome>) {
        self.total += 1;
        match outcome {
            Ok(outcome) => {
                match &outcome {
                    SyncOutcome::Created { .. } => self.created += 1,
                    SyncOutcome::Unchanged { .. } => self.unchanged += 1,
                    SyncOutcome::Skipped { .. } => self.skipped += 1,
                    SyncOutcome::Deleted { .. } => self.deleted += 1,
                }
                self.results.push(SyncItem {
                    workflow_id: workflow.id,
                    external_id: workflow.external_id.clone(),
                    outcome,
                });
            }
            Err(err) => {
                tracing::error!("❌ Sync failed for workflow {}: {}", workflow.id, err);
                self.errors.push(ItemError {
                    workflow_id: Some(workflow.id),
                    external_id: workflow.external_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    fn merge(&mut self, other: SyncReport) {
        self.total += other.total;
        self.created += other.created;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.results.extend(other.results);
        self.errors.extend(other.errors);
    }
}

/// One workflow in a bulk protection request.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectItem {
    #[serde(rename = "externalId", alias = "workflowId", alias = "id")]
    pub external_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtectedWorkflow {
    pub workflow: Workflow,
    pub latest_version: i64,
    /// False when the workflow was already protected.
    pub initial_version_created: bool,
    /// True when upstream could not be read and a minimal document was stored.
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProtectReport {
    pub success_count: usize,
    pub total: usize,
    pub protected: Vec<ProtectedWorkflow>,
    pub errors: Vec<ItemError>,
}

pub struct SyncService {
    manager: Arc<VersionManager>,
    source: Arc<dyn WorkflowSource>,
}

impl SyncService {
    pub fn new(manager: Arc<VersionManager>, source: Arc<dyn WorkflowSource>) -> Self {
        Self { manager, source }
    }

    pub fn manager(&self) -> &VersionManager {
        &self.manager
    }

    /// Fetch the current definition, `Err` carrying the skip reason.
    async fn fetch_current(&self, workflow: &Workflow) -> Result<Value, String> {
        match self
            .source
            .fetch_workflow(&workflow.owner_id, &workflow.external_id)
            .await
        {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => {
                tracing::warn!(
                    "⚠️ Upstream returned nothing for workflow {} (external {})",
                    workflow.id,
                    workflow.external_id
                );
                Err("upstream returned no document".to_string())
            }
            Err(err) => {
                tracing::warn!(
                    "⚠️ Upstream unavailable for workflow {} (external {}): {:#}",
                    workflow.id,
                    workflow.external_id,
                    err
                );
                Err(format!("upstream unavailable: {}", err))
            }
        }
    }

    /// Fetch, compare with the latest version and snapshot when changed.
    pub async fn sync_workflow(
        &self,
        workflow: &Workflow,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<SyncOutcome> {
        if workflow.is_deleted() {
            return Ok(SyncOutcome::Skipped {
                reason: "workflow is deleted".to_string(),
            });
        }

        match self.fetch_current(workflow).await {
            Ok(doc) => self.apply_document(workflow, doc, snapshot_type, actor).await,
            Err(reason) => Ok(SyncOutcome::Skipped { reason }),
        }
    }

    async fn apply_document(
        &self,
        workflow: &Workflow,
        doc: Value,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<SyncOutcome> {
        let latest = self.manager.latest_version(workflow.id).await?;
        let decision = detect_change(
            Some(&doc),
            latest.as_ref().map(|version| &version.data),
            self.manager.rules(),
        );

        if !decision.should_create_version() {
            let latest_version = latest.map(|version| version.version_number).unwrap_or(0);
            tracing::debug!(
                "✅ Workflow {} unchanged since version {}",
                workflow.id,
                latest_version
            );
            return Ok(SyncOutcome::Unchanged { latest_version });
        }

        self.refresh_name(workflow, &doc).await?;
        let version = self
            .manager
            .create_version(workflow.id, snapshot_type, actor, doc)
            .await?;
        tracing::info!(
            "🔄 Workflow {} changed upstream ({}), stored version {}",
            workflow.id,
            decision.as_str(),
            version.version_number
        );

        Ok(SyncOutcome::Created {
            version: version.summary(),
            decision,
        })
    }

    async fn refresh_name(&self, workflow: &Workflow, doc: &Value) -> GuardResult<()> {
        if let Some(name) = doc.get("name").and_then(Value::as_str) {
            if !name.is_empty() && name != workflow.name {
                self.manager
                    .storage()
                    .upsert_workflow(&workflow.owner_id, &workflow.external_id, name)
                    .await?;
            }
        }
        Ok(())
    }

    /// Sync every active workflow of one owner.
    ///
    /// Workflows missing from the upstream listing are confirmed with a
    /// direct fetch before they are treated as deleted. When the listing
    /// itself fails, deletion detection is skipped for this pass.
    pub async fn sync_owner(
        &self,
        owner_id: &str,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<SyncReport> {
        let workflows: Vec<Workflow> = self
            .manager
            .storage()
            .list_workflows_by_owner(owner_id)
            .await?
            .into_iter()
            .filter(|workflow| !workflow.is_deleted())
            .collect();

        let listed: Option<HashSet<String>> = match self.source.list_workflows(owner_id).await {
            Ok(items) => Some(items.iter().filter_map(external_id_of).collect()),
            Err(err) => {
                tracing::warn!(
                    "⚠️ Could not list upstream workflows for owner {}: {:#}",
                    owner_id,
                    err
                );
                None
            }
        };

        tracing::info!(
            "🔄 Syncing {} workflows for owner {}",
            workflows.len(),
            owner_id
        );

        let mut report = SyncReport::default();
        for workflow in &workflows {
            let missing = listed
                .as_ref()
                .is_some_and(|ids| !ids.contains(&workflow.external_id));

            let outcome = if missing {
                self.confirm_missing(workflow, snapshot_type, actor).await
            } else {
                self.sync_workflow(workflow, snapshot_type, actor).await
            };
            report.record(workflow, outcome);
        }

        tracing::info!(
            "📊 Owner {} sync: {} created, {} unchanged, {} skipped, {} deleted, {} errors",
            owner_id,
            report.created,
            report.unchanged,
            report.skipped,
            report.deleted,
            report.errors.len()
        );
        Ok(report)
    }

    /// Fetch a workflow believed gone: back it up and mark it deleted only
    /// when upstream confirms, sync it when it still exists.
    async fn confirm_missing(
        &self,
        workflow: &Workflow,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<SyncOutcome> {
        match self
            .source
            .fetch_workflow(&workflow.owner_id, &workflow.external_id)
            .await
        {
            Ok(None) => {
                let backup = self.manager.create_deletion_backup(workflow.id, actor).await?;
                Ok(SyncOutcome::Deleted {
                    version: backup.map(|version| version.version_number),
                })
            }
            Ok(Some(doc)) => self.apply_document(workflow, doc, snapshot_type, actor).await,
            Err(err) => {
                tracing::warn!(
                    "⚠️ Could not confirm deletion of workflow {}: {:#}",
                    workflow.id,
                    err
                );
                Ok(SyncOutcome::Skipped {
                    reason: format!("upstream unavailable: {}", err),
                })
            }
        }
    }

    /// Sync every active workflow across owners (background job).
    pub async fn sync_all_active(
        &self,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<SyncReport> {
        let mut owners: BTreeMap<String, usize> = BTreeMap::new();
        for workflow in self.manager.storage().list_active_workflows().await? {
            *owners.entry(workflow.owner_id).or_default() += 1;
        }

        let mut report = SyncReport::default();
        for owner_id in owners.keys() {
            match self.sync_owner(owner_id, snapshot_type, actor).await {
                Ok(owner_report) => report.merge(owner_report),
                Err(err) => {
                    tracing::error!("❌ Sync failed for owner {}: {}", owner_id, err);
                    report.errors.push(ItemError {
                        workflow_id: None,
                        external_id: String::new(),
                        error: format!("owner {}: {}", owner_id, err),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Sync the workflow an upstream event refers to.
    pub async fn sync_external(
        &self,
        owner_id: &str,
        external_id: &str,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<(Workflow, SyncOutcome)> {
        let workflow = self.find_external(owner_id, external_id).await?;
        let outcome = self.sync_workflow(&workflow, snapshot_type, actor).await?;
        Ok((workflow, outcome))
    }

    /// Handle an upstream deletion notice.
    ///
    /// The notice is confirmed with a fetch first. A workflow that still
    /// exists is synced with `snapshot_type` instead of being deleted.
    pub async fn handle_external_deletion(
        &self,
        owner_id: &str,
        external_id: &str,
        snapshot_type: SnapshotType,
        actor: &str,
    ) -> GuardResult<(Workflow, SyncOutcome)> {
        let workflow = self.find_external(owner_id, external_id).await?;
        if workflow.is_deleted() {
            return Ok((workflow, SyncOutcome::Deleted { version: None }));
        }

        let outcome = self.confirm_missing(&workflow, snapshot_type, actor).await?;
        Ok((workflow, outcome))
    }

    async fn find_external(&self, owner_id: &str, external_id: &str) -> GuardResult<Workflow> {
        self.manager
            .storage()
            .find_by_external_id(owner_id, external_id)
            .await?
            .ok_or_else(|| GuardError::WorkflowNotFound(external_id.to_string()))
    }

    /// Bulk protection with per-item results.
    pub async fn protect_workflows(
        &self,
        owner_id: &str,
        items: &[ProtectItem],
        actor: &str,
    ) -> ProtectReport {
        let mut report = ProtectReport {
            total: items.len(),
            ..ProtectReport::default()
        };

        for item in items {
            match self.protect_one(owner_id, item, actor).await {
                Ok(protected) => {
                    report.success_count += 1;
                    report.protected.push(protected);
                }
                Err(err) => {
                    tracing::error!(
                        "❌ Failed to protect workflow {} for owner {}: {}",
                        item.external_id,
                        owner_id,
                        err
                    );
                    report.errors.push(ItemError {
                        workflow_id: None,
                        external_id: item.external_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "🛡️ Protected {}/{} workflows for owner {}",
            report.success_count,
            report.total,
            owner_id
        );
        report
    }

    async fn protect_one(
        &self,
        owner_id: &str,
        item: &ProtectItem,
        actor: &str,
    ) -> GuardResult<ProtectedWorkflow> {
        let external_id = item.external_id.trim();
        if external_id.is_empty() {
            return Err(GuardError::Validation("workflow id must not be empty".to_string()));
        }

        let (doc, used_fallback) = match self.source.fetch_workflow(owner_id, external_id).await {
            Ok(Some(doc)) => (doc, false),
            Ok(None) => {
                tracing::warn!(
                    "⚠️ Upstream has no workflow {}; protecting with local data",
                    external_id
                );
                (minimal_document(external_id, item.name.as_deref()), true)
            }
            Err(err) => {
                tracing::warn!(
                    "⚠️ Upstream unavailable while protecting {}: {:#}; using local data",
                    external_id,
                    err
                );
                (minimal_document(external_id, item.name.as_deref()), true)
            }
        };

        let name = item
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| doc.get("name").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Workflow {}", external_id));

        let existing = self
            .manager
            .storage()
            .find_by_external_id(owner_id, external_id)
            .await?;
        if let Some(workflow) = existing.filter(Workflow::is_deleted) {
            return self.reprotect_deleted(workflow, doc, used_fallback, actor).await;
        }

        let registration = self
            .manager
            .register_workflow(
                owner_id,
                external_id,
                &name,
                NewVersion {
                    snapshot_type: SnapshotType::InitialProtection,
                    created_by: actor.to_string(),
                    data: doc,
                },
            )
            .await?;

        Ok(ProtectedWorkflow {
            workflow: registration.workflow,
            latest_version: registration.latest_version,
            initial_version_created: registration.initial_version.is_some(),
            used_fallback,
        })
    }

    /// A protected workflow that was deleted and exists upstream again is
    /// reactivated with a restoration version.
    async fn reprotect_deleted(
        &self,
        workflow: Workflow,
        doc: Value,
        used_fallback: bool,
        actor: &str,
    ) -> GuardResult<ProtectedWorkflow> {
        if used_fallback {
            return Err(GuardError::Validation(format!(
                "workflow {} is deleted and not available upstream; restore it first",
                workflow.external_id
            )));
        }

        let version = self
            .manager
            .record_restoration(workflow.id, &workflow.external_id, doc, actor)
            .await?;
        tracing::info!(
            "🛡️ Workflow {} reappeared upstream; reactivated as version {}",
            workflow.id,
            version.version_number
        );

        Ok(ProtectedWorkflow {
            workflow: self.manager.require_workflow(workflow.id).await?,
            latest_version: version.version_number,
            initial_version_created: false,
            used_fallback,
        })
    }

    /// Store a caller-provided definition when it differs from the latest.
    pub async fn manual_save(
        &self,
        workflow_id: Uuid,
        payload: Value,
        actor: &str,
    ) -> GuardResult<SyncOutcome> {
        if !payload.is_object() {
            return Err(GuardError::Validation(
                "workflow definition must be a JSON object".to_string(),
            ));
        }
        let workflow = self.manager.require_workflow(workflow_id).await?;
        if workflow.is_deleted() {
            return Err(GuardError::workflow_deleted(workflow_id));
        }

        self.apply_document(&workflow, payload, SnapshotType::ManualSave, actor)
            .await
    }

    /// Recreate a deleted workflow upstream from its latest stored version.
    pub async fn restore_deleted_workflow(
        &self,
        workflow_id: Uuid,
        actor: &str,
    ) -> GuardResult<WorkflowVersion> {
        let workflow = self.manager.require_workflow(workflow_id).await?;
        if !workflow.is_deleted() {
            return Err(GuardError::Validation(format!(
                "workflow {} is not deleted",
                workflow_id
            )));
        }
        let latest = self
            .manager
            .latest_version(workflow_id)
            .await?
            .ok_or(GuardError::NoVersions(workflow_id))?;

        let new_external_id = self
            .source
            .create_workflow(&workflow.owner_id, &latest.data)
            .await
            .map_err(|err| GuardError::Upstream(format!("{:#}", err)))?;

        // Prefer the definition as upstream now reports it.
        let data = match self
            .source
            .fetch_workflow(&workflow.owner_id, &new_external_id)
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) | Err(_) => latest.data,
        };

        let version = self
            .manager
            .record_restoration(workflow_id, &new_external_id, data, actor)
            .await?;
        tracing::info!(
            "🔁 Workflow {} recreated upstream as {} (version {})",
            workflow_id,
            new_external_id,
            version.version_number
        );
        Ok(version)
    }
}

fn minimal_document(external_id: &str, name: Option<&str>) -> Value {
    json!({
        "id": external_id,
        "name": name.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compare::ComparisonRules, hubspot::testing::InMemorySource,
        workflow::storage::test_support::temp_storage, workflow::types::SYSTEM_ACTOR,
    };
    use tempfile::TempDir;

    struct Fixture {
        service: SyncService,
        source: Arc<InMemorySource>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let (storage, dir) = temp_storage().await;
        let manager = Arc::new(VersionManager::new(
            storage,
            Arc::new(ComparisonRules::default()),
            5,
        ));
        let source = Arc::new(InMemorySource::new());
        Fixture {
            service: SyncService::new(manager, source.clone()),
            source,
            _dir: dir,
        }
    }

    fn item(external_id: &str) -> ProtectItem {
        ProtectItem {
            external_id: external_id.to_string(),
            name: None,
        }
    }

    async fn protect(fx: &Fixture, external_id: &str) -> Workflow {
        let report = fx
            .service
            .protect_workflows("owner", &[item(external_id)], "u1")
            .await;
        assert_eq!(report.success_count, 1, "{:?}", report.errors);
        report.protected[0].workflow.clone()
    }

    #[tokio::test]
    async fn protect_creates_initial_version_once() {
        let fx = fixture().await;
        fx.source.put("101", json!({ "id": 101, "name": "Welcome", "actions": [] }));

        let first = fx.service.protect_workflows("owner", &[item("101")], "u1").await;
        assert_eq!(first.total, 1);
        assert!(first.protected[0].initial_version_created);
        assert!(!first.protected[0].used_fallback);
        assert_eq!(first.protected[0].workflow.name, "Welcome");

        let again = fx.service.protect_workflows("owner", &[item("101")], "u1").await;
        assert!(!again.protected[0].initial_version_created);
        assert_eq!(again.protected[0].latest_version, 1);

        let audit = fx
            .service
            .manager()
            .audit_trail(first.protected[0].workflow.id)
            .await
            .unwrap();
        let actions: Vec<&str> = audit.iter().map(|entry| entry.action.as_str()).collect();
        assert!(actions.contains(&"workflow_protected"));
        assert!(actions.contains(&"version_created"));
    }

    #[tokio::test]
    async fn protect_falls_back_to_minimal_document_when_upstream_fails() {
        let fx = fixture().await;
        fx.source.set_unavailable(true);

        let report = fx
            .service
            .protect_workflows(
                "owner",
                &[ProtectItem {
                    external_id: "7".to_string(),
                    name: Some("Local name".to_string()),
                }],
                "u1",
            )
            .await;
        assert_eq!(report.success_count, 1);
        assert!(report.protected[0].used_fallback);

        let latest = fx
            .service
            .manager()
            .latest_version(report.protected[0].workflow.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.data, json!({ "id": "7", "name": "Local name" }));
        assert_eq!(latest.snapshot_type, SnapshotType::InitialProtection);
    }

    #[tokio::test]
    async fn protect_reports_partial_failures() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "One" }));
        fx.source.put("2", json!({ "id": 2, "name": "Two" }));

        let report = fx
            .service
            .protect_workflows("owner", &[item("1"), item("  "), item("2")], "u1")
            .await;
        assert_eq!(report.total, 3);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].error.contains("must not be empty"));
    }

    #[tokio::test]
    async fn identical_document_reports_unchanged() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A", "actions": [], "updatedAt": 1 }));
        let workflow = protect(&fx, "1").await;

        // Only a volatile field moved.
        fx.source.put("1", json!({ "updatedAt": 2, "actions": [], "name": "A", "id": 1 }));
        let outcome = fx
            .service
            .sync_workflow(&workflow, SnapshotType::ManualSync, "u1")
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Unchanged { latest_version: 1 }));
        assert_eq!(
            fx.service.manager().storage().count_versions(workflow.id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn structural_change_creates_version() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A", "actions": [] }));
        let workflow = protect(&fx, "1").await;

        fx.source.put(
            "1",
            json!({ "id": 1, "name": "A", "actions": [{ "id": "x", "type": "EMAIL" }] }),
        );
        let outcome = fx
            .service
            .sync_workflow(&workflow, SnapshotType::ManualSync, "u1")
            .await
            .unwrap();
        let SyncOutcome::Created { version, decision } = outcome else {
            panic!("expected a new version");
        };
        assert_eq!(version.version_number, 2);
        assert_eq!(version.snapshot_type, SnapshotType::ManualSync);
        assert_eq!(decision, ChangeDecision::StructuralChange);
    }

    #[tokio::test]
    async fn upstream_failure_skips_without_writing() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let workflow = protect(&fx, "1").await;

        fx.source.set_unavailable(true);
        let outcome = fx
            .service
            .sync_workflow(&workflow, SnapshotType::ManualSync, "u1")
            .await
            .unwrap();
        let SyncOutcome::Skipped { reason } = outcome else {
            panic!("expected a skip");
        };
        assert!(reason.contains("upstream unavailable"));
        assert_eq!(
            fx.service.manager().storage().count_versions(workflow.id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn owner_sync_detects_deletion_and_continues() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "Kept", "enabled": true }));
        fx.source.put("2", json!({ "id": 2, "name": "Gone" }));
        let kept = protect(&fx, "1").await;
        let gone = protect(&fx, "2").await;

        fx.source.remove("2");
        fx.source.put("1", json!({ "id": 1, "name": "Kept", "enabled": false }));

        let report = fx
            .service
            .sync_owner("owner", SnapshotType::SystemBackup, SYSTEM_ACTOR)
            .await
            .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 1);
        assert!(report.errors.is_empty());

        let storage = fx.service.manager().storage();
        assert!(storage.get_workflow(gone.id).await.unwrap().unwrap().is_deleted());
        let backup = storage.latest_version(gone.id).await.unwrap().unwrap();
        assert_eq!(backup.snapshot_type, SnapshotType::DeletionBackup);

        let latest = storage.latest_version(kept.id).await.unwrap().unwrap();
        assert_eq!(latest.snapshot_type, SnapshotType::SystemBackup);
        assert_eq!(latest.created_by, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn listing_failure_skips_every_workflow() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        fx.source.put("2", json!({ "id": 2, "name": "B" }));
        protect(&fx, "1").await;
        protect(&fx, "2").await;

        fx.source.set_unavailable(true);
        let report = fx
            .service
            .sync_all_active(SnapshotType::SystemBackup, SYSTEM_ACTOR)
            .await
            .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn manual_save_only_when_different() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let workflow = protect(&fx, "1").await;

        let same = fx
            .service
            .manual_save(workflow.id, json!({ "name": "A" }), "u1")
            .await
            .unwrap();
        assert!(matches!(same, SyncOutcome::Unchanged { .. }));

        let changed = fx
            .service
            .manual_save(workflow.id, json!({ "name": "B" }), "u1")
            .await
            .unwrap();
        let SyncOutcome::Created { version, .. } = changed else {
            panic!("expected a new version");
        };
        assert_eq!(version.snapshot_type, SnapshotType::ManualSave);

        let err = fx
            .service
            .manual_save(workflow.id, json!([1, 2]), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
    }

    #[tokio::test]
    async fn deleted_workflow_is_recreated_upstream() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A", "actions": [] }));
        let workflow = protect(&fx, "1").await;

        fx.source.remove("1");
        let (_, outcome) = fx
            .service
            .handle_external_deletion("owner", "1", SnapshotType::Webhook, SYSTEM_ACTOR)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Deleted { version: Some(2) }));

        let version = fx
            .service
            .restore_deleted_workflow(workflow.id, "u1")
            .await
            .unwrap();
        assert_eq!(version.snapshot_type, SnapshotType::Restoration);
        assert_eq!(version.version_number, 3);

        let restored = fx
            .service
            .manager()
            .require_workflow(workflow.id)
            .await
            .unwrap();
        assert!(!restored.is_deleted());
        assert_eq!(restored.external_id, "9000");
        assert_eq!(fx.source.get("9000").unwrap()["name"], json!("A"));
    }

    #[tokio::test]
    async fn restore_requires_deleted_workflow() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let workflow = protect(&fx, "1").await;

        let err = fx
            .service
            .restore_deleted_workflow(workflow.id, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
    }

    #[tokio::test]
    async fn external_event_for_unknown_workflow_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .service
            .sync_external("owner", "404", SnapshotType::Webhook, SYSTEM_ACTOR)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deletion_notice_for_live_workflow_syncs_instead() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A", "enabled": true }));
        let workflow = protect(&fx, "1").await;

        fx.source.put("1", json!({ "id": 1, "name": "A", "enabled": false }));
        let (_, outcome) = fx
            .service
            .handle_external_deletion("owner", "1", SnapshotType::Webhook, SYSTEM_ACTOR)
            .await
            .unwrap();
        let SyncOutcome::Created { version, .. } = outcome else {
            panic!("expected a webhook sync");
        };
        assert_eq!(version.snapshot_type, SnapshotType::Webhook);

        let stored = fx.service.manager().require_workflow(workflow.id).await.unwrap();
        assert!(!stored.is_deleted());
        let later = fx
            .service
            .sync_workflow(&stored, SnapshotType::ManualSync, "u1")
            .await
            .unwrap();
        assert!(matches!(later, SyncOutcome::Unchanged { latest_version: 2 }));
    }

    #[tokio::test]
    async fn deletion_notice_is_skipped_when_upstream_unavailable() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let workflow = protect(&fx, "1").await;

        fx.source.set_unavailable(true);
        let (_, outcome) = fx
            .service
            .handle_external_deletion("owner", "1", SnapshotType::Webhook, SYSTEM_ACTOR)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
        assert!(!fx
            .service
            .manager()
            .require_workflow(workflow.id)
            .await
            .unwrap()
            .is_deleted());
    }

    #[tokio::test]
    async fn reprotecting_deleted_workflow_reactivates_it() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let workflow = protect(&fx, "1").await;
        fx.source.remove("1");
        fx.service
            .handle_external_deletion("owner", "1", SnapshotType::Webhook, SYSTEM_ACTOR)
            .await
            .unwrap();

        // Still gone upstream: reported as an item error.
        let report = fx.service.protect_workflows("owner", &[item("1")], "u1").await;
        assert_eq!(report.success_count, 0);
        assert!(report.errors[0].error.contains("is deleted"));

        fx.source.put("1", json!({ "id": 1, "name": "A", "enabled": true }));
        let report = fx.service.protect_workflows("owner", &[item("1")], "u1").await;
        assert_eq!(report.success_count, 1, "{:?}", report.errors);
        let protected = &report.protected[0];
        assert!(!protected.workflow.is_deleted());
        assert_eq!(protected.latest_version, 3);

        let storage = fx.service.manager().storage();
        let latest = storage.latest_version(workflow.id).await.unwrap().unwrap();
        assert_eq!(latest.snapshot_type, SnapshotType::Restoration);
        assert_eq!(latest.data, json!({ "id": 1, "name": "A", "enabled": true }));
        let active = storage.list_active_workflows().await.unwrap();
        assert!(active.iter().any(|candidate| candidate.id == workflow.id));
    }

    #[tokio::test]
    async fn failed_protection_leaves_no_partial_rows() {
        let fx = fixture().await;
        fx.source.put("1", json!({ "id": 1, "name": "A" }));
        let storage = fx.service.manager().storage();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_versions BEFORE INSERT ON workflow_versions
            BEGIN
                SELECT RAISE(ABORT, 'versions rejected');
            END
            "#,
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let report = fx.service.protect_workflows("owner", &[item("1")], "u1").await;
        assert_eq!(report.success_count, 0);
        assert_eq!(report.errors.len(), 1);

        assert!(storage.find_by_external_id("owner", "1").await.unwrap().is_none());
        let audit_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(audit_rows, 0);
    }
}
