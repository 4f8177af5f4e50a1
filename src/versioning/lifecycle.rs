//! Version lifecycle manager
//!
//! Every operation appends: rollback and restore copy an older payload into
//! a new version instead of rewinding the counter. Version numbers are
//! allocated by storage inside the insert transaction; lost races are
//! retried here with a bounded number of attempts.

use crate::{
    compare::{diff, ComparisonRules, WorkflowDiff},
    error::{is_retryable_conflict, GuardError, GuardResult},
    workflow::{
        storage::{Registration, WorkflowStorage, WorkflowUpdate},
        types::{
            AuditAction, AuditLogEntry, AuditRecord, NewVersion, SnapshotType, VersionRef,
            VersionSummary, Workflow, WorkflowVersion, SYSTEM_ACTOR,
        },
    },
};
use serde::Serialize;
use serde_json::{json, Value};
use std::{future::Future, sync::Arc, time::Duration};
use uuid::Uuid;

/// Result of a rollback request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// A new version copying the preceding version's payload was appended.
    RolledBack {
        version: WorkflowVersion,
        restored_from: i64,
    },
    /// Only one version exists; nothing was written.
    AlreadyAtEarliest { current_version: i64 },
}

/// Two stored versions and the structural diff between them.
#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub workflow_id: Uuid,
    pub from: VersionSummary,
    pub to: VersionSummary,
    pub has_changes: bool,
    pub diff: WorkflowDiff,
}

#[derive(Debug, Clone)]
pub struct VersionManager {
    storage: WorkflowStorage,
    rules: Arc<ComparisonRules>,
    max_retries: u32,
}

impl VersionManager {
    pub fn new(storage: WorkflowStorage, rules: Arc<ComparisonRules>, max_retries: u32) -> Self {
        Self {
            storage,
            rules,
            max_retries: max_retries.max(1),
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    pub fn rules(&self) -> &ComparisonRules {
        &self.rules
    }

    pub async fn require_workflow(&self, workflow_id: Uuid) -> GuardResult<Workflow> {
        self.storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| GuardError::WorkflowNotFound(workflow_id.to_string()))
    }

    pub async fn latest_version(&self, workflow_id: Uuid) -> GuardResult<Option<WorkflowVersion>> {
        self.storage.latest_version(workflow_id).await
    }

    async fn require_latest(&self, workflow_id: Uuid) -> GuardResult<WorkflowVersion> {
        self.storage
            .latest_version(workflow_id)
            .await?
            .ok_or(GuardError::NoVersions(workflow_id))
    }

    /// Append a version with the audit action implied by its snapshot type.
    pub async fn create_version(
        &self,
        workflow_id: Uuid,
        snapshot_type: SnapshotType,
        created_by: &str,
        data: Value,
    ) -> GuardResult<WorkflowVersion> {
        self.require_workflow(workflow_id).await?;
        self.append_live(
            workflow_id,
            NewVersion {
                snapshot_type,
                created_by: created_by.to_string(),
                data,
            },
            AuditRecord::new(AuditAction::for_snapshot(snapshot_type)),
            WorkflowUpdate::None,
        )
        .await
    }

    /// Register a workflow for protection with its initial version.
    pub async fn register_workflow(
        &self,
        owner_id: &str,
        external_id: &str,
        name: &str,
        initial: NewVersion,
    ) -> GuardResult<Registration> {
        let registration = self
            .with_retries(external_id, || {
                self.storage
                    .register_workflow(owner_id, external_id, name, &initial)
            })
            .await?;

        if let Some(version) = &registration.initial_version {
            tracing::info!(
                "📸 Created version {} ({}) for workflow {}",
                version.version_number,
                version.snapshot_type,
                registration.workflow.id
            );
        }
        Ok(registration)
    }

    /// Insert a version; `None` only when `MarkDeleted` finds the marker set.
    async fn append(
        &self,
        workflow_id: Uuid,
        new_version: NewVersion,
        audit: AuditRecord,
        update: WorkflowUpdate,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let inserted = self
            .with_retries(&workflow_id.to_string(), || {
                self.storage
                    .insert_version(workflow_id, &new_version, &audit, &update)
            })
            .await?;

        if let Some(version) = &inserted {
            tracing::info!(
                "📸 Created version {} ({}) for workflow {}",
                version.version_number,
                version.snapshot_type,
                workflow_id
            );
        }
        Ok(inserted)
    }

    /// Append a version to a workflow that must not be deleted.
    async fn append_live(
        &self,
        workflow_id: Uuid,
        new_version: NewVersion,
        audit: AuditRecord,
        update: WorkflowUpdate,
    ) -> GuardResult<WorkflowVersion> {
        self.append(workflow_id, new_version, audit, update)
            .await?
            .ok_or_else(|| GuardError::workflow_deleted(workflow_id))
    }

    /// Run a write with bounded retries on version-number races.
    async fn with_retries<T, F, Fut>(&self, target: &str, mut write: F) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        for attempt in 1..=self.max_retries {
            match write().await {
                Err(GuardError::Database(err)) if is_retryable_conflict(&err) => {
                    tracing::warn!(
                        "🔁 Version number race on workflow {} (attempt {}/{}): {}",
                        target,
                        attempt,
                        self.max_retries,
                        err
                    );
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }

        tracing::error!(
            "❌ Gave up allocating a version number for workflow {} after {} attempts",
            target,
            self.max_retries
        );
        Err(GuardError::VersionConflict {
            workflow_id: target.to_string(),
            attempts: self.max_retries,
        })
    }

    /// Live workflow or a validation error if it is soft-deleted.
    async fn require_live_workflow(&self, workflow_id: Uuid) -> GuardResult<Workflow> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.is_deleted() {
            return Err(GuardError::workflow_deleted(workflow_id));
        }
        Ok(workflow)
    }

    /// Revert to the version preceding the latest one.
    pub async fn rollback_workflow(&self, workflow_id: Uuid, actor: &str) -> GuardResult<RollbackOutcome> {
        self.require_live_workflow(workflow_id).await?;
        let latest = self.require_latest(workflow_id).await?;

        let Some(previous) = self
            .storage
            .version_before(workflow_id, latest.version_number)
            .await?
        else {
            tracing::info!(
                "⏮️ Workflow {} already at earliest version {}",
                workflow_id,
                latest.version_number
            );
            return Ok(RollbackOutcome::AlreadyAtEarliest {
                current_version: latest.version_number,
            });
        };

        let audit = AuditRecord::new(AuditAction::Rollback)
            .with_old(json!({
                "versionId": latest.id,
                "versionNumber": latest.version_number,
            }))
            .with_new(json!({
                "restoredFromVersionId": previous.id,
                "restoredFromVersion": previous.version_number,
            }));

        let version = self
            .append_live(
                workflow_id,
                NewVersion {
                    snapshot_type: SnapshotType::Rollback,
                    created_by: actor.to_string(),
                    data: previous.data.clone(),
                },
                audit,
                WorkflowUpdate::None,
            )
            .await?;

        tracing::info!(
            "⏪ Rolled back workflow {} to the payload of version {} (new version {})",
            workflow_id,
            previous.version_number,
            version.version_number
        );

        Ok(RollbackOutcome::RolledBack {
            version,
            restored_from: previous.version_number,
        })
    }

    /// Resolve a caller-supplied reference to a stored version of this workflow.
    pub async fn resolve_version(
        &self,
        workflow_id: Uuid,
        reference: VersionRef,
    ) -> GuardResult<WorkflowVersion> {
        let found = match reference {
            VersionRef::Id(id) => self.storage.get_version_by_id(workflow_id, id).await?,
            VersionRef::Number(number) => {
                self.storage.get_version_by_number(workflow_id, number).await?
            }
        };

        found.ok_or_else(|| GuardError::VersionNotFound {
            workflow_id,
            reference: reference.to_string(),
        })
    }

    /// Append a copy of any historical version.
    pub async fn restore_workflow_version(
        &self,
        workflow_id: Uuid,
        reference: VersionRef,
        actor: &str,
    ) -> GuardResult<WorkflowVersion> {
        self.require_live_workflow(workflow_id).await?;
        let source = self.resolve_version(workflow_id, reference).await?;
        let latest = self.require_latest(workflow_id).await?;

        let audit = AuditRecord::new(AuditAction::Restore)
            .with_old(json!({
                "versionId": latest.id,
                "versionNumber": latest.version_number,
            }))
            .with_new(json!({
                "restoredFromVersionId": source.id,
                "restoredFromVersion": source.version_number,
            }));

        let version = self
            .append_live(
                workflow_id,
                NewVersion {
                    snapshot_type: SnapshotType::Restore,
                    created_by: actor.to_string(),
                    data: source.data.clone(),
                },
                audit,
                WorkflowUpdate::None,
            )
            .await?;

        tracing::info!(
            "♻️ Restored workflow {} from version {} as version {}",
            workflow_id,
            source.version_number,
            version.version_number
        );
        Ok(version)
    }

    /// Verbatim checkpoint of the latest version.
    pub async fn create_automated_backup(&self, workflow_id: Uuid) -> GuardResult<WorkflowVersion> {
        self.require_live_workflow(workflow_id).await?;
        let latest = self.require_latest(workflow_id).await?;

        self.append_live(
            workflow_id,
            NewVersion {
                snapshot_type: SnapshotType::AutoBackup,
                created_by: SYSTEM_ACTOR.to_string(),
                data: latest.data,
            },
            AuditRecord::new(AuditAction::VersionCreated)
                .with_new(json!({ "copiedFromVersion": latest.version_number })),
            WorkflowUpdate::None,
        )
        .await
    }

    /// Preserve the latest payload, then soft-delete the workflow.
    ///
    /// The delete marker and the backup are written in one transaction, and
    /// only by the caller that sets the marker. Concurrent or repeated
    /// notifications return `None`. A workflow with no history is only marked.
    pub async fn create_deletion_backup(
        &self,
        workflow_id: Uuid,
        actor: &str,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let workflow = self.require_workflow(workflow_id).await?;
        if workflow.is_deleted() {
            tracing::debug!("⏭️ Workflow {} already marked deleted", workflow_id);
            return Ok(None);
        }

        let Some(latest) = self.storage.latest_version(workflow_id).await? else {
            tracing::warn!(
                "⚠️ Workflow {} deleted upstream before any version was stored",
                workflow_id
            );
            self.with_retries(&workflow_id.to_string(), || {
                self.storage.mark_workflow_deleted(workflow_id, actor)
            })
            .await?;
            return Ok(None);
        };

        let backup = self
            .append(
                workflow_id,
                NewVersion {
                    snapshot_type: SnapshotType::DeletionBackup,
                    created_by: actor.to_string(),
                    data: latest.data,
                },
                AuditRecord::new(AuditAction::Deletion).with_new(json!({
                    "externalId": workflow.external_id,
                    "copiedFromVersion": latest.version_number,
                })),
                WorkflowUpdate::MarkDeleted,
            )
            .await?;

        match &backup {
            Some(version) => tracing::info!(
                "🗑️ Workflow {} deleted upstream; preserved as version {}",
                workflow_id,
                version.version_number
            ),
            None => tracing::debug!("⏭️ Workflow {} was marked deleted concurrently", workflow_id),
        }
        Ok(backup)
    }

    /// Record that a deleted workflow was recreated upstream under a new id.
    pub async fn record_restoration(
        &self,
        workflow_id: Uuid,
        new_external_id: &str,
        data: Value,
        actor: &str,
    ) -> GuardResult<WorkflowVersion> {
        let workflow = self.require_workflow(workflow_id).await?;

        self.append_live(
            workflow_id,
            NewVersion {
                snapshot_type: SnapshotType::Restoration,
                created_by: actor.to_string(),
                data,
            },
            AuditRecord::new(AuditAction::Restoration)
                .with_old(json!({ "externalId": workflow.external_id }))
                .with_new(json!({ "externalId": new_external_id })),
            WorkflowUpdate::Reactivate {
                external_id: new_external_id.to_string(),
            },
        )
        .await
    }

    /// Structural diff going from `from` to `to`.
    pub async fn compare_versions(
        &self,
        workflow_id: Uuid,
        from: VersionRef,
        to: VersionRef,
    ) -> GuardResult<VersionComparison> {
        self.require_workflow(workflow_id).await?;
        let from = self.resolve_version(workflow_id, from).await?;
        let to = self.resolve_version(workflow_id, to).await?;

        let diff = diff(&from.data, &to.data, &self.rules);
        Ok(VersionComparison {
            workflow_id,
            from: from.summary(),
            to: to.summary(),
            has_changes: !diff.is_empty(),
            diff,
        })
    }

    pub async fn list_versions(&self, workflow_id: Uuid) -> GuardResult<Vec<VersionSummary>> {
        self.require_workflow(workflow_id).await?;
        self.storage.list_versions(workflow_id).await
    }

    pub async fn audit_trail(&self, workflow_id: Uuid) -> GuardResult<Vec<AuditLogEntry>> {
        self.require_workflow(workflow_id).await?;
        self.storage.list_audit_entries(workflow_id).await
    }
}
