//! SQLite persistence layer for protected workflows
//!
//! Handles workflow rows, immutable version snapshots and the audit trail.
//! Version payloads are stored as JSON text; lookup columns stay structured.
//! A version row and its audit entry are always written in one transaction.

use crate::{
    error::GuardResult,
    workflow::types::{
        AuditAction, AuditLogEntry, AuditRecord, NewVersion, VersionSummary, Workflow,
        WorkflowStatus, WorkflowVersion,
    },
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
        SqliteRow,
    },
    Row,
};
use std::{path::Path, str::FromStr, time::Duration};
use uuid::Uuid;

const WORKFLOW_COLUMNS: &str =
    "id, owner_id, external_id, name, status, deleted_at, created_at, updated_at";
const VERSION_COLUMNS: &str =
    "id, workflow_id, version_number, snapshot_type, created_by, created_at, data";

/// Change applied to the workflow row in the same transaction as a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowUpdate {
    None,
    /// Soft-delete; the version is only written if this call set the marker
    MarkDeleted,
    /// Clear the delete marker and point at the recreated upstream workflow
    Reactivate { external_id: String },
}

/// Result of registering a workflow for protection.
#[derive(Debug, Clone)]
pub struct Registration {
    pub workflow: Workflow,
    pub created: bool,
    /// Highest stored version number, 0 when there is none
    pub latest_version: i64,
    /// Set when this registration wrote the initial version
    pub initial_version: Option<WorkflowVersion>,
}

/// SQLite-based storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl WorkflowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and initialize the schema.
    pub async fn connect(path: &Path, max_connections: u32) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory '{}'", parent.display())
            })?;
        }

        tracing::info!("🗄️ Opening workflow database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database '{}'", path.display()))?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> GuardResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                deleted_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                UNIQUE (owner_id, external_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_versions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                version_number INTEGER NOT NULL,
                snapshot_type TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                data JSON NOT NULL,
                UNIQUE (workflow_id, version_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Payloads are written once; every change is a new row.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS workflow_versions_immutable
            BEFORE UPDATE ON workflow_versions
            BEGIN
                SELECT RAISE(ABORT, 'workflow versions are immutable');
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                old_value JSON,
                new_value JSON,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_owner ON workflows(owner_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_workflow ON audit_logs(workflow_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- Workflows --

    /// Insert a workflow or refresh the name of the existing one.
    ///
    /// Returns the row and whether it was newly created.
    pub async fn upsert_workflow(
        &self,
        owner_id: &str,
        external_id: &str,
        name: &str,
    ) -> GuardResult<(Workflow, bool)> {
        let mut conn = self.pool.acquire().await?;
        Ok(upsert_in(&mut conn, owner_id, external_id, name, Utc::now()).await?)
    }

    /// Upsert the workflow, audit its first protection and store the initial
    /// version when it has none, all in one transaction.
    ///
    /// A soft-deleted row is returned untouched apart from its name.
    pub async fn register_workflow(
        &self,
        owner_id: &str,
        external_id: &str,
        name: &str,
        initial: &NewVersion,
    ) -> GuardResult<Registration> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let (workflow, created) = upsert_in(&mut tx, owner_id, external_id, name, now).await?;
        if created {
            let audit = AuditRecord::new(AuditAction::WorkflowProtected)
                .with_new(json!({ "externalId": external_id, "name": name }));
            insert_audit_in(
                &mut tx,
                workflow.id,
                &initial.created_by,
                &audit,
                "workflow",
                &workflow.id.to_string(),
                audit.new_value.clone(),
                now,
            )
            .await?;
        }

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version_number) FROM workflow_versions WHERE workflow_id = ?")
                .bind(workflow.id.to_string())
                .fetch_one(&mut *tx)
                .await?;

        let (latest_version, initial_version) = match latest {
            Some(number) => (number, None),
            None if workflow.is_deleted() => (0, None),
            None => {
                let audit = AuditRecord::new(AuditAction::for_snapshot(initial.snapshot_type));
                let version = insert_version_in(&mut tx, workflow.id, initial, &audit, now).await?;
                (version.version_number, Some(version))
            }
        };

        tx.commit().await?;

        Ok(Registration {
            workflow,
            created,
            latest_version,
            initial_version,
        })
    }

    pub async fn get_workflow(&self, id: Uuid) -> GuardResult<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(workflow_from_row).transpose()?)
    }

    /// Workflow by id, only if owned by `owner_id`.
    pub async fn get_owned_workflow(&self, id: Uuid, owner_id: &str) -> GuardResult<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ? AND owner_id = ?"
        ))
        .bind(id.to_string())
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(workflow_from_row).transpose()?)
    }

    pub async fn find_by_external_id(
        &self,
        owner_id: &str,
        external_id: &str,
    ) -> GuardResult<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE owner_id = ? AND external_id = ?"
        ))
        .bind(owner_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(workflow_from_row).transpose()?)
    }

    /// All workflows of an owner, newest first.
    pub async fn list_workflows_by_owner(&self, owner_id: &str) -> GuardResult<Vec<Workflow>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(workflow_from_row).collect::<Result<_, _>>()?)
    }

    /// Every non-deleted workflow across owners (background jobs).
    pub async fn list_active_workflows(&self) -> GuardResult<Vec<Workflow>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE status = 'active' AND deleted_at IS NULL ORDER BY rowid"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(workflow_from_row).collect::<Result<_, _>>()?)
    }

    /// Soft-delete a workflow that has no version to back up.
    ///
    /// Returns false when the workflow was already marked deleted; no audit
    /// entry is written then.
    pub async fn mark_workflow_deleted(&self, workflow_id: Uuid, user_id: &str) -> GuardResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if !mark_deleted_in(&mut tx, workflow_id, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit_in(
            &mut tx,
            workflow_id,
            user_id,
            &AuditRecord::new(AuditAction::Deletion),
            "workflow",
            &workflow_id.to_string(),
            Some(json!({ "backup": false })),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // -- Versions --

    /// Append a version, its audit entry and an optional workflow update as
    /// one unit.
    ///
    /// The version number is computed inside the INSERT itself; a concurrent
    /// writer that wins the same number makes this fail with a UNIQUE
    /// violation on `(workflow_id, version_number)`, which callers retry.
    ///
    /// With `MarkDeleted` the delete marker is claimed first. If another
    /// writer already set it, nothing is written and `None` is returned.
    pub async fn insert_version(
        &self,
        workflow_id: Uuid,
        new_version: &NewVersion,
        audit: &AuditRecord,
        update: &WorkflowUpdate,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if *update == WorkflowUpdate::MarkDeleted && !mark_deleted_in(&mut tx, workflow_id, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let version = insert_version_in(&mut tx, workflow_id, new_version, audit, now).await?;

        if let WorkflowUpdate::Reactivate { external_id } = update {
            sqlx::query(
                r#"
                UPDATE workflows
                SET status = 'active', deleted_at = NULL, external_id = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(external_id)
            .bind(now)
            .bind(workflow_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(version))
    }

    pub async fn latest_version(&self, workflow_id: Uuid) -> GuardResult<Option<WorkflowVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE workflow_id = ? ORDER BY version_number DESC LIMIT 1"
        ))
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(version_from_row).transpose()?)
    }

    /// Highest version strictly below `version_number`.
    pub async fn version_before(
        &self,
        workflow_id: Uuid,
        version_number: i64,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {VERSION_COLUMNS} FROM workflow_versions
            WHERE workflow_id = ? AND version_number < ?
            ORDER BY version_number DESC LIMIT 1
            "#
        ))
        .bind(workflow_id.to_string())
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(version_from_row).transpose()?)
    }

    pub async fn get_version_by_id(
        &self,
        workflow_id: Uuid,
        version_id: Uuid,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE workflow_id = ? AND id = ?"
        ))
        .bind(workflow_id.to_string())
        .bind(version_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(version_from_row).transpose()?)
    }

    pub async fn get_version_by_number(
        &self,
        workflow_id: Uuid,
        version_number: i64,
    ) -> GuardResult<Option<WorkflowVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE workflow_id = ? AND version_number = ?"
        ))
        .bind(workflow_id.to_string())
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(version_from_row).transpose()?)
    }

    /// Version history without payloads, newest first.
    pub async fn list_versions(&self, workflow_id: Uuid) -> GuardResult<Vec<VersionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version_number, snapshot_type, created_by, created_at
            FROM workflow_versions
            WHERE workflow_id = ?
            ORDER BY version_number DESC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in &rows {
            versions.push(VersionSummary {
                id: parse_uuid(row.try_get("id")?)?,
                version_number: row.try_get("version_number")?,
                snapshot_type: parse_column(row.try_get("snapshot_type")?)?,
                created_by: row.try_get("created_by")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(versions)
    }

    pub async fn count_versions(&self, workflow_id: Uuid) -> GuardResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM workflow_versions WHERE workflow_id = ?")
                .bind(workflow_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // -- Audit --

    /// Audit trail of a workflow, newest first.
    pub async fn list_audit_entries(&self, workflow_id: Uuid) -> GuardResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, user_id, action, entity_type, entity_id, old_value, new_value, created_at
            FROM audit_logs
            WHERE workflow_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(AuditLogEntry {
                id: parse_uuid(row.try_get("id")?)?,
                workflow_id: parse_uuid(row.try_get("workflow_id")?)?,
                user_id: row.try_get("user_id")?,
                action: row.try_get("action")?,
                entity_type: row.try_get("entity_type")?,
                entity_id: row.try_get("entity_id")?,
                old_value: parse_json_opt(row.try_get("old_value")?)?,
                new_value: parse_json_opt(row.try_get("new_value")?)?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(entries)
    }
}

async fn upsert_in(
    conn: &mut SqliteConnection,
    owner_id: &str,
    external_id: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<(Workflow, bool), sqlx::Error> {
    let candidate_id = Uuid::new_v4();

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO workflows (id, owner_id, external_id, name, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'active', ?, ?)
        ON CONFLICT (owner_id, external_id) DO UPDATE SET
            name = excluded.name,
            updated_at = excluded.updated_at
        RETURNING {WORKFLOW_COLUMNS}
        "#
    ))
    .bind(candidate_id.to_string())
    .bind(owner_id)
    .bind(external_id)
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let workflow = workflow_from_row(&row)?;
    let created = workflow.id == candidate_id;
    Ok((workflow, created))
}

/// Set the delete marker unless it is already set. True if this call set it.
async fn mark_deleted_in(
    conn: &mut SqliteConnection,
    workflow_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workflows SET status = 'deleted', deleted_at = ?, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(workflow_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn insert_version_in(
    conn: &mut SqliteConnection,
    workflow_id: Uuid,
    new_version: &NewVersion,
    audit: &AuditRecord,
    now: DateTime<Utc>,
) -> Result<WorkflowVersion, sqlx::Error> {
    let version_id = Uuid::new_v4();

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO workflow_versions ({VERSION_COLUMNS})
        SELECT ?1, ?2, COALESCE(MAX(version_number), 0) + 1, ?3, ?4, ?5, ?6
        FROM workflow_versions
        WHERE workflow_id = ?2
        RETURNING version_number
        "#
    ))
    .bind(version_id.to_string())
    .bind(workflow_id.to_string())
    .bind(new_version.snapshot_type.as_str())
    .bind(&new_version.created_by)
    .bind(now)
    .bind(new_version.data.to_string())
    .fetch_one(&mut *conn)
    .await?;
    let version_number: i64 = row.try_get("version_number")?;

    let mut new_value = json!({
        "versionId": version_id,
        "versionNumber": version_number,
        "snapshotType": new_version.snapshot_type.as_str(),
    });
    if let (Some(Value::Object(extra)), Some(target)) =
        (audit.new_value.as_ref(), new_value.as_object_mut())
    {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }

    insert_audit_in(
        conn,
        workflow_id,
        &new_version.created_by,
        audit,
        "workflow_version",
        &version_id.to_string(),
        Some(new_value),
        now,
    )
    .await?;

    Ok(WorkflowVersion {
        id: version_id,
        workflow_id,
        version_number,
        snapshot_type: new_version.snapshot_type,
        created_by: new_version.created_by.clone(),
        created_at: now,
        data: new_version.data.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn insert_audit_in(
    conn: &mut SqliteConnection,
    workflow_id: Uuid,
    user_id: &str,
    audit: &AuditRecord,
    entity_type: &str,
    entity_id: &str,
    new_value: Option<Value>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs
            (id, workflow_id, user_id, action, entity_type, entity_id, old_value, new_value, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(workflow_id.to_string())
    .bind(user_id)
    .bind(audit.action.as_str())
    .bind(entity_type)
    .bind(entity_id)
    .bind(audit.old_value.as_ref().map(Value::to_string))
    .bind(new_value.as_ref().map(Value::to_string))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn parse_uuid(raw: String) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(&raw).map_err(|e| decode_error(format!("invalid uuid '{}': {}", raw, e)))
}

fn parse_column<T: FromStr<Err = String>>(raw: String) -> Result<T, sqlx::Error> {
    raw.parse::<T>().map_err(decode_error)
}

fn parse_json(raw: &str) -> Result<Value, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_json_opt(raw: Option<String>) -> Result<Option<Value>, sqlx::Error> {
    raw.as_deref().map(parse_json).transpose()
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, sqlx::Error> {
    let deleted_at: Option<DateTime<Utc>> = row.try_get("deleted_at")?;
    let status: WorkflowStatus = parse_column(row.try_get("status")?)?;

    Ok(Workflow {
        id: parse_uuid(row.try_get("id")?)?,
        owner_id: row.try_get("owner_id")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        status,
        deleted_at,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<WorkflowVersion, sqlx::Error> {
    let data: String = row.try_get("data")?;

    Ok(WorkflowVersion {
        id: parse_uuid(row.try_get("id")?)?,
        workflow_id: parse_uuid(row.try_get("workflow_id")?)?,
        version_number: row.try_get("version_number")?,
        snapshot_type: parse_column(row.try_get("snapshot_type")?)?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        data: parse_json(&data)?,
    })
}
