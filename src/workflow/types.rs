//! Core workflow type definitions
//!
//! Protected workflows, their immutable version snapshots and the audit
//! trail. Workflow definitions themselves stay weakly typed
//! (`serde_json::Value`): the upstream platform owns their shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Creator token used for versions written by background jobs and webhooks.
pub const SYSTEM_ACTOR: &str = "system";

/// Why a version was created. Persisted as the exact (case-sensitive) label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotType {
    #[serde(rename = "Initial Protection")]
    InitialProtection,
    #[serde(rename = "Manual Sync")]
    ManualSync,
    #[serde(rename = "Auto Backup")]
    AutoBackup,
    #[serde(rename = "Manual Save")]
    ManualSave,
    #[serde(rename = "Rollback")]
    Rollback,
    #[serde(rename = "Restore")]
    Restore,
    #[serde(rename = "System Backup")]
    SystemBackup,
    #[serde(rename = "webhook")]
    Webhook,
    #[serde(rename = "deletion_backup")]
    DeletionBackup,
    #[serde(rename = "restoration")]
    Restoration,
}

impl SnapshotType {
    pub const ALL: [SnapshotType; 10] = [
        SnapshotType::InitialProtection,
        SnapshotType::ManualSync,
        SnapshotType::AutoBackup,
        SnapshotType::ManualSave,
        SnapshotType::Rollback,
        SnapshotType::Restore,
        SnapshotType::SystemBackup,
        SnapshotType::Webhook,
        SnapshotType::DeletionBackup,
        SnapshotType::Restoration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialProtection => "Initial Protection",
            Self::ManualSync => "Manual Sync",
            Self::AutoBackup => "Auto Backup",
            Self::ManualSave => "Manual Save",
            Self::Rollback => "Rollback",
            Self::Restore => "Restore",
            Self::SystemBackup => "System Backup",
            Self::Webhook => "webhook",
            Self::DeletionBackup => "deletion_backup",
            Self::Restoration => "restoration",
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown snapshot type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Deleted,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown workflow status '{}'", other)),
        }
    }
}

/// A protected upstream automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    /// Owning user; `external_id` is unique per owner
    pub owner_id: String,
    /// Identifier in the upstream automation platform
    pub external_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn is_deleted(&self) -> bool {
        self.status == WorkflowStatus::Deleted || self.deleted_at.is_some()
    }
}

/// Immutable snapshot of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Starts at 1, strictly increasing per workflow, never reused
    pub version_number: i64,
    pub snapshot_type: SnapshotType,
    /// User id or `SYSTEM_ACTOR`
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl WorkflowVersion {
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id,
            version_number: self.version_number,
            snapshot_type: self.snapshot_type,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }
}

/// Version metadata without the payload, for history listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: Uuid,
    pub version_number: i64,
    pub snapshot_type: SnapshotType,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Input for a version insert; the number is assigned by storage.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub snapshot_type: SnapshotType,
    pub created_by: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowProtected,
    VersionCreated,
    Rollback,
    Restore,
    Deletion,
    Restoration,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowProtected => "workflow_protected",
            Self::VersionCreated => "version_created",
            Self::Rollback => "rollback",
            Self::Restore => "restore",
            Self::Deletion => "deletion",
            Self::Restoration => "restoration",
        }
    }

    /// Audit action recorded alongside a version of the given type.
    pub fn for_snapshot(kind: SnapshotType) -> Self {
        match kind {
            SnapshotType::Rollback => Self::Rollback,
            SnapshotType::Restore => Self::Restore,
            SnapshotType::DeletionBackup => Self::Deletion,
            SnapshotType::Restoration => Self::Restoration,
            SnapshotType::InitialProtection
            | SnapshotType::ManualSync
            | SnapshotType::AutoBackup
            | SnapshotType::ManualSave
            | SnapshotType::SystemBackup
            | SnapshotType::Webhook => Self::VersionCreated,
        }
    }
}

/// Append-only record of an action taken against a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit payload written in the same transaction as a version.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl AuditRecord {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            old_value: None,
            new_value: None,
        }
    }

    pub fn with_old(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn with_new(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }
}

/// A version reference as supplied by callers: internal UUID or number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRef {
    Id(Uuid),
    Number(i64),
}

impl FromStr for VersionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = Uuid::parse_str(trimmed) {
            return Ok(Self::Id(id));
        }
        match trimmed.parse::<i64>() {
            Ok(number) if number >= 1 => Ok(Self::Number(number)),
            _ => Err(trimmed.to_string()),
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Number(number) => write!(f, "#{}", number),
        }
    }
}
