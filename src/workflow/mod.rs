//! Workflow management layer
//!
//! Protected workflows, their immutable versions and the audit trail:
//! - Type definitions (`Workflow`, `WorkflowVersion`, `SnapshotType`, ...)
//! - SQLite persistence with sqlx

pub mod storage;
pub mod types;

pub use storage::{WorkflowStorage, WorkflowUpdate};
pub use types::{
    AuditAction, AuditLogEntry, SnapshotType, VersionRef, VersionSummary, Workflow,
    WorkflowStatus, WorkflowVersion, SYSTEM_ACTOR,
};
