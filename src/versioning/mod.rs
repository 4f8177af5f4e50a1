//! Version lifecycle and sync orchestration
//!
//! `VersionManager` owns every write to the version history; `SyncService`
//! decides when upstream changes deserve one.

pub mod lifecycle;
pub mod sync;

pub use lifecycle::{RollbackOutcome, VersionComparison, VersionManager};
pub use sync::{
    ItemError, ProtectItem, ProtectReport, ProtectedWorkflow, SyncItem, SyncOutcome, SyncReport,
    SyncService,
};
