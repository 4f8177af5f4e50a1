//! WorkflowGuard: version protection for upstream marketing automations
//!
//! Periodically snapshots HubSpot workflows, keeps an append-only version
//! history per workflow, computes structural diffs between versions and
//! supports rollback, restore and recovery after upstream deletion.

// Environment-driven configuration
pub mod config;

// Domain errors and their HTTP mapping
pub mod error;

// Workflow types and SQLite storage
pub mod workflow;

// Normalizer, structural differ and change detector
pub mod compare;

// Version lifecycle manager and sync orchestration
pub mod versioning;

// Upstream automation platform client
pub mod hubspot;

// Cron-driven sync and backup jobs
pub mod runtime;

// REST endpoints and the webhook receiver
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{GuardError, GuardResult};
pub use server::start_server;
pub use versioning::{SyncService, VersionManager};
pub use workflow::{SnapshotType, Workflow, WorkflowVersion};
