//! Background jobs
//!
//! Cron-driven sync and automated backup passes over every active workflow.

pub mod scheduler;

pub use scheduler::{run_backup_pass, run_sync_pass, BackupReport, BackupScheduler};
