//! Background backup scheduler
//!
//! Two cron jobs on tokio-cron-scheduler: a periodic upstream sync that
//! snapshots real changes as `System Backup`, and an automated backup that
//! checkpoints the latest version of every active workflow as `Auto Backup`.
//! A failing workflow is logged and the tick moves on.

use crate::{
    config::SchedulerConfig,
    error::{GuardError, GuardResult},
    versioning::{SyncReport, SyncService, VersionManager},
    workflow::types::{SnapshotType, SYSTEM_ACTOR},
};
use anyhow::Result;
use serde::Serialize;
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub const SYNC_JOB: &str = "upstream-sync";
pub const BACKUP_JOB: &str = "auto-backup";

/// Totals of one automated backup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub total: usize,
    pub created: usize,
    /// Workflows without any stored version yet
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Sync every active workflow, snapshotting changes as `System Backup`.
pub async fn run_sync_pass(sync: &SyncService) -> GuardResult<SyncReport> {
    let report = sync
        .sync_all_active(SnapshotType::SystemBackup, SYSTEM_ACTOR)
        .await?;
    tracing::info!(
        "📊 Sync pass: {} workflows, {} created, {} unchanged, {} skipped, {} deleted, {} errors",
        report.total,
        report.created,
        report.unchanged,
        report.skipped,
        report.deleted,
        report.errors.len()
    );
    Ok(report)
}

/// Checkpoint the latest version of every active workflow.
pub async fn run_backup_pass(manager: &VersionManager) -> GuardResult<BackupReport> {
    let workflows = manager.storage().list_active_workflows().await?;
    let mut report = BackupReport {
        total: workflows.len(),
        ..BackupReport::default()
    };

    for workflow in workflows {
        match manager.create_automated_backup(workflow.id).await {
            Ok(_) => report.created += 1,
            Err(GuardError::NoVersions(_)) => {
                tracing::debug!("⏭️ No version to back up for workflow {}", workflow.id);
                report.skipped += 1;
            }
            Err(err) => {
                tracing::error!("❌ Automated backup failed for workflow {}: {}", workflow.id, err);
                report.errors.push(format!("{}: {}", workflow.id, err));
            }
        }
    }

    tracing::info!(
        "💾 Backup pass: {}/{} workflows checkpointed, {} skipped, {} errors",
        report.created,
        report.total,
        report.skipped,
        report.errors.len()
    );
    Ok(report)
}

pub struct BackupScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    sync: Arc<SyncService>,
    manager: Arc<VersionManager>,
    config: SchedulerConfig,
}

impl BackupScheduler {
    pub async fn new(
        sync: Arc<SyncService>,
        manager: Arc<VersionManager>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            sync,
            manager,
            config,
        })
    }

    /// Register both jobs and start ticking.
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("⏸️ Backup scheduler disabled by configuration");
            return Ok(());
        }

        tracing::info!("⏰ Starting backup scheduler");
        self.register_jobs().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Backup scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping backup scheduler");

        self.job_uuid_map.write().await.clear();
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Backup scheduler stopped");
        Ok(())
    }

    async fn register_jobs(&self) -> Result<()> {
        let sync = Arc::clone(&self.sync);
        self.add_job(SYNC_JOB, &self.config.sync_schedule, move || {
            let sync = Arc::clone(&sync);
            async move {
                if let Err(e) = run_sync_pass(&sync).await {
                    tracing::error!("❌ Scheduled sync failed: {}", e);
                }
            }
        })
        .await?;

        let manager = Arc::clone(&self.manager);
        self.add_job(BACKUP_JOB, &self.config.backup_schedule, move || {
            let manager = Arc::clone(&manager);
            async move {
                if let Err(e) = run_backup_pass(&manager).await {
                    tracing::error!("❌ Scheduled backup failed: {}", e);
                }
            }
        })
        .await?;

        tracing::info!(
            "📊 Registered jobs: {} ({}), {} ({})",
            SYNC_JOB,
            self.config.sync_schedule,
            BACKUP_JOB,
            self.config.backup_schedule
        );
        Ok(())
    }

    /// Add (or replace) a named job.
    async fn add_job<F, Fut>(&self, name: &str, schedule: &str, task: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            if let Some(old_uuid) = job_uuid_map.remove(name) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&old_uuid).await {
                    tracing::warn!("⚠️ Failed to remove old job {}: {}", name, e);
                }
            }
        }

        let job_name = name.to_string();
        let task = Arc::new(task);
        let job = Job::new_async(schedule, move |_uuid, _l| {
            let job_name = job_name.clone();
            let task = Arc::clone(&task);
            Box::pin(async move {
                tracing::debug!("🔔 Job triggered: {}", job_name);
                task().await;
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };
        self.job_uuid_map
            .write()
            .await
            .insert(name.to_string(), job_uuid);

        tracing::debug!("📝 Registered job {} ({})", name, schedule);
        Ok(())
    }

    pub async fn registered_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.job_uuid_map.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
