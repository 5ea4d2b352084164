//! Backup orchestrator facade.
//!
//! Single entry point for the route layer. Backup-create and restore are
//! serialized behind one mutual-exclusion lock, acquired with `try_lock`: a
//! caller that collides with an in-flight operation gets `Busy` immediately
//! instead of queuing. Status and list reads never take the operation lock.
//!
//! The orchestrator also owns the process-wide schedule state: it is the
//! only mutation path (`update_schedule`) and the scheduler reads it on
//! every tick.

use crate::archive::{ArchiveRecord, ArchiveStatus};
use crate::catalog::ArchiveCatalog;
use crate::config::BackupConfig;
use crate::restore::RestoreEngine;
use crate::retention::{CleanupOutcome, RetentionManager, RetentionPolicy};
use crate::scheduler::{Frequency, ScheduleConfig, Scheduler};
use crate::writer::SnapshotWriter;
use crate::{BackupError, Result};
use chrono::Utc;
use registra_store::CollectionStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// The operation currently holding the backup/restore lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveOperation {
    Backup,
    Restore { archive_id: String },
}

/// Derived, non-persisted view of the engine; recomputed on every call.
#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub active: Option<ActiveOperation>,
    pub last_backup_id: Option<String>,
    pub last_error: Option<String>,
    pub archive_count: usize,
    pub schedule: ScheduleConfig,
}

/// Facade over writer, catalog, retention, scheduler and restore engine.
pub struct BackupOrchestrator {
    catalog: Arc<ArchiveCatalog>,
    writer: SnapshotWriter,
    restore: RestoreEngine,
    retention: RetentionManager,
    policy: RetentionPolicy,
    /// The one process-wide timer; owned here so a second start cannot
    /// spawn a second poller.
    scheduler: Scheduler,
    schedule: RwLock<ScheduleConfig>,
    active: RwLock<Option<ActiveOperation>>,
    last_error: RwLock<Option<String>>,
    /// Serializes backup-create and restore; at most one of the two runs at
    /// a time, system-wide.
    op_lock: Mutex<()>,
}

impl BackupOrchestrator {
    pub async fn new(store: Arc<dyn CollectionStore>, config: BackupConfig) -> Result<Arc<Self>> {
        let catalog = Arc::new(ArchiveCatalog::open(&config.backup_dir).await?);
        let writer = SnapshotWriter::new(store.clone(), catalog.clone(), config.collections.clone());
        let restore = RestoreEngine::new(store, catalog.clone());
        let retention = RetentionManager::new(catalog.clone());
        let schedule = ScheduleConfig::starting_at(config.schedule, Utc::now());
        let scheduler = Scheduler::new(config.poll_interval());

        Ok(Arc::new(Self {
            catalog,
            writer,
            restore,
            retention,
            policy: config.retention,
            scheduler,
            schedule: RwLock::new(schedule),
            active: RwLock::new(None),
            last_error: RwLock::new(None),
            op_lock: Mutex::new(()),
        }))
    }

    /// Start the process-wide scheduler. Fails while it is already running;
    /// stop it first via [`Self::stop_scheduler`].
    pub async fn start_scheduler(self: &Arc<Self>) -> Result<()> {
        self.scheduler.start(self.clone()).await
    }

    /// Ask the scheduler to exit on its next tick.
    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await;
    }

    /// Current engine status. Never blocks on the operation lock.
    pub async fn status(&self) -> BackupStatus {
        let archives = self.catalog.list().await;
        BackupStatus {
            active: self.active.read().await.clone(),
            last_backup_id: archives
                .iter()
                .find(|a| a.status == ArchiveStatus::Complete)
                .map(|a| a.id.clone()),
            last_error: self.last_error.read().await.clone(),
            archive_count: archives.len(),
            schedule: self.schedule.read().await.clone(),
        }
    }

    /// Snapshot all configured collections, then apply retention.
    ///
    /// Returns the new archive id, or `Busy` if a backup or restore is
    /// already in flight.
    pub async fn perform_full_backup(&self) -> Result<String> {
        let _guard = self.op_lock.try_lock().map_err(|_| BackupError::Busy)?;
        *self.active.write().await = Some(ActiveOperation::Backup);

        let result = self.writer.write_snapshot().await;

        *self.active.write().await = None;
        match result {
            Ok(record) => {
                *self.last_error.write().await = None;
                let outcome = self.retention.apply_policy(&self.policy).await;
                if !outcome.failed.is_empty() {
                    warn!(
                        "post-backup cleanup left {} archives undeleted",
                        outcome.failed.len()
                    );
                }
                Ok(record.id)
            }
            Err(e) => {
                *self.last_error.write().await = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// All known archives, newest first.
    pub async fn list_backups(&self) -> Vec<ArchiveRecord> {
        self.catalog.list().await
    }

    /// Restore the live collections from `archive_id`.
    ///
    /// Fails with `Busy` if a backup or restore is already in flight.
    pub async fn restore_from_backup(&self, archive_id: &str) -> Result<()> {
        let _guard = self.op_lock.try_lock().map_err(|_| BackupError::Busy)?;
        *self.active.write().await = Some(ActiveOperation::Restore {
            archive_id: archive_id.to_string(),
        });
        self.retention.pin(archive_id).await;

        let result = self.restore.restore(archive_id).await;

        self.retention.unpin().await;
        *self.active.write().await = None;
        match &result {
            Ok(()) => *self.last_error.write().await = None,
            Err(e) => *self.last_error.write().await = Some(e.to_string()),
        }
        result
    }

    /// Change the automatic backup cadence.
    ///
    /// Validates the frequency string and recomputes `next_run` one full
    /// period from now. The only mutation path for the schedule state.
    pub async fn update_schedule(&self, frequency: &str) -> Result<ScheduleConfig> {
        let frequency = Frequency::parse(frequency)?;
        let mut schedule = self.schedule.write().await;
        *schedule = ScheduleConfig::starting_at(frequency, Utc::now());
        info!(
            "backup schedule updated: {} (next run {})",
            frequency.as_str(),
            schedule.next_run
        );
        Ok(schedule.clone())
    }

    /// Apply the configured retention policy now.
    ///
    /// Runs concurrently with an in-flight restore; the retention manager
    /// re-checks the restore pin before each deletion. Reports
    /// `CleanupPartialFailure` if any deletion failed.
    pub async fn cleanup_old_backups(&self) -> Result<CleanupOutcome> {
        let outcome = self.retention.apply_policy(&self.policy).await;
        if outcome.failed.is_empty() {
            Ok(outcome)
        } else {
            Err(BackupError::CleanupPartialFailure {
                removed: outcome.removed.len(),
                failed: outcome.failed.len(),
            })
        }
    }

    /// One scheduler tick: fire a backup if the schedule is due.
    ///
    /// The next run is advanced from the previous scheduled time before the
    /// backup executes, so neither a slow backup nor a failure shifts the
    /// cadence.
    pub async fn run_scheduled_tick(&self) {
        let due = {
            let mut schedule = self.schedule.write().await;
            if Utc::now() >= schedule.next_run {
                let fired_at = schedule.next_run;
                schedule.next_run = schedule.frequency.advance(fired_at);
                debug!(
                    "schedule due (was {fired_at}), next run {}",
                    schedule.next_run
                );
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }

        match self.perform_full_backup().await {
            Ok(id) => info!("scheduled backup completed: {id}"),
            Err(BackupError::Busy) => {
                warn!("scheduled backup skipped: another operation is running")
            }
            Err(e) => error!("scheduled backup failed: {e}"),
        }
    }
}
