//! Backup and restore engine for the Registra records platform.
//!
//! This crate provides:
//! - Full snapshots of every configured collection into one self-describing,
//!   checksummed archive file
//! - A durable archive catalog that can be rebuilt by scanning disk
//! - Retention pruning by archive count and age
//! - Drift-free scheduled backups
//! - Checksum-verified restores published in a single atomic step

pub mod archive;
pub mod catalog;
pub mod config;
pub mod format;
pub mod orchestrator;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod writer;

pub use archive::{ArchiveManifest, ArchiveRecord, ArchiveStatus, CollectionManifest};
pub use catalog::ArchiveCatalog;
pub use config::BackupConfig;
pub use orchestrator::{ActiveOperation, BackupOrchestrator, BackupStatus};
pub use restore::RestoreEngine;
pub use retention::{CleanupOutcome, RetentionManager, RetentionPolicy};
pub use scheduler::{Frequency, ScheduleConfig, Scheduler};
pub use writer::SnapshotWriter;

use thiserror::Error;

/// Backup error types
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("another backup or restore is already running")]
    Busy,

    #[error("archive not found: {0}")]
    NotFound(String),

    #[error("archive {0} failed integrity verification")]
    Corrupt(String),

    #[error("snapshot of collection '{collection}' failed: {detail}")]
    BackupFailure { collection: String, detail: String },

    #[error("restore staged but publish failed: {0}")]
    PartialRestore(String),

    #[error("invalid schedule frequency: {0}")]
    InvalidSchedule(String),

    #[error("cleanup removed {removed} archives but {failed} deletions failed")]
    CleanupPartialFailure { removed: usize, failed: usize },

    #[error("archive payload does not match its recorded checksum")]
    ChecksumMismatch,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Convert various errors to BackupError
impl From<std::io::Error> for BackupError {
    fn from(e: std::io::Error) -> Self {
        BackupError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Serialization(e.to_string())
    }
}

impl From<registra_store::StoreError> for BackupError {
    fn from(e: registra_store::StoreError) -> Self {
        BackupError::Storage(e.to_string())
    }
}
