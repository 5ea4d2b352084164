//! Restore engine.
//!
//! A restore verifies the archive end to end before any live data moves:
//! catalog lookup, then a full checksum pass over the file. Collections are
//! staged into the store's staging area and published in a single atomic
//! commit, so the live dataset is never observed half-restored. A failed
//! publish reports `PartialRestore`; re-running the same restore is
//! idempotent.

use crate::catalog::ArchiveCatalog;
use crate::{format, ArchiveStatus, BackupError, Result};
use registra_store::CollectionStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Validates archives and swaps their contents in for the live collections.
pub struct RestoreEngine {
    store: Arc<dyn CollectionStore>,
    catalog: Arc<ArchiveCatalog>,
}

impl RestoreEngine {
    pub fn new(store: Arc<dyn CollectionStore>, catalog: Arc<ArchiveCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Restore the live collections from `archive_id`.
    pub async fn restore(&self, archive_id: &str) -> Result<()> {
        let record = self.catalog.get(archive_id).await?;
        match record.status {
            ArchiveStatus::Complete => {}
            ArchiveStatus::Corrupt => return Err(BackupError::Corrupt(archive_id.to_string())),
            other => {
                return Err(BackupError::Internal(format!(
                    "archive {archive_id} is not restorable (status {other:?})"
                )))
            }
        }

        info!("restoring archive {archive_id}");
        let path = self.catalog.archive_path(archive_id);

        let (manifest, sections, digest) = match format::read_archive(&path).await {
            Ok(parsed) => parsed,
            Err(BackupError::ChecksumMismatch) | Err(BackupError::Serialization(_)) => {
                // Unverifiable payload. Record it so the archive is never
                // offered for restore again.
                if let Err(e) = self.catalog.mark_corrupt(archive_id).await {
                    warn!("failed to mark archive {archive_id} corrupt: {e}");
                }
                return Err(BackupError::Corrupt(archive_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        if digest != record.checksum {
            if let Err(e) = self.catalog.mark_corrupt(archive_id).await {
                warn!("failed to mark archive {archive_id} corrupt: {e}");
            }
            return Err(BackupError::Corrupt(archive_id.to_string()));
        }

        let mut staging = self.store.begin_staging().await?;
        for (name, records) in sections {
            if let Err(e) = staging.stage_collection(&name, records).await {
                let abort_result = staging.abort().await;
                if let Err(abort_err) = abort_result {
                    warn!("failed to discard staged restore: {abort_err}");
                }
                return Err(BackupError::Storage(format!(
                    "staging collection '{name}' failed: {e}"
                )));
            }
        }

        staging
            .commit()
            .await
            .map_err(|e| BackupError::PartialRestore(e.to_string()))?;

        info!(
            "restore of {archive_id} complete ({} collections)",
            manifest.collections.len()
        );
        Ok(())
    }
}
