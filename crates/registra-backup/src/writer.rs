//! Snapshot writer.
//!
//! Reads every configured collection in full, writes one archive file to a
//! temporary path with an incrementally computed checksum, then publishes it
//! with an atomic rename. A reader can never observe a half-written file
//! under the final archive name.

use crate::archive::{self, ArchiveManifest, ArchiveRecord, CollectionManifest};
use crate::catalog::ArchiveCatalog;
use crate::{format, BackupError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use registra_store::CollectionStore;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Schema version stamped into each collection manifest. Bumped by the host
/// application when record layouts change.
pub const SCHEMA_VERSION: u32 = 1;

/// Serializes the configured collections into durable archives.
pub struct SnapshotWriter {
    store: Arc<dyn CollectionStore>,
    catalog: Arc<ArchiveCatalog>,
    collections: Vec<String>,
}

impl SnapshotWriter {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        catalog: Arc<ArchiveCatalog>,
        collections: Vec<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            collections,
        }
    }

    /// Snapshot all configured collections into a new archive.
    ///
    /// The archive is registered `InProgress` before any bytes move and
    /// finalized `Complete` or `Failed` on the way out. Failures surface the
    /// name of the collection that failed; no partial file is left under the
    /// final archive name.
    pub async fn write_snapshot(&self) -> Result<ArchiveRecord> {
        let started = Utc::now();
        let id = archive::archive_id_for(started);
        info!("starting snapshot {id} ({} collections)", self.collections.len());

        let record = ArchiveRecord::in_progress(&id, started, &self.collections);
        self.catalog.register(record).await?;

        match self.write_archive_file(&id, started).await {
            Ok((manifest, checksum, size_bytes)) => {
                let record = self
                    .catalog
                    .finalize_complete(&id, &manifest, &checksum, size_bytes)
                    .await?;
                info!(
                    "snapshot {id} complete: {} collections, {} records, {} bytes",
                    manifest.collections.len(),
                    manifest.collections.iter().map(|c| c.record_count).sum::<u64>(),
                    size_bytes
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(mark_err) = self.catalog.finalize_failed(&id).await {
                    warn!("failed to mark snapshot {id} as failed: {mark_err}");
                }
                Err(e)
            }
        }
    }

    async fn write_archive_file(
        &self,
        id: &str,
        started: DateTime<Utc>,
    ) -> Result<(ArchiveManifest, String, u64)> {
        let mut sections: Vec<(String, Vec<Bytes>)> = Vec::with_capacity(self.collections.len());
        for name in &self.collections {
            debug!("reading collection {name}");
            let records = self.store.read_collection(name).await.map_err(|e| {
                BackupError::BackupFailure {
                    collection: name.clone(),
                    detail: e.to_string(),
                }
            })?;
            sections.push((name.clone(), records));
        }

        let manifest = ArchiveManifest {
            archive_id: id.to_string(),
            created_at: started,
            format_version: format::FORMAT_VERSION,
            collections: sections
                .iter()
                .map(|(name, records)| CollectionManifest {
                    name: name.clone(),
                    record_count: records.len() as u64,
                    schema_version: SCHEMA_VERSION,
                })
                .collect(),
        };

        let final_path = self.catalog.archive_path(id);
        let tmp_path = final_path.with_extension("tmp");

        match self.write_to(&tmp_path, &manifest, &sections).await {
            Ok((checksum, size_bytes)) => {
                publish_archive(&tmp_path, &final_path).await?;
                Ok((manifest, checksum, size_bytes))
            }
            Err(e) => {
                remove_staged(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn write_to(
        &self,
        path: &Path,
        manifest: &ArchiveManifest,
        sections: &[(String, Vec<Bytes>)],
    ) -> Result<(String, u64)> {
        let mut writer = format::ArchiveFileWriter::create(path).await?;
        writer.write_manifest(manifest).await?;
        for (name, records) in sections {
            writer
                .write_section(records)
                .await
                .map_err(|e| BackupError::BackupFailure {
                    collection: name.clone(),
                    detail: e.to_string(),
                })?;
        }
        writer.finish().await
    }
}

/// Publish a fully written archive under its final name. If the rename
/// fails, the staged file is removed so it cannot accumulate on disk.
async fn publish_archive(tmp_path: &Path, final_path: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp_path, final_path).await {
        remove_staged(tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_staged(tmp_path: &Path) {
    if let Err(rm_err) = fs::remove_file(tmp_path).await {
        if rm_err.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove partial archive {}: {rm_err}", tmp_path.display());
        }
    }
}
