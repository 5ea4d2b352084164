//! Durable archive catalog.
//!
//! The catalog owns the authoritative list of archives. It persists a
//! `catalog.json` index next to the archive files, rewritten via
//! temp-file-and-rename on every mutation. Losing or mangling the index is
//! not fatal: archive files embed their own manifest and checksum, so the
//! catalog rebuilds itself by scanning the directory.

use crate::archive::{ArchiveManifest, ArchiveRecord, ArchiveStatus};
use crate::{format, BackupError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "catalog.json";
pub const ARCHIVE_EXT: &str = "rga";

/// Index of known archives, backed by `catalog.json` in the backup directory.
pub struct ArchiveCatalog {
    dir: PathBuf,
    entries: RwLock<Vec<ArchiveRecord>>,
}

impl ArchiveCatalog {
    /// Open the catalog, creating the backup directory if needed.
    ///
    /// A missing or unreadable index triggers a rebuild from the archive
    /// files on disk. Any `InProgress` entry left behind by a crashed process
    /// is demoted to `Failed` so new snapshots are not blocked forever.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut entries = match fs::read(dir.join(INDEX_FILE)).await {
            Ok(raw) => match serde_json::from_slice::<Vec<ArchiveRecord>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("archive index unreadable ({e}), rebuilding from disk");
                    Self::scan_archives(&dir).await?
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::scan_archives(&dir).await?
            }
            Err(e) => return Err(e.into()),
        };

        for entry in &mut entries {
            if entry.status == ArchiveStatus::InProgress {
                warn!("archive {} was in progress at shutdown, marking failed", entry.id);
                entry.status = ArchiveStatus::Failed;
            }
        }

        Self::persist(&dir, &entries).await?;
        Ok(Self {
            dir,
            entries: RwLock::new(entries),
        })
    }

    /// Reconstruct catalog entries by reading each archive file's embedded
    /// manifest and trailer. Unreadable files are skipped with a warning.
    async fn scan_archives(dir: &Path) -> Result<Vec<ArchiveRecord>> {
        info!("rebuilding archive catalog from {}", dir.display());
        let mut entries = Vec::new();

        let mut reader = fs::read_dir(dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXT) {
                continue;
            }
            match format::read_summary(&path).await {
                Ok((manifest, checksum, size)) => {
                    entries.push(ArchiveRecord::from_manifest(&manifest, checksum, size));
                }
                Err(e) => warn!("skipping unreadable archive {}: {e}", path.display()),
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        info!("rebuilt catalog with {} archives", entries.len());
        Ok(entries)
    }

    /// Register a new archive entry.
    ///
    /// Rejects duplicate ids, and rejects a second `InProgress` entry — at
    /// most one snapshot may be in flight at any time.
    pub async fn register(&self, record: ArchiveRecord) -> Result<()> {
        let mut entries = self.entries.write().await;

        if entries.iter().any(|a| a.id == record.id) {
            return Err(BackupError::Internal(format!(
                "archive id {} already registered",
                record.id
            )));
        }
        if record.status == ArchiveStatus::InProgress
            && entries.iter().any(|a| a.status == ArchiveStatus::InProgress)
        {
            return Err(BackupError::Busy);
        }

        entries.push(record);
        Self::persist(&self.dir, &entries).await
    }

    /// All entries, newest first.
    pub async fn list(&self) -> Vec<ArchiveRecord> {
        let mut entries = self.entries.read().await.clone();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    pub async fn get(&self, id: &str) -> Result<ArchiveRecord> {
        self.entries
            .read()
            .await
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    /// Remove an entry and delete its archive file.
    ///
    /// If the file cannot be deleted the entry is kept so the removal can be
    /// retried; a file that is already gone is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let idx = entries
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let path = self.archive_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("archive file {} already absent", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        entries.remove(idx);
        Self::persist(&self.dir, &entries).await
    }

    /// Finalize a snapshot as complete, filling in its measured metadata.
    pub async fn finalize_complete(
        &self,
        id: &str,
        manifest: &ArchiveManifest,
        checksum: &str,
        size_bytes: u64,
    ) -> Result<ArchiveRecord> {
        self.update(id, |entry| {
            entry.status = ArchiveStatus::Complete;
            entry.checksum = checksum.to_string();
            entry.size_bytes = size_bytes;
            entry.record_counts = manifest.record_counts();
        })
        .await
    }

    pub async fn finalize_failed(&self, id: &str) -> Result<()> {
        self.update(id, |entry| entry.status = ArchiveStatus::Failed)
            .await
            .map(|_| ())
    }

    pub async fn mark_corrupt(&self, id: &str) -> Result<()> {
        self.update(id, |entry| entry.status = ArchiveStatus::Corrupt)
            .await
            .map(|_| ())
    }

    /// Path of the archive file for `id`.
    pub fn archive_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{ARCHIVE_EXT}"))
    }

    async fn update(&self, id: &str, apply: impl FnOnce(&mut ArchiveRecord)) -> Result<ArchiveRecord> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        apply(entry);
        let updated = entry.clone();
        Self::persist(&self.dir, &entries).await?;
        Ok(updated)
    }

    async fn persist(dir: &Path, entries: &[ArchiveRecord]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(entries)?;
        let tmp = dir.join("catalog.json.tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn complete_record(id: &str, age_days: i64) -> ArchiveRecord {
        let mut record = ArchiveRecord::in_progress(
            id,
            Utc::now() - Duration::days(age_days),
            &["users".to_string()],
        );
        record.status = ArchiveStatus::Complete;
        record.checksum = "deadbeef".into();
        record
    }

    #[tokio::test]
    async fn register_rejects_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();

        catalog.register(complete_record("backup-1", 0)).await.unwrap();
        assert!(catalog.register(complete_record("backup-1", 0)).await.is_err());
    }

    #[tokio::test]
    async fn at_most_one_in_progress_entry() {
        let dir = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();

        let first = ArchiveRecord::in_progress("backup-a", Utc::now(), &[]);
        let second = ArchiveRecord::in_progress("backup-b", Utc::now(), &[]);
        catalog.register(first).await.unwrap();

        match catalog.register(second).await {
            Err(BackupError::Busy) => {}
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();

        catalog.register(complete_record("backup-old", 5)).await.unwrap();
        catalog.register(complete_record("backup-new", 1)).await.unwrap();
        catalog.register(complete_record("backup-mid", 3)).await.unwrap();

        let ids: Vec<_> = catalog.list().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["backup-new", "backup-mid", "backup-old"]);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();

        assert!(matches!(
            catalog.get("backup-ghost").await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();

        catalog.register(complete_record("backup-1", 0)).await.unwrap();
        catalog.remove("backup-1").await.unwrap();
        assert!(catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn stale_in_progress_demoted_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();
            let record = ArchiveRecord::in_progress("backup-crashed", Utc::now(), &[]);
            catalog.register(record).await.unwrap();
        }

        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();
        let entry = catalog.get("backup-crashed").await.unwrap();
        assert_eq!(entry.status, ArchiveStatus::Failed);
    }

    #[tokio::test]
    async fn index_survives_mutations() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();
            catalog.register(complete_record("backup-1", 2)).await.unwrap();
            catalog.register(complete_record("backup-2", 1)).await.unwrap();
            catalog.remove("backup-1").await.unwrap();
        }

        let catalog = ArchiveCatalog::open(dir.path()).await.unwrap();
        let ids: Vec<_> = catalog.list().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["backup-2"]);
    }
}
