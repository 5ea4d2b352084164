//! Archive metadata structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveStatus {
    /// Snapshot is being written
    InProgress,
    /// Snapshot finished and its checksum is recorded
    Complete,
    /// Snapshot aborted; no archive file exists under the final name
    Failed,
    /// A later integrity check found the payload no longer matches its checksum
    Corrupt,
}

/// Catalog entry for one durable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Unique, immutable, timestamp-derived identifier
    pub id: String,
    /// Snapshot start time
    pub created_at: DateTime<Utc>,
    /// Ordered collection names included in the snapshot
    pub collections: Vec<String>,
    /// Size of the archive file in bytes
    pub size_bytes: u64,
    /// Collection name -> record count
    pub record_counts: HashMap<String, u64>,
    /// Hex SHA-256 over the archive payload
    pub checksum: String,
    /// Current lifecycle status
    pub status: ArchiveStatus,
}

impl ArchiveRecord {
    /// Entry registered at snapshot start, before any bytes are written.
    pub fn in_progress(id: &str, created_at: DateTime<Utc>, collections: &[String]) -> Self {
        Self {
            id: id.to_string(),
            created_at,
            collections: collections.to_vec(),
            size_bytes: 0,
            record_counts: HashMap::new(),
            checksum: String::new(),
            status: ArchiveStatus::InProgress,
        }
    }

    /// Entry reconstructed from a self-describing archive file during a
    /// catalog rebuild.
    pub fn from_manifest(manifest: &ArchiveManifest, checksum: String, size_bytes: u64) -> Self {
        Self {
            id: manifest.archive_id.clone(),
            created_at: manifest.created_at,
            collections: manifest.collections.iter().map(|c| c.name.clone()).collect(),
            size_bytes,
            record_counts: manifest.record_counts(),
            checksum,
            status: ArchiveStatus::Complete,
        }
    }
}

/// Manifest embedded at the head of every archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub archive_id: String,
    pub created_at: DateTime<Utc>,
    /// Archive container format version
    pub format_version: u32,
    pub collections: Vec<CollectionManifest>,
}

impl ArchiveManifest {
    pub fn record_counts(&self) -> HashMap<String, u64> {
        self.collections
            .iter()
            .map(|c| (c.name.clone(), c.record_count))
            .collect()
    }
}

/// Per-collection section descriptor inside the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub name: String,
    pub record_count: u64,
    /// Version of the record schema at snapshot time; opaque to the engine
    pub schema_version: u32,
}

/// Timestamp-derived archive id, unique down to the microsecond.
pub fn archive_id_for(created_at: DateTime<Utc>) -> String {
    format!("backup-{}", created_at.format("%Y%m%d%H%M%S%6f"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_id_is_timestamp_derived() {
        let ts = Utc::now();
        let id = archive_id_for(ts);
        assert!(id.starts_with("backup-"));
        assert_eq!(id.len(), "backup-".len() + 20);
    }

    #[test]
    fn record_counts_map_from_manifest() {
        let manifest = ArchiveManifest {
            archive_id: "backup-x".into(),
            created_at: Utc::now(),
            format_version: 1,
            collections: vec![
                CollectionManifest { name: "users".into(), record_count: 3, schema_version: 1 },
                CollectionManifest { name: "courses".into(), record_count: 0, schema_version: 1 },
            ],
        };

        let counts = manifest.record_counts();
        assert_eq!(counts.get("users"), Some(&3));
        assert_eq!(counts.get("courses"), Some(&0));
    }
}
