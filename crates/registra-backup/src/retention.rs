//! Retention policy evaluation and pruning.

use crate::archive::{ArchiveRecord, ArchiveStatus};
use crate::catalog::ArchiveCatalog;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Which archives to keep. An archive is removed if it violates either bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Keep only the N most recent complete archives
    pub max_count: Option<usize>,
    /// Delete archives older than this many days
    pub max_age_days: Option<u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: None,
            max_age_days: Some(30),
        }
    }
}

/// Result of one cleanup pass. Deletion is best-effort per archive: a failed
/// deletion is recorded and does not abort the rest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupOutcome {
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Applies a [`RetentionPolicy`] against the catalog.
///
/// Also owns the restore pin: the restore path pins the archive it is
/// reading, and no cleanup pass deletes a pinned archive.
pub struct RetentionManager {
    catalog: Arc<ArchiveCatalog>,
    pin: RwLock<Option<String>>,
}

impl RetentionManager {
    pub fn new(catalog: Arc<ArchiveCatalog>) -> Self {
        Self {
            catalog,
            pin: RwLock::new(None),
        }
    }

    /// Protect `id` from deletion while a restore reads it.
    pub async fn pin(&self, id: &str) {
        *self.pin.write().await = Some(id.to_string());
    }

    pub async fn unpin(&self) {
        *self.pin.write().await = None;
    }

    /// Evaluate the policy and delete archives outside it.
    ///
    /// `InProgress` archives and the pinned archive are never removed. The
    /// pin is re-read before each deletion, so a restore that starts while
    /// the pass is underway still shields its archive.
    pub async fn apply_policy(&self, policy: &RetentionPolicy) -> CleanupOutcome {
        let entries = self.catalog.list().await; // newest first
        let pinned = self.pin.read().await.clone();
        let doomed = Self::select_doomed(&entries, policy, pinned.as_deref());

        let mut outcome = CleanupOutcome::default();
        for id in doomed {
            if self.pin.read().await.as_deref() == Some(id.as_str()) {
                debug!("archive {id} pinned by in-flight restore, keeping");
                continue;
            }
            match self.catalog.remove(&id).await {
                Ok(()) => {
                    info!("removed archive {id} per retention policy");
                    outcome.removed.push(id);
                }
                Err(e) => {
                    warn!("failed to remove archive {id}: {e}");
                    outcome.failed.push((id, e.to_string()));
                }
            }
        }
        outcome
    }

    /// Pure policy evaluation over a newest-first entry list.
    fn select_doomed(
        entries: &[ArchiveRecord],
        policy: &RetentionPolicy,
        pinned: Option<&str>,
    ) -> Vec<String> {
        let mut doomed: Vec<String> = Vec::new();

        if let Some(max) = policy.max_count {
            for entry in entries
                .iter()
                .filter(|a| a.status == ArchiveStatus::Complete)
                .skip(max)
            {
                doomed.push(entry.id.clone());
            }
        }

        if let Some(days) = policy.max_age_days {
            let cutoff = Utc::now() - Duration::days(days as i64);
            for entry in entries
                .iter()
                .filter(|a| a.status != ArchiveStatus::InProgress && a.created_at < cutoff)
            {
                if !doomed.contains(&entry.id) {
                    doomed.push(entry.id.clone());
                }
            }
        }

        doomed.retain(|id| {
            if pinned == Some(id.as_str()) {
                debug!("archive {id} pinned by in-flight restore, keeping");
                false
            } else {
                true
            }
        });
        doomed
    }
}
