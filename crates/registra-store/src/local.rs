//! Filesystem-backed collection store.
//!
//! Layout under the store root:
//!
//! ```text
//! CURRENT            active generation name, e.g. "gen-000004"
//! gen-000004/        one file per collection
//!     users.col
//!     students.col
//! staging-17/        in-flight restore, renamed into place on commit
//! ```
//!
//! A restore stages a complete new generation directory and publishes it by
//! rewriting `CURRENT` via temp-file-and-rename. Readers resolve `CURRENT`
//! once per read, so they never observe a half-written generation.

use crate::{CollectionStore, Result, StagedRestore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const CURRENT_FILE: &str = "CURRENT";
const GEN_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = "staging-";
const COLLECTION_EXT: &str = "col";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Collection store backed by generation directories on the local filesystem.
pub struct LocalCollectionStore {
    root: PathBuf,
    /// Cached active generation name; `CURRENT` on disk stays authoritative
    /// across restarts.
    current: Arc<RwLock<String>>,
}

impl LocalCollectionStore {
    /// Open a store rooted at `root`, initializing an empty generation if
    /// the directory is fresh.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let pointer = root.join(CURRENT_FILE);
        let generation = match fs::read_to_string(&pointer).await {
            Ok(raw) => {
                let name = raw.trim().to_string();
                if !name.starts_with(GEN_PREFIX) {
                    return Err(StoreError::Corruption(format!(
                        "bad CURRENT pointer: {name}"
                    )));
                }
                name
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let name = format!("{GEN_PREFIX}{:06}", 0);
                fs::create_dir_all(root.join(&name)).await?;
                write_pointer(&root, &name).await?;
                debug!("initialized empty store at {}", root.display());
                name
            }
            Err(e) => return Err(e.into()),
        };

        sweep_staging(&root).await?;

        Ok(Self {
            root,
            current: Arc::new(RwLock::new(generation)),
        })
    }

    fn collection_path(root: &Path, generation: &str, name: &str) -> PathBuf {
        root.join(generation).join(format!("{name}.{COLLECTION_EXT}"))
    }
}

#[async_trait]
impl CollectionStore for LocalCollectionStore {
    async fn read_collection(&self, name: &str) -> Result<Vec<Bytes>> {
        let generation = self.current.read().await.clone();
        let path = Self::collection_path(&self.root, &generation, name);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records: Vec<Vec<u8>> = bincode::deserialize(&raw)?;
        Ok(records.into_iter().map(Bytes::from).collect())
    }

    async fn begin_staging(&self) -> Result<Box<dyn StagedRestore>> {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = self.root.join(format!("{STAGING_PREFIX}{seq}"));
        fs::create_dir_all(&staging).await?;
        debug!("staging restore in {}", staging.display());

        Ok(Box::new(LocalStagedRestore {
            root: self.root.clone(),
            current: self.current.clone(),
            staging,
        }))
    }
}

struct LocalStagedRestore {
    root: PathBuf,
    current: Arc<RwLock<String>>,
    staging: PathBuf,
}

#[async_trait]
impl StagedRestore for LocalStagedRestore {
    async fn stage_collection(&mut self, name: &str, records: Vec<Bytes>) -> Result<()> {
        let raw: Vec<Vec<u8>> = records.into_iter().map(|b| b.to_vec()).collect();
        let encoded = bincode::serialize(&raw)?;
        fs::write(self.staging.join(format!("{name}.{COLLECTION_EXT}")), encoded).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut current = self.current.write().await;

        let next = next_generation(&current)?;
        let next_dir = self.root.join(&next);
        fs::rename(&self.staging, &next_dir).await?;

        // Publish point: everything before this leaves the live dataset
        // untouched, everything after is cleanup.
        write_pointer(&self.root, &next).await?;

        let old = std::mem::replace(&mut *current, next);
        if let Err(e) = fs::remove_dir_all(self.root.join(&old)).await {
            warn!("failed to remove superseded generation {old}: {e}");
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        fs::remove_dir_all(&self.staging).await?;
        Ok(())
    }
}

/// Remove staging directories orphaned by a crash or failed restore. Runs at
/// open, before any restore of this process can be staging.
async fn sweep_staging(root: &Path) -> Result<()> {
    let mut reader = fs::read_dir(root).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(STAGING_PREFIX) {
            warn!("removing orphaned staging directory {}", entry.path().display());
            if let Err(e) = fs::remove_dir_all(entry.path()).await {
                warn!("failed to remove {}: {e}", entry.path().display());
            }
        }
    }
    Ok(())
}

async fn write_pointer(root: &Path, generation: &str) -> Result<()> {
    let tmp = root.join("CURRENT.tmp");
    fs::write(&tmp, format!("{generation}\n")).await?;
    fs::rename(&tmp, root.join(CURRENT_FILE)).await?;
    Ok(())
}

fn next_generation(current: &str) -> Result<String> {
    let n: u64 = current
        .strip_prefix(GEN_PREFIX)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Corruption(format!("bad generation name: {current}")))?;
    Ok(format!("{GEN_PREFIX}{:06}", n + 1))
}
