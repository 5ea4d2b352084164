//! In-memory collection store for tests and embedded runs.

use crate::{CollectionStore, Result, StagedRestore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collection store held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryCollectionStore {
    collections: Arc<RwLock<HashMap<String, Vec<Bytes>>>>,
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record to a collection, creating it if needed.
    pub async fn insert_record(&self, collection: &str, record: impl Into<Bytes>) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(record.into());
    }

    pub async fn record_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Clone of the full dataset, for assertions.
    pub async fn snapshot(&self) -> HashMap<String, Vec<Bytes>> {
        self.collections.read().await.clone()
    }
}

#[async_trait]
impl CollectionStore for MemoryCollectionStore {
    async fn read_collection(&self, name: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .collections
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn begin_staging(&self) -> Result<Box<dyn StagedRestore>> {
        Ok(Box::new(MemoryStagedRestore {
            target: self.collections.clone(),
            staged: HashMap::new(),
        }))
    }
}

struct MemoryStagedRestore {
    target: Arc<RwLock<HashMap<String, Vec<Bytes>>>>,
    staged: HashMap<String, Vec<Bytes>>,
}

#[async_trait]
impl StagedRestore for MemoryStagedRestore {
    async fn stage_collection(&mut self, name: &str, records: Vec<Bytes>) -> Result<()> {
        self.staged.insert(name.to_string(), records);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.target.write().await = self.staged;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
