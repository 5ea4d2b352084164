//! Trait boundary between the backup engine and the live collection store.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A store holding named collections of opaque records.
///
/// Records are byte payloads; the backup engine never interprets them. Reads
/// are point-in-time per collection — the store makes no cross-collection
/// atomicity claim for reads.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Read every record of a collection, in stored order.
    ///
    /// A collection that has never been written reads as empty.
    async fn read_collection(&self, name: &str) -> Result<Vec<Bytes>>;

    /// Begin staging a full replacement dataset.
    ///
    /// Staged data is invisible to readers until [`StagedRestore::commit`]
    /// publishes it. Collections not staged before commit come up empty in
    /// the published dataset.
    async fn begin_staging(&self) -> Result<Box<dyn StagedRestore>>;
}

/// An in-flight whole-dataset replacement.
#[async_trait]
pub trait StagedRestore: Send {
    /// Stage the full contents of one collection.
    async fn stage_collection(&mut self, name: &str, records: Vec<Bytes>) -> Result<()>;

    /// Publish the staged dataset over the live one in a single atomic step.
    ///
    /// If commit fails, the live dataset is left in its pre-commit state.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard staged data, leaving live data untouched.
    async fn abort(self: Box<Self>) -> Result<()>;
}
