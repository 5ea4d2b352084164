//! Collection storage seam for the Registra backup engine.
//!
//! The backup engine treats the live document database as a set of opaque,
//! named collections. This crate defines that boundary:
//!
//! - [`CollectionStore`] — read a collection in full, or begin staging a
//!   whole-dataset replacement
//! - [`StagedRestore`] — accumulate staged collections, then publish them
//!   atomically (or abort, leaving live data untouched)
//!
//! Two concrete stores are provided: a filesystem-backed store using
//! generation directories with a `CURRENT` pointer file, and an in-memory
//! store for tests and embedded use.

pub mod local;
pub mod memory;
pub mod store;

pub use local::LocalCollectionStore;
pub use memory::MemoryCollectionStore;
pub use store::{CollectionStore, StagedRestore};

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for collection store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// On-disk layout damage (bad pointer file, mangled generation name)
    #[error("Store corruption: {0}")]
    Corruption(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
