//! Persistence boundary for reference data and last-known tag state

pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::{Anchor, Destination, Position, TagRecord};

pub use memory::{InMemoryRepository, WarehouseSnapshot};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage collaborator holding anchors, destinations and tags.
///
/// Anchors and destinations are read-only reference data; tags are
/// registered on first sight and updated after every committed fix.
pub trait WarehouseRepository: Send + Sync {
    fn anchors(&self) -> Result<Vec<Anchor>, StorageError>;

    fn tags(&self) -> Result<Vec<TagRecord>, StorageError>;

    /// All destinations ordered by name
    fn destinations(&self) -> Result<Vec<Destination>, StorageError>;

    fn find_destination(&self, name: &str) -> Result<Option<Destination>, StorageError>;

    /// Insert a tag at `position` if absent. Returns `true` when the tag was
    /// new; an existing record is left untouched.
    fn register_tag(&self, tag_id: &str, position: Position, timestamp_ms: u64) -> Result<bool, StorageError>;

    /// Upsert the last committed position of a tag
    fn record_position(&self, tag_id: &str, position: Position, timestamp_ms: u64) -> Result<(), StorageError>;
}
