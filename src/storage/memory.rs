use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::{StorageError, WarehouseRepository};
use crate::core::{Anchor, Destination, Position, TagRecord};

/// Serializable image of the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSnapshot {
    pub anchors: Vec<Anchor>,
    pub destinations: Vec<Destination>,
    pub tags: Vec<TagRecord>,
}

impl WarehouseSnapshot {
    /// Reference deployment: four corner anchors on a 50x50 m floor and
    /// three destinations
    pub fn reference() -> Self {
        Self {
            anchors: vec![
                Anchor::new("ANCHOR_1", 0.0, 0.0),
                Anchor::new("ANCHOR_2", 50.0, 0.0),
                Anchor::new("ANCHOR_3", 50.0, 50.0),
                Anchor::new("ANCHOR_4", 0.0, 50.0),
            ],
            destinations: vec![
                Destination::new("Loading Dock", 5.0, 5.0),
                Destination::new("Rack A-01", 15.0, 25.0),
                Destination::new("Office", 45.0, 45.0),
            ],
            tags: Vec::new(),
        }
    }
}

/// Thread-safe in-process repository, optionally backed by a JSON file
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    anchors: BTreeMap<String, Anchor>,
    destinations: BTreeMap<String, Destination>,
    tags: RwLock<BTreeMap<String, TagRecord>>,
}

impl InMemoryRepository {
    pub fn new(snapshot: WarehouseSnapshot) -> Self {
        // Later duplicates win, like repeated upserts
        Self {
            anchors: snapshot.anchors.into_iter().map(|a| (a.id.clone(), a)).collect(),
            destinations: snapshot
                .destinations
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            tags: RwLock::new(snapshot.tags.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    pub fn reference() -> Self {
        Self::new(WarehouseSnapshot::reference())
    }

    /// Load a snapshot from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: WarehouseSnapshot = serde_json::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            anchors = snapshot.anchors.len(),
            tags = snapshot.tags.len(),
            "loaded warehouse snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Write the current contents to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, content).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn snapshot(&self) -> WarehouseSnapshot {
        WarehouseSnapshot {
            anchors: self.anchors.values().cloned().collect(),
            destinations: self.destinations.values().cloned().collect(),
            tags: self.read_tags().values().cloned().collect(),
        }
    }

    pub fn tag(&self, tag_id: &str) -> Option<TagRecord> {
        self.read_tags().get(tag_id).cloned()
    }

    fn read_tags(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, TagRecord>> {
        self.tags.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tags(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, TagRecord>> {
        self.tags.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WarehouseRepository for InMemoryRepository {
    fn anchors(&self) -> Result<Vec<Anchor>, StorageError> {
        Ok(self.anchors.values().cloned().collect())
    }

    fn tags(&self) -> Result<Vec<TagRecord>, StorageError> {
        Ok(self.read_tags().values().cloned().collect())
    }

    fn destinations(&self) -> Result<Vec<Destination>, StorageError> {
        Ok(self.destinations.values().cloned().collect())
    }

    fn find_destination(&self, name: &str) -> Result<Option<Destination>, StorageError> {
        Ok(self.destinations.get(name).cloned())
    }

    fn register_tag(&self, tag_id: &str, position: Position, timestamp_ms: u64) -> Result<bool, StorageError> {
        let mut tags = self.write_tags();
        if tags.contains_key(tag_id) {
            return Ok(false);
        }
        tags.insert(
            tag_id.to_string(),
            TagRecord {
                id: tag_id.to_string(),
                last_x: position.x,
                last_y: position.y,
                last_seen_ms: Some(timestamp_ms),
            },
        );
        Ok(true)
    }

    fn record_position(&self, tag_id: &str, position: Position, timestamp_ms: u64) -> Result<(), StorageError> {
        let mut tags = self.write_tags();
        let record = tags.entry(tag_id.to_string()).or_insert_with(|| TagRecord {
            id: tag_id.to_string(),
            last_x: position.x,
            last_y: position.y,
            last_seen_ms: None,
        });
        record.last_x = position.x;
        record.last_y = position.y;
        record.last_seen_ms = Some(timestamp_ms);
        Ok(())
    }
}
