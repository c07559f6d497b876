//! Per-tag state and the atomic ingest pipeline.
//!
//! Every tag owns one `Mutex<TagState>`. An ingest holds that lock across
//! cache insert, trilateration, filter cycle, commit, persistence and
//! notification, so readers never see a half-applied update. Different tags
//! only share the index `RwLock`, which is held for lookups and creation
//! and never while a pipeline runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::algorithms::{RangeObservation, Trilateration, TrilaterationError};
use crate::api::notify::PositionNotifier;
use crate::api::types::PositionUpdate;
use crate::core::{Position, SmoothedPosition, TagRecord, MIN_ANCHORS, WAREHOUSE_CENTER};
use crate::processing::{FilterError, FilterParameters, MotionFilter, RangingCache};
use crate::storage::WarehouseRepository;
use crate::tracking::registry::AnchorRegistry;

/// Everything the system knows about one tag
#[derive(Debug, Clone, PartialEq)]
pub struct TagState {
    pub id: String,
    pub cache: RangingCache,
    pub filter: MotionFilter,
    /// Last committed smoothed position
    pub position: Position,
    /// Unix milliseconds of the last committed fix
    pub last_update_ms: Option<u64>,
    /// Whether storage already knows this tag
    registered: bool,
}

impl TagState {
    fn fresh(id: &str, position: Position, params: &FilterParameters) -> Self {
        Self {
            id: id.to_string(),
            cache: RangingCache::new(),
            filter: MotionFilter::at_position(position, params),
            position,
            last_update_ms: None,
            registered: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

/// Result of one ingest cycle
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new smoothed position was committed
    Updated(SmoothedPosition),
    /// Fewer than three cached samples reference known anchors
    InsufficientAnchors { usable: usize },
    /// Trilateration failed; the previous position is kept
    SolverFailed(TrilaterationError),
    /// The filter rejected the raw fix; the previous position is kept
    FilterFailed(FilterError),
}

impl IngestOutcome {
    /// The committed position, if this cycle produced one
    pub fn position(&self) -> Option<&SmoothedPosition> {
        match self {
            IngestOutcome::Updated(smoothed) => Some(smoothed),
            _ => None,
        }
    }

    pub fn into_position(self) -> Option<SmoothedPosition> {
        match self {
            IngestOutcome::Updated(smoothed) => Some(smoothed),
            _ => None,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, IngestOutcome::Updated(_))
    }
}

/// Store of tag states with an atomic per-tag ingest
pub trait TagStateStore: Send + Sync {
    /// Apply one ranging sample to a tag, creating the tag if needed
    fn ingest(&self, tag_id: &str, anchor_id: &str, distance: f64, rssi: i32) -> IngestOutcome;

    /// Last committed position, or the default position for unknown tags
    fn current_position(&self, tag_id: &str) -> Position;

    /// Restore a tag from its persisted record
    fn seed(&self, record: &TagRecord);

    /// Ids of all tags, sorted
    fn known_tags(&self) -> Vec<String>;
}

/// `TagStateStore` with one lock per tag
pub struct ShardedTagStore {
    tags: RwLock<HashMap<String, Arc<Mutex<TagState>>>>,
    anchors: Arc<AnchorRegistry>,
    solver: Trilateration,
    filter_params: FilterParameters,
    default_position: Position,
    repository: Arc<dyn WarehouseRepository>,
    notifier: Arc<dyn PositionNotifier>,
}

impl ShardedTagStore {
    pub fn new(
        anchors: Arc<AnchorRegistry>,
        repository: Arc<dyn WarehouseRepository>,
        notifier: Arc<dyn PositionNotifier>,
    ) -> Self {
        Self {
            tags: RwLock::new(HashMap::new()),
            anchors,
            solver: Trilateration::default(),
            filter_params: FilterParameters::default(),
            default_position: WAREHOUSE_CENTER,
            repository,
            notifier,
        }
    }

    pub fn with_solver(mut self, solver: Trilateration) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_filter_parameters(mut self, params: FilterParameters) -> Self {
        self.filter_params = params;
        self
    }

    /// Position reported for unknown tags and used to start fresh filters
    pub fn with_default_position(mut self, position: Position) -> Self {
        self.default_position = position;
        self
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of a tag's full state
    pub fn tag_state(&self, tag_id: &str) -> Option<TagState> {
        let entry = self.lookup(tag_id)?;
        let state = lock_state(&entry);
        Some(state.clone())
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mutex<TagState>>>> {
        self.tags.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, tag_id: &str) -> Option<Arc<Mutex<TagState>>> {
        self.read_index().get(tag_id).cloned()
    }

    /// Existing entry, or a new one inserted under the index write lock so
    /// racing first samples for the same tag share a single state
    fn entry(&self, tag_id: &str) -> Arc<Mutex<TagState>> {
        if let Some(entry) = self.lookup(tag_id) {
            return entry;
        }

        let mut index = self.tags.write().unwrap_or_else(PoisonError::into_inner);
        let entry = index.entry(tag_id.to_string()).or_insert_with(|| {
            tracing::info!(tag = tag_id, "new tag detected, creating motion filter");
            Arc::new(Mutex::new(TagState::fresh(
                tag_id,
                self.default_position,
                &self.filter_params,
            )))
        });
        Arc::clone(entry)
    }

    fn register(&self, state: &mut TagState, now_ms: u64) {
        match self.repository.register_tag(&state.id, state.position, now_ms) {
            Ok(_) => state.registered = true,
            Err(e) => tracing::warn!(tag = %state.id, error = %e, "failed to register tag"),
        }
    }

    fn commit(&self, state: &mut TagState, position: Position, now_ms: u64) -> SmoothedPosition {
        state.position = position;
        state.last_update_ms = Some(now_ms);

        let committed = SmoothedPosition {
            tag_id: state.id.clone(),
            position,
            timestamp_ms: now_ms,
        };

        if let Err(e) = self.repository.record_position(&state.id, position, now_ms) {
            tracing::warn!(tag = %state.id, error = %e, "failed to persist position");
        }
        if let Err(e) = self.notifier.notify(&PositionUpdate::from(&committed)) {
            tracing::warn!(tag = %state.id, error = %e, "failed to publish position update");
        }

        committed
    }
}

impl TagStateStore for ShardedTagStore {
    fn ingest(&self, tag_id: &str, anchor_id: &str, distance: f64, rssi: i32) -> IngestOutcome {
        let entry = self.entry(tag_id);
        let mut guard = lock_state(&entry);
        let state = &mut *guard;
        let now_ms = unix_millis();

        if !state.registered {
            self.register(state, now_ms);
        }

        let anchors = &self.anchors;
        let observations: Vec<RangeObservation> = state
            .cache
            .put(anchor_id, distance, rssi)
            .filter_map(|sample| {
                anchors.resolve(&sample.anchor_id).map(|anchor| RangeObservation {
                    anchor_id: sample.anchor_id.clone(),
                    anchor,
                    distance: sample.distance,
                    rssi: sample.rssi,
                })
            })
            .collect();

        if observations.len() < MIN_ANCHORS {
            tracing::debug!(tag = tag_id, usable = observations.len(), "not enough known anchors");
            return IngestOutcome::InsufficientAnchors {
                usable: observations.len(),
            };
        }

        let solution = match self.solver.solve(&observations) {
            Ok(solution) => solution,
            Err(e) => {
                tracing::warn!(tag = tag_id, error = %e, "trilateration failed, keeping previous position");
                return IngestOutcome::SolverFailed(e);
            }
        };

        let smoothed = match state.filter.step(&solution.position) {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(tag = tag_id, error = %e, "filter rejected fix, keeping previous position");
                return IngestOutcome::FilterFailed(e);
            }
        };

        tracing::debug!(
            tag = tag_id,
            raw_x = solution.position.x,
            raw_y = solution.position.y,
            x = smoothed.x,
            y = smoothed.y,
            "position updated"
        );
        IngestOutcome::Updated(self.commit(state, smoothed, now_ms))
    }

    fn current_position(&self, tag_id: &str) -> Position {
        self.lookup(tag_id)
            .map(|entry| lock_state(&entry).position)
            .unwrap_or(self.default_position)
    }

    fn seed(&self, record: &TagRecord) {
        let position = record.last_position();
        let mut state = TagState::fresh(&record.id, position, &self.filter_params);
        state.last_update_ms = record.last_seen_ms;
        state.registered = true;

        let entry = self.entry(&record.id);
        *lock_state(&entry) = state;
    }

    fn known_tags(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_index().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

/// A panic mid-ingest cannot tear a state: every field is committed by plain
/// assignment after all fallible steps
fn lock_state(entry: &Mutex<TagState>) -> MutexGuard<'_, TagState> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
