//! Warehouse Locator
//!
//! Indoor asset localization and route planning for a warehouse floor.
//! Fixed radio anchors report ranges to mobile tags; ranges are fused by
//! trilateration and a per-tag Kalman filter into a smoothed 2D position,
//! and an A* planner routes tags around racks to named destinations.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod tracking;
pub mod navigation;
pub mod storage;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use crate::core::{Anchor, Destination, Position, SmoothedPosition, TagRecord, WAREHOUSE_CENTER};
pub use algorithms::{RangeObservation, SolverConfig, Trilateration, TrilaterationError};
pub use processing::{FilterParameters, MessageParser, MotionFilter, ParseError, RangingCache};
pub use tracking::{AnchorRegistry, IngestOutcome, ShardedTagStore, TagStateStore};
pub use navigation::{Connectivity, GridNode, NavigationGraph, PathPlanner, PlanOutcome};
pub use storage::{InMemoryRepository, StorageError, WarehouseRepository};
pub use utils::{ConfigError, SystemConfig};
pub use api::{
    ApiError, ApiResult, LocatorService, MessageOutcome, PathRequest, PathResponse, PositionNotifier,
    PositionResponse, PositionUpdate,
};
