//! Warehouse navigability graph and route planning

pub mod graph;
pub mod planner;

pub use graph::{BlockedRegion, Connectivity, GraphError, GridNode, NavigationGraph};
pub use planner::{PathPlanner, PlanOutcome, PlannedPath, PlannerConfig};
