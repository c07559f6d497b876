//! A* route planning over the navigation graph.
//!
//! Continuous start/goal positions are snapped to the nearest grid node,
//! with half-cell coordinates rounding to the even node. The
//! frontier is ordered by `f = g + h` with a straight-line heuristic; equal
//! `f` scores pop in insertion order so the same query always yields the same
//! route.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::graph::{GridNode, NavigationGraph};
use crate::core::Position;

/// How often (in expansions) the wall-clock budget is checked
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Search bounds for the planner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum node expansions before giving up
    pub max_expansions: usize,
    /// Optional wall-clock budget per search (milliseconds)
    pub time_budget_ms: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_expansions: 1_000_000,
            time_budget_ms: None,
        }
    }
}

/// A route through the graph
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPath {
    /// Nodes from start to goal, inclusive
    pub nodes: Vec<GridNode>,
    /// Sum of edge weights along the route
    pub length: f64,
}

impl PlannedPath {
    pub fn waypoints(&self) -> Vec<Position> {
        self.nodes.iter().map(|n| n.to_position()).collect()
    }
}

/// Result of a planning request
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Found(PlannedPath),
    /// Snapped start node is blocked or off the floor; `None` when the start
    /// position has no grid node at all (non-finite coordinates)
    StartNotInGraph(Option<GridNode>),
    /// Snapped goal node is blocked or off the floor; `None` as for the start
    GoalNotInGraph(Option<GridNode>),
    /// Start and goal lie in disconnected components
    NoRoute,
    /// Expansion or time budget ran out
    SearchBudgetExceeded { expansions: usize },
}

impl PlanOutcome {
    /// Waypoints of the route, empty when no route was found
    pub fn waypoints(&self) -> Vec<Position> {
        match self {
            PlanOutcome::Found(path) => path.waypoints(),
            _ => Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&PlannedPath> {
        match self {
            PlanOutcome::Found(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PlanOutcome::Found(_))
    }
}

/// Frontier entry; ordered so the max-heap pops the lowest f, then the
/// earliest insertion
#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    f_score: f64,
    sequence: u64,
    node: GridNode,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* path planner
#[derive(Debug, Clone, Default)]
pub struct PathPlanner {
    config: PlannerConfig,
}

impl PathPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Plan from a continuous start to a continuous goal
    pub fn plan(&self, graph: &NavigationGraph, start: Position, goal: Position) -> PlanOutcome {
        let Some(start_node) = GridNode::nearest(&start) else {
            tracing::debug!(x = start.x, y = start.y, "start position cannot be snapped to the grid");
            return PlanOutcome::StartNotInGraph(None);
        };
        let Some(goal_node) = GridNode::nearest(&goal) else {
            tracing::debug!(x = goal.x, y = goal.y, "goal position cannot be snapped to the grid");
            return PlanOutcome::GoalNotInGraph(None);
        };
        self.plan_nodes(graph, start_node, goal_node)
    }

    /// Plan between two grid nodes
    pub fn plan_nodes(&self, graph: &NavigationGraph, start: GridNode, goal: GridNode) -> PlanOutcome {
        if !graph.contains(start) {
            tracing::debug!(x = start.x, y = start.y, "start node not in graph");
            return PlanOutcome::StartNotInGraph(Some(start));
        }
        if !graph.contains(goal) {
            tracing::debug!(x = goal.x, y = goal.y, "goal node not in graph");
            return PlanOutcome::GoalNotInGraph(Some(goal));
        }

        let deadline = self
            .config
            .time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let mut open_set = BinaryHeap::new();
        let mut g_score: HashMap<GridNode, f64> = HashMap::new();
        let mut came_from: HashMap<GridNode, GridNode> = HashMap::new();
        let mut closed_set: HashSet<GridNode> = HashSet::new();
        let mut sequence = 0u64;
        let mut expansions = 0usize;

        g_score.insert(start, 0.0);
        open_set.push(FrontierEntry {
            f_score: Self::heuristic(start, goal),
            sequence,
            node: start,
        });

        while let Some(FrontierEntry { node: current, .. }) = open_set.pop() {
            if current == goal {
                let nodes = Self::reconstruct_path(&came_from, current);
                let length = g_score.get(&current).copied().unwrap_or(0.0);
                return PlanOutcome::Found(PlannedPath { nodes, length });
            }

            // Stale heap entry for an already-settled node
            if !closed_set.insert(current) {
                continue;
            }

            expansions += 1;
            if expansions > self.config.max_expansions {
                tracing::warn!(expansions, "A* exceeded max expansions");
                return PlanOutcome::SearchBudgetExceeded { expansions };
            }
            if expansions % DEADLINE_CHECK_INTERVAL == 0 {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        tracing::warn!(expansions, "A* exceeded time budget");
                        return PlanOutcome::SearchBudgetExceeded { expansions };
                    }
                }
            }

            let current_g = g_score.get(&current).copied().unwrap_or(f64::INFINITY);
            for (neighbor, weight) in graph.neighbors(current) {
                if closed_set.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g + weight;
                if tentative_g < g_score.get(&neighbor).copied().unwrap_or(f64::INFINITY) {
                    g_score.insert(neighbor, tentative_g);
                    came_from.insert(neighbor, current);
                    sequence += 1;
                    open_set.push(FrontierEntry {
                        f_score: tentative_g + Self::heuristic(neighbor, goal),
                        sequence,
                        node: neighbor,
                    });
                }
            }
        }

        tracing::debug!(
            start_x = start.x,
            start_y = start.y,
            goal_x = goal.x,
            goal_y = goal.y,
            "no route between start and goal"
        );
        PlanOutcome::NoRoute
    }

    /// Straight-line distance; admissible for both edge models
    fn heuristic(a: GridNode, b: GridNode) -> f64 {
        a.euclidean_distance(&b)
    }

    fn reconstruct_path(came_from: &HashMap<GridNode, GridNode>, goal: GridNode) -> Vec<GridNode> {
        let mut path = vec![goal];
        let mut current = goal;
        while let Some(&previous) = came_from.get(&current) {
            path.push(previous);
            current = previous;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::graph::{BlockedRegion, Connectivity};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn rack() -> BlockedRegion {
        BlockedRegion::new(GridNode::new(10, 10), GridNode::new(20, 20))
    }

    fn warehouse(connectivity: Connectivity) -> NavigationGraph {
        NavigationGraph::from_regions(51, 51, &[rack()], connectivity).unwrap()
    }

    fn assert_connected(path: &PlannedPath, graph: &NavigationGraph) {
        for pair in path.nodes.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(graph.neighbors(a).any(|(n, _)| n == b), "{:?} -> {:?} is not an edge", a, b);
        }
    }

    #[test]
    fn test_open_grid_four_connected_is_manhattan() {
        let graph = NavigationGraph::build(51, 51, &[], Connectivity::Four).unwrap();
        let outcome = PathPlanner::with_defaults().plan(&graph, Position::new(2.0, 3.0), Position::new(40.0, 17.0));

        let path = outcome.path().unwrap();
        assert_abs_diff_eq!(path.length, 38.0 + 14.0, epsilon = 1e-9);
        assert_eq!(path.nodes.len(), 38 + 14 + 1);
        assert_eq!(path.nodes.first(), Some(&GridNode::new(2, 3)));
        assert_eq!(path.nodes.last(), Some(&GridNode::new(40, 17)));
        assert_connected(path, &graph);
    }

    #[test]
    fn test_open_grid_eight_connected_is_octile() {
        let graph = NavigationGraph::build(51, 51, &[], Connectivity::Eight).unwrap();
        let outcome = PathPlanner::with_defaults().plan(&graph, Position::new(0.0, 0.0), Position::new(40.0, 20.0));

        let path = outcome.path().unwrap();
        let octile = 20.0 * std::f64::consts::SQRT_2 + 20.0;
        assert_abs_diff_eq!(path.length, octile, epsilon = 1e-9);
        let straight_line = (40.0f64).hypot(20.0);
        assert!(path.length >= straight_line);
    }

    #[test]
    fn test_route_to_rack_goes_around_obstacle() {
        let graph = warehouse(Connectivity::Four);
        let outcome = PathPlanner::with_defaults().plan(&graph, Position::new(5.0, 5.0), Position::new(15.0, 25.0));

        let path = outcome.path().unwrap();
        assert!(path.nodes.iter().all(|n| !rack().contains(*n)));
        assert_eq!(path.nodes.last(), Some(&GridNode::new(15, 25)));
        assert_abs_diff_eq!(path.length, 30.0, epsilon = 1e-9);
        assert_connected(path, &graph);
    }

    #[test]
    fn test_blocked_goal_returns_empty() {
        let graph = warehouse(Connectivity::Four);
        let outcome = PathPlanner::with_defaults().plan(&graph, Position::new(5.0, 5.0), Position::new(15.2, 14.8));

        assert_eq!(outcome, PlanOutcome::GoalNotInGraph(Some(GridNode::new(15, 15))));
        assert!(outcome.waypoints().is_empty());
    }

    #[test]
    fn test_blocked_or_off_floor_start() {
        let graph = warehouse(Connectivity::Four);
        let planner = PathPlanner::with_defaults();
        assert_eq!(
            planner.plan(&graph, Position::new(12.0, 12.0), Position::new(0.0, 0.0)),
            PlanOutcome::StartNotInGraph(Some(GridNode::new(12, 12)))
        );
        assert_eq!(
            planner.plan(&graph, Position::new(-3.0, 0.0), Position::new(0.0, 0.0)),
            PlanOutcome::StartNotInGraph(Some(GridNode::new(-3, 0)))
        );
    }

    #[test]
    fn test_half_cell_start_snaps_to_even_node() {
        let graph = warehouse(Connectivity::Four);
        let planner = PathPlanner::with_defaults();

        // 20.5 snaps to x = 20, the rack's last column
        assert_eq!(
            planner.plan(&graph, Position::new(20.5, 15.0), Position::new(45.0, 45.0)),
            PlanOutcome::StartNotInGraph(Some(GridNode::new(20, 15)))
        );
        // 21.5 snaps to x = 22, clear of the rack
        let outcome = planner.plan(&graph, Position::new(21.5, 15.0), Position::new(45.0, 45.0));
        assert_eq!(outcome.path().unwrap().nodes.first(), Some(&GridNode::new(22, 15)));
    }

    #[test]
    fn test_non_finite_endpoints_are_not_in_graph() {
        let graph = warehouse(Connectivity::Four);
        let planner = PathPlanner::with_defaults();

        let outcome = planner.plan(&graph, Position::new(f64::NAN, f64::NAN), Position::new(45.0, 45.0));
        assert_eq!(outcome, PlanOutcome::StartNotInGraph(None));
        assert!(outcome.waypoints().is_empty());

        assert_eq!(
            planner.plan(&graph, Position::new(0.0, 0.0), Position::new(f64::INFINITY, 3.0)),
            PlanOutcome::GoalNotInGraph(None)
        );
        assert_eq!(
            planner.plan(&graph, Position::new(f64::NEG_INFINITY, 0.0), Position::new(f64::NAN, 3.0)),
            PlanOutcome::StartNotInGraph(None)
        );
    }

    #[test]
    fn test_enclosed_goal_has_no_route() {
        // Ring of racks around (5, 5)
        let ring = [
            BlockedRegion::new(GridNode::new(3, 3), GridNode::new(7, 3)),
            BlockedRegion::new(GridNode::new(3, 7), GridNode::new(7, 7)),
            BlockedRegion::new(GridNode::new(3, 4), GridNode::new(3, 6)),
            BlockedRegion::new(GridNode::new(7, 4), GridNode::new(7, 6)),
        ];
        let graph = NavigationGraph::from_regions(20, 20, &ring, Connectivity::Eight).unwrap();
        let outcome = PathPlanner::with_defaults().plan_nodes(&graph, GridNode::new(15, 15), GridNode::new(5, 5));

        assert_eq!(outcome, PlanOutcome::NoRoute);
        assert!(outcome.waypoints().is_empty());
    }

    #[test]
    fn test_start_equals_goal() {
        let graph = warehouse(Connectivity::Four);
        let outcome = PathPlanner::with_defaults().plan(&graph, Position::new(30.2, 30.1), Position::new(29.8, 30.0));

        let path = outcome.path().unwrap();
        assert_eq!(path.nodes, vec![GridNode::new(30, 30)]);
        assert_eq!(path.length, 0.0);
    }

    #[test]
    fn test_expansion_budget() {
        let graph = warehouse(Connectivity::Four);
        let planner = PathPlanner::new(PlannerConfig {
            max_expansions: 5,
            time_budget_ms: None,
        });
        let outcome = planner.plan(&graph, Position::new(0.0, 0.0), Position::new(50.0, 50.0));
        assert_eq!(outcome, PlanOutcome::SearchBudgetExceeded { expansions: 6 });
    }

    #[test]
    fn test_time_budget() {
        let graph = warehouse(Connectivity::Four);
        let planner = PathPlanner::new(PlannerConfig {
            time_budget_ms: Some(0),
            ..PlannerConfig::default()
        });

        // The corner-to-corner search settles far more than one check interval
        // of nodes, and a zero budget has expired by the first check
        let outcome = planner.plan(&graph, Position::new(0.0, 0.0), Position::new(50.0, 50.0));
        assert_eq!(
            outcome,
            PlanOutcome::SearchBudgetExceeded {
                expansions: DEADLINE_CHECK_INTERVAL
            }
        );
        assert!(outcome.waypoints().is_empty());

        let unbounded = PathPlanner::with_defaults().plan(&graph, Position::new(0.0, 0.0), Position::new(50.0, 50.0));
        assert!(unbounded.is_found());
    }

    #[test]
    fn test_planning_is_deterministic() {
        let graph = warehouse(Connectivity::Eight);
        let planner = PathPlanner::with_defaults();
        let first = planner.plan(&graph, Position::new(1.0, 48.0), Position::new(47.0, 2.0));
        let second = planner.plan(&graph, Position::new(1.0, 48.0), Position::new(47.0, 2.0));
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_path_never_enters_blocked_region(
            x0 in 0i32..30, y0 in 0i32..30, w in 1i32..10, h in 1i32..10,
            sx in 0i32..40, sy in 0i32..40, gx in 0i32..40, gy in 0i32..40,
        ) {
            let region = BlockedRegion::new(GridNode::new(x0, y0), GridNode::new(x0 + w, y0 + h));
            let start = GridNode::new(sx, sy);
            let goal = GridNode::new(gx, gy);
            prop_assume!(!region.contains(start) && !region.contains(goal));

            let graph = NavigationGraph::from_regions(40, 40, &[region], Connectivity::Eight).unwrap();
            let outcome = PathPlanner::with_defaults().plan_nodes(&graph, start, goal);

            // A single rectangle never disconnects a 40x40 floor it fits in
            let path = outcome.path().unwrap();
            prop_assert!(path.nodes.iter().all(|n| !region.contains(*n)));
            prop_assert_eq!(path.nodes.first(), Some(&start));
            prop_assert_eq!(path.nodes.last(), Some(&goal));
            prop_assert!(path.length + 1e-9 >= start.euclidean_distance(&goal));
        }
    }
}
