//! Static grid graph over the warehouse floor.
//!
//! One node per integer coordinate of the footprint; obstacle cells (racks)
//! are removed. Edges join adjacent free nodes and are weighted by their
//! Euclidean length. Built once at startup and shared read-only.

use std::f64::consts::SQRT_2;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Position;

static ORTHOGONAL: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
static DIAGONAL: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// Integer grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridNode {
    pub x: i32,
    pub y: i32,
}

impl GridNode {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Snap a continuous position to the nearest node, rounding half-cells
    /// to even. `None` when either coordinate is not finite or falls outside
    /// the `i32` range.
    pub fn nearest(position: &Position) -> Option<Self> {
        let snap = |v: f64| {
            let rounded = v.round_ties_even();
            (rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64).then_some(rounded as i32)
        };
        if !position.is_finite() {
            return None;
        }
        Some(Self {
            x: snap(position.x)?,
            y: snap(position.y)?,
        })
    }

    pub fn to_position(self) -> Position {
        Position::new(self.x as f64, self.y as f64)
    }

    pub fn euclidean_distance(&self, other: &GridNode) -> f64 {
        ((self.x - other.x) as f64).hypot((self.y - other.y) as f64)
    }

    pub fn manhattan_distance(&self, other: &GridNode) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// Edge model between neighbouring cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Up/down/left/right, unit weight
    #[default]
    Four,
    /// Adds diagonals of weight √2; a diagonal is only usable when both
    /// orthogonal cells beside it are free
    Eight,
}

/// Axis-aligned block of obstacle cells, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRegion {
    pub min: GridNode,
    pub max: GridNode,
}

impl BlockedRegion {
    pub const fn new(min: GridNode, max: GridNode) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, node: GridNode) -> bool {
        (self.min.x..=self.max.x).contains(&node.x) && (self.min.y..=self.max.y).contains(&node.y)
    }

    pub fn cells(&self) -> impl Iterator<Item = GridNode> + '_ {
        (self.min.x..=self.max.x)
            .flat_map(move |x| (self.min.y..=self.max.y).map(move |y| GridNode::new(x, y)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("invalid grid dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },
    #[error("blocked cell ({}, {}) lies outside the {width}x{height} grid", .cell.x, .cell.y)]
    BlockedCellOutOfBounds { cell: GridNode, width: i32, height: i32 },
}

/// Immutable navigability graph
#[derive(Debug, Clone)]
pub struct NavigationGraph {
    width: i32,
    height: i32,
    connectivity: Connectivity,
    /// Row-major free mask, `true` = walkable
    free: Vec<bool>,
    free_count: usize,
}

impl NavigationGraph {
    /// Build a `width` x `height` node grid with the given cells removed
    pub fn build(
        width: i32,
        height: i32,
        blocked: &[GridNode],
        connectivity: Connectivity,
    ) -> Result<Self, GraphError> {
        Self::build_from(width, height, blocked.iter().copied(), connectivity)
    }

    /// Build with rectangular obstacle regions
    pub fn from_regions(
        width: i32,
        height: i32,
        regions: &[BlockedRegion],
        connectivity: Connectivity,
    ) -> Result<Self, GraphError> {
        Self::build_from(width, height, regions.iter().flat_map(|r| r.cells()), connectivity)
    }

    fn build_from(
        width: i32,
        height: i32,
        blocked: impl IntoIterator<Item = GridNode>,
        connectivity: Connectivity,
    ) -> Result<Self, GraphError> {
        if width <= 0 || height <= 0 {
            return Err(GraphError::InvalidDimensions { width, height });
        }

        let mut free = vec![true; width as usize * height as usize];
        for cell in blocked {
            if !(0..width).contains(&cell.x) || !(0..height).contains(&cell.y) {
                return Err(GraphError::BlockedCellOutOfBounds { cell, width, height });
            }
            free[(cell.y * width + cell.x) as usize] = false;
        }
        let free_count = free.iter().filter(|&&f| f).count();

        Ok(Self {
            width,
            height,
            connectivity,
            free,
            free_count,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Whether `node` is a walkable member of the graph
    pub fn contains(&self, node: GridNode) -> bool {
        (0..self.width).contains(&node.x)
            && (0..self.height).contains(&node.y)
            && self.free[(node.y * self.width + node.x) as usize]
    }

    /// Free neighbours of `node` with their edge weights
    pub fn neighbors(&self, node: GridNode) -> impl Iterator<Item = (GridNode, f64)> + '_ {
        let member = self.contains(node);
        let diagonals: &[(i32, i32)] = match self.connectivity {
            Connectivity::Four => &[],
            Connectivity::Eight => &DIAGONAL,
        };

        let straight = ORTHOGONAL
            .iter()
            .map(move |&(dx, dy)| (GridNode::new(node.x + dx, node.y + dy), 1.0));
        let diagonal = diagonals
            .iter()
            .filter(move |&&(dx, dy)| {
                self.contains(GridNode::new(node.x + dx, node.y))
                    && self.contains(GridNode::new(node.x, node.y + dy))
            })
            .map(move |&(dx, dy)| (GridNode::new(node.x + dx, node.y + dy), SQRT_2));

        straight
            .chain(diagonal)
            .filter(move |&(next, _)| member && self.contains(next))
    }

    pub fn node_count(&self) -> usize {
        self.free_count
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        let directed: usize = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| GridNode::new(x, y)))
            .map(|node| self.neighbors(node).count())
            .sum();
        directed / 2
    }
}
