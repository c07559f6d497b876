//! Floor constants shared by the estimation and planning pipeline

use super::types::Position;

/// Centre of the default 50m x 50m floor. Tags sit here until their first fix.
pub const WAREHOUSE_CENTER: Position = Position { x: 25.0, y: 25.0 };

/// Minimum number of anchors with known positions needed for a fix
pub const MIN_ANCHORS: usize = 3;
