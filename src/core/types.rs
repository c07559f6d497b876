//! Core data types for the localization pipeline

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// 2D position on the warehouse floor plane (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn from_vector(v: &Vector2<f64>) -> Self {
        Self { x: v.x, y: v.y }
    }
}

/// Fixed radio anchor with a surveyed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    #[serde(flatten)]
    pub position: Position,
}

impl Anchor {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            position: Position::new(x, y),
        }
    }
}

/// Named navigation target (rack, dock, office)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(flatten)]
    pub position: Position,
}

impl Destination {
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            position: Position::new(x, y),
        }
    }
}

/// Persisted last-known state of a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub last_x: f64,
    pub last_y: f64,
    /// Milliseconds since the Unix epoch of the last committed fix
    #[serde(default)]
    pub last_seen_ms: Option<u64>,
}

impl TagRecord {
    pub fn last_position(&self) -> Position {
        Position::new(self.last_x, self.last_y)
    }
}

/// Smoothed position committed for a tag by one ingest cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedPosition {
    pub tag_id: String,
    pub position: Position,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_serializes_flat() {
        let anchor = Anchor::new("ANCHOR_1", 0.0, 50.0);
        let json = serde_json::to_value(&anchor).unwrap();
        assert_eq!(json, serde_json::json!({"id": "ANCHOR_1", "x": 0.0, "y": 50.0}));
    }

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
    }
}
