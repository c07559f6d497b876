use std::collections::HashMap;

use crate::core::{Anchor, Position};

/// Read-only lookup of surveyed anchor positions, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    positions: HashMap<String, Position>,
}

impl AnchorRegistry {
    pub fn from_anchors<I>(anchors: I) -> Self
    where
        I: IntoIterator<Item = Anchor>,
    {
        Self {
            positions: anchors.into_iter().map(|a| (a.id, a.position)).collect(),
        }
    }

    /// Position of a known anchor; unknown ids resolve to `None`
    pub fn resolve(&self, anchor_id: &str) -> Option<Position> {
        self.positions.get(anchor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Anchor ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.positions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = AnchorRegistry::from_anchors(vec![
            Anchor::new("ANCHOR_2", 50.0, 0.0),
            Anchor::new("ANCHOR_1", 0.0, 0.0),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("ANCHOR_2"), Some(Position::new(50.0, 0.0)));
        assert_eq!(registry.resolve("ANCHOR_9"), None);
        assert_eq!(registry.ids(), vec!["ANCHOR_1", "ANCHOR_2"]);
    }
}
