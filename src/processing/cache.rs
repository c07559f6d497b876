use std::collections::BTreeMap;

/// Latest range reported by one anchor for a tag
#[derive(Debug, Clone, PartialEq)]
pub struct RangingSample {
    pub anchor_id: String,
    /// Measured distance (meters, non-negative)
    pub distance: f64,
    /// Received signal strength, only used to rank anchors
    pub rssi: i32,
    /// Arrival order within the owning cache
    pub sequence: u64,
}

/// Per-tag cache holding the most recent sample from each anchor.
///
/// A newer sample from the same anchor replaces the old one in place. Nothing
/// is ever evicted: an anchor that stops reporting keeps contributing its last
/// range to later fixes. Samples iterate in anchor-id order, which is what
/// keeps the strongest-anchor selection deterministic on RSSI ties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangingCache {
    samples: BTreeMap<String, RangingSample>,
    next_sequence: u64,
    /// Number of puts that overwrote an existing anchor entry
    replaced_count: usize,
}

impl RangingCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the sample for `anchor_id`, then return every sample
    /// currently held for the tag.
    pub fn put(
        &mut self,
        anchor_id: &str,
        distance: f64,
        rssi: i32,
    ) -> impl ExactSizeIterator<Item = &RangingSample> + '_ {
        let sample = RangingSample {
            anchor_id: anchor_id.to_string(),
            distance,
            rssi,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        if self.samples.insert(anchor_id.to_string(), sample).is_some() {
            self.replaced_count += 1;
        }

        self.samples.values()
    }

    /// All cached samples in anchor-id order
    pub fn samples(&self) -> impl ExactSizeIterator<Item = &RangingSample> + '_ {
        self.samples.values()
    }

    /// Cached sample for one anchor
    pub fn get(&self, anchor_id: &str) -> Option<&RangingSample> {
        self.samples.get(anchor_id)
    }

    /// Number of distinct anchors seen
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total number of samples accepted, including replacements
    pub fn total_puts(&self) -> u64 {
        self.next_sequence
    }

    pub fn replaced_count(&self) -> usize {
        self.replaced_count
    }
}
