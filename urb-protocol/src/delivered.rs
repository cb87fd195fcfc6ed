//! Receiver-side duplicate tracking
//!
//! Records which (source, packet id) pairs have already been received so that
//! retransmitted packets are re-acknowledged but never handed to reassembly a
//! second time.
//!
//! Packet ids from one source increase from 1 and almost always arrive close
//! to in order, so each source keeps a contiguous watermark (every id up to it
//! was seen) plus a sparse set of ids above it. Memory grows with the number
//! of out-of-order arrivals, not with the length of the run.

use crate::message::{PacketId, ProcessId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct SourceWindow {
    /// Every id in `1..=watermark` has been seen
    watermark: PacketId,
    /// Seen ids above `watermark + 1`
    above: BTreeSet<PacketId>,
}

impl SourceWindow {
    fn contains(&self, id: PacketId) -> bool {
        id <= self.watermark || self.above.contains(&id)
    }

    fn insert(&mut self, id: PacketId) -> bool {
        if self.contains(id) {
            return false;
        }

        if id == self.watermark + 1 {
            self.watermark = id;
            // Absorb ids that are now contiguous
            while self.above.remove(&(self.watermark + 1)) {
                self.watermark += 1;
            }
        } else {
            self.above.insert(id);
        }
        true
    }
}

/// Set of (source, packet id) pairs already received
#[derive(Debug, Default)]
pub struct DeliveredTracker {
    sources: HashMap<ProcessId, SourceWindow>,
}

impl DeliveredTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet, returning true if it had not been seen before
    ///
    /// The check and the insert happen together, so a caller holding the
    /// tracker's lock can use the result to decide on delivery.
    pub fn insert(&mut self, source: ProcessId, packet_id: PacketId) -> bool {
        self.sources.entry(source).or_default().insert(packet_id)
    }

    /// Check if a packet was already received
    pub fn contains(&self, source: ProcessId, packet_id: PacketId) -> bool {
        self.sources
            .get(&source)
            .map_or(false, |window| window.contains(packet_id))
    }

    /// Highest id below which every packet from `source` was received
    pub fn watermark(&self, source: ProcessId) -> PacketId {
        self.sources.get(&source).map_or(0, |w| w.watermark)
    }

    /// Number of ids held individually (not covered by a watermark)
    pub fn sparse_len(&self) -> usize {
        self.sources.values().map(|w| w.above.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_ids_compact() {
        let mut tracker = DeliveredTracker::new();
        for id in 1..=1000 {
            assert!(tracker.insert(1, id));
        }

        assert_eq!(tracker.watermark(1), 1000);
        assert_eq!(tracker.sparse_len(), 0);
        assert!(tracker.contains(1, 500));
        assert!(!tracker.contains(1, 1001));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut tracker = DeliveredTracker::new();
        assert!(tracker.insert(2, 1));
        assert!(!tracker.insert(2, 1));

        assert!(tracker.insert(2, 5));
        assert!(!tracker.insert(2, 5));
    }

    #[test]
    fn test_gap_fill_advances_watermark() {
        let mut tracker = DeliveredTracker::new();
        tracker.insert(1, 3);
        tracker.insert(1, 4);
        tracker.insert(1, 6);
        assert_eq!(tracker.watermark(1), 0);
        assert_eq!(tracker.sparse_len(), 3);

        tracker.insert(1, 1);
        tracker.insert(1, 2);
        assert_eq!(tracker.watermark(1), 4);
        assert_eq!(tracker.sparse_len(), 1);

        tracker.insert(1, 5);
        assert_eq!(tracker.watermark(1), 6);
        assert_eq!(tracker.sparse_len(), 0);
    }

    #[test]
    fn test_sources_are_independent() {
        let mut tracker = DeliveredTracker::new();
        assert!(tracker.insert(1, 1));
        assert!(tracker.insert(2, 1));
        assert!(!tracker.contains(3, 1));
    }
}
