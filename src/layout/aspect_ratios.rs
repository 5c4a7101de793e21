//! Sparse storage for weighted item aspect ratios.
//!
//! Ratios are tracked in blocks of 64 contiguous items so memory
//! scales with the realized window, not the collection. As scrolling
//! jumps around the collection, blocks near the new area are kept and
//! the farthest ones are recycled. The owner bounds the total number
//! of tracked records (about 10 viewports worth of items).

use tracing::trace;

/// Number of records per block. Block start indexes are always
/// multiples of this so two blocks can never overlap.
const BLOCK_SIZE: usize = 64;

/// Cleared blocks kept allocated for reuse.
const RETAINED_BLOCK_COUNT: usize = 4;

/// Maximum confidence weight. Records at this weight contribute to
/// range averages even when they fall outside the averaged range.
pub const MAX_WEIGHT: u8 = 16;

/// A weighted aspect-ratio sample. Weight 0 means "no sample".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AspectRatio {
    pub ratio: f64,
    pub weight: u8,
}

impl AspectRatio {
    pub const EMPTY: AspectRatio = AspectRatio {
        ratio: 0.0,
        weight: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.weight == 0
    }
}

/// The weight to store for a fresh sample.
///
/// A desired width above the effective min width is a fully loaded
/// item and is trusted outright. Anything else ramps up by doubling,
/// so lazily loading placeholders need several confirming passes
/// before they steer the average.
pub fn next_weight(previous: u8, trusted: bool) -> u8 {
    if trusted {
        MAX_WEIGHT
    } else if previous == 0 {
        1
    } else {
        (previous * 2).min(MAX_WEIGHT)
    }
}

#[derive(Debug)]
struct Block {
    /// First item index covered, or `None` when the block is cleared.
    start_index: Option<usize>,
    records: [AspectRatio; BLOCK_SIZE],
}

impl Block {
    fn new() -> Self {
        Self {
            start_index: None,
            records: [AspectRatio::EMPTY; BLOCK_SIZE],
        }
    }

    fn end_index(&self) -> Option<usize> {
        self.start_index.map(|start| start + BLOCK_SIZE - 1)
    }

    fn includes(&self, item_index: usize) -> bool {
        match self.start_index {
            Some(start) => item_index >= start && item_index < start + BLOCK_SIZE,
            None => false,
        }
    }

    fn center(&self) -> Option<usize> {
        self.start_index.map(|start| start + BLOCK_SIZE / 2)
    }

    fn get(&self, item_index: usize) -> AspectRatio {
        let start = self.start_index.expect("block must be anchored");
        self.records[item_index - start]
    }

    fn set(&mut self, item_index: usize, record: AspectRatio) {
        let start = self.start_index.expect("block must be anchored");
        self.records[item_index - start] = record;
    }

    fn clear(&mut self) {
        self.start_index = None;
        self.records = [AspectRatio::EMPTY; BLOCK_SIZE];
    }

    /// Sums `ratio * weight` and `weight` over records that lie in
    /// `[first_item, last_item]` or carry exactly `required_weight`.
    fn totals(&self, first_item: usize, last_item: usize, required_weight: u8) -> (f64, u32) {
        let Some(start) = self.start_index else {
            return (0.0, 0);
        };

        let mut total_ratio = 0.0;
        let mut total_weight = 0u32;
        for (offset, record) in self.records.iter().enumerate() {
            let item_index = start + offset;
            let in_range = item_index >= first_item && item_index <= last_item;
            if record.weight == required_weight || (in_range && record.weight > 0) {
                total_ratio += record.ratio * f64::from(record.weight);
                total_weight += u32::from(record.weight);
            }
        }
        (total_ratio, total_weight)
    }

    fn has_lower_weight(&self, first_item: usize, last_item: usize, required_weight: u8) -> bool {
        let Some(start) = self.start_index else {
            return false;
        };

        self.records.iter().enumerate().any(|(offset, record)| {
            let item_index = start + offset;
            record.weight > 0
                && record.weight < required_weight
                && item_index >= first_item
                && item_index <= last_item
        })
    }
}

/// Block-sparse collection of [`AspectRatio`] records.
#[derive(Debug)]
pub struct AspectRatioStore {
    blocks: Vec<Block>,
}

impl AspectRatioStore {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// False when at least one ratio is tracked.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| block.start_index.is_none())
    }

    /// The record stored for `item_index`, or the empty record.
    pub fn get(&self, item_index: usize) -> AspectRatio {
        self.blocks
            .iter()
            .find(|block| block.includes(item_index))
            .map(|block| block.get(item_index))
            .unwrap_or(AspectRatio::EMPTY)
    }

    /// Stores `record` for `item_index`, anchoring a recycled block
    /// when no existing block covers the index.
    pub fn set(&mut self, item_index: usize, record: AspectRatio) {
        if let Some(block) = self.blocks.iter_mut().find(|block| block.includes(item_index)) {
            block.set(item_index, record);
            return;
        }

        if self.blocks.is_empty() {
            self.blocks.push(Block::new());
        }

        let slot = self.empty_or_farthest_block(item_index);
        let block = &mut self.blocks[slot];
        if block.start_index.is_some() {
            trace!(
                evicted_start = ?block.start_index,
                item_index,
                "recycling farthest aspect-ratio block"
            );
            block.clear();
        }
        block.start_index = Some((item_index / BLOCK_SIZE) * BLOCK_SIZE);
        block.set(item_index, record);
    }

    /// Weighted average over `[first_item, last_item]`, also counting
    /// out-of-range records whose weight equals `required_weight`.
    /// Returns 0.0 when nothing contributes.
    pub fn average(&self, first_item: usize, last_item: usize, required_weight: u8) -> f64 {
        let mut total_ratio = 0.0;
        let mut total_weight = 0u32;
        for block in &self.blocks {
            let (ratio, weight) = block.totals(first_item, last_item, required_weight);
            total_ratio += ratio;
            total_weight += weight;
        }

        if total_ratio > 0.0 && total_weight > 0 {
            total_ratio / f64::from(total_weight)
        } else {
            0.0
        }
    }

    /// True when a record in `[first_item, last_item]` has a weight
    /// strictly between 0 and `required_weight`. Drivers use this to
    /// schedule extra passes so confidence can grow.
    pub fn has_lower_weight(&self, first_item: usize, last_item: usize, required_weight: u8) -> bool {
        self.blocks
            .iter()
            .any(|block| block.has_lower_weight(first_item, last_item, required_weight))
    }

    /// Grows or shrinks capacity to hold `record_count` records.
    /// Shrinking recycles empty blocks first, then the blocks
    /// farthest from `reference_item_index`.
    pub fn resize(&mut self, record_count: usize, reference_item_index: usize) {
        let required = record_count.div_ceil(BLOCK_SIZE).max(1);
        let existing = self.blocks.len();

        if required == existing {
            return;
        }

        trace!(record_count, required, existing, "resizing aspect-ratio store");

        if required > existing {
            for _ in existing..required {
                self.blocks.push(Block::new());
            }
        } else {
            for _ in required..existing {
                let slot = self.empty_or_farthest_block(reference_item_index);
                self.blocks.swap_remove(slot);
            }
        }
    }

    /// Clears every record, keeping a few allocated blocks for reuse.
    pub fn clear(&mut self) {
        self.blocks.truncate(RETAINED_BLOCK_COUNT);
        for block in &mut self.blocks {
            block.clear();
        }
    }

    /// Index of an empty block, or of the block whose center lies
    /// farthest from `from_item_index`.
    fn empty_or_farthest_block(&self, from_item_index: usize) -> usize {
        debug_assert!(!self.blocks.is_empty());

        let mut farthest = 0;
        let mut farthest_distance = 0usize;
        for (slot, block) in self.blocks.iter().enumerate() {
            match block.center() {
                None => return slot,
                Some(center) => {
                    let distance = center.abs_diff(from_item_index);
                    if distance >= farthest_distance {
                        farthest = slot;
                        farthest_distance = distance;
                    }
                }
            }
        }
        farthest
    }
}

impl Default for AspectRatioStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ratio: f64, weight: u8) -> AspectRatio {
        AspectRatio { ratio, weight }
    }

    #[test]
    fn test_empty_store() {
        let store = AspectRatioStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(3), AspectRatio::EMPTY);
        assert_eq!(store.average(0, 100, MAX_WEIGHT), 0.0);
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut store = AspectRatioStore::new();
        store.resize(128, 0);
        store.set(5, record(1.5, 16));
        store.set(70, record(0.75, 4));

        assert_eq!(store.get(5), record(1.5, 16));
        assert_eq!(store.get(70), record(0.75, 4));
        assert_eq!(store.get(6), AspectRatio::EMPTY);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_block_alignment() {
        let mut store = AspectRatioStore::new();
        store.resize(64, 0);
        store.set(100, record(1.0, 16));
        // 100 lands in the block anchored at 64; 64 and 127 are
        // reachable, 63 and 128 are not.
        store.set(64, record(2.0, 16));
        store.set(127, record(3.0, 16));
        assert_eq!(store.get(64).ratio, 2.0);
        assert_eq!(store.get(127).ratio, 3.0);
        assert_eq!(store.get(63), AspectRatio::EMPTY);
        assert_eq!(store.get(128), AspectRatio::EMPTY);
    }

    #[test]
    fn test_eviction_prefers_farthest_block() {
        let mut store = AspectRatioStore::new();
        store.resize(128, 0); // two blocks
        store.set(0, record(1.0, 16)); // block [0, 63]
        store.set(1000, record(2.0, 16)); // block [960, 1023]

        // No free block: storing near 1000 must evict [0, 63].
        store.set(900, record(3.0, 16));
        assert_eq!(store.get(0), AspectRatio::EMPTY);
        assert_eq!(store.get(1000).ratio, 2.0);
        assert_eq!(store.get(900).ratio, 3.0);
    }

    #[test]
    fn test_weighted_average_in_range() {
        let mut store = AspectRatioStore::new();
        store.resize(64, 0);
        store.set(0, record(1.0, 4));
        store.set(1, record(2.0, 12));

        let average = store.average(0, 1, MAX_WEIGHT);
        let expected = (1.0 * 4.0 + 2.0 * 12.0) / 16.0;
        assert!((average - expected).abs() < 1e-9);
    }

    #[test]
    fn test_max_weight_records_count_outside_range() {
        let mut store = AspectRatioStore::new();
        store.resize(128, 0);
        store.set(0, record(1.0, 16));
        store.set(100, record(3.0, 16));
        store.set(101, record(9.0, 8)); // outside range, not max weight

        let average = store.average(0, 10, MAX_WEIGHT);
        let expected = (1.0 * 16.0 + 3.0 * 16.0) / 32.0;
        assert!((average - expected).abs() < 1e-9);
    }

    #[test]
    fn test_has_lower_weight() {
        let mut store = AspectRatioStore::new();
        store.resize(64, 0);
        store.set(3, record(1.0, 16));
        assert!(!store.has_lower_weight(0, 63, MAX_WEIGHT));

        store.set(4, record(1.0, 2));
        assert!(store.has_lower_weight(0, 63, MAX_WEIGHT));
        assert!(!store.has_lower_weight(5, 63, MAX_WEIGHT));
    }

    #[test]
    fn test_clear_retains_a_few_blocks() {
        let mut store = AspectRatioStore::new();
        store.resize(BLOCK_SIZE * 8, 0);
        assert_eq!(store.blocks.len(), 8);

        store.set(10, record(1.0, 16));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.blocks.len(), RETAINED_BLOCK_COUNT);
    }

    #[test]
    fn test_resize_shrinks_away_from_reference() {
        let mut store = AspectRatioStore::new();
        store.resize(256, 0); // four blocks
        store.set(0, record(1.0, 16));
        store.set(64, record(1.0, 16));
        store.set(1000, record(2.0, 16));

        // Shrink to two blocks, keeping the area around item 0.
        store.resize(128, 0);
        assert_eq!(store.get(0).ratio, 1.0);
        assert_eq!(store.get(64).ratio, 1.0);
        assert_eq!(store.get(1000), AspectRatio::EMPTY);
    }

    #[test]
    fn test_next_weight_ramp() {
        assert_eq!(next_weight(0, true), 16);
        assert_eq!(next_weight(0, false), 1);
        assert_eq!(next_weight(1, false), 2);
        assert_eq!(next_weight(8, false), 16);
        assert_eq!(next_weight(16, false), 16);
    }
}
