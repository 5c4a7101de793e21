//! Per-item sizing info collected from the host.
//!
//! The regular path keeps a sliding window of desired aspect ratios,
//! optional min/max widths and computed arrange widths over the sized
//! item range, stitched across measures so each request only covers
//! the missing prefix or suffix. Full-collection answers (or arrays
//! pushed ahead of time) enable the fast path.

use tracing::debug;

use crate::host::ItemsInfoResponse;

/// Unspecified width marker in host data.
const UNSPECIFIED: f64 = -1.0;

/// What applying a host answer established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The answer covers the entire collection; the fast path may
    /// run.
    CoversCollection,
    /// The answer covers part of the window; the regular path
    /// consumes it.
    Applied,
    /// Nothing usable came back.
    Empty,
}

/// Sliding-window sizing cache plus the pre-supplied full-collection
/// arrays.
#[derive(Debug, Default)]
pub struct ItemsInfoCache {
    window_first: usize,
    ratios: Vec<f64>,
    min_widths: Vec<f64>,
    max_widths: Vec<f64>,
    arrange_widths: Vec<f64>,
    global_min_width: f64,
    global_max_width: f64,
    requested_start: Option<usize>,
    requested_length: usize,
    fast_ratios: Vec<f64>,
    fast_min_widths: Vec<f64>,
    fast_max_widths: Vec<f64>,
}

impl ItemsInfoCache {
    pub fn new() -> Self {
        Self {
            global_min_width: UNSPECIFIED,
            global_max_width: UNSPECIFIED,
            ..Self::default()
        }
    }

    /// Discards the sliding window and the request bookkeeping.
    pub fn reset(&mut self) {
        self.window_first = 0;
        self.ratios.clear();
        self.min_widths.clear();
        self.max_widths.clear();
        self.arrange_widths.clear();
        self.global_min_width = UNSPECIFIED;
        self.global_max_width = UNSPECIFIED;
        self.requested_start = None;
        self.requested_length = 0;
    }

    /// Discards the pre-supplied full-collection arrays.
    pub fn reset_fast(&mut self) {
        self.fast_ratios.clear();
        self.fast_min_widths.clear();
        self.fast_max_widths.clear();
    }

    /// First index and length of the current window.
    pub fn window(&self) -> Option<(usize, usize)> {
        (!self.ratios.is_empty()).then_some((self.window_first, self.ratios.len()))
    }

    /// True when any ratio in the window came from the host.
    pub fn has_window_info(&self) -> bool {
        self.ratios.iter().any(|ratio| *ratio > 0.0)
    }

    pub fn set_fast_desired_aspect_ratios(&mut self, values: &[f64]) {
        self.fast_ratios = values.to_vec();
    }

    pub fn set_fast_min_widths(&mut self, values: &[f64]) {
        self.fast_min_widths = values.to_vec();
    }

    pub fn set_fast_max_widths(&mut self, values: &[f64]) {
        self.fast_max_widths = values.to_vec();
    }

    /// True when pushed arrays cover every item.
    pub fn has_full_fast_info(&self, item_count: usize) -> bool {
        item_count > 0 && self.fast_ratios.len() >= item_count
    }

    /// Turns the pushed arrays into a full-collection response.
    pub fn take_fast_response(&mut self) -> ItemsInfoResponse {
        let mut response = ItemsInfoResponse {
            start_index: 0,
            min_width: UNSPECIFIED,
            max_width: UNSPECIFIED,
            desired_aspect_ratios: std::mem::take(&mut self.fast_ratios),
            min_widths: std::mem::take(&mut self.fast_min_widths),
            max_widths: std::mem::take(&mut self.fast_max_widths),
        };
        response.min_widths.truncate(response.desired_aspect_ratios.len());
        response.max_widths.truncate(response.desired_aspect_ratios.len());
        response
    }

    pub fn record_request(&mut self, start: usize, length: usize) {
        self.requested_start = Some(start);
        self.requested_length = length;
    }

    pub fn requested_range_start_index(&self) -> i32 {
        self.requested_start.map_or(-1, |start| start as i32)
    }

    pub fn requested_range_length(&self) -> i32 {
        if self.requested_start.is_some() {
            self.requested_length as i32
        } else {
            -1
        }
    }

    /// Re-targets the window at `[new_first, new_first + new_len)`,
    /// keeping overlapping entries, and returns the sub-ranges
    /// (start, length) the host still needs to be asked about.
    pub fn rebase(&mut self, new_first: usize, new_len: usize) -> Vec<(usize, usize)> {
        if new_len == 0 {
            self.reset_window_arrays(new_first, 0);
            return Vec::new();
        }

        let old = self.window();
        let new_last = new_first + new_len - 1;

        let Some((old_first, old_len)) = old else {
            self.reset_window_arrays(new_first, new_len);
            return vec![(new_first, new_len)];
        };
        let old_last = old_first + old_len - 1;

        if new_first > old_last || new_last < old_first {
            debug!(
                old_first,
                old_len, new_first, new_len, "sizing window disjoint, rebuilding"
            );
            self.reset_window_arrays(new_first, new_len);
            return vec![(new_first, new_len)];
        }

        let mut ratios = vec![0.0; new_len];
        let mut min_widths = vec![UNSPECIFIED; new_len];
        let mut max_widths = vec![UNSPECIFIED; new_len];
        let mut arrange_widths = vec![0.0; new_len];

        let copy_first = new_first.max(old_first);
        let copy_last = new_last.min(old_last);
        for item in copy_first..=copy_last {
            let from = item - old_first;
            let to = item - new_first;
            ratios[to] = self.ratios[from];
            min_widths[to] = self.min_widths[from];
            max_widths[to] = self.max_widths[from];
            arrange_widths[to] = self.arrange_widths[from];
        }

        self.window_first = new_first;
        self.ratios = ratios;
        self.min_widths = min_widths;
        self.max_widths = max_widths;
        self.arrange_widths = arrange_widths;

        let mut missing = Vec::new();
        if new_first < copy_first {
            missing.push((new_first, copy_first - new_first));
        }
        if new_last > copy_last {
            missing.push((copy_last + 1, new_last - copy_last));
        }
        missing
    }

    fn reset_window_arrays(&mut self, first: usize, len: usize) {
        self.window_first = first;
        self.ratios = vec![0.0; len];
        self.min_widths = vec![UNSPECIFIED; len];
        self.max_widths = vec![UNSPECIFIED; len];
        self.arrange_widths = vec![0.0; len];
    }

    /// Writes a host answer into the window. Entries outside the
    /// window are ignored; a narrowed or short answer is applied for
    /// whatever it does cover.
    pub fn apply_response(&mut self, response: &ItemsInfoResponse, item_count: usize) -> ApplyOutcome {
        if response.is_empty() {
            return ApplyOutcome::Empty;
        }

        if response.min_width >= 0.0 {
            self.global_min_width = response.min_width;
        }
        if response.max_width >= 0.0 {
            self.global_max_width = response.max_width;
        }

        let window_len = self.ratios.len();
        let mut applied = 0usize;
        for (offset, ratio) in response.desired_aspect_ratios.iter().enumerate() {
            let item = response.start_index + offset;
            if item < self.window_first {
                continue;
            }
            let slot = item - self.window_first;
            if slot >= window_len {
                break;
            }
            self.ratios[slot] = *ratio;
            if let Some(min_width) = response.min_widths.get(offset) {
                self.min_widths[slot] = *min_width;
            }
            if let Some(max_width) = response.max_widths.get(offset) {
                self.max_widths[slot] = *max_width;
            }
            applied += 1;
        }

        if response.covers_collection(item_count) {
            ApplyOutcome::CoversCollection
        } else if applied > 0 {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Empty
        }
    }

    /// Host-specified aspect ratio for `item`, when it is positive.
    pub fn desired_ratio(&self, item: usize) -> Option<f64> {
        let slot = item.checked_sub(self.window_first)?;
        let ratio = *self.ratios.get(slot)?;
        (ratio > 0.0).then_some(ratio)
    }

    /// Effective `(min, max)` width bounds for `item`: the per-item
    /// bound combined with the global one, min by max and max by min.
    pub fn width_bounds(&self, item: usize) -> (f64, f64) {
        let per_item = |values: &Vec<f64>| -> f64 {
            item.checked_sub(self.window_first)
                .and_then(|slot| values.get(slot).copied())
                .unwrap_or(UNSPECIFIED)
        };

        let combine = |a: f64, b: f64, prefer_larger: bool| -> f64 {
            match (a >= 0.0, b >= 0.0) {
                (true, true) => {
                    if prefer_larger {
                        a.max(b)
                    } else {
                        a.min(b)
                    }
                }
                (true, false) => a,
                (false, true) => b,
                (false, false) => UNSPECIFIED,
            }
        };

        let min = combine(per_item(&self.min_widths), self.global_min_width, true);
        let max = combine(per_item(&self.max_widths), self.global_max_width, false);
        (
            if min >= 0.0 { min } else { 0.0 },
            if max >= 0.0 { max } else { f64::INFINITY },
        )
    }

    /// Width an item wants at `line_height`, scaled by `scale` and
    /// clamped into its bounds. `fallback_ratio` stands in for items
    /// the host left unspecified.
    pub fn resolved_width(&self, item: usize, line_height: f64, fallback_ratio: f64, scale: f64) -> f64 {
        let ratio = self.desired_ratio(item).unwrap_or(fallback_ratio).max(0.0);
        let (min, max) = self.width_bounds(item);
        (ratio * line_height * scale).min(max).max(min)
    }

    pub fn set_arrange_width(&mut self, item: usize, width: f64) {
        if let Some(slot) = item.checked_sub(self.window_first) {
            if let Some(entry) = self.arrange_widths.get_mut(slot) {
                *entry = width;
            }
        }
    }

    pub fn arrange_width(&self, item: usize) -> Option<f64> {
        let slot = item.checked_sub(self.window_first)?;
        let width = *self.arrange_widths.get(slot)?;
        (width > 0.0).then_some(width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(start: usize, ratios: &[f64]) -> ItemsInfoResponse {
        ItemsInfoResponse {
            start_index: start,
            min_width: UNSPECIFIED,
            max_width: UNSPECIFIED,
            desired_aspect_ratios: ratios.to_vec(),
            min_widths: Vec::new(),
            max_widths: Vec::new(),
        }
    }

    #[test]
    fn test_initial_rebase_requests_whole_range() {
        let mut cache = ItemsInfoCache::new();
        let missing = cache.rebase(10, 5);
        assert_eq!(missing, vec![(10, 5)]);
        assert_eq!(cache.window(), Some((10, 5)));
    }

    #[test]
    fn test_overlapping_rebase_requests_edges_only() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(10, 10); // [10, 19]
        cache.apply_response(&response(10, &[1.0; 10]), 1000);

        // Shift down: [5, 14]; only [5, 9] is missing.
        let missing = cache.rebase(5, 10);
        assert_eq!(missing, vec![(5, 5)]);
        assert_eq!(cache.desired_ratio(12), Some(1.0));
        assert_eq!(cache.desired_ratio(7), None);

        // Shift up: [12, 21]; only [15, 21] is missing.
        let missing = cache.rebase(12, 10);
        assert_eq!(missing, vec![(15, 7)]);
        assert_eq!(cache.desired_ratio(14), Some(1.0));
    }

    #[test]
    fn test_disjoint_rebase_rebuilds() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(10, 5);
        cache.apply_response(&response(10, &[2.0; 5]), 1000);

        let missing = cache.rebase(100, 5);
        assert_eq!(missing, vec![(100, 5)]);
        assert_eq!(cache.desired_ratio(12), None);
    }

    #[test]
    fn test_apply_detects_full_coverage() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(2, 4);
        let outcome = cache.apply_response(&response(0, &[1.0; 8]), 8);
        assert_eq!(outcome, ApplyOutcome::CoversCollection);
        assert_eq!(cache.desired_ratio(3), Some(1.0));
    }

    #[test]
    fn test_apply_partial_answer() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(0, 10);
        // Handler narrowed to 4 entries from index 2.
        let outcome = cache.apply_response(&response(2, &[1.5; 4]), 100);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(cache.desired_ratio(1), None);
        assert_eq!(cache.desired_ratio(2), Some(1.5));
        assert_eq!(cache.desired_ratio(5), Some(1.5));
        assert_eq!(cache.desired_ratio(6), None);
    }

    #[test]
    fn test_width_bounds_combine() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(0, 2);
        let mut answer = response(0, &[1.0, 1.0]);
        answer.min_width = 50.0;
        answer.max_width = 400.0;
        answer.min_widths = vec![80.0, UNSPECIFIED];
        answer.max_widths = vec![UNSPECIFIED, 300.0];
        cache.apply_response(&answer, 100);

        // Per-item min 80 beats global 50; global max 400 stands in
        // for the unspecified per-item max.
        assert_eq!(cache.width_bounds(0), (80.0, 400.0));
        // Global min 50; per-item max 300 beats global 400.
        assert_eq!(cache.width_bounds(1), (50.0, 300.0));
    }

    #[test]
    fn test_resolved_width_uses_fallback_and_bounds() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(0, 2);
        let mut answer = response(0, &[2.0, 0.0]);
        answer.min_width = 10.0;
        answer.max_width = 150.0;
        cache.apply_response(&answer, 100);

        // Specified ratio: 2.0 * 100, capped at 150.
        assert_eq!(cache.resolved_width(0, 100.0, 1.0, 1.0), 150.0);
        // Unspecified ratio falls back to the running average.
        assert_eq!(cache.resolved_width(1, 100.0, 1.2, 1.0), 120.0);
    }

    #[test]
    fn test_arrange_width_roundtrip_and_rebase() {
        let mut cache = ItemsInfoCache::new();
        cache.rebase(10, 4);
        cache.set_arrange_width(11, 123.0);
        assert_eq!(cache.arrange_width(11), Some(123.0));
        assert_eq!(cache.arrange_width(10), None);

        cache.rebase(11, 4);
        assert_eq!(cache.arrange_width(11), Some(123.0));
        cache.rebase(50, 4);
        assert_eq!(cache.arrange_width(11), None);
    }

    #[test]
    fn test_fast_arrays_roundtrip() {
        let mut cache = ItemsInfoCache::new();
        assert!(!cache.has_full_fast_info(3));
        cache.set_fast_desired_aspect_ratios(&[1.0, 2.0, 3.0]);
        cache.set_fast_min_widths(&[10.0, 10.0, 10.0]);
        assert!(cache.has_full_fast_info(3));
        assert!(!cache.has_full_fast_info(4));

        let taken = cache.take_fast_response();
        assert!(taken.covers_collection(3));
        assert_eq!(taken.min_widths.len(), 3);
        assert!(!cache.has_full_fast_info(3));
    }

    #[test]
    fn test_requested_range_accessors() {
        let mut cache = ItemsInfoCache::new();
        assert_eq!(cache.requested_range_start_index(), -1);
        assert_eq!(cache.requested_range_length(), -1);
        cache.record_request(40, 120);
        assert_eq!(cache.requested_range_start_index(), 40);
        assert_eq!(cache.requested_range_length(), 120);
    }
}
