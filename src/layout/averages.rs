//! Average items-per-line estimation.
//!
//! The layout never counts real lines to decide how many lines the
//! collection needs; it estimates how many items fit a line from the
//! average item aspect ratio, then snaps that estimate to a power of
//! 1.1 so tiny content changes cannot reshuffle every line index.

use tracing::debug;

use crate::hooks;
use crate::layout::aspect_ratios::{AspectRatioStore, MAX_WEIGHT};

/// Measure passes during which the estimator still guards against
/// unpopulated content.
pub const MEASURE_COUNTDOWN_START: u32 = 5;

/// Base of the snapping scale.
const SNAP_POWER: f64 = 1.1;

/// Raw movement below which a differing snap result is ignored.
const SNAP_HYSTERESIS: f64 = 0.1;

/// The `(raw, snapped)` average items-per-line pair.
///
/// `raw` is the direct estimate; `snapped` is the nearest power of
/// 1.1, held back by hysteresis so a raw value oscillating around a
/// snap midpoint does not flip the whole line space.
#[derive(Debug, Clone)]
pub struct AverageItemsPerLine {
    raw: f64,
    snapped: f64,
    measure_countdown: u32,
}

impl AverageItemsPerLine {
    pub fn new() -> Self {
        Self {
            raw: 0.0,
            snapped: 0.0,
            measure_countdown: MEASURE_COUNTDOWN_START,
        }
    }

    /// The unsnapped estimate from the latest update.
    pub fn raw(&self) -> f64 {
        self.raw
    }

    /// The snapped estimate, or 0.0 before the first update.
    pub fn snapped(&self) -> f64 {
        self.snapped
    }

    pub fn is_unset(&self) -> bool {
        self.snapped == 0.0
    }

    /// Burns one initial-loading measure pass.
    pub fn tick_measure_countdown(&mut self) {
        self.measure_countdown = self.measure_countdown.saturating_sub(1);
    }

    pub fn measure_countdown(&self) -> u32 {
        self.measure_countdown
    }

    /// Forgets the estimate and restarts the initial-loading guard.
    pub fn reset(&mut self) {
        self.raw = 0.0;
        self.snapped = 0.0;
        self.measure_countdown = MEASURE_COUNTDOWN_START;
    }

    /// Average aspect ratio to size lines with: a forced override if
    /// one is set, else the store's weighted average, else a floor
    /// that decays from 1.5 to 1.0 while the countdown runs.
    ///
    /// While the countdown runs the store average is clamped into
    /// [2/3, 3/2]: the first items of a lazily populated collection
    /// often measure degenerate and would otherwise cause a burst of
    /// extra realizations.
    pub fn average_aspect_ratio(
        &self,
        store: &AspectRatioStore,
        first_sized_item: usize,
        last_sized_item: usize,
    ) -> f64 {
        let forced = hooks::forced_average_aspect_ratio();
        if forced > 0.0 {
            return forced;
        }

        if !store.is_empty() {
            let average = store.average(first_sized_item, last_sized_item, MAX_WEIGHT);
            if average > 0.0 {
                if self.measure_countdown > 0 {
                    return average.clamp(2.0 / 3.0, 1.5);
                }
                return average;
            }
        }

        1.0 + 0.1 * f64::from(self.measure_countdown)
    }

    /// Re-estimates from the current geometry. Returns true when the
    /// snapped value moved, which invalidates every line index
    /// derived from it.
    pub fn update(
        &mut self,
        available_width: f64,
        line_height: f64,
        min_item_spacing: f64,
        average_ratio: f64,
    ) -> bool {
        let raw = {
            let divider = hooks::forced_items_per_line_divider();
            let average_item_width = if divider > 0.0 {
                divider * (line_height + min_item_spacing)
            } else {
                // One spacing is over-counted here and corrected by
                // the + spacing on the available width below.
                average_ratio * line_height + min_item_spacing
            };
            ((available_width + min_item_spacing) / average_item_width.max(1.0)).max(1.0)
        };

        self.set_direct(raw)
    }

    /// Adopts a raw average computed elsewhere (the fast path derives
    /// it from the actual line structure). Same snapping and
    /// hysteresis as [`Self::update`]; returns true when the snapped
    /// value moved.
    pub fn set_direct(&mut self, raw: f64) -> bool {
        let raw = raw.max(1.0);
        let snapped = snap_to_power(raw, SNAP_POWER);
        let changed;
        if self.snapped != 0.0
            && snapped != self.snapped
            && (raw - self.raw).abs() <= SNAP_HYSTERESIS
        {
            // Raw barely moved across a snap midpoint; hold the
            // previous snapped value but track the raw drift.
            changed = false;
        } else {
            changed = snapped != self.snapped;
            self.snapped = snapped;
        }
        self.raw = raw;

        if changed {
            debug!(raw, snapped = self.snapped, "snapped average items-per-line changed");
        }
        changed
    }

    /// Line count needed for `item_count` items at the snapped
    /// average.
    pub fn line_count(&self, item_count: usize) -> usize {
        if item_count == 0 || self.snapped <= 0.0 {
            return 0;
        }
        ((item_count as f64) / self.snapped).ceil() as usize
    }

    /// Line holding `item_index` under the snapped average.
    pub fn line_index_of_item(&self, item_index: usize, item_count: usize) -> usize {
        let line_count = self.line_count(item_count);
        if line_count == 0 {
            return 0;
        }
        (((item_index as f64) / self.snapped).floor() as usize).min(line_count - 1)
    }

    /// First item of `line_index` under the snapped average.
    pub fn first_item_of_line(&self, line_index: usize, item_count: usize) -> usize {
        if self.snapped <= 0.0 {
            return 0;
        }
        (((line_index as f64) * self.snapped).ceil() as usize).min(item_count.saturating_sub(1))
    }
}

impl Default for AverageItemsPerLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest value of the form `power^k`, k integer >= 0.
pub fn snap_to_power(value: f64, power: f64) -> f64 {
    debug_assert!(value >= 1.0 && power > 1.0);
    let exponent = (value.ln() / power.ln()).round().max(0.0);
    power.powf(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_to_power() {
        assert!((snap_to_power(1.0, 1.1) - 1.0).abs() < 1e-12);
        assert!((snap_to_power(1.1, 1.1) - 1.1).abs() < 1e-12);
        // 1.1^7 = 1.9487..., 1.1^8 = 2.1435...; 2.0 is closer to 8
        // in log space.
        let snapped = snap_to_power(2.0, 1.1);
        assert!((snapped - 1.1f64.powi(7)).abs() < 1e-12 || (snapped - 1.1f64.powi(8)).abs() < 1e-12);
    }

    #[test]
    fn test_update_produces_powers_of_1_1() {
        let mut average = AverageItemsPerLine::new();
        average.update(1000.0, 100.0, 0.0, 1.0);
        let snapped = average.snapped();
        let exponent = (snapped.ln() / 1.1f64.ln()).round();
        assert!((snapped - 1.1f64.powf(exponent)).abs() < 1e-9);
        assert!(average.raw() >= 1.0);
    }

    #[test]
    fn test_hysteresis_holds_snapped_value() {
        let mut average = AverageItemsPerLine::new();
        // Pick a raw value close to a snap midpoint: between 1.1^7
        // and 1.1^8 the midpoint is ~2.044.
        let line_height = 100.0;
        let width_for = |raw: f64| raw * line_height; // ratio 1.0, no spacing

        average.update(width_for(2.04), line_height, 0.0, 1.0);
        let first_snapped = average.snapped();

        // A tiny drift across the midpoint must not flip the snap.
        average.update(width_for(2.06), line_height, 0.0, 1.0);
        assert_eq!(average.snapped(), first_snapped);
        assert!((average.raw() - 2.06).abs() < 1e-9);

        // A large move does flip it.
        let changed = average.update(width_for(4.0), line_height, 0.0, 1.0);
        assert!(changed);
        assert!(average.snapped() > first_snapped);
    }

    #[test]
    fn test_fallback_ratio_decays() {
        let store = AspectRatioStore::new();
        let mut average = AverageItemsPerLine::new();
        assert!((average.average_aspect_ratio(&store, 0, 0) - 1.5).abs() < 1e-9);
        for _ in 0..MEASURE_COUNTDOWN_START {
            average.tick_measure_countdown();
        }
        assert!((average.average_aspect_ratio(&store, 0, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_store_average_clamped_during_countdown() {
        use crate::layout::aspect_ratios::AspectRatio;

        let mut store = AspectRatioStore::new();
        store.set(
            0,
            AspectRatio {
                ratio: 4.0,
                weight: 16,
            },
        );

        let mut average = AverageItemsPerLine::new();
        assert!((average.average_aspect_ratio(&store, 0, 0) - 1.5).abs() < 1e-9);
        for _ in 0..MEASURE_COUNTDOWN_START {
            average.tick_measure_countdown();
        }
        assert!((average.average_aspect_ratio(&store, 0, 0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_count_and_mapping() {
        let mut average = AverageItemsPerLine::new();
        // 3 items per line, exactly: width 300, ratio 1, height 100.
        average.update(300.0, 100.0, 0.0, 1.0);
        let snapped = average.snapped();
        assert!(snapped > 1.0);

        let item_count = 100;
        let line_count = average.line_count(item_count);
        assert_eq!(line_count, (100.0 / snapped).ceil() as usize);
        assert_eq!(average.line_index_of_item(0, item_count), 0);
        assert_eq!(
            average.line_index_of_item(item_count - 1, item_count),
            line_count - 1
        );
    }

    #[test]
    fn test_empty_collection_has_no_lines() {
        let average = AverageItemsPerLine::new();
        assert_eq!(average.line_count(0), 0);
        assert!(average.is_unset());
    }
}
