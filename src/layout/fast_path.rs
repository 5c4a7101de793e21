//! Single-pass full-collection layout.
//!
//! When the host supplies sizing data for every item, the whole line
//! structure is computed in one forward sweep and persisted.
//! Scrolling then only moves the realization window; nothing is
//! re-partitioned until the width or the collection changes.

use tracing::debug;

/// Line structure for the entire collection.
#[derive(Debug, Clone, Default)]
pub struct FastLayout {
    pub line_item_counts: Vec<usize>,
    /// Per-line total item width including inter-item spacing.
    pub line_item_widths: Vec<f64>,
    /// Widest line produced, including inter-item spacing.
    pub max_line_width: f64,
}

impl FastLayout {
    pub fn line_count(&self) -> usize {
        self.line_item_counts.len()
    }

    /// Line holding `item_index`.
    pub fn line_of_item(&self, item_index: usize) -> usize {
        let mut item = 0usize;
        for (line, count) in self.line_item_counts.iter().enumerate() {
            item += count;
            if item_index < item {
                return line;
            }
        }
        self.line_item_counts.len().saturating_sub(1)
    }

    /// First item of `line_index`.
    pub fn first_item_of_line(&self, line_index: usize) -> usize {
        self.line_item_counts[..line_index.min(self.line_item_counts.len())]
            .iter()
            .sum()
    }
}

/// Lays out the whole collection in one sweep.
///
/// When the next item overflows the current line, the line either
/// keeps it and shrinks, or wraps and stretches: whichever moves the
/// line's scale factor less from 1.0. A single item wider than the
/// line simply shrinks to fit.
pub fn compute(widths: &[f64], available: f64, spacing: f64) -> FastLayout {
    if widths.is_empty() || available <= 0.0 {
        return FastLayout::default();
    }

    let mut line_item_counts = Vec::new();
    let mut line_widths = Vec::new();
    let mut count = 0usize;
    let mut line_width = 0.0f64;

    for width in widths {
        if count == 0 {
            count = 1;
            line_width = *width;
            continue;
        }

        let appended = line_width + spacing + width;
        if appended <= available {
            count += 1;
            line_width = appended;
            continue;
        }

        // Overflow: shrinking the line with the item versus
        // stretching it without.
        let shrink = available / appended;
        let expand = if line_width > 0.0 {
            available / line_width
        } else {
            f64::INFINITY
        };
        if 1.0 - shrink <= expand - 1.0 {
            count += 1;
            line_width = appended;
        } else {
            line_item_counts.push(count);
            line_widths.push(line_width);
            count = 1;
            line_width = *width;
        }
    }
    if count > 0 {
        line_item_counts.push(count);
        line_widths.push(line_width);
    }

    let max_line_width = line_widths.iter().copied().fold(0.0, f64::max);
    debug!(
        items = widths.len(),
        lines = line_item_counts.len(),
        max_line_width,
        "fast-path layout computed"
    );

    FastLayout {
        line_item_counts,
        line_item_widths: line_widths,
        max_line_width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collection() {
        let layout = compute(&[], 500.0, 0.0);
        assert_eq!(layout.line_count(), 0);
    }

    #[test]
    fn test_all_items_assigned_once() {
        let widths: Vec<f64> = (0..500).map(|index| 80.0 + (index % 7) as f64 * 30.0).collect();
        let layout = compute(&widths, 800.0, 10.0);
        let total: usize = layout.line_item_counts.iter().sum();
        assert_eq!(total, widths.len());
        for count in &layout.line_item_counts {
            assert!(*count >= 1);
        }
    }

    #[test]
    fn test_exact_fit_keeps_line() {
        let layout = compute(&[100.0, 100.0, 100.0], 300.0, 0.0);
        assert_eq!(layout.line_item_counts, vec![3]);
        assert_eq!(layout.max_line_width, 300.0);
    }

    #[test]
    fn test_shrink_beats_stretch_on_small_overflow() {
        // Line at 280 of 300; appending 40 overflows to 320.
        // Shrink factor 300/320 = 0.9375 (deviation 0.0625);
        // stretch factor 300/280 = 1.0714 (deviation 0.0714).
        // Shrinking deviates less, so the item stays.
        let layout = compute(&[140.0, 140.0, 40.0], 300.0, 0.0);
        assert_eq!(layout.line_item_counts, vec![3]);
    }

    #[test]
    fn test_stretch_beats_shrink_on_large_overflow() {
        // Line at 280 of 300; appending 200 overflows to 480.
        // Shrink deviation 1 - 300/480 = 0.375; stretch deviation
        // 300/280 - 1 = 0.0714. The item wraps.
        let layout = compute(&[140.0, 140.0, 200.0], 300.0, 0.0);
        assert_eq!(layout.line_item_counts, vec![2, 1]);
    }

    #[test]
    fn test_single_item_wider_than_line() {
        let layout = compute(&[900.0, 100.0], 300.0, 0.0);
        // The panorama gets its own line and will shrink to fit.
        assert_eq!(layout.line_item_counts, vec![1, 1]);
    }

    #[test]
    fn test_line_of_item_mapping() {
        let layout = compute(&[100.0; 10], 300.0, 0.0);
        assert_eq!(layout.line_item_counts, vec![3, 3, 3, 1]);
        assert_eq!(layout.line_of_item(0), 0);
        assert_eq!(layout.line_of_item(2), 0);
        assert_eq!(layout.line_of_item(3), 1);
        assert_eq!(layout.line_of_item(9), 3);
        assert_eq!(layout.first_item_of_line(0), 0);
        assert_eq!(layout.first_item_of_line(2), 6);
        assert_eq!(layout.first_item_of_line(3), 9);
    }
}
