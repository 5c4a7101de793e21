//! Per-line item scaling and horizontal distribution.
//!
//! A partitioned line rarely matches the available width exactly.
//! Over-full lines shrink their items (respecting per-item minimums);
//! under-full lines stretch them when stretch is enabled (respecting
//! maximums). Items pinned at a bound drop out of the budget and the
//! factor is recomputed until it settles. Whatever slack remains is
//! distributed by the justification setting.

use crate::config::{ItemsJustification, ItemsStretch};

/// The factor reported for a line whose minimum widths alone overflow
/// the available width. Items sit at their minimums and the line
/// overflows.
pub const SCALE_FAILED: f64 = 0.0;

/// Outcome of scaling one line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineScale {
    /// The factor applied to unpinned items. 1.0 when the line fits.
    pub factor: f64,
    /// Final width per item, bounds applied.
    pub widths: Vec<f64>,
}

/// Scales a line of `desired` item widths into `available`, keeping
/// `spacing` between items. Bounds are `(min, max)` per item.
pub fn scale_line(
    desired: &[f64],
    bounds: &[(f64, f64)],
    spacing: f64,
    available: f64,
    stretch: ItemsStretch,
) -> LineScale {
    debug_assert_eq!(desired.len(), bounds.len());
    let count = desired.len();
    if count == 0 {
        return LineScale {
            factor: 1.0,
            widths: Vec::new(),
        };
    }

    let budget = available - spacing * (count - 1) as f64;
    let content: f64 = desired.iter().sum();

    let factor = if content > budget {
        shrink_factor(desired, bounds, budget)
    } else if content < budget && stretch == ItemsStretch::Fill {
        expand_factor(desired, bounds, budget)
    } else {
        1.0
    };

    let widths = desired
        .iter()
        .zip(bounds)
        .map(|(width, (min, max))| (width * factor).min(*max).max(*min))
        .collect();

    LineScale { factor, widths }
}

/// Largest uniform factor <= 1 that fits the line into `budget`,
/// pinning items whose minimum exceeds their scaled width.
fn shrink_factor(desired: &[f64], bounds: &[(f64, f64)], budget: f64) -> f64 {
    let count = desired.len();
    let mut pinned = vec![false; count];
    let mut last_factor = 1.0;

    loop {
        let pinned_total: f64 = (0..count)
            .filter(|index| pinned[*index])
            .map(|index| bounds[index].0)
            .sum();
        let free_total: f64 = (0..count)
            .filter(|index| !pinned[*index])
            .map(|index| desired[index])
            .sum();

        if budget - pinned_total <= 0.0 {
            return SCALE_FAILED;
        }
        if free_total <= 0.0 {
            // Everything pinned but the minimums fit; the clamp puts
            // every item at its minimum.
            return last_factor;
        }

        let factor = ((budget - pinned_total) / free_total).min(1.0);
        last_factor = factor;
        let mut newly_pinned = false;
        for index in 0..count {
            if !pinned[index] && bounds[index].0 > factor * desired[index] {
                pinned[index] = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            return factor;
        }
    }
}

/// Smallest uniform factor >= 1 that fills the line to `budget`,
/// pinning items whose maximum caps their scaled width.
fn expand_factor(desired: &[f64], bounds: &[(f64, f64)], budget: f64) -> f64 {
    let count = desired.len();
    let mut pinned = vec![false; count];
    let mut last_factor = 1.0;

    loop {
        let pinned_total: f64 = (0..count)
            .filter(|index| pinned[*index])
            .map(|index| bounds[index].1)
            .sum();
        let free_total: f64 = (0..count)
            .filter(|index| !pinned[*index])
            .map(|index| desired[index])
            .sum();

        if free_total <= 0.0 {
            // Every item capped: the clamp puts each at its maximum
            // and the line stays short.
            return last_factor;
        }

        let factor = ((budget - pinned_total) / free_total).max(1.0);
        last_factor = factor;
        let mut newly_pinned = false;
        for index in 0..count {
            if !pinned[index] && bounds[index].1 < factor * desired[index] {
                pinned[index] = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            return factor;
        }
    }
}

/// Starting x offset and inter-item gap for a line of `count` items
/// totalling `items_width` (without gaps) in `available` width.
///
/// With stretch on, items already fill the line and any rounding
/// residue is spread across the gaps instead.
pub fn distribution(
    justification: ItemsJustification,
    stretch: ItemsStretch,
    available: f64,
    items_width: f64,
    count: usize,
    spacing: f64,
) -> (f64, f64) {
    if count == 0 {
        return (0.0, spacing);
    }

    let gaps = count.saturating_sub(1) as f64;
    let used = items_width + gaps * spacing;
    let slack = available - used;

    if stretch == ItemsStretch::Fill {
        if count > 1 && slack > 0.0 {
            return (0.0, spacing + slack / gaps);
        }
        return (0.0, spacing);
    }

    if slack <= 0.0 {
        // Over-full line: every justification degrades to start.
        return (0.0, spacing);
    }

    match justification {
        ItemsJustification::Start => (0.0, spacing),
        ItemsJustification::Center => (slack / 2.0, spacing),
        ItemsJustification::End => (slack, spacing),
        ItemsJustification::SpaceBetween => {
            if count > 1 {
                (0.0, spacing + slack / gaps)
            } else {
                (0.0, spacing)
            }
        }
        ItemsJustification::SpaceAround => {
            let share = slack / count as f64;
            (share / 2.0, spacing + share)
        }
        ItemsJustification::SpaceEvenly => {
            let share = slack / (count + 1) as f64;
            (share, spacing + share)
        }
    }
}
