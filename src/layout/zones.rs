//! Zone planning.
//!
//! Each measure classifies the line space into nested zones around
//! the viewport: displayed lines intersect the visible rect, frozen
//! lines keep their partition within the measure, realized lines get
//! elements, sized lines get desired widths. Everything outside is
//! unrealized. The plan is a pure function of the geometry.

use crate::geometry::Rect;

/// Inclusive range of line indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub first: usize,
    pub last: usize,
}

impl LineRange {
    pub fn new(first: usize, last: usize) -> Self {
        debug_assert!(first <= last);
        Self { first, last }
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn contains(&self, line: usize) -> bool {
        line >= self.first && line <= self.last
    }

    pub fn contains_range(&self, inner: &LineRange) -> bool {
        self.first <= inner.first && self.last >= inner.last
    }

    fn clamped_to(&self, outer: &LineRange) -> Option<LineRange> {
        let first = self.first.max(outer.first);
        let last = self.last.min(outer.last);
        (first <= last).then_some(LineRange { first, last })
    }
}

/// Geometry a zone plan is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ZoneInputs {
    pub visible_rect: Rect,
    pub realization_rect: Rect,
    pub line_count: usize,
    pub line_height: f64,
    pub line_spacing: f64,
    /// Re-centers the realized and sized rects while a bring-into-view
    /// anchor is retained.
    pub anchor_line: Option<usize>,
}

/// The nested line zones of one measure pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZonePlan {
    pub displayed: Option<LineRange>,
    pub frozen: Option<LineRange>,
    pub realized: Option<LineRange>,
    pub sized: Option<LineRange>,
}

/// Sized span target, in viewports. Gives the partitioner enough
/// context around the realized window to keep lines stable.
const SIZED_VIEWPORT_FACTOR: f64 = 5.0;

/// Frozen padding around the displayed lines, in viewports.
const FROZEN_VIEWPORT_FACTOR: f64 = 0.8;

/// Frozen padding as a share of the sized-to-displayed gap.
const FROZEN_GAP_FACTOR: f64 = 0.4;

/// Realization inflation: one viewport or four line pitches,
/// whichever is larger.
const REALIZED_PITCH_FACTOR: f64 = 4.0;

pub fn plan(inputs: &ZoneInputs) -> ZonePlan {
    let pitch = inputs.line_height + inputs.line_spacing;
    if inputs.line_count == 0 || inputs.line_height <= 0.0 || pitch <= 0.0 {
        return ZonePlan::default();
    }

    let line_count = inputs.line_count;
    let content_height = line_count as f64 * pitch - inputs.line_spacing;
    let viewport = inputs.visible_rect.height.max(0.0);

    let lines_of_rect = |rect: &Rect| -> Option<LineRange> {
        if rect.is_empty() {
            return None;
        }
        let top = rect.top().max(0.0);
        let bottom = rect.bottom().min(content_height);
        if bottom <= top {
            return None;
        }
        let first = (top / pitch).floor().max(0.0) as usize;
        let last = ((bottom / pitch).ceil() as usize).saturating_sub(1);
        let first = first.min(line_count - 1);
        let last = last.min(line_count - 1);
        (first <= last).then_some(LineRange { first, last })
    };

    let recentered = |rect: &Rect| -> Rect {
        match inputs.anchor_line {
            Some(anchor) if !rect.is_empty() => {
                let anchor_center = anchor.min(line_count - 1) as f64 * pitch + inputs.line_height / 2.0;
                Rect {
                    y: anchor_center - rect.height / 2.0,
                    ..*rect
                }
            }
            _ => *rect,
        }
    };

    let realization_rect = recentered(&inputs.realization_rect);

    // Sized rect: the realization rect enlarged to cover several
    // viewports, so partition context outlives small scrolls. Growth
    // clipped at a content edge is redistributed to the other side.
    let sized_rect = {
        let target = (SIZED_VIEWPORT_FACTOR * viewport)
            .max(realization_rect.height)
            .min(content_height);
        let center = realization_rect.top() + realization_rect.height / 2.0;
        let mut top = center - target / 2.0;
        let mut bottom = center + target / 2.0;
        if top < 0.0 {
            bottom -= top;
            top = 0.0;
        }
        if bottom > content_height {
            top -= bottom - content_height;
            bottom = content_height;
            top = top.max(0.0);
        }
        Rect {
            x: realization_rect.x,
            y: top,
            width: realization_rect.width.max(1.0),
            height: (bottom - top).max(0.0),
        }
    };
    let sized = lines_of_rect(&sized_rect);

    // Realized: realization rect inflated by a viewport or four
    // pitches, whichever is larger, clamped into sized.
    let realized = {
        let inflation = viewport.max(REALIZED_PITCH_FACTOR * pitch);
        let rect = realization_rect.inflated_vertically(inflation, content_height);
        match (lines_of_rect(&rect), sized) {
            (Some(lines), Some(sized_lines)) => lines.clamped_to(&sized_lines),
            _ => None,
        }
    };

    // Displayed: lines whose strip (not their spacing gap)
    // intersects the viewport by more than a line-spacing sliver.
    let displayed = if viewport <= 0.0 {
        None
    } else {
        let epsilon = (inputs.line_spacing / 2.0).min(inputs.line_height / 4.0).max(0.0);
        let top = (inputs.visible_rect.top() + epsilon).max(0.0);
        let bottom = (inputs.visible_rect.bottom() - epsilon).min(content_height);
        if bottom <= top {
            None
        } else {
            // Line i occupies [i·pitch, i·pitch + line_height].
            let first = (((top - inputs.line_height) / pitch).floor() + 1.0).max(0.0) as usize;
            let last = ((bottom / pitch).ceil() as usize).saturating_sub(1);
            let first = first.min(line_count - 1);
            let last = last.min(line_count - 1);
            (first <= last).then_some(LineRange { first, last })
        }
    };

    // Frozen: displayed padded outward, clamped into realized.
    let frozen = match (displayed, realized) {
        (Some(displayed_lines), Some(realized_lines)) => {
            let viewport_pad = (FROZEN_VIEWPORT_FACTOR * viewport / pitch).ceil() as usize;
            let (sized_first, sized_last) = match sized {
                Some(lines) => (lines.first, lines.last),
                None => (0, line_count - 1),
            };
            let gap_before = displayed_lines.first.saturating_sub(sized_first);
            let gap_after = sized_last.saturating_sub(displayed_lines.last);
            let pad_before = viewport_pad.max((FROZEN_GAP_FACTOR * gap_before as f64).ceil() as usize);
            let pad_after = viewport_pad.max((FROZEN_GAP_FACTOR * gap_after as f64).ceil() as usize);
            let padded = LineRange {
                first: displayed_lines.first.saturating_sub(pad_before),
                last: (displayed_lines.last + pad_after).min(line_count - 1),
            };
            padded.clamped_to(&realized_lines)
        }
        _ => None,
    };

    // The displayed zone cannot exceed what is frozen.
    let displayed = match (displayed, frozen) {
        (Some(lines), Some(frozen_lines)) => lines.clamped_to(&frozen_lines),
        (Some(_), None) => None,
        (None, _) => None,
    };

    ZonePlan {
        displayed,
        frozen,
        realized,
        sized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(scroll: f64, viewport: f64, line_count: usize) -> ZoneInputs {
        ZoneInputs {
            visible_rect: Rect::new(0.0, scroll, 800.0, viewport),
            // Host realizes one viewport above and below.
            realization_rect: Rect::new(0.0, scroll - viewport, 800.0, 3.0 * viewport),
            line_count,
            line_height: 100.0,
            line_spacing: 0.0,
            anchor_line: None,
        }
    }

    fn assert_nested(plan: &ZonePlan) {
        if let (Some(displayed), Some(frozen)) = (plan.displayed, plan.frozen) {
            assert!(frozen.contains_range(&displayed), "displayed ⊆ frozen");
        }
        if let (Some(frozen), Some(realized)) = (plan.frozen, plan.realized) {
            assert!(realized.contains_range(&frozen), "frozen ⊆ realized");
        }
        if let (Some(realized), Some(sized)) = (plan.realized, plan.sized) {
            assert!(sized.contains_range(&realized), "realized ⊆ sized");
        }
    }

    #[test]
    fn test_empty_line_space() {
        let plan = plan(&inputs(0.0, 600.0, 0));
        assert_eq!(plan, ZonePlan::default());
    }

    #[test]
    fn test_zero_viewport_has_no_displayed_lines() {
        let plan = plan(&inputs(0.0, 0.0, 100));
        assert!(plan.displayed.is_none());
        assert!(plan.frozen.is_none());
    }

    #[test]
    fn test_nesting_at_top() {
        let plan = plan(&inputs(0.0, 600.0, 1000));
        assert_nested(&plan);

        let displayed = plan.displayed.expect("some lines visible");
        assert_eq!(displayed.first, 0);
        // 600 px viewport over 100 px lines: six lines visible.
        assert_eq!(displayed.last, 5);

        let sized = plan.sized.expect("sized span");
        // Five viewports of sizing context: 30 lines.
        assert!(sized.len() >= 30);
    }

    #[test]
    fn test_nesting_mid_scroll() {
        let plan = plan(&inputs(50_000.0, 600.0, 1000));
        assert_nested(&plan);

        let displayed = plan.displayed.expect("some lines visible");
        assert_eq!(displayed.first, 500);
        assert_eq!(displayed.last, 505);

        let frozen = plan.frozen.expect("frozen span");
        // At least 0.8 viewports of padding on each side.
        assert!(displayed.first - frozen.first >= 4);
        assert!(frozen.last - displayed.last >= 4);
    }

    #[test]
    fn test_displayed_excludes_seam_sliver() {
        let mut geometry = inputs(0.0, 600.0, 1000);
        geometry.line_spacing = 20.0;
        // Scroll so the viewport top sits 5 px into the 20 px gap
        // after line 0 ([100, 120) is spacing; pitch 120).
        geometry.visible_rect.y = 105.0;
        geometry.realization_rect.y = 105.0 - 600.0;
        let plan = plan(&geometry);
        let displayed = plan.displayed.expect("some lines visible");
        assert_eq!(displayed.first, 1, "line 0 ends before the viewport");
    }

    #[test]
    fn test_realization_outside_content_realizes_nothing() {
        let mut geometry = inputs(0.0, 600.0, 10);
        // Content is 1000 px tall; the host asks about a window far
        // below it.
        geometry.visible_rect.y = 50_000.0;
        geometry.realization_rect.y = 49_000.0;
        let plan = plan(&geometry);
        assert!(plan.displayed.is_none());
    }

    #[test]
    fn test_anchor_recenters_realization() {
        let mut geometry = inputs(0.0, 600.0, 1000);
        geometry.anchor_line = Some(500);
        let plan = plan(&geometry);
        assert_nested(&plan);

        let realized = plan.realized.expect("realized span");
        assert!(
            realized.contains(500),
            "realized lines {realized:?} must cover the anchor line"
        );
    }

    #[test]
    fn test_sized_clamped_to_line_space() {
        let plan = plan(&inputs(0.0, 600.0, 8));
        let sized = plan.sized.expect("sized span");
        assert_eq!(sized.first, 0);
        assert_eq!(sized.last, 7);
    }
}
