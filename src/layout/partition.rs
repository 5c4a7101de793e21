//! Line partitioning.
//!
//! Given a contiguous item range with known desired widths and a
//! trial line width, assigns every item to a line. The result carries
//! a scalar cost ("drawback") plus the four move candidates the
//! incremental driver uses to steer its width search: the smallest
//! line-head, the smallest line-tail, and the head/tail whose
//! transfer to a neighboring line improves the cost the most.

use std::collections::BTreeMap;

/// An item that could move to the preceding or following line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCandidate {
    pub item_index: usize,
    pub line_index: usize,
    pub width: f64,
}

/// A move candidate weighted by how much the move lowers the
/// drawback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqualizingCandidate {
    pub item_index: usize,
    pub line_index: usize,
    pub improvement: f64,
}

/// An ordered partition of a contiguous item range into lines.
#[derive(Debug, Clone, Default)]
pub struct ItemsLayout {
    /// Items per line, from the first partitioned line.
    pub line_item_counts: Vec<usize>,
    /// Width of each line's items including inter-item spacing.
    pub line_item_widths: Vec<f64>,
    /// The trial width the partition was computed against.
    pub available_line_items_width: f64,
    /// Total cost; lower is better.
    pub drawback: f64,
    pub smallest_head: Option<MoveCandidate>,
    pub smallest_tail: Option<MoveCandidate>,
    pub best_equalizing_head: Option<EqualizingCandidate>,
    pub best_equalizing_tail: Option<EqualizingCandidate>,
}

impl ItemsLayout {
    pub fn line_count(&self) -> usize {
        self.line_item_counts.len()
    }

    pub fn item_count(&self) -> usize {
        self.line_item_counts.iter().sum()
    }

    /// Mean line width, used as the feedback trial width.
    pub fn average_line_width(&self) -> f64 {
        if self.line_item_widths.is_empty() {
            return 0.0;
        }
        self.line_item_widths.iter().sum::<f64>() / self.line_item_widths.len() as f64
    }
}

/// Read-only view over the external and internal lock maps
/// (item index -> absolute line index).
#[derive(Debug, Clone, Copy)]
pub struct LockView<'a> {
    pub external: &'a BTreeMap<usize, usize>,
    pub internal: Option<&'a BTreeMap<usize, usize>>,
}

impl<'a> LockView<'a> {
    pub fn empty() -> LockView<'static> {
        static EMPTY: BTreeMap<usize, usize> = BTreeMap::new();
        LockView {
            external: &EMPTY,
            internal: None,
        }
    }

    pub fn line_of(&self, item_index: usize) -> Option<usize> {
        if let Some(internal) = self.internal {
            if let Some(line) = internal.get(&item_index) {
                return Some(*line);
            }
        }
        self.external.get(&item_index).copied()
    }

    /// The nearest locked item at or after `item_index`.
    fn next_locked(&self, item_index: usize) -> Option<(usize, usize)> {
        let external = self
            .external
            .range(item_index..)
            .next()
            .map(|(item, line)| (*item, *line));
        let internal = self
            .internal
            .and_then(|map| map.range(item_index..).next().map(|(item, line)| (*item, *line)));
        match (external, internal) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.external.is_empty() && self.internal.map_or(true, |map| map.is_empty())
    }
}

/// Inputs of one partitioning run.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRequest<'a> {
    /// Desired item widths for `[first_item, first_item + len)`.
    pub widths: &'a [f64],
    /// Absolute index of the first partitioned item.
    pub first_item: usize,
    /// Absolute index of the first partitioned line.
    pub first_line: usize,
    /// Number of lines allotted to the range.
    pub line_count: usize,
    /// Trial line width.
    pub available_width: f64,
    /// Reference width for the equalizing heuristic; usually the
    /// running mean line width.
    pub average_line_width: f64,
    pub min_item_spacing: f64,
    /// Margin multiplier for the equalizing heuristic.
    pub wrap_multiplier: f64,
    /// When false, a trailing line narrower than the available width
    /// costs nothing (the collection simply ends there).
    pub cost_trailing_line: bool,
    /// Traversal direction. Backward fills lines from the far end,
    /// producing a partition stable at the tail of the range.
    pub forward: bool,
}

/// One term of the drawback sum. Over-width hurts cubically,
/// under-width quadratically, and an exempt trailing line not at all.
fn drawback_term(delta: f64, exempt: bool) -> f64 {
    if delta > 0.0 {
        delta * delta * delta
    } else if exempt {
        0.0
    } else {
        delta * delta
    }
}

/// Drawback change obtained by moving an item of `moving_width` from
/// `current` to `neighbor`; positive is an improvement.
pub fn drawback_improvement(
    moving_width: f64,
    spacing: f64,
    available_width: f64,
    current_line_width: f64,
    neighbor_line_width: f64,
    current_exempt: bool,
    neighbor_exempt: bool,
) -> f64 {
    let before = drawback_term(current_line_width - available_width, current_exempt)
        + drawback_term(neighbor_line_width - available_width, neighbor_exempt);
    let after = drawback_term(current_line_width - moving_width - spacing - available_width, current_exempt)
        + drawback_term(neighbor_line_width + moving_width + spacing - available_width, neighbor_exempt);
    before - after
}

/// Assigns the requested item range to lines.
///
/// Every line receives at least one item, locked items land on their
/// locked lines, and the remaining freedom is spent keeping line
/// widths near the trial width.
pub fn partition(request: &PartitionRequest<'_>, locks: &LockView<'_>) -> ItemsLayout {
    let item_count = request.widths.len();
    if item_count == 0 || request.line_count == 0 {
        return ItemsLayout {
            available_line_items_width: request.available_width,
            ..ItemsLayout::default()
        };
    }

    if request.forward {
        partition_forward(request, locks)
    } else {
        partition_backward(request, locks)
    }
}

fn partition_forward(request: &PartitionRequest<'_>, locks: &LockView<'_>) -> ItemsLayout {
    let item_count = request.widths.len();
    let line_count = request.line_count.min(item_count);
    let available = request.available_width;
    let spacing = request.min_item_spacing;
    let first_line = request.first_line;
    let last_line = first_line + line_count - 1;

    let mut line_item_counts = vec![0usize; line_count];
    let mut line_item_widths = vec![0f64; line_count];

    let mut line = first_line;
    let mut completed_width = 0.0;

    for offset in 0..item_count {
        let item = request.first_item + offset;
        let width = request.widths[offset];
        let ordinal = line - first_line;
        let line_is_empty = line_item_counts[ordinal] == 0;

        if line_is_empty {
            line_item_counts[ordinal] = 1;
            line_item_widths[ordinal] = width;
            continue;
        }

        let items_left = item_count - offset;
        let lines_after_current = last_line - line;

        let mut must_cumulate = line == last_line;
        let mut must_wrap = false;

        if !must_cumulate {
            // Locks override the economics.
            match locks.next_locked(item) {
                Some((locked_item, locked_line)) if locked_item == item => {
                    if locked_line <= line {
                        must_cumulate = true;
                    } else {
                        must_wrap = true;
                    }
                }
                Some((locked_item, locked_line)) => {
                    if locked_line == line {
                        // A later item is pinned to this line, so
                        // this one cannot leave it either.
                        must_cumulate = true;
                    } else if locked_item - item < locked_line.saturating_sub(line) {
                        // Staying would not leave enough items to
                        // populate every line up to the locked one.
                        must_wrap = true;
                    }
                }
                None => {}
            }
        }

        if !must_cumulate && !must_wrap && items_left == lines_after_current {
            // Exactly one item left per remaining line.
            must_wrap = true;
        }

        let cumulate = if must_cumulate {
            true
        } else if must_wrap {
            false
        } else {
            let running = line_item_widths[ordinal];
            let can_cumulate = running + spacing + width <= available;
            let actual = completed_width + running + spacing + width;
            let expected = request.average_line_width * (ordinal + 1) as f64;
            let margin = request.wrap_multiplier * width;
            if can_cumulate {
                // Running wide overall: give the surplus to a new
                // line even though this one still has room.
                actual - expected <= margin
            } else {
                // Running narrow overall: keep filling even though
                // the line overflows the trial width.
                expected - actual > margin
            }
        };

        if cumulate {
            line_item_counts[ordinal] += 1;
            line_item_widths[ordinal] += spacing + width;
        } else {
            completed_width += line_item_widths[ordinal];
            line += 1;
            let ordinal = line - first_line;
            line_item_counts[ordinal] = 1;
            line_item_widths[ordinal] = width;
        }
    }

    // Trailing allotted lines that never received an item are not
    // part of the produced layout.
    let used_lines = line - first_line + 1;
    line_item_counts.truncate(used_lines);
    line_item_widths.truncate(used_lines);

    let mut layout = ItemsLayout {
        line_item_counts,
        line_item_widths,
        available_line_items_width: available,
        drawback: 0.0,
        smallest_head: None,
        smallest_tail: None,
        best_equalizing_head: None,
        best_equalizing_tail: None,
    };
    finish_layout(request, locks, &mut layout);
    layout
}

/// Backward partitioning mirrors the range, runs the forward pass and
/// mirrors the result, so both directions share one decision loop.
fn partition_backward(request: &PartitionRequest<'_>, locks: &LockView<'_>) -> ItemsLayout {
    let item_count = request.widths.len();
    let line_count = request.line_count.min(item_count);
    let last_item = request.first_item + item_count - 1;
    let last_line = request.first_line + line_count - 1;

    let mirrored_widths: Vec<f64> = request.widths.iter().rev().copied().collect();

    let mut mirrored_external = BTreeMap::new();
    let mut mirrored_internal = BTreeMap::new();
    let mirror_into = |map: &BTreeMap<usize, usize>, out: &mut BTreeMap<usize, usize>| {
        for (&item, &line) in map {
            if item >= request.first_item
                && item <= last_item
                && line >= request.first_line
                && line <= last_line
            {
                out.insert(
                    request.first_item + (last_item - item),
                    request.first_line + (last_line - line),
                );
            }
        }
    };
    mirror_into(locks.external, &mut mirrored_external);
    if let Some(internal) = locks.internal {
        mirror_into(internal, &mut mirrored_internal);
    }
    let mirrored_locks = LockView {
        external: &mirrored_external,
        internal: Some(&mirrored_internal),
    };

    let mirrored_request = PartitionRequest {
        widths: &mirrored_widths,
        forward: true,
        ..*request
    };
    let mut layout = partition_forward(&mirrored_request, &mirrored_locks);

    layout.line_item_counts.reverse();
    layout.line_item_widths.reverse();
    let used_lines = layout.line_item_counts.len();
    let mirror_line = |line: usize| request.first_line + (used_lines - 1) - (line - request.first_line);
    let mirror_item = |item: usize| request.first_item + (last_item - item);

    let swap_move = |candidate: Option<MoveCandidate>| {
        candidate.map(|c| MoveCandidate {
            item_index: mirror_item(c.item_index),
            line_index: mirror_line(c.line_index),
            width: c.width,
        })
    };
    let swap_equalizing = |candidate: Option<EqualizingCandidate>| {
        candidate.map(|c| EqualizingCandidate {
            item_index: mirror_item(c.item_index),
            line_index: mirror_line(c.line_index),
            improvement: c.improvement,
        })
    };

    // A mirrored head is a tail of the un-mirrored range and vice
    // versa.
    let head = swap_move(layout.smallest_tail);
    let tail = swap_move(layout.smallest_head);
    layout.smallest_head = head;
    layout.smallest_tail = tail;
    let eq_head = swap_equalizing(layout.best_equalizing_tail);
    let eq_tail = swap_equalizing(layout.best_equalizing_head);
    layout.best_equalizing_head = eq_head;
    layout.best_equalizing_tail = eq_tail;

    layout
}

/// Computes the drawback and the four move candidates for a finished
/// line assignment.
fn finish_layout(request: &PartitionRequest<'_>, locks: &LockView<'_>, layout: &mut ItemsLayout) {
    let available = layout.available_line_items_width;
    let spacing = request.min_item_spacing;
    let line_count = layout.line_item_counts.len();

    let exempt = |ordinal: usize| ordinal + 1 == line_count && !request.cost_trailing_line;

    layout.drawback = layout
        .line_item_widths
        .iter()
        .enumerate()
        .map(|(ordinal, width)| drawback_term(width - available, exempt(ordinal)))
        .sum();

    // First item of each line, in absolute item indexes.
    let mut line_start = request.first_item;
    let mut starts = Vec::with_capacity(line_count);
    for count in &layout.line_item_counts {
        starts.push(line_start);
        line_start += count;
    }

    let locked = |item: usize| !locks.is_empty() && locks.line_of(item).is_some();

    for ordinal in 0..line_count {
        let line_index = request.first_line + ordinal;
        let count = layout.line_item_counts[ordinal];
        let head_item = starts[ordinal];
        let tail_item = starts[ordinal] + count - 1;

        // Head candidates: movable to the previous line. A lone item
        // cannot leave its line behind empty.
        if ordinal > 0 && count > 1 && !locked(head_item) {
            let width = request.widths[head_item - request.first_item];
            if layout
                .smallest_head
                .map_or(true, |candidate| width < candidate.width)
            {
                layout.smallest_head = Some(MoveCandidate {
                    item_index: head_item,
                    line_index,
                    width,
                });
            }

            let improvement = drawback_improvement(
                width,
                spacing,
                available,
                layout.line_item_widths[ordinal],
                layout.line_item_widths[ordinal - 1],
                exempt(ordinal),
                exempt(ordinal - 1),
            );
            if layout
                .best_equalizing_head
                .map_or(improvement > 0.0, |candidate| improvement > candidate.improvement)
            {
                layout.best_equalizing_head = Some(EqualizingCandidate {
                    item_index: head_item,
                    line_index,
                    improvement,
                });
            }
        }

        // Tail candidates: movable to the next line.
        if ordinal + 1 < line_count && count > 1 && !locked(tail_item) {
            let width = request.widths[tail_item - request.first_item];
            if layout
                .smallest_tail
                .map_or(true, |candidate| width < candidate.width)
            {
                layout.smallest_tail = Some(MoveCandidate {
                    item_index: tail_item,
                    line_index,
                    width,
                });
            }

            let improvement = drawback_improvement(
                width,
                spacing,
                available,
                layout.line_item_widths[ordinal],
                layout.line_item_widths[ordinal + 1],
                exempt(ordinal),
                exempt(ordinal + 1),
            );
            if layout
                .best_equalizing_tail
                .map_or(improvement > 0.0, |candidate| improvement > candidate.improvement)
            {
                layout.best_equalizing_tail = Some(EqualizingCandidate {
                    item_index: tail_item,
                    line_index,
                    improvement,
                });
            }
        }
    }
}
