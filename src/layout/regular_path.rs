//! The incremental width search of the regular (virtualized) path.
//!
//! Partitioning quality depends almost entirely on the trial line
//! width handed to the partitioner. The search walks six phases: the
//! raw available width, the mean produced by that first partition,
//! neighbor widths one moved-item away, the midpoint between the two
//! best anchors, then greedy single-item equalizing moves backed by
//! internal locks. The cheapest layout seen wins.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::hooks;
use crate::layout::partition::{partition, ItemsLayout, LockView, PartitionRequest};

/// Width exploration limit around the phase-2 mean.
const NEIGHBOR_SPAN: f64 = 0.3;

/// Two trial widths closer than this are the same width.
const WIDTH_TOLERANCE: f64 = 0.5;

/// Improvement threshold for accepting an equalizing move.
const DRAWBACK_EPSILON: f64 = 1e-9;

/// Inputs of one search run over a sized item range.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub widths: &'a [f64],
    pub first_item: usize,
    pub first_line: usize,
    pub line_count: usize,
    /// The host-supplied available width (phase 1 trial).
    pub available_width: f64,
    pub min_item_spacing: f64,
    pub cost_trailing_line: bool,
    pub forward: bool,
}

/// The winning layout and the internal locks that shaped it.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub layout: ItemsLayout,
    pub internal_locks: BTreeMap<usize, usize>,
}

pub fn six_phase_search(
    request: &SearchRequest<'_>,
    external_locks: &BTreeMap<usize, usize>,
    seed_locks: BTreeMap<usize, usize>,
) -> SearchResult {
    let wrap_multiplier = hooks::wrap_multiplier();
    let mut internal_locks = seed_locks;

    let run = |trial_width: f64, internal: &BTreeMap<usize, usize>| -> ItemsLayout {
        let partition_request = PartitionRequest {
            widths: request.widths,
            first_item: request.first_item,
            first_line: request.first_line,
            line_count: request.line_count,
            available_width: trial_width,
            average_line_width: trial_width,
            min_item_spacing: request.min_item_spacing,
            wrap_multiplier,
            cost_trailing_line: request.cost_trailing_line,
            forward: request.forward,
        };
        let locks = LockView {
            external: external_locks,
            internal: Some(internal),
        };
        partition(&partition_request, &locks)
    };

    // Phase 1: the available width itself.
    let phase_1_width = request.available_width.max(1.0);
    let phase_1 = run(phase_1_width, &internal_locks);

    // Phase 2: the mean line width of phase 1 is the direct feedback
    // signal.
    let phase_2_width = {
        let mean = phase_1.average_line_width();
        if mean > 1.0 {
            mean
        } else {
            phase_1_width
        }
    };
    let phase_2 = run(phase_2_width, &internal_locks);

    let mut tried = vec![phase_1_width, phase_2_width];
    let mut best = if phase_2.drawback <= phase_1.drawback {
        phase_2
    } else {
        phase_1
    };

    let not_tried = |tried: &[f64], width: f64| {
        width > 1.0
            && (width - phase_2_width).abs() <= NEIGHBOR_SPAN * phase_2_width
            && tried.iter().all(|seen| (seen - width).abs() >= WIDTH_TOLERANCE)
    };

    // Phase 3: neighbor widths one moved item away from the best
    // layout so far.
    let neighbor_budget = 2 * request.line_count + 8;
    for _ in 0..neighbor_budget {
        let mut improved = false;
        let mut candidates = Vec::with_capacity(2);
        if let Some(head) = best.smallest_head {
            candidates.push(best.available_line_items_width + head.width);
        }
        if let Some(tail) = best.smallest_tail {
            candidates.push(best.available_line_items_width - tail.width);
        }

        for width in candidates {
            if !not_tried(&tried, width) {
                continue;
            }
            tried.push(width);
            let trial = run(width, &internal_locks);
            trace!(width, drawback = trial.drawback, "neighbor width tried");
            if trial.drawback < best.drawback {
                best = trial;
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }

    // Phase 4: the midpoint between the best width and the phase-2
    // mean.
    let midpoint = (best.available_line_items_width + phase_2_width) / 2.0;
    if not_tried(&tried, midpoint) {
        tried.push(midpoint);
        let trial = run(midpoint, &internal_locks);
        if trial.drawback < best.drawback {
            best = trial;
        }
    }

    // Phase 5: greedy equalizing moves, each backed by an internal
    // lock, until misses pile up.
    let miss_budget = (best.line_count() / 2).max(1);
    let mut misses = 0usize;
    let mut rejected: HashSet<(usize, usize)> = HashSet::new();
    let move_budget = 4 * best.line_count() + 8;
    for _ in 0..move_budget {
        if misses > miss_budget {
            break;
        }

        let head = best
            .best_equalizing_head
            .filter(|candidate| candidate.improvement > 0.0)
            .and_then(|candidate| {
                let target = candidate.line_index.checked_sub(1)?;
                (!rejected.contains(&(candidate.item_index, target)))
                    .then_some((candidate, target))
            });
        let tail = best
            .best_equalizing_tail
            .filter(|candidate| candidate.improvement > 0.0)
            .map(|candidate| (candidate, candidate.line_index + 1))
            .filter(|(candidate, target)| !rejected.contains(&(candidate.item_index, *target)));

        let (candidate, target_line) = match (head, tail) {
            (Some(head), Some(tail)) => {
                if head.0.improvement >= tail.0.improvement {
                    head
                } else {
                    tail
                }
            }
            (Some(head), None) => head,
            (None, Some(tail)) => tail,
            (None, None) => break,
        };

        let mut trial_locks = internal_locks.clone();
        trial_locks.insert(candidate.item_index, target_line);
        let trial = run(best.available_line_items_width, &trial_locks);

        if trial.drawback + DRAWBACK_EPSILON < best.drawback {
            trace!(
                item = candidate.item_index,
                target_line,
                drawback = trial.drawback,
                "equalizing move accepted"
            );
            internal_locks = trial_locks;
            best = trial;
        } else {
            rejected.insert((candidate.item_index, target_line));
            misses += 1;
        }
    }

    debug!(
        drawback = best.drawback,
        width = best.available_line_items_width,
        widths_tried = tried.len(),
        internal_locks = internal_locks.len(),
        "width search settled"
    );

    SearchResult {
        layout: best,
        internal_locks,
    }
}
