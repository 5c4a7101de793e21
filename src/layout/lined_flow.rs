//! The lined flow layout.
//!
//! Arranges a scrollable collection into fixed-height lines, each
//! item keeping its own aspect ratio. Only a window of items around
//! the viewport is realized; the rest of the line space is estimated
//! from the average items-per-line. Measure picks one of three paths:
//! unconstrained (infinite width), fast (full-collection sizing info)
//! or regular (incremental width search over the sized window).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::{ItemsJustification, ItemsStretch};
use crate::error::{InvalidationTrigger, LayoutError};
use crate::geometry::{round_to_scale, Point, Rect, Size};
use crate::hooks;
use crate::host::{CollectionChange, ItemsInfoRequest, ItemsInfoResponse, LayoutHost};
use crate::layout::aspect_ratios::{next_weight, AspectRatio, AspectRatioStore, MAX_WEIGHT};
use crate::layout::averages::AverageItemsPerLine;
use crate::layout::element_manager::{ElementManager, ElementWidthMap};
use crate::layout::fast_path::{self, FastLayout};
use crate::layout::items_info::{ApplyOutcome, ItemsInfoCache};
use crate::layout::locks::LockRegistry;
use crate::layout::regular_path::{six_phase_search, SearchRequest};
use crate::layout::remeasure::RemeasureTimer;
use crate::layout::scaler::{distribution, scale_line};
use crate::layout::zones::{self, ZoneInputs, ZonePlan};
use crate::layout::VirtualizingLayout;

/// Measures a bring-into-view anchor survives while the host
/// advertises -1. Heuristic carried over from the original tuning.
const ANCHOR_RETENTION_START: u32 = 10;

/// Aspect-ratio storage budget, in viewports worth of items.
const ASPECT_RATIO_VIEWPORTS: f64 = 10.0;

/// Width delta below which two measures count as "same width".
const WIDTH_TOLERANCE: f64 = 0.5;

/// Which pipeline the previous measure ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MeasurePath {
    #[default]
    None,
    Unconstrained,
    Regular,
    Fast,
}

type Dispatcher = Arc<dyn Fn() + Send + Sync>;

/// A virtualizing layout of aspect-ratio-sized items on fixed-height
/// lines.
pub struct LinedFlowLayout {
    // Options.
    line_height: f64,
    actual_line_height: f64,
    line_spacing: f64,
    min_item_spacing: f64,
    items_justification: ItemsJustification,
    items_stretch: ItemsStretch,

    // Binding.
    bound: bool,
    dispatcher: Option<Dispatcher>,
    is_virtualizing: bool,

    // Collaborators.
    averages: AverageItemsPerLine,
    aspect_ratios: AspectRatioStore,
    locks: LockRegistry,
    items_info: ItemsInfoCache,
    elements: ElementManager,
    timer: RemeasureTimer,

    // Measure state.
    path: MeasurePath,
    item_count: usize,
    line_item_counts: Vec<usize>,
    first_sized_line: Option<usize>,
    first_sized_item: Option<usize>,
    frozen_lines: Option<(usize, usize)>,
    frozen_items: Option<(usize, usize)>,
    fast_layout: Option<FastLayout>,
    fast_valid: bool,
    pending_partial_response: Option<ItemsInfoResponse>,

    anchor_index: Option<usize>,
    anchor_retention_countdown: u32,
    anchor_line_this_measure: Option<usize>,

    element_available_widths: ElementWidthMap,
    element_desired_widths: ElementWidthMap,

    previous_available_width: f64,
    max_line_width: f64,
    line_count: usize,
    force_relayout: bool,
    last_average_aspect_ratio: f64,

    items_unlocked_sinks: Vec<Box<dyn Fn()>>,
}

impl LinedFlowLayout {
    pub fn new() -> Self {
        Self {
            line_height: f64::NAN,
            actual_line_height: 0.0,
            line_spacing: 0.0,
            min_item_spacing: 0.0,
            items_justification: ItemsJustification::default(),
            items_stretch: ItemsStretch::default(),
            bound: false,
            dispatcher: None,
            is_virtualizing: false,
            averages: AverageItemsPerLine::new(),
            aspect_ratios: AspectRatioStore::new(),
            locks: LockRegistry::new(),
            items_info: ItemsInfoCache::new(),
            elements: ElementManager::new(),
            timer: RemeasureTimer::new(),
            path: MeasurePath::None,
            item_count: 0,
            line_item_counts: Vec::new(),
            first_sized_line: None,
            first_sized_item: None,
            frozen_lines: None,
            frozen_items: None,
            fast_layout: None,
            fast_valid: false,
            pending_partial_response: None,
            anchor_index: None,
            anchor_retention_countdown: 0,
            anchor_line_this_measure: None,
            element_available_widths: ElementWidthMap::new(),
            element_desired_widths: ElementWidthMap::new(),
            previous_available_width: 0.0,
            max_line_width: 0.0,
            line_count: 0,
            force_relayout: false,
            last_average_aspect_ratio: 0.0,
            items_unlocked_sinks: Vec::new(),
        }
    }

    // ----- options -----------------------------------------------------

    /// Explicit line height; NaN derives it from the first item.
    pub fn line_height(&self) -> f64 {
        self.line_height
    }

    pub fn set_line_height(&mut self, value: f64) {
        if value != self.line_height && !(value.is_nan() && self.line_height.is_nan()) {
            self.line_height = value;
            self.actual_line_height = 0.0;
            self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
        }
    }

    /// The line height in effect: the explicit value or the derived
    /// one.
    pub fn actual_line_height(&self) -> f64 {
        self.actual_line_height
    }

    pub fn line_spacing(&self) -> f64 {
        self.line_spacing
    }

    pub fn set_line_spacing(&mut self, value: f64) {
        if value != self.line_spacing {
            self.line_spacing = value;
            self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
        }
    }

    pub fn min_item_spacing(&self) -> f64 {
        self.min_item_spacing
    }

    pub fn set_min_item_spacing(&mut self, value: f64) {
        if value != self.min_item_spacing {
            self.min_item_spacing = value;
            self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
        }
    }

    pub fn items_justification(&self) -> ItemsJustification {
        self.items_justification
    }

    pub fn set_items_justification(&mut self, value: ItemsJustification) {
        if value != self.items_justification {
            self.items_justification = value;
            // Only arrange positions change, but hosts re-run both
            // passes anyway.
            self.invalidate_layout(false, false, true, InvalidationTrigger::HostInitiated);
        }
    }

    pub fn items_stretch(&self) -> ItemsStretch {
        self.items_stretch
    }

    pub fn set_items_stretch(&mut self, value: ItemsStretch) {
        if value != self.items_stretch {
            self.items_stretch = value;
            self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
        }
    }

    // ----- events ------------------------------------------------------

    /// Registers a callback raised whenever all item locks drop.
    pub fn on_items_unlocked<F>(&mut self, callback: F)
    where
        F: Fn() + 'static,
    {
        self.items_unlocked_sinks.push(Box::new(callback));
    }

    // ----- sizing info -------------------------------------------------

    /// Pushes full-collection desired aspect ratios ahead of the next
    /// measure, enabling the fast path without an event round-trip.
    pub fn set_desired_aspect_ratios(&mut self, values: &[f64]) {
        self.items_info.set_fast_desired_aspect_ratios(values);
        self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
    }

    pub fn set_min_widths(&mut self, values: &[f64]) {
        self.items_info.set_fast_min_widths(values);
        self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
    }

    pub fn set_max_widths(&mut self, values: &[f64]) {
        self.items_info.set_fast_max_widths(values);
        self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
    }

    /// Discards collected sizing info (both forms) and forces a
    /// fresh request on the next measure.
    pub fn invalidate_items_info(&mut self) {
        self.invalidate_layout(true, true, true, InvalidationTrigger::HostInitiated);
    }

    /// Start of the most recent items-info request, or -1.
    pub fn requested_range_start_index(&self) -> i32 {
        self.items_info.requested_range_start_index()
    }

    /// Length of the most recent items-info request, or -1.
    pub fn requested_range_length(&self) -> i32 {
        self.items_info.requested_range_length()
    }

    // ----- locking -----------------------------------------------------

    /// Pins `item_index` to the line the layout currently maps it to
    /// and returns that line, or -1 when no snapped average exists
    /// yet (lock again after the first measure).
    pub fn lock_item_to_line(&mut self, item_index: usize) -> Result<i32, LayoutError> {
        let uses_fast = self.path == MeasurePath::Fast && self.fast_valid;
        if !uses_fast && self.averages.is_unset() {
            // No measure has produced a line space yet.
            return Ok(-1);
        }
        if item_index >= self.item_count {
            return Err(LayoutError::IndexOutOfRange {
                index: item_index,
                item_count: self.item_count,
            });
        }

        let line_index = if uses_fast {
            match &self.fast_layout {
                Some(fast) => fast.line_of_item(item_index),
                None => return Ok(-1),
            }
        } else {
            if item_index + 1 == self.item_count {
                // The last item is implicitly pinned to the last line.
                self.line_count.saturating_sub(1)
            } else {
                self.averages.line_index_of_item(item_index, self.item_count)
            }
        };

        if item_index == 0 || item_index + 1 == self.item_count {
            self.locks.mark_endpoints_locked();
        }
        self.locks.lock(item_index, line_index);
        hooks::notify_item_locked(item_index, line_index);
        self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
        Ok(line_index as i32)
    }

    /// Drops every lock and raises the items-unlocked event if any
    /// existed.
    pub fn unlock_items(&mut self) {
        if self.locks.clear() {
            for sink in &self.items_unlocked_sinks {
                sink();
            }
        }
    }

    // ----- probes ------------------------------------------------------

    pub fn first_realized_item_index(&self) -> i32 {
        self.elements.first_realized_index().map_or(-1, |index| index as i32)
    }

    pub fn last_realized_item_index(&self) -> i32 {
        self.elements.last_realized_index().map_or(-1, |index| index as i32)
    }

    pub fn first_frozen_item_index(&self) -> i32 {
        self.frozen_items.map_or(-1, |(first, _)| first as i32)
    }

    pub fn last_frozen_item_index(&self) -> i32 {
        self.frozen_items.map_or(-1, |(_, last)| last as i32)
    }

    pub fn raw_average_items_per_line(&self) -> f64 {
        self.averages.raw()
    }

    pub fn snapped_average_items_per_line(&self) -> f64 {
        self.averages.snapped()
    }

    /// Average aspect ratio used by the most recent measure.
    pub fn average_item_aspect_ratio(&self) -> f64 {
        self.last_average_aspect_ratio
    }

    /// Line currently holding `item_index`, by the active mapping.
    pub fn line_index_of_item(&self, item_index: usize) -> i32 {
        if item_index >= self.item_count {
            return -1;
        }
        if self.path == MeasurePath::Fast && self.fast_valid {
            if let Some(fast) = &self.fast_layout {
                return fast.line_of_item(item_index) as i32;
            }
        }
        if self.averages.is_unset() {
            return -1;
        }
        self.averages.line_index_of_item(item_index, self.item_count) as i32
    }

    /// Forgets every tracked aspect ratio.
    pub fn clear_item_aspect_ratios(&mut self) {
        self.aspect_ratios.clear();
        self.invalidate_layout(true, false, true, InvalidationTrigger::HostInitiated);
    }

    /// Marks layout state dirty. Property setters, hooks and
    /// collection changes all funnel through here.
    pub fn invalidate_layout(
        &mut self,
        force_relayout: bool,
        reset_items_info: bool,
        invalidate_measure: bool,
        trigger: InvalidationTrigger,
    ) {
        if force_relayout {
            self.force_relayout = true;
            self.fast_valid = false;
        }
        if reset_items_info {
            self.items_info.reset();
            self.items_info.reset_fast();
            self.fast_layout = None;
            self.fast_valid = false;
        }
        hooks::notify_invalidated(trigger);
        if invalidate_measure {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher();
            }
        }
    }

    // ----- measure internals -------------------------------------------

    fn pitch(&self) -> f64 {
        self.actual_line_height + self.line_spacing
    }

    fn update_actual_line_height(&mut self, host: &mut dyn LayoutHost) {
        if self.line_height.is_finite() && self.line_height > 0.0 {
            self.actual_line_height = self.line_height;
            return;
        }
        if self.line_height.is_finite() {
            // Explicit zero or negative: no lines.
            self.actual_line_height = 0.0;
            return;
        }
        if self.actual_line_height > 0.0 {
            return;
        }
        // Derive from the first item's natural height.
        let element = self.elements.ensure_realized(host, 0);
        element.borrow_mut().measure(Size::infinite());
        let desired = element.borrow().desired_size();
        self.actual_line_height = desired.height.max(0.0);
        debug!(actual_line_height = self.actual_line_height, "line height derived from first item");
    }

    fn on_snapped_average_changed(&mut self) {
        trace!(
            snapped = self.averages.snapped(),
            "snapped average changed, dropping line assignments"
        );
        self.unlock_items();
        self.line_item_counts.clear();
        self.first_sized_line = None;
        self.first_sized_item = None;
        self.frozen_lines = None;
        self.frozen_items = None;
        self.force_relayout = true;
        hooks::notify_invalidated(InvalidationTrigger::SnappedAverageChange);
    }

    /// First item and count of `line_index` under the stored regular
    /// assignment.
    fn line_items(&self, line_index: usize) -> Option<(usize, usize)> {
        let first_line = self.first_sized_line?;
        let first_item = self.first_sized_item?;
        let ordinal = line_index.checked_sub(first_line)?;
        if ordinal >= self.line_item_counts.len() {
            return None;
        }
        let start = first_item + self.line_item_counts[..ordinal].iter().sum::<usize>();
        Some((start, self.line_item_counts[ordinal]))
    }

    /// Tracks the bring-into-view anchor across transient -1
    /// advertisements and maps it to a line.
    fn resolve_anchor(&mut self, host: &dyn LayoutHost) -> Option<usize> {
        let advertised = host.recommended_anchor_index();
        if advertised >= 0 && (advertised as usize) < self.item_count {
            self.anchor_index = Some(advertised as usize);
            self.anchor_retention_countdown = ANCHOR_RETENTION_START;
        } else if self.anchor_index.is_some() && self.anchor_retention_countdown > 0 {
            self.anchor_retention_countdown -= 1;
            if self.anchor_retention_countdown == 0 {
                self.anchor_index = None;
            } else if let Some(dispatcher) = &self.dispatcher {
                // Survive the -1 burst: ask for another pass so the
                // anchor can re-appear.
                dispatcher();
            }
        } else {
            self.anchor_index = None;
        }

        let anchor = self.anchor_index?;
        let line = if self.path == MeasurePath::Fast && self.fast_valid {
            self.fast_layout.as_ref().map(|fast| fast.line_of_item(anchor))?
        } else if self.averages.is_unset() {
            return None;
        } else {
            self.averages.line_index_of_item(anchor, self.item_count)
        };
        Some(line)
    }

    /// Zone plan for the current geometry, re-centered on the anchor
    /// line when the plain plan would not realize it.
    fn plan_zones(&self, host: &dyn LayoutHost, line_count: usize) -> ZonePlan {
        let content_height = line_count as f64 * self.pitch() - self.line_spacing;
        let sanitize = |rect: Rect| -> Rect {
            if rect.is_infinite() {
                Rect::new(0.0, 0.0, f64::MAX.sqrt(), content_height.max(0.0))
            } else {
                rect
            }
        };

        let inputs = ZoneInputs {
            visible_rect: sanitize(host.visible_rect()),
            realization_rect: sanitize(host.realization_rect()),
            line_count,
            line_height: self.actual_line_height,
            line_spacing: self.line_spacing,
            anchor_line: None,
        };
        let plan = zones::plan(&inputs);

        match self.anchor_line_this_measure {
            Some(anchor) if plan.realized.map_or(true, |lines| !lines.contains(anchor)) => {
                zones::plan(&ZoneInputs {
                    anchor_line: Some(anchor),
                    ..inputs
                })
            }
            _ => plan,
        }
    }

    /// Item span of `[first_line, last_line]` under the average
    /// mapping.
    fn estimated_item_span(&self, first_line: usize, last_line: usize, line_count: usize) -> (usize, usize) {
        let first = self.averages.first_item_of_line(first_line, self.item_count);
        let last = if last_line + 1 >= line_count {
            self.item_count - 1
        } else {
            self.averages
                .first_item_of_line(last_line + 1, self.item_count)
                .saturating_sub(1)
        };
        (first, last.max(first))
    }

    /// Desired width for one sized item: host info first, then the
    /// tracked ratio, then the running average; element bounds apply
    /// on top.
    fn desired_item_width(&self, item: usize, fallback_ratio: f64) -> f64 {
        let record = self.aspect_ratios.get(item);
        let fallback = if record.weight > 0 { record.ratio } else { fallback_ratio };
        let mut width = self
            .items_info
            .resolved_width(item, self.actual_line_height, fallback, 1.0);
        if let Some(element) = self.elements.get(item) {
            let element = element.borrow();
            if let Some(max) = element.max_width() {
                width = width.min(max);
            }
            if let Some(min) = element.min_width() {
                width = width.max(min);
            }
        }
        width.max(0.0)
    }

    /// Scaling bounds for one item: host info combined with the
    /// element's declared bounds.
    fn scaling_bounds(&self, item: usize) -> (f64, f64) {
        let (mut min, mut max) = self.items_info.width_bounds(item);
        if let Some(element) = self.elements.get(item) {
            let element = element.borrow();
            if let Some(element_min) = element.min_width() {
                min = min.max(element_min);
            }
            if let Some(element_max) = element.max_width() {
                max = max.min(element_max);
            }
        }
        (min, max)
    }

    /// Grows the realized window to `[first, last]` contiguously.
    fn realize_range(&mut self, host: &mut dyn LayoutHost, first: usize, last: usize) {
        self.elements.align_window(host, first, last - first + 1);
        match self.elements.first_realized_index() {
            None => {
                for item in first..=last {
                    self.elements.ensure_realized(host, item);
                }
            }
            Some(current_first) => {
                for item in (first..current_first).rev() {
                    self.elements.ensure_realized(host, item);
                }
                let current_last = self.elements.last_realized_index().unwrap_or(last);
                for item in current_last + 1..=last {
                    self.elements.ensure_realized(host, item);
                }
            }
        }
    }

    fn clear_line_state(&mut self, host: &mut dyn LayoutHost) {
        self.elements.clear(host);
        self.line_item_counts.clear();
        self.first_sized_line = None;
        self.first_sized_item = None;
        self.frozen_lines = None;
        self.frozen_items = None;
    }

    /// Internal locks reproducing the previous assignment of frozen
    /// lines, so one measure cannot reshuffle them.
    fn frozen_seed_locks(
        &self,
        frozen: Option<zones::LineRange>,
        first_sized_item: usize,
        last_sized_item: usize,
    ) -> BTreeMap<usize, usize> {
        let mut seeds = BTreeMap::new();
        let Some(frozen) = frozen else {
            return seeds;
        };
        for line in frozen.first..=frozen.last {
            if let Some((first, count)) = self.line_items(line) {
                for item in first..first + count {
                    if item >= first_sized_item && item <= last_sized_item {
                        seeds.insert(item, line);
                    }
                }
            }
        }
        seeds
    }

    fn measure_constrained(&mut self, host: &mut dyn LayoutHost, available_width: f64) -> (f64, usize) {
        self.averages.tick_measure_countdown();
        self.anchor_line_this_measure = self.resolve_anchor(host);

        // Unchanged width and collection on the fast path: nothing to
        // re-partition, only the realization window moves. A
        // non-virtualizing context always takes the regular path.
        if self.is_virtualizing
            && self.fast_valid
            && !self.force_relayout
            && (self.previous_available_width - available_width).abs() < WIDTH_TOLERANCE
        {
            if let Some(fast) = self.fast_layout.take() {
                let result = (fast.max_line_width, fast.line_count());
                self.update_fast_realization(host, &fast);
                self.fast_layout = Some(fast);
                self.path = MeasurePath::Fast;
                return result;
            }
        }

        let (previous_first, previous_last) = match (self.first_sized_item, self.first_sized_line) {
            (Some(first), Some(_)) => {
                let len: usize = self.line_item_counts.iter().sum();
                (first, first + len.saturating_sub(1))
            }
            _ => (0, self.item_count - 1),
        };
        let ratio = self
            .averages
            .average_aspect_ratio(&self.aspect_ratios, previous_first, previous_last);
        self.last_average_aspect_ratio = ratio;
        if self
            .averages
            .update(available_width, self.actual_line_height, self.min_item_spacing, ratio)
        {
            self.on_snapped_average_changed();
        }

        if self.is_virtualizing {
            if let Some((max_line_width, line_count)) = self.try_measure_fast(host, available_width) {
                self.path = MeasurePath::Fast;
                // On this path the average comes from the actual line
                // structure, not an estimate.
                let raw = self.item_count as f64 / line_count.max(1) as f64;
                if self.averages.set_direct(raw) {
                    self.unlock_items();
                }
                return (max_line_width, line_count);
            }
        }

        self.path = MeasurePath::Regular;
        self.measure_regular(host, available_width)
    }

    // ----- fast path ---------------------------------------------------

    fn try_measure_fast(&mut self, host: &mut dyn LayoutHost, available_width: f64) -> Option<(f64, usize)> {
        if hooks::fast_path_disabled() {
            return None;
        }

        let response = if self.items_info.has_full_fast_info(self.item_count) {
            self.items_info.take_fast_response()
        } else if host.handles_items_info()
            && (self.items_info.window().is_none() || self.path == MeasurePath::Fast)
        {
            // Only probe for full-collection data when bootstrapping
            // or already on this path; once the host has answered
            // partially, the regular path's incremental requests own
            // the event.
            let line_count = self.averages.line_count(self.item_count).max(1);
            let plan = self.plan_zones(host, line_count);
            let (start, last) = match plan.sized {
                Some(sized) => self.estimated_item_span(sized.first, sized.last, line_count),
                None => (0, self.item_count - 1),
            };
            let length = last - start + 1;
            let mut request = ItemsInfoRequest::new(start, length);
            self.items_info.record_request(start, length);
            host.items_info_requested(&mut request);
            let response = request.into_response();
            if !response.covers_collection(self.item_count) {
                // Partial sizing data: hand it to the regular path.
                if !response.is_empty() {
                    self.pending_partial_response = Some(response);
                }
                return None;
            }
            response
        } else {
            return None;
        };

        Some(self.measure_fast(host, available_width, response))
    }

    fn measure_fast(
        &mut self,
        host: &mut dyn LayoutHost,
        available_width: f64,
        response: ItemsInfoResponse,
    ) -> (f64, usize) {
        let item_count = self.item_count;
        let alh = self.actual_line_height;

        // The window spans the whole collection on this path.
        self.items_info.rebase(0, item_count);
        self.items_info.apply_response(&response, item_count);

        let fallback_ratio = {
            let ratio = self.averages.average_aspect_ratio(
                &self.aspect_ratios,
                0,
                item_count.saturating_sub(1),
            );
            self.last_average_aspect_ratio = ratio;
            if ratio > 0.0 {
                ratio
            } else {
                1.0
            }
        };
        let widths: Vec<f64> = (0..item_count)
            .map(|item| self.items_info.resolved_width(item, alh, fallback_ratio, 1.0).max(0.0))
            .collect();

        let fast = fast_path::compute(&widths, available_width, self.min_item_spacing);

        // Persist scaled arrange widths for every item.
        let mut item = 0usize;
        let mut max_line_width = 0.0f64;
        for count in &fast.line_item_counts {
            let desired = &widths[item..item + count];
            let bounds: Vec<(f64, f64)> = (item..item + count)
                .map(|index| self.items_info.width_bounds(index))
                .collect();
            let scale = scale_line(
                desired,
                &bounds,
                self.min_item_spacing,
                available_width,
                self.items_stretch,
            );
            let line_width = scale.widths.iter().sum::<f64>()
                + self.min_item_spacing * (count - 1) as f64;
            max_line_width = max_line_width.max(line_width);
            for (offset, width) in scale.widths.iter().enumerate() {
                self.items_info.set_arrange_width(item + offset, *width);
            }
            item += count;
        }

        let line_count = fast.line_count();
        debug!(item_count, line_count, "fast-path measure complete");

        self.line_item_counts = fast.line_item_counts.clone();
        self.first_sized_line = Some(0);
        self.first_sized_item = Some(0);
        self.frozen_lines = None;
        self.frozen_items = None;
        self.fast_layout = Some(fast);
        self.fast_valid = true;
        self.timer.stop();

        if let Some(fast) = self.fast_layout.take() {
            self.update_fast_realization(host, &fast);
            self.fast_layout = Some(fast);
        }

        (max_line_width, line_count)
    }

    /// Realizes and measures exactly the items of the realized lines;
    /// everything else is recycled.
    fn update_fast_realization(&mut self, host: &mut dyn LayoutHost, fast: &FastLayout) {
        let line_count = fast.line_count();
        if line_count == 0 {
            self.elements.clear(host);
            return;
        }

        let plan = self.plan_zones(host, line_count);
        let Some(realized) = plan.realized else {
            self.elements.clear(host);
            return;
        };

        let first_item = fast.first_item_of_line(realized.first);
        let last_item = if realized.last + 1 >= line_count {
            self.item_count - 1
        } else {
            fast.first_item_of_line(realized.last + 1).saturating_sub(1)
        };
        let last_item = last_item.max(first_item);

        self.realize_range(host, first_item, last_item);
        let alh = self.actual_line_height;
        for item in first_item..=last_item {
            if let Some(element) = self.elements.get(item) {
                let element = element.clone();
                let width = self.items_info.arrange_width(item).unwrap_or(0.0);
                element.borrow_mut().measure(Size::new(width, alh));
                self.element_available_widths.set(&element, width);
            }
        }
        self.frozen_lines = plan.frozen.map(|lines| (lines.first, lines.last));
        self.frozen_items = plan.frozen.map(|lines| {
            let first = fast.first_item_of_line(lines.first);
            let last = if lines.last + 1 >= line_count {
                self.item_count - 1
            } else {
                fast.first_item_of_line(lines.last + 1).saturating_sub(1)
            };
            (first, last.max(first))
        });
    }

    // ----- regular path ------------------------------------------------

    fn measure_regular(&mut self, host: &mut dyn LayoutHost, available_width: f64) -> (f64, usize) {
        let item_count = self.item_count;
        let alh = self.actual_line_height;
        let spacing = self.min_item_spacing;
        let line_count = self.averages.line_count(item_count).max(1);

        let plan = self.plan_zones(host, line_count);
        let (Some(sized), Some(realized_lines)) = (plan.sized, plan.realized) else {
            trace!("nothing realizable in view");
            self.clear_line_state(host);
            return (0.0, line_count);
        };

        let (first_sized_item, last_sized_item) =
            self.estimated_item_span(sized.first, sized.last, line_count);
        let sized_len = last_sized_item - first_sized_item + 1;

        // Sizing info window: stitch, then ask only for what is
        // missing.
        let missing = self.items_info.rebase(first_sized_item, sized_len);
        let mut info_in_use = self.items_info.has_window_info();
        if let Some(response) = self.pending_partial_response.take() {
            // The fast-path attempt already asked for this range.
            if self.items_info.apply_response(&response, item_count) != ApplyOutcome::Empty {
                info_in_use = true;
            }
        } else if host.handles_items_info() {
            for (start, length) in missing {
                let mut request = ItemsInfoRequest::new(start, length);
                self.items_info.record_request(start, length);
                host.items_info_requested(&mut request);
                let response = request.into_response();
                if self.items_info.apply_response(&response, item_count) != ApplyOutcome::Empty {
                    info_in_use = true;
                }
            }
        }

        // Bound the ratio store to a few viewports of items around
        // the displayed area, before anything is written to it.
        let viewport_lines = (host.visible_rect().height / self.pitch()).max(1.0);
        let capacity =
            (ASPECT_RATIO_VIEWPORTS * viewport_lines * self.averages.snapped().max(1.0)).ceil() as usize;
        let reference = plan
            .displayed
            .map(|lines| self.averages.first_item_of_line(lines.first, item_count))
            .unwrap_or(first_sized_item);
        self.aspect_ratios.resize(capacity.max(64), reference);

        // Host-supplied ratios are authoritative: track them at full
        // weight so the average estimator sees them.
        if info_in_use {
            for item in first_sized_item..=last_sized_item {
                if let Some(ratio) = self.items_info.desired_ratio(item) {
                    self.aspect_ratios.set(
                        item,
                        AspectRatio {
                            ratio,
                            weight: MAX_WEIGHT,
                        },
                    );
                }
            }
        }

        // Realize the window and learn ratios for items the host did
        // not size.
        let (first_realized_item, last_realized_item) = {
            let (first, last) =
                self.estimated_item_span(realized_lines.first, realized_lines.last, line_count);
            (first.max(first_sized_item), last.min(last_sized_item).max(first))
        };
        let old_desired_widths = self.element_desired_widths.clone();
        self.realize_range(host, first_realized_item, last_realized_item);

        let mut learned_without_info = false;
        let mut desired_changed = false;
        for item in first_realized_item..=last_realized_item {
            let Some(element) = self.elements.get(item).cloned() else {
                continue;
            };
            if self.items_info.desired_ratio(item).is_some() {
                continue;
            }
            element.borrow_mut().measure(Size::new(f64::INFINITY, alh));
            let desired = element.borrow().desired_size();
            learned_without_info = true;
            if desired.width <= 0.0 {
                warn!(item, "element reported no desired width");
            } else if alh > 0.0 {
                let previous = self.aspect_ratios.get(item);
                let element_min = element.borrow().min_width().unwrap_or(0.0);
                let (info_min, _) = self.items_info.width_bounds(item);
                let trusted = desired.width > element_min.max(info_min);
                self.aspect_ratios.set(
                    item,
                    AspectRatio {
                        ratio: desired.width / alh,
                        weight: next_weight(previous.weight, trusted),
                    },
                );
            }
            if let Some(old) = old_desired_widths.get(&element) {
                if (old - desired.width).abs() > WIDTH_TOLERANCE {
                    desired_changed = true;
                }
            }
            self.element_desired_widths.set(&element, desired.width);
        }
        self.element_desired_widths.prune();
        self.element_available_widths.prune();

        if desired_changed {
            hooks::notify_invalidated(InvalidationTrigger::DesiredSizeChange);
        }

        // Desired widths for the sized range.
        let fallback_ratio = self
            .averages
            .average_aspect_ratio(&self.aspect_ratios, first_sized_item, last_sized_item);
        let widths: Vec<f64> = (first_sized_item..=last_sized_item)
            .map(|item| self.desired_item_width(item, fallback_ratio))
            .collect();

        // Frozen lines keep their previous assignment unless the
        // geometry or the content moved underneath them.
        let seeds = if !self.force_relayout
            && !desired_changed
            && (self.previous_available_width - available_width).abs() < WIDTH_TOLERANCE
        {
            self.frozen_seed_locks(plan.frozen, first_sized_item, last_sized_item)
        } else {
            BTreeMap::new()
        };

        let cost_trailing_line =
            sized.last + 1 < line_count || self.items_stretch == ItemsStretch::Fill;
        let external: BTreeMap<usize, usize> = self
            .locks
            .map()
            .iter()
            .filter(|(item, line)| {
                **item >= first_sized_item
                    && **item <= last_sized_item
                    && **line >= sized.first
                    && **line <= sized.last
            })
            .map(|(item, line)| (*item, *line))
            .collect();
        let forward = self
            .anchor_line_this_measure
            .map_or(true, |line| line <= (sized.first + sized.last) / 2);

        let request = SearchRequest {
            widths: &widths,
            first_item: first_sized_item,
            first_line: sized.first,
            line_count: sized.len(),
            available_width,
            min_item_spacing: spacing,
            cost_trailing_line,
            forward,
        };
        let result = six_phase_search(&request, &external, seeds);

        self.line_item_counts = result.layout.line_item_counts;
        self.first_sized_line = Some(sized.first);
        self.first_sized_item = Some(first_sized_item);

        // Final scaling and measurement at assigned widths.
        let mut max_line_width = 0.0f64;
        let mut item = first_sized_item;
        let counts = self.line_item_counts.clone();
        for count in &counts {
            let offset = item - first_sized_item;
            let desired = &widths[offset..offset + count];
            let bounds: Vec<(f64, f64)> =
                (item..item + count).map(|index| self.scaling_bounds(index)).collect();
            let scale = scale_line(desired, &bounds, spacing, available_width, self.items_stretch);
            let line_width =
                scale.widths.iter().sum::<f64>() + spacing * (count - 1) as f64;
            max_line_width = max_line_width.max(line_width);
            for (slot, width) in scale.widths.iter().enumerate() {
                let index = item + slot;
                self.items_info.set_arrange_width(index, *width);
                if let Some(element) = self.elements.get(index) {
                    let element = element.clone();
                    element.borrow_mut().measure(Size::new(*width, alh));
                    self.element_available_widths.set(&element, *width);
                }
            }
            item += count;
        }

        let last_used_line = sized.first + counts.len().saturating_sub(1);
        self.frozen_lines = plan
            .frozen
            .map(|lines| (lines.first, lines.last.min(last_used_line)));
        self.frozen_items = self.frozen_lines.and_then(|(first, last)| {
            let (first_item, _) = self.line_items(first)?;
            let (last_start, last_count) = self.line_items(last)?;
            Some((first_item, last_start + last_count - 1))
        });

        // Confidence still growing: ask for one more pass while the
        // initial-loading window is open.
        if self.averages.measure_countdown() > 0
            && self
                .aspect_ratios
                .has_lower_weight(first_sized_item, last_sized_item, MAX_WEIGHT)
        {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher();
            }
        }

        // Poll for lazily loading content only while the host gives
        // no sizing info.
        if info_in_use {
            self.timer.stop();
        } else if learned_without_info {
            if let Some(dispatcher) = &self.dispatcher {
                self.timer.start(0, dispatcher.clone());
            }
        }

        (max_line_width, line_count)
    }

    // ----- unconstrained path ------------------------------------------

    fn measure_unconstrained(&mut self, host: &mut dyn LayoutHost) -> Size {
        let item_count = self.item_count;
        let alh = self.actual_line_height;

        self.items_info.rebase(0, item_count);
        self.realize_range(host, 0, item_count - 1);

        let mut total = 0.0f64;
        for item in 0..item_count {
            let Some(element) = self.elements.get(item).cloned() else {
                continue;
            };
            element.borrow_mut().measure(Size::new(f64::INFINITY, alh));
            let width = element.borrow().desired_size().width.max(0.0);
            self.items_info.set_arrange_width(item, width);
            total += width;
        }
        total += self.min_item_spacing * item_count.saturating_sub(1) as f64;

        self.line_item_counts = vec![item_count];
        self.first_sized_line = Some(0);
        self.first_sized_item = Some(0);
        self.line_count = 1;
        self.max_line_width = total;

        Size::new(total, alh)
    }

    // ----- arrange internals -------------------------------------------

    fn rounding_scale(&self) -> f64 {
        let first = match self.elements.first_realized_index() {
            Some(first) => first,
            None => return 1.0,
        };
        self.elements
            .get(first)
            .and_then(|element| element.borrow().rasterization_scale())
            .unwrap_or(1.0)
    }

    fn arrange_line(
        &self,
        line_index: usize,
        first_item: usize,
        count: usize,
        final_width: f64,
        origin: Point,
        scale: f64,
    ) {
        let alh = self.actual_line_height;
        let widths: Vec<f64> = (first_item..first_item + count)
            .map(|item| match self.items_info.arrange_width(item) {
                Some(width) => width,
                None => {
                    let width = self
                        .elements
                        .get(item)
                        .map(|element| element.borrow().desired_size().width)
                        .unwrap_or(0.0);
                    if width <= 0.0 {
                        warn!(item, "arranging item with no desired width");
                    }
                    width.max(0.0)
                }
            })
            .collect();
        let items_width: f64 = widths.iter().sum();

        let (start_x, gap) = distribution(
            self.items_justification,
            self.items_stretch,
            final_width,
            items_width,
            count,
            self.min_item_spacing,
        );

        let y = origin.y + line_index as f64 * self.pitch();
        let mut x = origin.x + start_x;
        for (slot, width) in widths.iter().enumerate() {
            let item = first_item + slot;
            if let Some(element) = self.elements.get(item) {
                element.borrow_mut().arrange(Rect::new(
                    round_to_scale(x, scale),
                    round_to_scale(y, scale),
                    round_to_scale(*width, scale),
                    alh,
                ));
            }
            x += width + gap;
        }
    }

    fn arrange_constrained(&self, final_size: Size, origin: Point) {
        let (Some(first_realized), Some(last_realized)) = (
            self.elements.first_realized_index(),
            self.elements.last_realized_index(),
        ) else {
            return;
        };
        let Some(first_sized_line) = self.first_sized_line else {
            return;
        };
        let scale = self.rounding_scale();

        let mut item = match self.first_sized_item {
            Some(first) => first,
            None => return,
        };
        for (ordinal, count) in self.line_item_counts.iter().enumerate() {
            let line_first = item;
            let line_last = item + count - 1;
            item += count;
            if line_last < first_realized || line_first > last_realized {
                continue;
            }
            self.arrange_line(
                first_sized_line + ordinal,
                line_first,
                *count,
                final_size.width,
                origin,
                scale,
            );
        }
    }

    fn arrange_unconstrained(&self, origin: Point) {
        let alh = self.actual_line_height;
        let scale = self.rounding_scale();
        let mut x = origin.x;
        for item in 0..self.item_count {
            let width = self
                .items_info
                .arrange_width(item)
                .or_else(|| {
                    self.elements
                        .get(item)
                        .map(|element| element.borrow().desired_size().width)
                })
                .unwrap_or(0.0);
            if let Some(element) = self.elements.get(item) {
                element.borrow_mut().arrange(Rect::new(
                    round_to_scale(x, scale),
                    round_to_scale(origin.y, scale),
                    round_to_scale(width, scale),
                    alh,
                ));
            }
            x += width + self.min_item_spacing;
        }
    }
}

impl VirtualizingLayout for LinedFlowLayout {
    fn initialize_for_context(&mut self, host: &mut dyn LayoutHost) -> Result<(), LayoutError> {
        if self.bound {
            return Err(LayoutError::AlreadyBound);
        }
        self.bound = true;
        self.dispatcher = Some(host.invalidation_dispatcher());
        self.is_virtualizing = !host.realization_rect().is_infinite();
        debug!(is_virtualizing = self.is_virtualizing, "layout bound to context");
        Ok(())
    }

    fn uninitialize_for_context(&mut self, host: &mut dyn LayoutHost) {
        self.timer.stop();
        self.unlock_items();
        self.elements.clear(host);
        self.items_info.reset();
        self.items_info.reset_fast();
        self.line_item_counts.clear();
        self.first_sized_line = None;
        self.first_sized_item = None;
        self.frozen_lines = None;
        self.frozen_items = None;
        self.fast_layout = None;
        self.fast_valid = false;
        self.dispatcher = None;
        self.bound = false;
        self.path = MeasurePath::None;
    }

    fn measure(&mut self, host: &mut dyn LayoutHost, available: Size) -> Result<Size, LayoutError> {
        if !self.bound {
            return Err(LayoutError::NotBound);
        }

        let item_count = host.item_count();
        if item_count != self.item_count {
            if self.item_count != 0 {
                // Hosts normally report this through on_items_changed;
                // recover anyway.
                self.apply_collection_change_effects();
            }
            self.item_count = item_count;
        }

        if item_count == 0 {
            self.timer.stop();
            self.clear_line_state(host);
            self.line_count = 0;
            self.max_line_width = 0.0;
            self.path = MeasurePath::None;
            return Ok(Size::ZERO);
        }

        self.update_actual_line_height(host);
        if self.actual_line_height <= 0.0 {
            self.line_count = 0;
            self.max_line_width = 0.0;
            self.path = MeasurePath::None;
            return Ok(Size::ZERO);
        }

        self.is_virtualizing = !host.realization_rect().is_infinite();
        if !self.is_virtualizing {
            self.force_relayout = true;
            self.unlock_items();
        }

        if available.width.is_infinite() {
            self.path = MeasurePath::Unconstrained;
            let desired = self.measure_unconstrained(host);
            self.previous_available_width = f64::INFINITY;
            self.force_relayout = false;
            return Ok(desired);
        }

        let (max_line_width, line_count) = self.measure_constrained(host, available.width);
        self.max_line_width = max_line_width;
        self.line_count = line_count;
        self.previous_available_width = available.width;
        self.force_relayout = false;

        let height = if line_count == 0 {
            0.0
        } else {
            line_count as f64 * self.pitch() - self.line_spacing
        };
        Ok(Size::new(available.width.max(self.max_line_width), height))
    }

    fn arrange(&mut self, host: &mut dyn LayoutHost, final_size: Size) -> Result<Size, LayoutError> {
        if !self.bound {
            return Err(LayoutError::NotBound);
        }
        let origin = host.layout_origin();
        match self.path {
            MeasurePath::None => {}
            MeasurePath::Unconstrained => self.arrange_unconstrained(origin),
            MeasurePath::Regular | MeasurePath::Fast => self.arrange_constrained(final_size, origin),
        }
        Ok(final_size)
    }

    fn on_items_changed(&mut self, host: &mut dyn LayoutHost, change: CollectionChange) {
        debug!(?change, "collection changed");
        match change {
            CollectionChange::Reset | CollectionChange::Replace { .. } | CollectionChange::Move => {
                self.apply_collection_change_effects();
            }
            CollectionChange::Insert { .. } | CollectionChange::Remove { .. } => {
                // Item indexes shifted under everything keyed by
                // them: locks, the snapped average and the tracked
                // ratios are all stale. The line assignments are left
                // for the next measure to rebuild over the remapped
                // element window.
                self.unlock_items();
                self.averages.reset();
                self.aspect_ratios.clear();
            }
        }
        self.item_count = host.item_count();
        self.invalidate_layout(true, true, true, InvalidationTrigger::CollectionChange);
    }
}

impl LinedFlowLayout {
    /// Shared invalidation for wholesale collection mutations: item
    /// indexes are no longer meaningful, so every index-keyed
    /// structure resets, the average included.
    fn apply_collection_change_effects(&mut self) {
        self.unlock_items();
        self.averages.reset();
        self.aspect_ratios.clear();
        self.line_item_counts.clear();
        self.first_sized_line = None;
        self.first_sized_item = None;
        self.frozen_lines = None;
        self.frozen_items = None;
        self.fast_layout = None;
        self.fast_valid = false;
        self.force_relayout = true;
    }
}

impl Default for LinedFlowLayout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ItemsInfoAnswer, SimulatedHost};
    use std::cell::Cell;
    use std::rc::Rc;

    fn init_logging() {
        // RUST_LOG=linedflow=trace cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn bound_layout(host: &mut SimulatedHost) -> LinedFlowLayout {
        init_logging();
        let mut layout = LinedFlowLayout::new();
        layout.set_line_height(100.0);
        layout.initialize_for_context(host).expect("fresh layout binds");
        layout
    }

    /// Measure until the snapped average settles (the first passes
    /// run on the initial-loading fallback ratio).
    fn measure_settled(layout: &mut LinedFlowLayout, host: &mut SimulatedHost, width: f64) -> Size {
        let available = Size::new(width, host.viewport.height);
        let mut desired = layout.measure(host, available).expect("measure");
        for _ in 0..3 {
            let next = layout.measure(host, available).expect("measure");
            if next == desired && layout.snapped_average_items_per_line() > 0.0 {
                return next;
            }
            desired = next;
        }
        desired
    }

    #[test]
    fn test_measure_requires_binding() {
        let mut host = SimulatedHost::uniform(3, 1.0, Size::new(500.0, 600.0));
        let mut layout = LinedFlowLayout::new();
        assert_eq!(
            layout.measure(&mut host, Size::new(500.0, 600.0)),
            Err(LayoutError::NotBound)
        );
    }

    #[test]
    fn test_layout_cannot_be_shared() {
        let mut host = SimulatedHost::uniform(3, 1.0, Size::new(500.0, 600.0));
        let mut layout = bound_layout(&mut host);
        let mut second_host = SimulatedHost::uniform(3, 1.0, Size::new(500.0, 600.0));
        assert_eq!(
            layout.initialize_for_context(&mut second_host),
            Err(LayoutError::AlreadyBound)
        );

        // Unbinding frees the layout for a new context.
        layout.uninitialize_for_context(&mut host);
        assert!(layout.initialize_for_context(&mut second_host).is_ok());
    }

    #[test]
    fn test_empty_collection() {
        let mut host = SimulatedHost::uniform(0, 1.0, Size::new(500.0, 600.0));
        let mut layout = bound_layout(&mut host);
        let desired = layout.measure(&mut host, Size::new(500.0, 600.0)).unwrap();
        assert_eq!(desired, Size::ZERO);
        assert_eq!(host.created_count, 0);
    }

    #[test]
    fn test_zero_line_height() {
        let mut host = SimulatedHost::uniform(5, 1.0, Size::new(500.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_line_height(0.0);
        let desired = layout.measure(&mut host, Size::new(500.0, 600.0)).unwrap();
        assert_eq!(desired, Size::ZERO);
    }

    #[test]
    fn test_line_height_derived_from_first_item() {
        let mut host = SimulatedHost::uniform(5, 2.0, Size::new(500.0, 600.0));
        let mut layout = LinedFlowLayout::new();
        layout.initialize_for_context(&mut host).unwrap();
        assert!(layout.line_height().is_nan());

        layout.measure(&mut host, Size::new(500.0, 600.0)).unwrap();
        // The simulated element reports a 100 px natural height.
        assert_eq!(layout.actual_line_height(), 100.0);
    }

    #[test]
    fn test_single_wide_item() {
        let mut host = SimulatedHost::uniform(1, 2.0, Size::new(500.0, 600.0));
        let mut layout = bound_layout(&mut host);

        let desired = layout.measure(&mut host, Size::new(500.0, 600.0)).unwrap();
        assert_eq!(desired, Size::new(500.0, 100.0));

        layout.arrange(&mut host, desired).unwrap();
        assert_eq!(host.arranged_rect(0), Some(Rect::new(0.0, 0.0, 200.0, 100.0)));
    }

    #[test]
    fn test_simple_wrap_three_two() {
        let mut host = SimulatedHost::uniform(5, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);

        let desired = measure_settled(&mut layout, &mut host, 340.0);
        assert_eq!(desired, Size::new(340.0, 200.0));

        layout.arrange(&mut host, desired).unwrap();
        // Line 0 holds items 0..=2 at x 0, 120, 240; line 1 holds
        // items 3..=4.
        for (item, (x, y)) in [
            (0, (0.0, 0.0)),
            (1, (120.0, 0.0)),
            (2, (240.0, 0.0)),
            (3, (0.0, 100.0)),
            (4, (120.0, 100.0)),
        ] {
            let rect = host.arranged_rect(item).expect("item arranged");
            assert_eq!((rect.x, rect.y), (x, y), "item {item}");
            assert_eq!(rect.width, 100.0, "item {item}");
        }
    }

    #[test]
    fn test_stretch_fill_scales_trailing_line() {
        let mut host = SimulatedHost::uniform(5, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);
        layout.set_items_stretch(ItemsStretch::Fill);

        let desired = measure_settled(&mut layout, &mut host, 340.0);
        layout.arrange(&mut host, desired).unwrap();

        // The two-item trailing line fills the 340 px: each item
        // expands from 100 to 160 around the 20 px gap.
        let rect_3 = host.arranged_rect(3).expect("item 3 arranged");
        let rect_4 = host.arranged_rect(4).expect("item 4 arranged");
        assert_eq!(rect_3.x, 0.0);
        assert_eq!(rect_3.width, 160.0);
        assert_eq!(rect_4.x, 180.0);
        assert_eq!(rect_4.width, 160.0);
        assert!((rect_4.x + rect_4.width - 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_lock_before_first_measure_returns_sentinel() {
        let mut host = SimulatedHost::uniform(10, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        assert_eq!(layout.lock_item_to_line(5), Ok(-1));
    }

    #[test]
    fn test_lock_out_of_range() {
        let mut host = SimulatedHost::uniform(10, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        measure_settled(&mut layout, &mut host, 340.0);
        assert_eq!(
            layout.lock_item_to_line(10),
            Err(LayoutError::IndexOutOfRange {
                index: 10,
                item_count: 10
            })
        );
    }

    #[test]
    fn test_locked_item_stays_on_its_line_across_scroll() {
        let mut host = SimulatedHost::uniform(100, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);
        measure_settled(&mut layout, &mut host, 340.0);

        let locked_line = layout.lock_item_to_line(50).expect("lock succeeds");
        assert!(locked_line >= 0);
        assert_eq!(locked_line, layout.line_index_of_item(50));

        // Scroll so item 50's line is displayed.
        host.scroll_to(locked_line as f64 * 100.0 - 100.0);
        let viewport_height = host.viewport.height;
        let desired = layout
            .measure(&mut host, Size::new(340.0, viewport_height))
            .unwrap();
        layout.arrange(&mut host, desired).unwrap();

        let rect = host.arranged_rect(50).expect("locked item arranged");
        assert_eq!(rect.y, locked_line as f64 * 100.0);
    }

    #[test]
    fn test_fast_path_full_collection_info() {
        let mut host = SimulatedHost::uniform(10_000, 1.0, Size::new(340.0, 600.0));
        host.answer = ItemsInfoAnswer::FullCollection;
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);

        let available = Size::new(340.0, 600.0);
        let desired = layout.measure(&mut host, available).unwrap();
        assert_eq!(host.info_requests.len(), 1, "one sizing event per layout");

        // 100 px items with 20 px gaps: three per 340 px line.
        let line_count = (10_000f64 / 3.0).ceil();
        assert_eq!(desired, Size::new(340.0, line_count * 100.0));
        assert!(host.realized_count() < 500, "only a window is realized");

        // Scrolling re-realizes but never re-partitions or re-asks.
        for offset in [5_000.0, 50_000.0, 200_000.0] {
            host.scroll_to(offset);
            let scrolled = layout.measure(&mut host, available).unwrap();
            assert_eq!(scrolled, desired);
        }
        assert_eq!(host.info_requests.len(), 1, "no further sizing events");
        assert!(layout.first_realized_item_index() > 0, "window follows the scroll");
    }

    #[test]
    fn test_partial_info_falls_back_to_regular_path() {
        let mut host = SimulatedHost::uniform(1_000, 1.0, Size::new(340.0, 600.0));
        host.answer = ItemsInfoAnswer::Requested;
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);

        measure_settled(&mut layout, &mut host, 340.0);
        assert!(!host.info_requests.is_empty());
        let (start, length) = host.info_requests[0];
        assert!(length < 1_000, "regular path requests a window, got {start}+{length}");
        // With host-provided ratios no learning measures are needed,
        // so the poll timer never runs.
        assert!(host.realized_count() > 0);
    }

    #[test]
    fn test_anchor_retention_survives_minus_one_bursts() {
        let mut host = SimulatedHost::uniform(10_000, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);
        measure_settled(&mut layout, &mut host, 340.0);
        let available = Size::new(340.0, 600.0);

        host.anchor_index = 5000;
        layout.measure(&mut host, available).unwrap();
        assert!(layout.first_realized_item_index() <= 5000);
        assert!(layout.last_realized_item_index() >= 5000);

        // Transient -1 advertisements keep the window anchored.
        host.anchor_index = -1;
        for _ in 0..3 {
            layout.measure(&mut host, available).unwrap();
            assert!(layout.first_realized_item_index() <= 5000);
            assert!(layout.last_realized_item_index() >= 5000);
        }

        // Once the retention runs out the window follows the plain
        // scroll offset (still at the top).
        for _ in 0..8 {
            layout.measure(&mut host, available).unwrap();
        }
        assert!(layout.last_realized_item_index() < 5000);
        assert!(layout.first_realized_item_index() >= 0);
    }

    #[test]
    fn test_measure_is_idempotent() {
        let mut host = SimulatedHost::new(
            (0..200).map(|index| 0.5 + (index % 5) as f64 * 0.4).collect(),
            Size::new(800.0, 600.0),
        );
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(10.0);
        layout.set_line_spacing(8.0);

        let first = measure_settled(&mut layout, &mut host, 800.0);
        let second = layout.measure(&mut host, Size::new(800.0, 600.0)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unconstrained_width_single_line() {
        let mut host = SimulatedHost::uniform(5, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);

        let desired = layout
            .measure(&mut host, Size::new(f64::INFINITY, 600.0))
            .unwrap();
        // Five 100 px items and four 20 px gaps on one line.
        assert_eq!(desired, Size::new(580.0, 100.0));

        layout.arrange(&mut host, desired).unwrap();
        let rect_4 = host.arranged_rect(4).expect("last item arranged");
        assert_eq!((rect_4.x, rect_4.y), (480.0, 0.0));
    }

    #[test]
    fn test_collection_change_unlocks_items() {
        let mut host = SimulatedHost::uniform(50, 1.0, Size::new(340.0, 600.0));
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(20.0);
        measure_settled(&mut layout, &mut host, 340.0);

        let unlocked = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&unlocked);
        layout.on_items_unlocked(move || sink.set(sink.get() + 1));

        layout.lock_item_to_line(10).expect("lock");
        host.aspect_ratios.push(1.0);
        host.elements.push(None);
        layout.on_items_changed(&mut host, CollectionChange::Insert { index: 50, count: 1 });
        assert_eq!(unlocked.get(), 1, "unlock event raised once");
    }

    #[test]
    fn test_snapped_average_is_power_of_1_1() {
        let mut host = SimulatedHost::uniform(500, 1.3, Size::new(900.0, 600.0));
        let mut layout = bound_layout(&mut host);
        measure_settled(&mut layout, &mut host, 900.0);

        let snapped = layout.snapped_average_items_per_line();
        assert!(snapped > 0.0);
        let exponent = (snapped.ln() / 1.1f64.ln()).round();
        assert!((snapped - 1.1f64.powf(exponent)).abs() < 1e-9);
        assert!(layout.raw_average_items_per_line() >= 1.0);
    }

    #[test]
    fn test_scroll_keeps_partition_sums_consistent() {
        let mut host = SimulatedHost::new(
            (0..2_000).map(|index| 0.6 + (index % 7) as f64 * 0.3).collect(),
            Size::new(1000.0, 700.0),
        );
        let mut layout = bound_layout(&mut host);
        layout.set_min_item_spacing(12.0);
        measure_settled(&mut layout, &mut host, 1000.0);

        for offset in [0.0, 3_000.0, 20_000.0, 7_500.0] {
            host.scroll_to(offset);
            let desired = layout.measure(&mut host, Size::new(1000.0, 700.0)).unwrap();
            assert!(desired.height > 0.0);

            let first = layout.first_realized_item_index();
            let last = layout.last_realized_item_index();
            assert!(first >= 0 && last >= first, "realized window at offset {offset}");

            // Frozen probes form a valid sub-range of the collection.
            let first_frozen = layout.first_frozen_item_index();
            let last_frozen = layout.last_frozen_item_index();
            if first_frozen >= 0 {
                assert!(last_frozen >= first_frozen);
                assert!((last_frozen as usize) < 2_000);
            }
        }
    }
}
