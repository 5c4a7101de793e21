//! Simulated host and elements.
//!
//! Drives the layout without a real UI toolkit: a synthetic
//! collection of aspect ratios, a scrollable viewport, optional
//! items-info answering, and counters for realizations, recycles and
//! dispatched re-measures.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::geometry::{Rect, Size};
use crate::host::{Element, ElementRef, ItemsInfoRequest, LayoutHost};

/// How the simulated host answers items-info requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemsInfoAnswer {
    /// No handler attached.
    #[default]
    None,
    /// Answer exactly the requested range.
    Requested,
    /// Answer for the whole collection regardless of the request.
    FullCollection,
}

/// A fake per-item view with a fixed natural aspect ratio.
pub struct SimulatedElement {
    pub item_index: usize,
    pub aspect_ratio: f64,
    pub min_width: Option<f64>,
    pub max_width: Option<f64>,
    pub desired: Size,
    pub arranged: Option<Rect>,
    pub measure_count: usize,
}

impl SimulatedElement {
    fn new(item_index: usize, aspect_ratio: f64) -> Self {
        Self {
            item_index,
            aspect_ratio,
            min_width: None,
            max_width: None,
            desired: Size::ZERO,
            arranged: None,
            measure_count: 0,
        }
    }
}

impl Element for SimulatedElement {
    fn measure(&mut self, available: Size) {
        self.measure_count += 1;
        let height = if available.height.is_finite() {
            available.height
        } else {
            100.0
        };
        let natural = (self.aspect_ratio * height).max(0.0);
        let width = if available.width.is_finite() {
            natural.min(available.width)
        } else {
            natural
        };
        self.desired = Size::new(width, height);
    }

    fn arrange(&mut self, rect: Rect) {
        self.arranged = Some(rect);
    }

    fn desired_size(&self) -> Size {
        self.desired
    }

    fn render_size(&self) -> Size {
        self.arranged
            .map(|rect| Size::new(rect.width, rect.height))
            .unwrap_or(self.desired)
    }

    fn min_width(&self) -> Option<f64> {
        self.min_width
    }

    fn max_width(&self) -> Option<f64> {
        self.max_width
    }

    fn rasterization_scale(&self) -> Option<f64> {
        Some(1.0)
    }
}

/// In-process host over a synthetic collection.
pub struct SimulatedHost {
    pub aspect_ratios: Vec<f64>,
    pub viewport: Size,
    pub scroll_offset: f64,
    /// Extra realization margin above and below the viewport.
    pub realization_margin: f64,
    pub anchor_index: i32,
    pub answer: ItemsInfoAnswer,
    pub info_min_width: f64,
    pub info_max_width: f64,
    pub elements: Vec<Option<Rc<RefCell<SimulatedElement>>>>,
    pub created_count: usize,
    pub recycled_count: usize,
    /// (start, length) of every items-info request raised.
    pub info_requests: Vec<(usize, usize)>,
    dispatch_count: Arc<AtomicUsize>,
}

impl SimulatedHost {
    pub fn new(aspect_ratios: Vec<f64>, viewport: Size) -> Self {
        let len = aspect_ratios.len();
        Self {
            aspect_ratios,
            viewport,
            scroll_offset: 0.0,
            realization_margin: viewport.height,
            anchor_index: -1,
            answer: ItemsInfoAnswer::None,
            info_min_width: -1.0,
            info_max_width: -1.0,
            elements: vec![None; len],
            created_count: 0,
            recycled_count: 0,
            info_requests: Vec::new(),
            dispatch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A host whose items all share one aspect ratio.
    pub fn uniform(item_count: usize, aspect_ratio: f64, viewport: Size) -> Self {
        Self::new(vec![aspect_ratio; item_count], viewport)
    }

    pub fn scroll_to(&mut self, offset: f64) {
        self.scroll_offset = offset.max(0.0);
    }

    pub fn element(&self, item_index: usize) -> Option<Rc<RefCell<SimulatedElement>>> {
        self.elements.get(item_index).cloned().flatten()
    }

    pub fn arranged_rect(&self, item_index: usize) -> Option<Rect> {
        self.element(item_index).and_then(|element| element.borrow().arranged)
    }

    pub fn dispatched_remeasures(&self) -> usize {
        self.dispatch_count.load(Ordering::SeqCst)
    }

    pub fn realized_count(&self) -> usize {
        self.created_count - self.recycled_count
    }
}

impl LayoutHost for SimulatedHost {
    fn item_count(&self) -> usize {
        self.aspect_ratios.len()
    }

    fn visible_rect(&self) -> Rect {
        Rect::new(0.0, self.scroll_offset, self.viewport.width, self.viewport.height)
    }

    fn realization_rect(&self) -> Rect {
        Rect::new(
            0.0,
            (self.scroll_offset - self.realization_margin).max(0.0),
            self.viewport.width,
            self.viewport.height + 2.0 * self.realization_margin,
        )
    }

    fn recommended_anchor_index(&self) -> i32 {
        self.anchor_index
    }

    fn get_or_create_element(&mut self, index: usize) -> ElementRef {
        self.created_count += 1;
        let ratio = self.aspect_ratios.get(index).copied().unwrap_or(1.0);
        let element = Rc::new(RefCell::new(SimulatedElement::new(index, ratio)));
        self.elements[index] = Some(element.clone());
        element
    }

    fn recycle_element(&mut self, _element: &ElementRef) {
        self.recycled_count += 1;
    }

    fn handles_items_info(&self) -> bool {
        self.answer != ItemsInfoAnswer::None
    }

    fn items_info_requested(&mut self, request: &mut ItemsInfoRequest) {
        let start = request.items_range_start_index();
        let length = request.items_range_requested_length();
        self.info_requests.push((start, length));

        match self.answer {
            ItemsInfoAnswer::None => {}
            ItemsInfoAnswer::Requested => {
                let end = (start + length).min(self.aspect_ratios.len());
                request.set_desired_aspect_ratios(&self.aspect_ratios[start..end]);
                if self.info_min_width >= 0.0 {
                    request.set_min_width(self.info_min_width);
                }
                if self.info_max_width >= 0.0 {
                    request.set_max_width(self.info_max_width);
                }
            }
            ItemsInfoAnswer::FullCollection => {
                request.set_items_range_start_index(0);
                request.set_desired_aspect_ratios(&self.aspect_ratios.clone());
                if self.info_min_width >= 0.0 {
                    request.set_min_width(self.info_min_width);
                }
                if self.info_max_width >= 0.0 {
                    request.set_max_width(self.info_max_width);
                }
            }
        }
    }

    fn invalidation_dispatcher(&self) -> Arc<dyn Fn() + Send + Sync> {
        let counter = Arc::clone(&self.dispatch_count);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}
