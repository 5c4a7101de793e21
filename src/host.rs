//! Host-facing traits.
//!
//! The layout never owns a scroll viewport, an item collection or a
//! widget tree; it consumes all of them through [`LayoutHost`] and
//! [`Element`]. A host is typically a virtualizing items repeater:
//! it knows the item count, the viewport, the larger realization
//! window it wants populated, and how to create and recycle the
//! per-item views.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::geometry::{Point, Rect, Size};

/// A realized per-item view.
///
/// Elements are opaque: the layout only measures them, reads their
/// desired size, and arranges them. Identity across recycles is not
/// assumed; width bookkeeping is keyed by weak handles.
pub trait Element {
    /// Measures the element against `available` and updates its
    /// desired size.
    fn measure(&mut self, available: Size);

    /// Positions the element at `rect`.
    fn arrange(&mut self, rect: Rect);

    /// The size produced by the last `measure` call.
    fn desired_size(&self) -> Size;

    /// The size produced by the last `arrange` call.
    fn render_size(&self) -> Size;

    /// Lower width bound, if the element declares one.
    fn min_width(&self) -> Option<f64> {
        None
    }

    /// Upper width bound, if the element declares one.
    fn max_width(&self) -> Option<f64> {
        None
    }

    /// The display's rasterization scale, when the element is in a
    /// tree that can answer. `None` falls back to 1.0.
    fn rasterization_scale(&self) -> Option<f64> {
        None
    }
}

/// Shared handle to a realized element.
pub type ElementRef = Rc<RefCell<dyn Element>>;

/// Weak handle used as a map key so recycled elements never dangle.
pub type WeakElementRef = Weak<RefCell<dyn Element>>;

/// Sizing data the host hands back from an items-info request.
///
/// The layout fills in the requested range; the handler may answer
/// for a broader range (covering the whole collection enables the
/// fast path) or narrow the start index. The object is consumed when
/// the request returns, so late writes are impossible by
/// construction.
#[derive(Debug, Default)]
pub struct ItemsInfoRequest {
    start_index: usize,
    requested_length: usize,
    established_start_index: usize,
    min_width: f64,
    max_width: f64,
    desired_aspect_ratios: Vec<f64>,
    min_widths: Vec<f64>,
    max_widths: Vec<f64>,
}

impl ItemsInfoRequest {
    pub(crate) fn new(start_index: usize, requested_length: usize) -> Self {
        Self {
            start_index,
            requested_length,
            established_start_index: start_index,
            min_width: -1.0,
            max_width: -1.0,
            desired_aspect_ratios: Vec::new(),
            min_widths: Vec::new(),
            max_widths: Vec::new(),
        }
    }

    /// First item index the layout wants data for.
    pub fn items_range_start_index(&self) -> usize {
        self.start_index
    }

    /// Number of items the layout wants data for.
    pub fn items_range_requested_length(&self) -> usize {
        self.requested_length
    }

    /// Lets the handler answer for a range starting earlier than
    /// requested. A start later than requested is a partial answer
    /// and demotes the measure to the regular path.
    pub fn set_items_range_start_index(&mut self, start_index: usize) {
        self.established_start_index = start_index;
    }

    /// Global minimum item width for the answered range. Negative
    /// means unspecified.
    pub fn set_min_width(&mut self, min_width: f64) {
        self.min_width = min_width;
    }

    /// Global maximum item width for the answered range. Negative
    /// means unspecified.
    pub fn set_max_width(&mut self, max_width: f64) {
        self.max_width = max_width;
    }

    /// One desired aspect ratio per item from the established start
    /// index. A value `<= 0` means "use the running average".
    pub fn set_desired_aspect_ratios(&mut self, values: &[f64]) {
        self.desired_aspect_ratios = values.to_vec();
    }

    /// Optional per-item minimum widths, parallel to the ratios.
    pub fn set_min_widths(&mut self, values: &[f64]) {
        self.min_widths = values.to_vec();
    }

    /// Optional per-item maximum widths, parallel to the ratios.
    pub fn set_max_widths(&mut self, values: &[f64]) {
        self.max_widths = values.to_vec();
    }

    pub(crate) fn into_response(self) -> ItemsInfoResponse {
        ItemsInfoResponse {
            start_index: self.established_start_index,
            min_width: self.min_width,
            max_width: self.max_width,
            desired_aspect_ratios: self.desired_aspect_ratios,
            min_widths: self.min_widths,
            max_widths: self.max_widths,
        }
    }
}

/// The detached result of an items-info request.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemsInfoResponse {
    pub start_index: usize,
    pub min_width: f64,
    pub max_width: f64,
    pub desired_aspect_ratios: Vec<f64>,
    pub min_widths: Vec<f64>,
    pub max_widths: Vec<f64>,
}

impl ItemsInfoResponse {
    pub fn len(&self) -> usize {
        self.desired_aspect_ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired_aspect_ratios.is_empty()
    }

    /// True when the answer covers every item of the collection.
    pub fn covers_collection(&self, item_count: usize) -> bool {
        self.start_index == 0 && self.len() >= item_count
    }
}

/// A mutation of the source collection, reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChange {
    /// Everything may have changed.
    Reset,
    Insert { index: usize, count: usize },
    Remove { index: usize, count: usize },
    Replace { index: usize, count: usize },
    Move,
}

/// The hosting context a layout is bound to.
pub trait LayoutHost {
    /// Number of items in the source collection.
    fn item_count(&self) -> usize;

    /// The scroll viewport in layout coordinates.
    fn visible_rect(&self) -> Rect;

    /// The window the host wants realized. Infinite when the host
    /// does not virtualize.
    fn realization_rect(&self) -> Rect;

    /// Item index the realization window should stay centered on
    /// during bring-into-view, or -1.
    fn recommended_anchor_index(&self) -> i32 {
        -1
    }

    /// Realizes (or recycles in) the element for `index`.
    fn get_or_create_element(&mut self, index: usize) -> ElementRef;

    /// Hands an element back for recycling.
    fn recycle_element(&mut self, element: &ElementRef);

    /// Absolute origin of the layout within the host.
    fn layout_origin(&self) -> Point {
        Point::ZERO
    }

    /// Whether an items-info handler is attached. Gates the fast
    /// path and the sizing requests.
    fn handles_items_info(&self) -> bool {
        false
    }

    /// Raises the items-info request on the attached handler.
    fn items_info_requested(&mut self, _request: &mut ItemsInfoRequest) {}

    /// A hook that schedules a measure pass on the layout's thread.
    /// Called by the re-measure timer thread and by anchor retention;
    /// the host's dispatcher must serialize it with measure/arrange.
    fn invalidation_dispatcher(&self) -> Arc<dyn Fn() + Send + Sync>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_info_request_roundtrip() {
        let mut request = ItemsInfoRequest::new(10, 4);
        assert_eq!(request.items_range_start_index(), 10);
        assert_eq!(request.items_range_requested_length(), 4);

        request.set_items_range_start_index(8);
        request.set_min_width(40.0);
        request.set_desired_aspect_ratios(&[1.0, 1.5, 0.75, 1.0, 1.0, 1.0]);

        let response = request.into_response();
        assert_eq!(response.start_index, 8);
        assert_eq!(response.min_width, 40.0);
        assert_eq!(response.max_width, -1.0);
        assert_eq!(response.len(), 6);
        assert!(response.covers_collection(6));
        assert!(!response.covers_collection(7));
    }

    #[test]
    fn test_response_requires_zero_start_to_cover() {
        let mut request = ItemsInfoRequest::new(2, 4);
        request.set_desired_aspect_ratios(&[1.0; 10]);
        let response = request.into_response();
        assert!(!response.covers_collection(6));
    }
}
