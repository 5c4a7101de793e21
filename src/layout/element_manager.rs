//! Realized-element bookkeeping.
//!
//! The manager owns the contiguous window of realized item indexes
//! and the index-to-element mapping. Elements are created and
//! recycled through the host; the manager only guarantees the window
//! stays contiguous while drivers grow and trim it.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::host::{ElementRef, LayoutHost, WeakElementRef};

/// The contiguous realized window and its elements.
#[derive(Default)]
pub struct ElementManager {
    first_index: usize,
    elements: VecDeque<ElementRef>,
}

impl ElementManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realized_count(&self) -> usize {
        self.elements.len()
    }

    pub fn first_realized_index(&self) -> Option<usize> {
        (!self.elements.is_empty()).then_some(self.first_index)
    }

    pub fn last_realized_index(&self) -> Option<usize> {
        (!self.elements.is_empty()).then_some(self.first_index + self.elements.len() - 1)
    }

    pub fn is_realized(&self, item_index: usize) -> bool {
        self.get(item_index).is_some()
    }

    pub fn get(&self, item_index: usize) -> Option<&ElementRef> {
        let offset = item_index.checked_sub(self.first_index)?;
        self.elements.get(offset)
    }

    /// Realizes `item_index`, extending the window at either end.
    /// A disjoint index recycles the whole window first; drivers only
    /// do that when the viewport jumped.
    pub fn ensure_realized(&mut self, host: &mut dyn LayoutHost, item_index: usize) -> ElementRef {
        if let Some(element) = self.get(item_index) {
            return element.clone();
        }

        if self.elements.is_empty() {
            let element = host.get_or_create_element(item_index);
            self.first_index = item_index;
            self.elements.push_back(element.clone());
            return element;
        }

        if item_index + 1 == self.first_index {
            let element = host.get_or_create_element(item_index);
            self.first_index = item_index;
            self.elements.push_front(element.clone());
            element
        } else if item_index == self.first_index + self.elements.len() {
            let element = host.get_or_create_element(item_index);
            self.elements.push_back(element.clone());
            element
        } else {
            warn!(
                item_index,
                first = self.first_index,
                count = self.elements.len(),
                "non-contiguous realization, restarting window"
            );
            self.clear(host);
            self.ensure_realized(host, item_index)
        }
    }

    /// Recycles every element outside `[new_first, new_first + new_count)`.
    pub fn align_window(&mut self, host: &mut dyn LayoutHost, new_first: usize, new_count: usize) {
        if new_count == 0 {
            self.clear(host);
            return;
        }
        let new_last = new_first + new_count - 1;

        while !self.elements.is_empty() && self.first_index < new_first {
            let element = self.elements.pop_front().expect("non-empty");
            host.recycle_element(&element);
            self.first_index += 1;
        }
        while !self.elements.is_empty() && self.first_index + self.elements.len() - 1 > new_last {
            let element = self.elements.pop_back().expect("non-empty");
            host.recycle_element(&element);
        }
        trace!(
            first = self.first_index,
            count = self.elements.len(),
            "realized window aligned"
        );
    }

    pub fn clear(&mut self, host: &mut dyn LayoutHost) {
        for element in self.elements.drain(..) {
            host.recycle_element(&element);
        }
        self.first_index = 0;
    }
}

/// Per-element widths keyed by weak handles, so the host can recycle
/// elements without the map dangling.
#[derive(Default, Clone)]
pub struct ElementWidthMap {
    entries: Vec<(WeakElementRef, f64)>,
}

impl ElementWidthMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element: &ElementRef) -> Option<f64> {
        self.entries.iter().find_map(|(weak, width)| {
            weak.upgrade()
                .filter(|live| Rc::ptr_eq(live, element))
                .map(|_| *width)
        })
    }

    pub fn set(&mut self, element: &ElementRef, width: f64) {
        for (weak, stored) in &mut self.entries {
            if weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, element)) {
                *stored = width;
                return;
            }
        }
        self.entries.push((Rc::downgrade(element), width));
    }

    /// Drops entries whose element is gone.
    pub fn prune(&mut self) {
        self.entries.retain(|(weak, _)| weak.strong_count() > 0);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, Size};
    use crate::host::ItemsInfoRequest;
    use std::cell::RefCell;
    use std::sync::Arc;

    struct StubElement {
        desired: Size,
    }

    impl crate::host::Element for StubElement {
        fn measure(&mut self, _available: Size) {}
        fn arrange(&mut self, _rect: Rect) {}
        fn desired_size(&self) -> Size {
            self.desired
        }
        fn render_size(&self) -> Size {
            self.desired
        }
    }

    #[derive(Default)]
    struct StubHost {
        created: usize,
        recycled: usize,
    }

    impl LayoutHost for StubHost {
        fn item_count(&self) -> usize {
            1000
        }
        fn visible_rect(&self) -> Rect {
            Rect::ZERO
        }
        fn realization_rect(&self) -> Rect {
            Rect::ZERO
        }
        fn get_or_create_element(&mut self, _index: usize) -> ElementRef {
            self.created += 1;
            Rc::new(RefCell::new(StubElement { desired: Size::ZERO }))
        }
        fn recycle_element(&mut self, _element: &ElementRef) {
            self.recycled += 1;
        }
        fn items_info_requested(&mut self, _request: &mut ItemsInfoRequest) {}
        fn invalidation_dispatcher(&self) -> Arc<dyn Fn() + Send + Sync> {
            Arc::new(|| {})
        }
    }

    #[test]
    fn test_window_grows_contiguously() {
        let mut host = StubHost::default();
        let mut manager = ElementManager::new();

        manager.ensure_realized(&mut host, 10);
        manager.ensure_realized(&mut host, 11);
        manager.ensure_realized(&mut host, 9);

        assert_eq!(manager.first_realized_index(), Some(9));
        assert_eq!(manager.last_realized_index(), Some(11));
        assert_eq!(manager.realized_count(), 3);
        assert_eq!(host.created, 3);

        // Re-requesting a realized index creates nothing.
        manager.ensure_realized(&mut host, 10);
        assert_eq!(host.created, 3);
    }

    #[test]
    fn test_disjoint_realization_restarts_window() {
        let mut host = StubHost::default();
        let mut manager = ElementManager::new();
        manager.ensure_realized(&mut host, 10);
        manager.ensure_realized(&mut host, 11);

        manager.ensure_realized(&mut host, 500);
        assert_eq!(host.recycled, 2);
        assert_eq!(manager.first_realized_index(), Some(500));
        assert_eq!(manager.realized_count(), 1);
    }

    #[test]
    fn test_align_window_recycles_both_ends() {
        let mut host = StubHost::default();
        let mut manager = ElementManager::new();
        for index in 10..20 {
            manager.ensure_realized(&mut host, index);
        }

        manager.align_window(&mut host, 13, 4); // keep [13, 16]
        assert_eq!(manager.first_realized_index(), Some(13));
        assert_eq!(manager.last_realized_index(), Some(16));
        assert_eq!(host.recycled, 6);
        assert!(manager.get(12).is_none());
        assert!(manager.get(13).is_some());
    }

    #[test]
    fn test_width_map_tracks_live_elements_only() {
        let mut host = StubHost::default();
        let mut map = ElementWidthMap::new();

        let element = host.get_or_create_element(0);
        map.set(&element, 120.0);
        assert_eq!(map.get(&element), Some(120.0));

        map.set(&element, 130.0);
        assert_eq!(map.get(&element), Some(130.0));
        assert_eq!(map.len(), 1);

        drop(element);
        map.prune();
        assert!(map.is_empty());
    }
}
