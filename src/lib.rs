//! Virtualizing lined flow layout.
//!
//! Arranges a heterogeneous scrollable collection into horizontal
//! lines of a fixed height, each item sized to the line height at its
//! own aspect ratio, like a photo gallery. Collections of tens of
//! thousands of items scroll smoothly because only a window around
//! the viewport is realized; the rest of the line space is estimated
//! from a snapped average items-per-line.
//!
//! The host (a virtualizing items repeater, a widget, a test harness)
//! implements [`LayoutHost`] and [`Element`] and drives the layout
//! through [`VirtualizingLayout::measure`] and
//! [`VirtualizingLayout::arrange`]. Hosts that can cheaply answer
//! per-item sizing requests unlock a single-pass fast path; everyone
//! else gets the incremental regular path.

pub mod config;
pub mod error;
pub mod geometry;
pub mod hooks;
pub mod host;
pub mod layout;
pub mod testing;

pub use config::{ItemsJustification, ItemsStretch};
pub use error::{InvalidationTrigger, LayoutError};
pub use geometry::{Point, Rect, Size};
pub use host::{CollectionChange, Element, ElementRef, ItemsInfoRequest, LayoutHost};
pub use layout::{LinedFlowLayout, VirtualizingLayout};
