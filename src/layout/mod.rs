//! The measure/arrange pipeline.
//!
//! Bottom-up: the aspect-ratio store and items-info cache feed the
//! average estimator, the zone planner decides what is displayed /
//! frozen / realized / sized, the partitioner assigns items to lines,
//! and the fast or regular driver orchestrates a measure pass.
//! [`LinedFlowLayout`] ties it all together behind the
//! [`VirtualizingLayout`] contract.

pub mod aspect_ratios;
pub mod averages;
pub mod element_manager;
pub mod fast_path;
pub mod items_info;
pub mod lined_flow;
pub mod locks;
pub mod partition;
pub mod regular_path;
pub mod remeasure;
pub mod scaler;
pub mod zones;

pub use lined_flow::LinedFlowLayout;

use crate::error::LayoutError;
use crate::geometry::Size;
use crate::host::{CollectionChange, LayoutHost};

/// The contract a virtualizing host drives.
///
/// One layout instance binds to exactly one host; binding a second
/// fails. Between a `measure` and the following `arrange` the host
/// must not mutate the collection.
pub trait VirtualizingLayout {
    /// Binds the layout to its hosting context.
    fn initialize_for_context(&mut self, host: &mut dyn LayoutHost) -> Result<(), LayoutError>;

    /// Releases the binding and every realized element.
    fn uninitialize_for_context(&mut self, host: &mut dyn LayoutHost);

    /// Computes the desired size for `available` and realizes the
    /// window of elements around the viewport.
    fn measure(&mut self, host: &mut dyn LayoutHost, available: Size) -> Result<Size, LayoutError>;

    /// Positions the realized elements computed by the preceding
    /// measure.
    fn arrange(&mut self, host: &mut dyn LayoutHost, final_size: Size) -> Result<Size, LayoutError>;

    /// Reacts to a source-collection mutation.
    fn on_items_changed(&mut self, host: &mut dyn LayoutHost, change: CollectionChange);
}
