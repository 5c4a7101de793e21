use thiserror::Error;

/// Errors surfaced by the layout. Everything else recovers locally:
/// a missing rasterization scale falls back to 1.0, a short or
/// shifted sizing answer demotes the measure to the regular path, and
/// an element with no desired size is arranged at width 0.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// The layout is already bound to a hosting context. One layout
    /// instance serves exactly one host.
    #[error("layout cannot be shared across hosting contexts")]
    AlreadyBound,

    /// The layout was used before `initialize_for_context`.
    #[error("layout is not bound to a hosting context")]
    NotBound,

    /// An item index outside `[0, item_count)` was passed to a public
    /// API.
    #[error("item index {index} is out of range (item count {item_count})")]
    IndexOutOfRange { index: usize, item_count: usize },
}

/// Why a relayout was triggered. Recorded for diagnostics only; the
/// trigger never changes layout behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationTrigger {
    /// The host asked for a fresh layout (property change, explicit
    /// invalidation).
    HostInitiated,
    /// A realized element reported a new desired width.
    DesiredSizeChange,
    /// The snapped average items-per-line moved to a new power of 1.1.
    SnappedAverageChange,
    /// The source collection mutated.
    CollectionChange,
}
