//! Layout configuration options.

/// Horizontal distribution of a line's items when stretch is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemsJustification {
    #[default]
    Start,
    Center,
    End,
    SpaceBetween,
    SpaceAround,
    SpaceEvenly,
}

/// Whether under-full lines scale their items up to fill the
/// available width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemsStretch {
    #[default]
    None,
    Fill,
}
