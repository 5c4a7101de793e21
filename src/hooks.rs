//! Process-wide instrumentation hooks.
//!
//! - Forced overrides for the estimator and the partitioner, so
//!   harnesses can pin the knobs that normally float with content
//! - Notification sinks for relayout and item-lock events
//!
//! Hooks are inert when unset and are not part of the stable
//! contract.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::InvalidationTrigger;

type InvalidatedSink = Box<dyn Fn(InvalidationTrigger) + Send + Sync>;
type ItemLockedSink = Box<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Default)]
struct HookState {
    forced_average_aspect_ratio: f64,
    forced_items_per_line_divider: f64,
    forced_wrap_multiplier: f64,
    fast_path_disabled: bool,
    invalidated_sinks: Vec<InvalidatedSink>,
    item_locked_sinks: Vec<ItemLockedSink>,
}

static HOOKS: Lazy<RwLock<HookState>> = Lazy::new(|| RwLock::new(HookState::default()));

/// Overrides the average aspect ratio the estimator derives from
/// tracked items. `0.0` restores normal behavior.
pub fn set_forced_average_aspect_ratio(value: f64) {
    HOOKS.write().forced_average_aspect_ratio = value;
}

pub(crate) fn forced_average_aspect_ratio() -> f64 {
    HOOKS.read().forced_average_aspect_ratio
}

/// Overrides the divider used to turn the available width into a raw
/// items-per-line average. `0.0` restores normal behavior.
pub fn set_forced_items_per_line_divider(value: f64) {
    HOOKS.write().forced_items_per_line_divider = value;
}

pub(crate) fn forced_items_per_line_divider() -> f64 {
    HOOKS.read().forced_items_per_line_divider
}

/// Overrides the wrap multiplier the partitioner's equalizing
/// heuristic uses. `0.0` restores the default of 2.0.
pub fn set_forced_wrap_multiplier(value: f64) {
    HOOKS.write().forced_wrap_multiplier = value;
}

pub(crate) fn wrap_multiplier() -> f64 {
    let forced = HOOKS.read().forced_wrap_multiplier;
    if forced > 0.0 {
        forced
    } else {
        2.0
    }
}

/// Turns the fast path off even when full-collection sizing data is
/// available, so small collections can exercise the regular path.
pub fn set_fast_path_disabled(disabled: bool) {
    HOOKS.write().fast_path_disabled = disabled;
}

pub(crate) fn fast_path_disabled() -> bool {
    HOOKS.read().fast_path_disabled
}

/// Registers a sink for relayout notifications.
pub fn on_layout_invalidated<F>(sink: F)
where
    F: Fn(InvalidationTrigger) + Send + Sync + 'static,
{
    HOOKS.write().invalidated_sinks.push(Box::new(sink));
}

/// Registers a sink for item-lock notifications: `(item_index,
/// line_index)`.
pub fn on_item_locked<F>(sink: F)
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    HOOKS.write().item_locked_sinks.push(Box::new(sink));
}

/// Drops all sinks and forced overrides.
pub fn reset() {
    let mut state = HOOKS.write();
    *state = HookState::default();
}

pub(crate) fn notify_invalidated(trigger: InvalidationTrigger) {
    let state = HOOKS.read();
    for sink in &state.invalidated_sinks {
        sink(trigger);
    }
}

pub(crate) fn notify_item_locked(item_index: usize, line_index: usize) {
    let state = HOOKS.read();
    for sink in &state.item_locked_sinks {
        sink(item_index, line_index);
    }
}
