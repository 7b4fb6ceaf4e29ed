//! Tracing targets and span helpers.
//!
//! Nothing here installs a subscriber. Applications pick one and filter on
//! the names in [`targets`], e.g. `RUST_LOG=horizon_eventlist::stack=debug`
//! to watch rebuilds:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_eventlist::table=trace")
//!     .init();
//! ```

/// Per-subsystem `tracing` targets.
pub mod targets {
    pub const CORE: &str = "horizon_eventlist_core";
    pub const SIGNAL: &str = "horizon_eventlist_core::signal";
    /// Mutations of observable lists.
    pub const LIST: &str = "horizon_eventlist::list";
    /// Sorted, filtered, ranged and observing views.
    pub const VIEW: &str = "horizon_eventlist::view";
    pub const STACK: &str = "horizon_eventlist::stack";
    /// Row widget lifecycle.
    pub const TABLE: &str = "horizon_eventlist::table";
    /// Timed spans opened by [`PerfSpan`](super::PerfSpan).
    pub const PERF: &str = "horizon_eventlist::perf";
}

/// Enters an info span under [`targets::PERF`] and leaves it on drop.
#[derive(Debug)]
pub struct PerfSpan {
    _entered: tracing::span::EnteredSpan,
}

impl PerfSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_eventlist::perf", "perf", operation);
        Self {
            _entered: span.entered(),
        }
    }
}

/// `tracing::trace!` under the core target.
#[macro_export]
macro_rules! eventlist_trace {
    ($($arg:tt)*) => {
        $crate::tracing::trace!(target: "horizon_eventlist_core", $($arg)*)
    };
}
