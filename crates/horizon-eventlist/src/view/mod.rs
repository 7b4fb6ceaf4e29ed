//! Live views over event lists.
//!
//! Every view wraps exactly one source list, presents a projection of it and
//! fires its own [`ListEvent`](crate::ListEvent)s, re-sourced with the view's
//! id. Views chain: any view can be the source of another.
//!
//! - [`SortedView`]: stable order by a comparator.
//! - [`FilteredView`]: membership by a predicate, in source order.
//! - [`RangedView`]: a contiguous window of the source.
//! - [`ObservingView`]: mirrors its source and reports item property changes
//!   as `Changed` events.
//!
//! A view listens to its source through a weak reference, so dropping the
//! view is enough to disconnect it. [`detach`](SortedView::detach) does the
//! same explicitly and leaves the last contents readable.

mod filtered;
mod observing;
mod projection;
mod ranged;
mod sorted;

pub use filtered::FilteredView;
pub use observing::{Capability, ObservingView};
pub use projection::{comparator, predicate, Comparator, Predicate};
pub use ranged::RangedView;
pub use sorted::SortedView;
