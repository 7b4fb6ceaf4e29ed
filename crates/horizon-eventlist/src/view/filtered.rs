//! Live filtered view.

use std::sync::Arc;

use horizon_eventlist_core::Signal;

use super::projection::{Predicate, Projection};
use crate::error::ListResult;
use crate::event::{EventList, ListEvent, ListId, SharedList};

/// A view presenting the source items accepted by a predicate, in source
/// order.
///
/// A changed source item is re-tested: it enters the view (`Added`), leaves
/// it (`Removed`) or is reported as `Changed` when it stays. Without a
/// predicate every item is accepted.
///
/// The predicate may depend on state outside the items. After such state
/// changes, call [`refilter`](Self::refilter) to re-evaluate every item.
pub struct FilteredView<T> {
    inner: Arc<Projection<T>>,
}

impl<T: Clone + Send + Sync + 'static> FilteredView<T> {
    /// Creates a view over `source`, filtered by `predicate` if given.
    pub fn new(source: SharedList<T>, predicate: Option<Predicate<T>>) -> Self {
        Self {
            inner: Projection::new("filtered", source, None, predicate),
        }
    }

    /// Creates a view filtered by a closure.
    pub fn filtered_by<F>(source: SharedList<T>, accept: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(source, Some(Arc::new(accept)))
    }

    /// Replaces the predicate, re-deriving the view in two phases.
    pub fn set_predicate(&self, predicate: Option<Predicate<T>>) -> ListResult<()> {
        self.inner.rebuild_with(|_, current| *current = predicate)
    }

    /// Re-evaluates the current predicate against every source item.
    pub fn refilter(&self) -> ListResult<()> {
        self.inner.rebuild_with(|_, _| {})
    }

    /// Returns `true` if a predicate is installed.
    pub fn has_predicate(&self) -> bool {
        self.inner.has_predicate()
    }

    /// The source index of the item at `index` in this view.
    pub fn map_to_source(&self, index: usize) -> Option<usize> {
        self.inner.map_to_source(index)
    }

    /// Stops following the source. The current contents stay readable.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Returns `true` once [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.inner.is_detached()
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for FilteredView<T> {
    fn list_id(&self) -> ListId {
        self.inner.list_id()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.inner.get(index)
    }

    fn to_vec(&self) -> Vec<T> {
        self.inner.to_vec()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        self.inner.changes()
    }
}
