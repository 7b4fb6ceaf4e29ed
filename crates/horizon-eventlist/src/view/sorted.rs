//! Live sorted view.

use std::cmp::Ordering;
use std::sync::Arc;

use horizon_eventlist_core::Signal;

use super::projection::{Comparator, Projection};
use crate::error::ListResult;
use crate::event::{EventList, ListEvent, ListId, SharedList};

/// A view presenting the items of its source ordered by a comparator.
///
/// Sorting is stable: items that compare equal keep their relative source
/// order. Without a comparator the view mirrors the source order.
///
/// Source `Added`, `Removed` and `Changed` events are translated
/// incrementally. A changed item that stays at its position is reported as
/// `Changed`; one that moves is reported as `Removed` at the old position
/// followed by `Added` at the new one.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use horizon_eventlist::{EventList, ObservableList, SortedView};
///
/// let list = Arc::new(ObservableList::from_vec(vec![3, 1, 2]));
/// let sorted = SortedView::sorted_by(list.clone(), |a: &i32, b: &i32| a.cmp(b));
/// assert_eq!(sorted.to_vec(), vec![1, 2, 3]);
///
/// list.push(0).unwrap();
/// assert_eq!(sorted.to_vec(), vec![0, 1, 2, 3]);
/// ```
pub struct SortedView<T> {
    inner: Arc<Projection<T>>,
}

impl<T: Clone + Send + Sync + 'static> SortedView<T> {
    /// Creates a view over `source`, sorted by `comparator` if given.
    pub fn new(source: SharedList<T>, comparator: Option<Comparator<T>>) -> Self {
        Self {
            inner: Projection::new("sorted", source, comparator, None),
        }
    }

    /// Creates a view sorted by a closure.
    pub fn sorted_by<F>(source: SharedList<T>, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self::new(source, Some(Arc::new(compare)))
    }

    /// Replaces the comparator.
    ///
    /// Listeners see the whole old content removed, then the whole new
    /// content added. Either event is skipped when it would be empty.
    pub fn set_comparator(&self, comparator: Option<Comparator<T>>) -> ListResult<()> {
        self.inner.rebuild_with(|current, _| *current = comparator)
    }

    /// Returns `true` if a comparator is installed.
    pub fn has_comparator(&self) -> bool {
        self.inner.has_comparator()
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

impl<T: Clone + Send + Sync + 'static> EventList<T> for SortedView<T> {
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
