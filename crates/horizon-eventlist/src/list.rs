//! Observable list implementation.
//!
//! `ObservableList<T>` is the mutable base of every view chain. Each
//! structural mutation applies its change and fires the [`ListEvent`]
//! describing it before returning.

use std::sync::atomic::{AtomicUsize, Ordering};

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::{DeferredPanic, Signal};
use parking_lot::RwLock;

use crate::error::{ListError, ListResult};
use crate::event::{contiguous_runs, EventList, ListEvent, ListId};

/// A mutable, ordered list that notifies listeners of every structural
/// change.
///
/// # Notification Order
///
/// Single-step mutations fire exactly one event. Bulk removals
/// ([`remove_all`](Self::remove_all), [`retain_all`](Self::retain_all),
/// [`retain`](Self::retain)) fire one `Removed` event per contiguous run of
/// removed items, in ascending order. Each run is removed right before its
/// event fires, so the indices of a run are relative to the list with the
/// earlier runs already gone.
///
/// # Re-entrancy
///
/// A listener must not structurally mutate the list that is notifying it.
/// Such calls are rejected with [`ListError::ReentrantMutation`] and leave
/// the list untouched.
///
/// # Example
///
/// ```
/// use horizon_eventlist::{EventList, ObservableList};
///
/// let list = ObservableList::new();
/// list.changes().connect(|event| println!("{:?}", event));
///
/// list.push("one").unwrap();
/// list.extend(["two", "three"]).unwrap();
/// assert_eq!(list.to_vec(), vec!["one", "two", "three"]);
/// ```
pub struct ObservableList<T> {
    id: ListId,
    items: RwLock<Vec<T>>,
    changes: Signal<ListEvent>,
    /// Depth of in-flight notifications, used to reject re-entrant mutation.
    notify_depth: AtomicUsize,
}

impl<T> ObservableList<T> {
    /// The change signal, reachable without the item bounds of
    /// [`EventList`] so that owners can disconnect from `Drop`.
    pub(crate) fn signal(&self) -> &Signal<ListEvent> {
        &self.changes
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Creates a list holding `items`. No event is fired.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            id: ListId::next(),
            items: RwLock::new(items),
            changes: Signal::new(),
            notify_depth: AtomicUsize::new(0),
        }
    }

    /// Returns a snapshot iterator over the items.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.items.read().clone().into_iter()
    }

    /// Runs `f` with read access to the items.
    pub fn with_items<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[T]) -> R,
    {
        f(&self.items.read())
    }

    /// Returns `true` while this list is delivering a change event.
    pub fn is_notifying(&self) -> bool {
        self.notify_depth.load(Ordering::SeqCst) > 0
    }

    // -------------------------------------------------------------------------
    // Single-item mutations
    // -------------------------------------------------------------------------

    /// Appends an item.
    pub fn push(&self, item: T) -> ListResult<()> {
        self.check_not_notifying()?;
        let index = {
            let mut items = self.items.write();
            items.push(item);
            items.len() - 1
        };
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), index, "push");
        self.notify(ListEvent::added(self.id, index, index + 1));
        Ok(())
    }

    /// Inserts an item at `index`, shifting later items up.
    pub fn insert(&self, index: usize, item: T) -> ListResult<()> {
        self.check_not_notifying()?;
        {
            let mut items = self.items.write();
            if index > items.len() {
                return Err(ListError::out_of_range(index, items.len()));
            }
            items.insert(index, item);
        }
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), index, "insert");
        self.notify(ListEvent::added(self.id, index, index + 1));
        Ok(())
    }

    /// Replaces the item at `index`, returning the previous one.
    pub fn set(&self, index: usize, item: T) -> ListResult<T> {
        self.check_not_notifying()?;
        let old = {
            let mut items = self.items.write();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(ListError::out_of_range(index, len))?;
            std::mem::replace(slot, item)
        };
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), index, "set");
        self.notify(ListEvent::changed(self.id, index, index + 1));
        Ok(old)
    }

    /// Removes and returns the item at `index`.
    pub fn remove(&self, index: usize) -> ListResult<T> {
        self.check_not_notifying()?;
        let removed = {
            let mut items = self.items.write();
            if index >= items.len() {
                return Err(ListError::out_of_range(index, items.len()));
            }
            items.remove(index)
        };
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), index, "remove");
        self.notify(ListEvent::removed(self.id, index, index + 1));
        Ok(removed)
    }

    /// Signals that the item at `index` changed in place.
    ///
    /// Use this after mutating an item through shared interior state when
    /// the item does not report its own changes.
    pub fn mark_changed(&self, index: usize) -> ListResult<()> {
        self.check_not_notifying()?;
        let len = self.items.read().len();
        if index >= len {
            return Err(ListError::out_of_range(index, len));
        }
        self.notify(ListEvent::changed(self.id, index, index + 1));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bulk mutations
    // -------------------------------------------------------------------------

    /// Appends all items, firing one `Added` event.
    pub fn extend<I>(&self, items: I) -> ListResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        let len = self.len();
        self.insert_all(len, items)
    }

    /// Inserts all items at `index`, firing one `Added` event.
    pub fn insert_all<I>(&self, index: usize, items: I) -> ListResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        self.check_not_notifying()?;
        let new_items: Vec<T> = items.into_iter().collect();
        let count = new_items.len();
        {
            let mut items = self.items.write();
            if index > items.len() {
                return Err(ListError::out_of_range(index, items.len()));
            }
            if count == 0 {
                return Ok(());
            }
            items.splice(index..index, new_items);
        }
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), index, count, "insert_all");
        self.notify(ListEvent::added(self.id, index, index + count));
        Ok(())
    }

    /// Removes the items in `start..end`, firing one `Removed` event.
    pub fn remove_range(&self, start: usize, end: usize) -> ListResult<Vec<T>> {
        self.check_not_notifying()?;
        let removed: Vec<T> = {
            let mut items = self.items.write();
            if start > end || end > items.len() {
                return Err(ListError::invalid_range(start, end, items.len()));
            }
            if start == end {
                return Ok(Vec::new());
            }
            items.drain(start..end).collect()
        };
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), start, end, "remove_range");
        self.notify(ListEvent::removed(self.id, start, end));
        Ok(removed)
    }

    /// Removes every item. Returns `false` (and fires nothing) if the list
    /// was already empty.
    pub fn clear(&self) -> ListResult<bool> {
        self.check_not_notifying()?;
        let len = {
            let mut items = self.items.write();
            let len = items.len();
            items.clear();
            len
        };
        if len == 0 {
            return Ok(false);
        }
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), len, "clear");
        self.notify(ListEvent::removed(self.id, 0, len));
        Ok(true)
    }

    /// Keeps only the items for which `keep` returns `true`.
    ///
    /// Returns `true` if anything was removed.
    pub fn retain<F>(&self, mut keep: F) -> ListResult<bool>
    where
        F: FnMut(&T) -> bool,
    {
        self.check_not_notifying()?;
        let positions: Vec<usize> = self
            .items
            .read()
            .iter()
            .enumerate()
            .filter(|&(_, item)| !keep(item))
            .map(|(index, _)| index)
            .collect();
        self.remove_positions(&positions);
        Ok(!positions.is_empty())
    }

    /// Removes ascending runs, one event per run.
    fn remove_runs(&self, runs: Vec<std::ops::Range<usize>>) {
        let mut deferred = DeferredPanic::new();
        let mut shift = 0;
        for run in runs {
            let start = run.start - shift;
            let end = run.end - shift;
            self.items.write().drain(start..end);
            shift += run.len();
            self.fire(ListEvent::removed(self.id, start, end), &mut deferred);
        }
        deferred.resume();
    }

    fn remove_positions(&self, positions: &[usize]) {
        if positions.is_empty() {
            return;
        }
        tracing::trace!(target: targets::LIST, list = self.id.as_u64(), count = positions.len(), "bulk remove");
        self.remove_runs(contiguous_runs(positions));
    }

    // -------------------------------------------------------------------------
    // Notification
    // -------------------------------------------------------------------------

    fn check_not_notifying(&self) -> ListResult<()> {
        if self.is_notifying() {
            tracing::error!(target: targets::LIST, list = self.id.as_u64(), "re-entrant mutation rejected");
            return Err(ListError::ReentrantMutation);
        }
        Ok(())
    }

    fn fire(&self, event: ListEvent, deferred: &mut DeferredPanic) {
        self.notify_depth.fetch_add(1, Ordering::SeqCst);
        let outcome = self.changes.try_emit(event);
        self.notify_depth.fetch_sub(1, Ordering::SeqCst);
        deferred.capture(outcome);
    }

    fn notify(&self, event: ListEvent) {
        let mut deferred = DeferredPanic::new();
        self.fire(event, &mut deferred);
        deferred.resume();
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableList<T> {
    /// Returns `true` if an item equal to `item` is present.
    pub fn contains(&self, item: &T) -> bool {
        self.items.read().contains(item)
    }

    /// Position of the first item equal to `item`.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.items.read().iter().position(|other| other == item)
    }

    /// Removes the first item equal to `item`.
    ///
    /// Returns `false` (and fires nothing) if no such item exists.
    pub fn remove_item(&self, item: &T) -> ListResult<bool> {
        self.check_not_notifying()?;
        match self.index_of(item) {
            Some(index) => {
                self.remove(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every item equal to any of `items`.
    pub fn remove_all(&self, items: &[T]) -> ListResult<bool> {
        self.retain(|item| !items.contains(item))
    }

    /// Keeps only items equal to one of `items`.
    pub fn retain_all(&self, items: &[T]) -> ListResult<bool> {
        self.retain(|item| items.contains(item))
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for ObservableList<T> {
    fn list_id(&self) -> ListId {
        self.id
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }

    fn to_vec(&self) -> Vec<T> {
        self.items.read().clone()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ListEventKind;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn record(list: &ObservableList<&'static str>) -> Arc<Mutex<Vec<(ListEventKind, usize, usize)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recv = events.clone();
        list.changes().connect(move |event| {
            recv.lock().push((event.kind, event.start, event.end));
        });
        events
    }

    #[test]
    fn test_push_and_remove_item() {
        let list = ObservableList::new();
        let events = record(&list);

        list.push("one").unwrap();
        list.extend(["two", "three"]).unwrap();
        assert!(list.remove_item(&"two").unwrap());
        assert!(!list.remove_item(&"missing").unwrap());

        assert_eq!(list.to_vec(), vec!["one", "three"]);
        assert_eq!(
            *events.lock(),
            vec![
                (ListEventKind::Added, 0, 1),
                (ListEventKind::Added, 1, 3),
                (ListEventKind::Removed, 1, 2),
            ]
        );
    }

    #[test]
    fn test_set_fires_changed() {
        let list = ObservableList::from_vec(vec!["a", "b"]);
        let events = record(&list);

        assert_eq!(list.set(1, "c").unwrap(), "b");
        assert_eq!(*events.lock(), vec![(ListEventKind::Changed, 1, 2)]);
        assert_eq!(list.get(1), Some("c"));
    }

    #[test]
    fn test_out_of_range_is_rejected_without_event() {
        let list = ObservableList::from_vec(vec!["a"]);
        let events = record(&list);

        assert_eq!(list.insert(3, "x"), Err(ListError::out_of_range(3, 1)));
        assert_eq!(list.set(1, "x"), Err(ListError::out_of_range(1, 1)));
        assert_eq!(list.remove(1), Err(ListError::out_of_range(1, 1)));
        assert_eq!(
            list.remove_range(0, 2),
            Err(ListError::invalid_range(0, 2, 1))
        );
        assert!(events.lock().is_empty());
        assert_eq!(list.to_vec(), vec!["a"]);
    }

    #[test]
    fn test_remove_all_fires_ascending_runs() {
        let list = ObservableList::from_vec(vec!["a", "x", "x", "b", "x", "c"]);
        let events = record(&list);

        assert!(list.remove_all(&["x"]).unwrap());
        assert_eq!(list.to_vec(), vec!["a", "b", "c"]);
        assert_eq!(
            *events.lock(),
            vec![(ListEventKind::Removed, 1, 3), (ListEventKind::Removed, 2, 3)]
        );
    }

    #[test]
    fn test_retain_all_and_clear() {
        let list = ObservableList::from_vec(vec!["a", "b", "c", "d"]);
        let events = record(&list);

        assert!(list.retain_all(&["b", "d"]).unwrap());
        assert_eq!(list.to_vec(), vec!["b", "d"]);
        assert!(list.clear().unwrap());
        assert!(!list.clear().unwrap());

        assert_eq!(
            *events.lock(),
            vec![
                (ListEventKind::Removed, 0, 1),
                (ListEventKind::Removed, 1, 2),
                (ListEventKind::Removed, 0, 2),
            ]
        );
    }

    #[test]
    fn test_listener_sees_consistent_state() {
        let list = Arc::new(ObservableList::from_vec(vec![1, 2, 3, 4]));
        let sizes = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&list);
        let s = sizes.clone();
        list.changes().connect(move |_| {
            if let Some(list) = weak.upgrade() {
                s.lock().push(list.len());
            }
        });

        list.retain(|v| v % 2 == 0).unwrap();
        assert_eq!(*sizes.lock(), vec![3, 2]);
    }

    #[test]
    fn test_reentrant_mutation_is_rejected() {
        let list = Arc::new(ObservableList::new());
        let outcome = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&list);
        let o = outcome.clone();
        list.changes().connect(move |_| {
            if let Some(list) = weak.upgrade() {
                *o.lock() = Some(list.push(99));
            }
        });

        list.push(1).unwrap();
        assert_eq!(*outcome.lock(), Some(Err(ListError::ReentrantMutation)));
        assert_eq!(list.to_vec(), vec![1]);
        assert!(!list.is_notifying());
    }

    #[test]
    fn test_panicking_listener_does_not_corrupt_list() {
        let list = ObservableList::new();
        let seen = Arc::new(Mutex::new(0));

        list.changes().connect(|_| panic!("listener failure"));
        let s = seen.clone();
        list.changes().connect(move |_| *s.lock() += 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| list.push(5)));
        assert!(result.is_err());
        assert_eq!(*seen.lock(), 1);
        assert_eq!(list.to_vec(), vec![5]);
        assert!(!list.is_notifying());
        assert!(list.push(6).is_ok());
    }

    #[test]
    fn test_queries() {
        let list = ObservableList::from_vec(vec!["a", "b", "c"]);
        assert!(list.contains(&"b"));
        assert_eq!(list.index_of(&"c"), Some(2));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(list.with_items(|items| items.len()), 3);
        assert_eq!(list.remove_range(0, 2).unwrap(), vec!["a", "b"]);
        list.insert_all(1, ["x", "y"]).unwrap();
        assert_eq!(list.to_vec(), vec!["c", "x", "y"]);
    }
}
