//! Live windowed view.
//!
//! A [`RangedView`] shows the source items at `start..start + max_size`,
//! clamped to the source. Every change, whether it comes from the source or
//! from a parameter setter, is applied by reconciling the window against
//! the desired source span: slots that fell out are removed first, then the
//! missing source items are inserted. Listeners therefore only see the
//! symmetric difference between the old and the new window.

use std::sync::Arc;

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::{ConnectionId, DeferredPanic, Signal};
use parking_lot::RwLock;

use crate::config::RangeConfig;
use crate::error::{ListError, ListResult};
use crate::event::{contiguous_runs, EventList, ListEvent, ListEventKind, ListId, SharedList};

struct Slot<T> {
    /// `None` once the source item behind the slot has been removed.
    source_index: Option<usize>,
    item: T,
}

struct RangeState<T> {
    config: RangeConfig,
    window: Vec<Slot<T>>,
    source_len: usize,
    connection: Option<ConnectionId>,
    detached: bool,
}

impl<T> RangeState<T> {
    /// The source span the window should cover right now.
    fn desired(&self) -> (usize, usize) {
        let start = self.config.start.min(self.source_len);
        let end = self
            .config
            .start
            .saturating_add(self.config.max_size)
            .min(self.source_len);
        (start, end.max(start))
    }
}

struct RangedInner<T> {
    id: ListId,
    source: SharedList<T>,
    state: RwLock<RangeState<T>>,
    changes: Signal<ListEvent>,
}

/// A view showing a contiguous window of its source.
///
/// In the default mode `start` follows content: inserting or removing items
/// before the window moves `start` so the same items stay visible. A
/// *steady* window keeps `start` as a fixed position and lets content flow
/// through it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use horizon_eventlist::{EventList, ObservableList, RangeConfig, RangedView};
///
/// let list = Arc::new(ObservableList::from_vec((0..10).collect::<Vec<i32>>()));
/// let page = RangedView::new(list.clone(), RangeConfig::new(2, 3)).unwrap();
/// assert_eq!(page.to_vec(), vec![2, 3, 4]);
///
/// page.set_start(8).unwrap();
/// assert_eq!(page.to_vec(), vec![8, 9]);
/// ```
pub struct RangedView<T> {
    inner: Arc<RangedInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> RangedView<T> {
    /// Creates a window over `source`.
    ///
    /// Fails with [`ListError::InvalidParameter`] if `config` is invalid.
    pub fn new(source: SharedList<T>, config: RangeConfig) -> ListResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(source, config))
    }

    /// Creates a window from a config that already passed validation.
    pub(crate) fn with_valid_config(source: SharedList<T>, config: RangeConfig) -> Self {
        let inner = Arc::new(RangedInner {
            id: ListId::next(),
            source,
            state: RwLock::new(RangeState {
                config,
                window: Vec::new(),
                source_len: 0,
                connection: None,
                detached: false,
            }),
            changes: Signal::new(),
        });

        {
            let items = inner.source.to_vec();
            let mut state = inner.state.write();
            state.source_len = items.len();
            let (start, end) = state.desired();
            state.window = items
                .into_iter()
                .enumerate()
                .skip(start)
                .take(end - start)
                .map(|(index, item)| Slot {
                    source_index: Some(index),
                    item,
                })
                .collect();
        }

        let weak = Arc::downgrade(&inner);
        let connection = inner.source.changes().connect(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_event(event);
            }
        });
        inner.state.write().connection = Some(connection);

        tracing::debug!(
            target: targets::VIEW,
            view = "ranged",
            id = inner.id.as_u64(),
            start = config.start,
            max_size = config.max_size,
            steady = config.steady,
            "ranged view created"
        );
        Self { inner }
    }

    /// The current window parameters.
    pub fn config(&self) -> RangeConfig {
        self.inner.state.read().config
    }

    /// Source index of the first slot of the window.
    pub fn start(&self) -> usize {
        self.config().start
    }

    /// Maximum number of items shown.
    pub fn max_size(&self) -> usize {
        self.config().max_size
    }

    /// Returns `true` if `start` is a fixed position.
    pub fn is_steady(&self) -> bool {
        self.config().steady
    }

    /// Moves the window.
    pub fn set_start(&self, start: usize) -> ListResult<()> {
        self.update(|config| config.start = start)
    }

    /// Resizes the window.
    pub fn set_max_size(&self, max_size: usize) -> ListResult<()> {
        self.update(|config| config.max_size = max_size)
    }

    /// Replaces all window parameters at once.
    pub fn set_range(&self, range: RangeConfig) -> ListResult<()> {
        self.update(|config| *config = range)
    }

    /// The source index of the item at `index` in this view.
    pub fn map_to_source(&self, index: usize) -> Option<usize> {
        self.inner
            .state
            .read()
            .window
            .get(index)
            .and_then(|slot| slot.source_index)
    }

    /// Stops following the source. The current contents stay readable.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Returns `true` once [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.inner.state.read().detached
    }

    fn update<F>(&self, change: F) -> ListResult<()>
    where
        F: FnOnce(&mut RangeConfig),
    {
        {
            let mut state = self.inner.state.write();
            if state.detached {
                return Err(ListError::Detached);
            }
            let mut config = state.config;
            change(&mut config);
            config.validate()?;
            state.config = config;
        }
        let mut deferred = DeferredPanic::new();
        self.inner.reconcile(&mut deferred);
        deferred.resume();
        Ok(())
    }
}

impl<T: Clone + Send + Sync + 'static> RangedInner<T> {
    fn detach(&self) {
        let connection = {
            let mut state = self.state.write();
            if state.detached {
                return;
            }
            state.detached = true;
            state.connection.take()
        };
        if let Some(id) = connection {
            self.source.changes().disconnect(id);
        }
        tracing::debug!(target: targets::VIEW, view = "ranged", id = self.id.as_u64(), "detached");
    }

    fn emit(&self, event: ListEvent, deferred: &mut DeferredPanic) {
        deferred.capture(self.changes.try_emit(event));
    }

    fn violation(&self, event: &ListEvent, source_len: usize) -> ! {
        tracing::error!(
            target: targets::VIEW,
            view = "ranged",
            id = self.id.as_u64(),
            ?event,
            source_len,
            "source fired an out-of-range event"
        );
        panic!(
            "ranged view received out-of-range event {:?} (source length {})",
            event, source_len
        );
    }

    fn on_source_event(&self, event: &ListEvent) {
        if event.is_empty() {
            return;
        }
        let mut deferred = DeferredPanic::new();
        match event.kind {
            ListEventKind::Added => {
                if !self.shift_for_added(event) {
                    return;
                }
                self.reconcile(&mut deferred);
            }
            ListEventKind::Removed => {
                if !self.shift_for_removed(event) {
                    return;
                }
                self.reconcile(&mut deferred);
            }
            ListEventKind::Changed => self.refresh(event, &mut deferred),
        }
        deferred.resume();
    }

    /// Returns `false` when the view is detached.
    fn shift_for_added(&self, event: &ListEvent) -> bool {
        let count = event.len();
        let mut state = self.state.write();
        if state.detached {
            return false;
        }
        if event.start > state.source_len {
            self.violation(event, state.source_len);
        }
        for slot in state.window.iter_mut() {
            if let Some(index) = slot.source_index.as_mut()
                && *index >= event.start
            {
                *index += count;
            }
        }
        state.source_len += count;
        if !state.config.steady && event.start < state.config.start {
            state.config.start += count;
        }
        true
    }

    /// Returns `false` when the view is detached.
    fn shift_for_removed(&self, event: &ListEvent) -> bool {
        let count = event.len();
        let mut state = self.state.write();
        if state.detached {
            return false;
        }
        if event.end > state.source_len {
            self.violation(event, state.source_len);
        }
        for slot in state.window.iter_mut() {
            slot.source_index = match slot.source_index {
                Some(index) if index >= event.end => Some(index - count),
                Some(index) if index >= event.start => None,
                other => other,
            };
        }
        state.source_len -= count;
        if !state.config.steady && event.start < state.config.start {
            let removed_before = event.end.min(state.config.start) - event.start;
            state.config.start -= removed_before;
        }
        true
    }

    /// Re-reads changed source items that are inside the window.
    fn refresh(&self, event: &ListEvent, deferred: &mut DeferredPanic) {
        let positions: Vec<usize> = {
            let mut state = self.state.write();
            if state.detached {
                return;
            }
            if event.end > state.source_len {
                self.violation(event, state.source_len);
            }
            let mut positions = Vec::new();
            for position in 0..state.window.len() {
                let Some(index) = state.window[position].source_index else {
                    continue;
                };
                if !event.range().contains(&index) {
                    continue;
                }
                match self.source.get(index) {
                    Some(item) => state.window[position].item = item,
                    None => self.violation(event, self.source.len()),
                }
                positions.push(position);
            }
            positions
        };
        for run in contiguous_runs(&positions) {
            self.emit(ListEvent::changed(self.id, run.start, run.end), deferred);
        }
    }

    /// Brings the window in line with the desired span: stale slots leave
    /// first, then missing source items enter in ascending order.
    fn reconcile(&self, deferred: &mut DeferredPanic) {
        let (stale, start, end) = {
            let state = self.state.read();
            if state.detached {
                return;
            }
            let (start, end) = state.desired();
            let stale: Vec<usize> = state
                .window
                .iter()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.source_index
                        .is_none_or(|index| index < start || index >= end)
                })
                .map(|(position, _)| position)
                .collect();
            (stale, start, end)
        };

        let mut shift = 0;
        for run in contiguous_runs(&stale) {
            let from = run.start - shift;
            let to = run.end - shift;
            {
                let mut state = self.state.write();
                if state.detached {
                    return;
                }
                state.window.drain(from..to);
            }
            shift += run.len();
            self.emit(ListEvent::removed(self.id, from, to), deferred);
        }

        let missing: Vec<usize> = {
            let state = self.state.read();
            let mut present = state.window.iter().filter_map(|slot| slot.source_index).peekable();
            (start..end)
                .filter(|index| {
                    if present.peek() == Some(index) {
                        present.next();
                        false
                    } else {
                        true
                    }
                })
                .collect()
        };

        for run in contiguous_runs(&missing) {
            let items: Vec<Slot<T>> = run
                .clone()
                .map(|index| Slot {
                    source_index: Some(index),
                    item: self.source.get(index).unwrap_or_else(|| {
                        self.violation(&ListEvent::added(self.id, run.start, run.end), self.source.len())
                    }),
                })
                .collect();
            let from = run.start - start;
            let to = run.end - start;
            {
                let mut state = self.state.write();
                if state.detached {
                    return;
                }
                state.window.splice(from..from, items);
            }
            self.emit(ListEvent::added(self.id, from, to), deferred);
        }
    }
}

impl<T> Drop for RangedInner<T> {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().connection.take() {
            self.source.changes().disconnect(id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for RangedView<T> {
    fn list_id(&self) -> ListId {
        self.inner.id
    }

    fn len(&self) -> usize {
        self.inner.state.read().window.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.inner
            .state
            .read()
            .window
            .get(index)
            .map(|slot| slot.item.clone())
    }

    fn to_vec(&self) -> Vec<T> {
        self.inner
            .state
            .read()
            .window
            .iter()
            .map(|slot| slot.item.clone())
            .collect()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        &self.inner.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::ObservableList;
    use parking_lot::Mutex;

    fn record(view: &dyn EventList<i32>) -> Arc<Mutex<Vec<ListEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        view.changes().connect(move |event| sink.lock().push(event.clone()));
        events
    }

    fn numbers(count: i32) -> Arc<ObservableList<i32>> {
        Arc::new(ObservableList::from_vec((0..count).collect()))
    }

    #[test]
    fn test_window_is_clamped() {
        let list = numbers(5);
        let view = RangedView::new(list.clone(), RangeConfig::new(3, 10)).unwrap();
        assert_eq!(view.to_vec(), vec![3, 4]);
        assert_eq!(view.map_to_source(1), Some(4));

        let beyond = RangedView::new(list, RangeConfig::new(9, 2)).unwrap();
        assert!(beyond.is_empty());
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let list = numbers(3);
        assert!(matches!(
            RangedView::new(list.clone(), RangeConfig::new(0, 0)),
            Err(ListError::InvalidParameter(_))
        ));
        let view = RangedView::new(list, RangeConfig::new(0, 2)).unwrap();
        assert!(view.set_max_size(0).is_err());
        assert_eq!(view.max_size(), 2);
        assert_eq!(view.to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_set_start_notifies_symmetric_difference() {
        let list = numbers(10);
        let view = RangedView::new(list, RangeConfig::new(0, 4)).unwrap();
        let events = record(&view);

        view.set_start(2).unwrap();

        assert_eq!(view.to_vec(), vec![2, 3, 4, 5]);
        let id = view.list_id();
        assert_eq!(
            *events.lock(),
            vec![ListEvent::removed(id, 0, 2), ListEvent::added(id, 2, 4)]
        );
    }

    #[test]
    fn test_insert_inside_window_pushes_tail_out() {
        let list = numbers(6);
        let view = RangedView::new(list.clone(), RangeConfig::new(1, 3)).unwrap();
        let events = record(&view);

        list.insert(2, 100).unwrap();

        assert_eq!(view.to_vec(), vec![1, 100, 2]);
        let id = view.list_id();
        assert_eq!(
            *events.lock(),
            vec![ListEvent::removed(id, 2, 3), ListEvent::added(id, 1, 2)]
        );
    }

    #[test]
    fn test_following_window_tracks_content() {
        let list = numbers(10);
        let view = RangedView::new(list.clone(), RangeConfig::new(4, 3)).unwrap();
        let events = record(&view);

        list.insert_all(0, [-2, -1]).unwrap();
        assert_eq!(view.start(), 6);
        assert_eq!(view.to_vec(), vec![4, 5, 6]);

        list.remove_range(0, 3).unwrap();
        assert_eq!(view.start(), 3);
        assert_eq!(view.to_vec(), vec![4, 5, 6]);

        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_removal_overlapping_start_keeps_window_full() {
        let list = numbers(10);
        let view = RangedView::new(list.clone(), RangeConfig::new(3, 3)).unwrap();

        // Removes 2, 3, 4: one item before the window, two inside it.
        list.remove_range(2, 5).unwrap();

        assert_eq!(view.start(), 2);
        assert_eq!(view.to_vec(), vec![5, 6, 7]);
    }

    #[test]
    fn test_steady_window_lets_content_flow() {
        let list = numbers(10);
        let view =
            RangedView::new(list.clone(), RangeConfig::new(4, 3).with_steady(true)).unwrap();
        assert!(view.is_steady());

        list.insert(0, -1).unwrap();
        assert_eq!(view.start(), 4);
        assert_eq!(view.to_vec(), vec![3, 4, 5]);

        list.remove_range(0, 3).unwrap();
        assert_eq!(view.to_vec(), vec![6, 7, 8]);
    }

    #[test]
    fn test_changed_inside_window() {
        let list = numbers(6);
        let view = RangedView::new(list.clone(), RangeConfig::new(2, 2)).unwrap();
        let events = record(&view);

        list.set(3, 30).unwrap();
        list.set(5, 50).unwrap();

        assert_eq!(view.to_vec(), vec![2, 30]);
        assert_eq!(*events.lock(), vec![ListEvent::changed(view.list_id(), 1, 2)]);
    }

    #[test]
    fn test_window_refills_when_source_grows() {
        let list = numbers(1);
        let view = RangedView::new(list.clone(), RangeConfig::new(0, 3)).unwrap();
        let events = record(&view);

        list.extend([1, 2, 3, 4]).unwrap();

        assert_eq!(view.to_vec(), vec![0, 1, 2]);
        assert_eq!(*events.lock(), vec![ListEvent::added(view.list_id(), 1, 3)]);
    }

    #[test]
    fn test_detached_setters_fail() {
        let list = numbers(3);
        let view = RangedView::new(list.clone(), RangeConfig::new(0, 2)).unwrap();
        view.detach();
        assert_eq!(view.set_start(1), Err(ListError::Detached));
        list.clear().unwrap();
        assert_eq!(view.to_vec(), vec![0, 1]);
    }
}
