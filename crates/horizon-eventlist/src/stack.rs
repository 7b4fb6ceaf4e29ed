//! Composable sort, filter and range stages over a shared base list.
//!
//! A [`ViewStack`] owns an optional [`SortedView`], [`FilteredView`] and
//! [`RangedView`], always chained in that order on top of a base list, and
//! re-fires the events of whichever stage is currently on top under its own
//! id.
//!
//! # Rebuild Protocol
//!
//! Changing a stage parameter rebuilds the chain from that stage upward:
//!
//! 1. The parameter is validated; on failure nothing changes.
//! 2. The outgoing top is disconnected and the outgoing stages detached.
//! 3. A full-range `Removed` is fired if the stack had content.
//! 4. The stages are rebuilt in order and the new top connected. A range
//!    window rebuilt because a lower stage changed keeps its current start.
//! 5. A full-range `Added` is fired if the stack has content now.
//!
//! Consumers holding index-based state can drop everything on step 3 and
//! rebuild on step 5 without ever seeing a stale index. While a rebuild is
//! in progress the stack reports a length of zero.

use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::{ConnectionId, DeferredPanic, PerfSpan, Signal};
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::config::RangeConfig;
use crate::error::{ListError, ListResult};
use crate::event::{EventList, ListEvent, ListId, SharedList};
use crate::view::{Comparator, FilteredView, Predicate, RangedView, SortedView};

new_key_type! {
    /// Key of a stage in the stack's arena.
    struct StageKey;
}

/// The kinds of stage a stack can hold, in chaining order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    /// A sorted view.
    Sort,
    /// A filtered view.
    Filter,
    /// A ranged view.
    Range,
}

impl StageKind {
    const ALL: [StageKind; 3] = [StageKind::Sort, StageKind::Filter, StageKind::Range];
}

enum Stage<T> {
    Sorted(Arc<SortedView<T>>),
    Filtered(Arc<FilteredView<T>>),
    Ranged(Arc<RangedView<T>>),
}

impl<T: Clone + Send + Sync + 'static> Stage<T> {
    fn kind(&self) -> StageKind {
        match self {
            Stage::Sorted(_) => StageKind::Sort,
            Stage::Filtered(_) => StageKind::Filter,
            Stage::Ranged(_) => StageKind::Range,
        }
    }

    fn list(&self) -> SharedList<T> {
        match self {
            Stage::Sorted(view) => view.clone() as SharedList<T>,
            Stage::Filtered(view) => view.clone() as SharedList<T>,
            Stage::Ranged(view) => view.clone() as SharedList<T>,
        }
    }

    fn detach(&self) {
        match self {
            Stage::Sorted(view) => view.detach(),
            Stage::Filtered(view) => view.detach(),
            Stage::Ranged(view) => view.detach(),
        }
    }
}

struct StackState<T> {
    stages: SlotMap<StageKey, Stage<T>>,
    /// Active stages, bottom first.
    active: Vec<StageKey>,
    comparator: Option<Comparator<T>>,
    predicate: Option<Predicate<T>>,
    range: Option<RangeConfig>,
    /// `None` while a rebuild is in progress.
    top: Option<SharedList<T>>,
    connection: Option<ConnectionId>,
}

struct StackInner<T> {
    id: ListId,
    this: Weak<StackInner<T>>,
    base: SharedList<T>,
    state: Mutex<StackState<T>>,
    /// Serializes rebuilds.
    rebuild_lock: Mutex<()>,
    /// Thread currently rebuilding, to reject re-entrant rebuilds.
    rebuilder: Mutex<Option<ThreadId>>,
    changes: Signal<ListEvent>,
}

/// Clears the rebuilding thread on scope exit, panics included.
struct RebuildGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// A sort, filter and range pipeline over a base list.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use horizon_eventlist::{EventList, ObservableList, RangeConfig, ViewStack};
///
/// let base = Arc::new(ObservableList::from_vec(vec![5, 2, 8, 1, 9, 4]));
/// let stack = ViewStack::new(base.clone());
///
/// stack.sort_by(|a: &i32, b: &i32| a.cmp(b)).unwrap();
/// stack.filter_by(|n: &i32| *n > 1).unwrap();
/// stack.set_range(Some(RangeConfig::new(0, 3))).unwrap();
/// assert_eq!(stack.to_vec(), vec![2, 4, 5]);
///
/// base.push(3).unwrap();
/// assert_eq!(stack.to_vec(), vec![2, 3, 4]);
/// ```
pub struct ViewStack<T> {
    inner: Arc<StackInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> ViewStack<T> {
    /// Creates a stack with no stages: it mirrors `base`.
    pub fn new(base: SharedList<T>) -> Self {
        let inner = Arc::new_cyclic(|this| StackInner {
            id: ListId::next(),
            this: this.clone(),
            base: base.clone(),
            state: Mutex::new(StackState {
                stages: SlotMap::with_key(),
                active: Vec::new(),
                comparator: None,
                predicate: None,
                range: None,
                top: None,
                connection: None,
            }),
            rebuild_lock: Mutex::new(()),
            rebuilder: Mutex::new(None),
            changes: Signal::new(),
        });
        let connection = inner.connect_top(&base);
        {
            let mut state = inner.state.lock();
            state.top = Some(base);
            state.connection = Some(connection);
        }
        Self { inner }
    }

    /// The list at the bottom of the stack.
    pub fn base(&self) -> &SharedList<T> {
        &self.inner.base
    }

    /// Installs or clears the sort stage.
    pub fn set_comparator(&self, comparator: Option<Comparator<T>>) -> ListResult<()> {
        self.inner
            .rebuild(StageKind::Sort, |state| state.comparator = comparator)
    }

    /// Sorts by a closure.
    pub fn sort_by<F>(&self, compare: F) -> ListResult<()>
    where
        F: Fn(&T, &T) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        self.set_comparator(Some(Arc::new(compare)))
    }

    /// Installs or clears the filter stage.
    pub fn set_filter(&self, predicate: Option<Predicate<T>>) -> ListResult<()> {
        self.inner
            .rebuild(StageKind::Filter, |state| state.predicate = predicate)
    }

    /// Filters by a closure.
    pub fn filter_by<F>(&self, accept: F) -> ListResult<()>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.set_filter(Some(Arc::new(accept)))
    }

    /// Installs, replaces or clears the range stage.
    ///
    /// An invalid configuration is rejected before anything changes.
    pub fn set_range(&self, range: Option<RangeConfig>) -> ListResult<()> {
        if let Some(config) = &range {
            config.validate()?;
        }
        self.inner.rebuild(StageKind::Range, |state| state.range = range)
    }

    /// Re-evaluates the filter after external state it depends on changed.
    ///
    /// Does nothing without a filter stage.
    pub fn refilter(&self) -> ListResult<()> {
        if !self.has_filter() {
            return Ok(());
        }
        self.inner.rebuild(StageKind::Filter, |_| {})
    }

    /// Returns `true` if a sort stage is installed.
    pub fn has_comparator(&self) -> bool {
        self.inner.state.lock().comparator.is_some()
    }

    /// Returns `true` if a filter stage is installed.
    pub fn has_filter(&self) -> bool {
        self.inner.state.lock().predicate.is_some()
    }

    /// The live window of the range stage, if any.
    ///
    /// The start may differ from the configured one when the window follows
    /// its content.
    pub fn range(&self) -> Option<RangeConfig> {
        let state = self.inner.state.lock();
        state.active.iter().find_map(|key| match &state.stages[*key] {
            Stage::Ranged(view) => Some(view.config()),
            _ => None,
        })
    }

    /// Number of active stages.
    pub fn stage_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Kinds of the active stages, bottom first.
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        let state = self.inner.state.lock();
        state
            .active
            .iter()
            .map(|key| state.stages[*key].kind())
            .collect()
    }

    /// Returns `true` while a rebuild is in progress.
    pub fn is_rebuilding(&self) -> bool {
        self.inner.state.lock().top.is_none()
    }

    fn top(&self) -> Option<SharedList<T>> {
        self.inner.state.lock().top.clone()
    }
}

impl<T: Clone + Send + Sync + 'static> StackInner<T> {
    fn connect_top(&self, top: &SharedList<T>) -> ConnectionId {
        let weak = self.this.clone();
        top.changes().connect(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.changes.emit(event.with_source(inner.id));
            }
        })
    }

    fn rebuild<F>(&self, from: StageKind, update: F) -> ListResult<()>
    where
        F: FnOnce(&mut StackState<T>),
    {
        let current = thread::current().id();
        if *self.rebuilder.lock() == Some(current) {
            tracing::error!(
                target: targets::STACK,
                stack = self.id.as_u64(),
                "re-entrant rebuild rejected"
            );
            return Err(ListError::ReentrantMutation);
        }
        let _serial = self.rebuild_lock.lock();
        *self.rebuilder.lock() = Some(current);
        let _guard = RebuildGuard(&self.rebuilder);
        let _span = PerfSpan::new("view_stack_rebuild");

        let (old_top, connection, outgoing) = {
            let mut state = self.state.lock();
            update(&mut state);
            let StackState {
                stages,
                active,
                top,
                connection,
                ..
            } = &mut *state;
            let split = active
                .iter()
                .position(|key| stages[*key].kind() >= from)
                .unwrap_or(active.len());
            let outgoing: Vec<Stage<T>> = active
                .drain(split..)
                .filter_map(|key| stages.remove(key))
                .collect();
            (top.take(), connection.take(), outgoing)
        };

        let old_len = old_top.as_ref().map_or(0, |top| top.len());
        if let (Some(top), Some(id)) = (&old_top, connection) {
            top.changes().disconnect(id);
        }
        // A window torn down by a lower stage keeps the start it drifted to.
        let carried_range = outgoing.iter().find_map(|stage| match stage {
            Stage::Ranged(view) if from < StageKind::Range => Some(view.config()),
            _ => None,
        });
        for stage in outgoing.iter().rev() {
            stage.detach();
        }
        drop(outgoing);
        drop(old_top);

        let mut deferred = DeferredPanic::new();
        if old_len > 0 {
            deferred.capture(self.changes.try_emit(ListEvent::removed(self.id, 0, old_len)));
        }

        let new_top = {
            let mut state = self.state.lock();
            if let Some(config) = carried_range
                && state.range.is_some()
            {
                state.range = Some(config);
            }
            let mut top = match state.active.last() {
                Some(key) => state.stages[*key].list(),
                None => self.base.clone(),
            };
            for kind in StageKind::ALL.into_iter().filter(|kind| *kind >= from) {
                let stage = match kind {
                    StageKind::Sort => state
                        .comparator
                        .clone()
                        .map(|compare| Stage::Sorted(Arc::new(SortedView::new(top.clone(), Some(compare))))),
                    StageKind::Filter => state
                        .predicate
                        .clone()
                        .map(|accept| Stage::Filtered(Arc::new(FilteredView::new(top.clone(), Some(accept))))),
                    StageKind::Range => state.range.map(|config| {
                        Stage::Ranged(Arc::new(RangedView::with_valid_config(top.clone(), config)))
                    }),
                };
                if let Some(stage) = stage {
                    top = stage.list();
                    let key = state.stages.insert(stage);
                    state.active.push(key);
                }
            }
            let connection = self.connect_top(&top);
            state.top = Some(top.clone());
            state.connection = Some(connection);
            top
        };

        let new_len = new_top.len();
        tracing::debug!(
            target: targets::STACK,
            stack = self.id.as_u64(),
            from = ?from,
            old_len,
            new_len,
            "rebuilt"
        );
        if new_len > 0 {
            deferred.capture(self.changes.try_emit(ListEvent::added(self.id, 0, new_len)));
        }
        deferred.resume();
        Ok(())
    }
}

impl<T> Drop for StackInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let (Some(top), Some(id)) = (&state.top, state.connection.take()) {
            top.changes().disconnect(id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for ViewStack<T> {
    fn list_id(&self) -> ListId {
        self.inner.id
    }

    fn len(&self) -> usize {
        self.top().map_or(0, |top| top.len())
    }

    fn get(&self, index: usize) -> Option<T> {
        self.top().and_then(|top| top.get(index))
    }

    fn to_vec(&self) -> Vec<T> {
        self.top().map(|top| top.to_vec()).unwrap_or_default()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        &self.inner.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ListEventKind;
    use crate::list::ObservableList;

    fn record<T: Clone + Send + Sync + 'static>(
        stack: &ViewStack<T>,
    ) -> Arc<Mutex<Vec<ListEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        stack
            .changes()
            .connect(move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn test_empty_stack_mirrors_base() {
        let base = Arc::new(ObservableList::from_vec(vec![3, 1, 2]));
        let stack = ViewStack::new(base.clone());
        assert_eq!(stack.stage_count(), 0);
        assert_eq!(stack.to_vec(), vec![3, 1, 2]);

        let events = record(&stack);
        base.push(4).unwrap();
        assert_eq!(*events.lock(), vec![ListEvent::added(stack.list_id(), 3, 4)]);
    }

    #[test]
    fn test_stages_are_ordered() {
        let base = Arc::new(ObservableList::from_vec((0..10).rev().collect::<Vec<i32>>()));
        let stack = ViewStack::new(base);
        stack.set_range(Some(RangeConfig::new(0, 2))).unwrap();
        stack.filter_by(|n: &i32| n % 3 == 0).unwrap();
        stack.sort_by(|a: &i32, b: &i32| a.cmp(b)).unwrap();

        assert_eq!(
            stack.stage_kinds(),
            vec![StageKind::Sort, StageKind::Filter, StageKind::Range]
        );
        assert_eq!(stack.to_vec(), vec![0, 3]);
    }

    #[test]
    fn test_set_comparator_fires_two_phase() {
        let base = Arc::new(ObservableList::from_vec(vec![2, 3, 1]));
        let stack = ViewStack::new(base);
        let events = record(&stack);

        stack.sort_by(|a: &i32, b: &i32| a.cmp(b)).unwrap();

        assert_eq!(stack.to_vec(), vec![1, 2, 3]);
        let id = stack.list_id();
        assert_eq!(
            *events.lock(),
            vec![ListEvent::removed(id, 0, 3), ListEvent::added(id, 0, 3)]
        );
    }

    #[test]
    fn test_rebuild_of_empty_stack_is_silent() {
        let base: Arc<ObservableList<i32>> = Arc::new(ObservableList::new());
        let stack = ViewStack::new(base);
        let events = record(&stack);
        stack.filter_by(|_: &i32| true).unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_clearing_a_stage_keeps_the_others() {
        let base = Arc::new(ObservableList::from_vec(vec![4, 1, 3, 2]));
        let stack = ViewStack::new(base.clone());
        stack.sort_by(|a: &i32, b: &i32| a.cmp(b)).unwrap();
        stack.filter_by(|n: &i32| *n > 1).unwrap();

        stack.set_comparator(None).unwrap();

        assert_eq!(stack.stage_kinds(), vec![StageKind::Filter]);
        assert_eq!(stack.to_vec(), vec![4, 3, 2]);
        // Only the top stage and the base are connected to anything.
        assert_eq!(base.changes().connection_count(), 1);
    }

    #[test]
    fn test_invalid_range_changes_nothing() {
        let base = Arc::new(ObservableList::from_vec(vec![1, 2]));
        let stack = ViewStack::new(base);
        let events = record(&stack);

        let result = stack.set_range(Some(RangeConfig::new(0, 0)));

        assert!(matches!(result, Err(ListError::InvalidParameter(_))));
        assert_eq!(stack.stage_count(), 0);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_refilter_without_filter_is_noop() {
        let base = Arc::new(ObservableList::from_vec(vec![1, 2]));
        let stack = ViewStack::new(base);
        let events = record(&stack);
        stack.refilter().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_reentrant_rebuild_is_rejected() {
        let base = Arc::new(ObservableList::from_vec(vec![1, 2]));
        let stack = Arc::new(ViewStack::new(base));
        let outcome = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&stack);
        let seen = outcome.clone();
        stack.changes().connect(move |event| {
            if event.kind == ListEventKind::Removed
                && let Some(stack) = weak.upgrade()
            {
                *seen.lock() = Some(stack.set_filter(None));
            }
        });

        stack.sort_by(|a: &i32, b: &i32| b.cmp(a)).unwrap();

        assert_eq!(*outcome.lock(), Some(Err(ListError::ReentrantMutation)));
        assert_eq!(stack.to_vec(), vec![2, 1]);
    }

    #[test]
    fn test_length_is_zero_between_phases() {
        let base = Arc::new(ObservableList::from_vec(vec![1, 2, 3]));
        let stack = Arc::new(ViewStack::new(base));
        let lengths = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&stack);
        let seen = lengths.clone();
        stack.changes().connect(move |event| {
            if let Some(stack) = weak.upgrade() {
                seen.lock().push((event.kind, stack.len()));
            }
        });

        stack.filter_by(|n: &i32| *n != 2).unwrap();

        assert_eq!(
            *lengths.lock(),
            vec![(ListEventKind::Removed, 0), (ListEventKind::Added, 2)]
        );
    }

    #[test]
    fn test_range_reports_live_window() {
        let base = Arc::new(ObservableList::from_vec(vec![1, 2, 3, 4]));
        let stack = ViewStack::new(base.clone());
        stack.set_range(Some(RangeConfig::new(2, 2))).unwrap();
        base.insert(0, 0).unwrap();
        assert_eq!(stack.range().map(|range| range.start), Some(3));
        stack.set_range(None).unwrap();
        assert_eq!(stack.range(), None);
    }

    #[test]
    fn test_lower_rebuild_keeps_window_start() {
        let base = Arc::new(ObservableList::from_vec((0..10).collect::<Vec<i32>>()));
        let stack = ViewStack::new(base.clone());
        stack.set_range(Some(RangeConfig::new(3, 2))).unwrap();
        base.insert(0, -1).unwrap();
        assert_eq!(stack.range().map(|range| range.start), Some(4));

        stack.filter_by(|_: &i32| true).unwrap();

        assert_eq!(stack.range().map(|range| range.start), Some(4));
        assert_eq!(stack.to_vec(), vec![3, 4]);

        stack.set_range(Some(RangeConfig::new(0, 2))).unwrap();
        assert_eq!(stack.to_vec(), vec![-1, 0]);
    }

    #[test]
    fn test_concurrent_rebuilds_are_serialized() {
        let base = Arc::new(ObservableList::from_vec((0..200).collect::<Vec<i32>>()));
        let stack = Arc::new(ViewStack::new(base));
        // (replayed length, events that did not fit the replayed length)
        let replay = Arc::new(Mutex::new((stack.len(), 0usize)));

        let sink = replay.clone();
        stack.changes().connect(move |event| {
            let mut replay = sink.lock();
            let (len, bad) = &mut *replay;
            match event.kind {
                ListEventKind::Removed if event.end <= *len => *len -= event.len(),
                ListEventKind::Added if event.start <= *len => *len += event.len(),
                ListEventKind::Changed if event.end <= *len => {}
                _ => *bad += 1,
            }
        });

        thread::scope(|scope| {
            for worker in 0..4 {
                let stack = &stack;
                scope.spawn(move || {
                    for round in 0..25 {
                        if (worker + round) % 2 == 0 {
                            let descending = round % 3 == 0;
                            stack
                                .sort_by(move |a: &i32, b: &i32| {
                                    if descending { b.cmp(a) } else { a.cmp(b) }
                                })
                                .unwrap();
                        } else {
                            let modulus = 2 + (round % 3) as i32;
                            stack.filter_by(move |n: &i32| n % modulus == 0).unwrap();
                        }
                    }
                });
            }
        });

        let (len, bad) = *replay.lock();
        assert_eq!(bad, 0);
        assert_eq!(len, stack.len());
    }
}
