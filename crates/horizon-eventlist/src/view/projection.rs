//! Order-and-membership engine shared by sorted and filtered views.
//!
//! A projection keeps one entry per accepted source item, tagged with the
//! item's current source index, ordered by `(comparator, source index)`.
//! Ordering ties by source index is what makes sorting stable, and with no
//! comparator it reduces the projection to source order.

use std::cmp::Ordering;
use std::sync::Arc;

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::{ConnectionId, DeferredPanic, Signal};
use parking_lot::RwLock;

use crate::error::{ListError, ListResult};
use crate::event::{contiguous_runs, EventList, ListEvent, ListEventKind, ListId, SharedList};

/// Total order used by sorted views.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Membership test used by filtered views.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Wraps a closure as a [`Comparator`].
pub fn comparator<T, F>(compare: F) -> Comparator<T>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    Arc::new(compare)
}

/// Wraps a closure as a [`Predicate`].
pub fn predicate<T, F>(accept: F) -> Predicate<T>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Arc::new(accept)
}

struct Entry<T> {
    source_index: usize,
    item: T,
}

struct ProjectionState<T> {
    entries: Vec<Entry<T>>,
    comparator: Option<Comparator<T>>,
    predicate: Option<Predicate<T>>,
    /// Source length as of the last event processed.
    source_len: usize,
    connection: Option<ConnectionId>,
    detached: bool,
}

impl<T> ProjectionState<T> {
    fn accepts(&self, item: &T) -> bool {
        self.predicate.as_ref().is_none_or(|accept| accept(item))
    }

    fn order(&self, a: &T, a_index: usize, b: &T, b_index: usize) -> Ordering {
        let by_value = match &self.comparator {
            Some(compare) => compare(a, b),
            None => Ordering::Equal,
        };
        by_value.then(a_index.cmp(&b_index))
    }

    /// Position at which an entry for `item` belongs among current entries.
    fn insertion_point(&self, item: &T, source_index: usize) -> usize {
        self.entries.partition_point(|entry| {
            self.order(&entry.item, entry.source_index, item, source_index) == Ordering::Less
        })
    }

    fn position_of_source(&self, source_index: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.source_index == source_index)
    }

    fn build(&self, items: Vec<T>) -> Vec<Entry<T>> {
        let mut entries: Vec<Entry<T>> = items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| self.accepts(item))
            .map(|(source_index, item)| Entry { source_index, item })
            .collect();
        if self.comparator.is_some() {
            entries.sort_by(|a, b| self.order(&a.item, a.source_index, &b.item, b.source_index));
        }
        entries
    }
}

/// The live projection behind `SortedView` and `FilteredView`.
pub(crate) struct Projection<T> {
    id: ListId,
    kind: &'static str,
    source: SharedList<T>,
    state: RwLock<ProjectionState<T>>,
    changes: Signal<ListEvent>,
}

impl<T: Clone + Send + Sync + 'static> Projection<T> {
    pub(crate) fn new(
        kind: &'static str,
        source: SharedList<T>,
        comparator: Option<Comparator<T>>,
        predicate: Option<Predicate<T>>,
    ) -> Arc<Self> {
        let projection = Arc::new(Self {
            id: ListId::next(),
            kind,
            source,
            state: RwLock::new(ProjectionState {
                entries: Vec::new(),
                comparator,
                predicate,
                source_len: 0,
                connection: None,
                detached: false,
            }),
            changes: Signal::new(),
        });

        {
            let items = projection.source.to_vec();
            let mut state = projection.state.write();
            state.source_len = items.len();
            let entries = state.build(items);
            state.entries = entries;
        }

        let weak = Arc::downgrade(&projection);
        let connection = projection.source.changes().connect(move |event| {
            if let Some(projection) = weak.upgrade() {
                projection.on_source_event(event);
            }
        });
        projection.state.write().connection = Some(connection);

        tracing::debug!(
            target: targets::VIEW,
            view = kind,
            id = projection.id.as_u64(),
            len = projection.len(),
            "projection created"
        );
        projection
    }

    pub(crate) fn has_comparator(&self) -> bool {
        self.state.read().comparator.is_some()
    }

    pub(crate) fn has_predicate(&self) -> bool {
        self.state.read().predicate.is_some()
    }

    pub(crate) fn map_to_source(&self, index: usize) -> Option<usize> {
        self.state
            .read()
            .entries
            .get(index)
            .map(|entry| entry.source_index)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.state.read().detached
    }

    pub(crate) fn detach(&self) {
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
        tracing::debug!(target: targets::VIEW, view = self.kind, id = self.id.as_u64(), "detached");
    }

    /// Swaps parameters using the two-phase protocol: full `Removed` if the
    /// view had content, recompute, full `Added` if it has content now.
    pub(crate) fn rebuild_with<F>(&self, update: F) -> ListResult<()>
    where
        F: FnOnce(&mut Option<Comparator<T>>, &mut Option<Predicate<T>>),
    {
        let old_len = {
            let mut state = self.state.write();
            if state.detached {
                return Err(ListError::Detached);
            }
            let old_len = state.entries.len();
            state.entries.clear();
            let ProjectionState {
                comparator,
                predicate,
                ..
            } = &mut *state;
            update(comparator, predicate);
            old_len
        };

        let mut deferred = DeferredPanic::new();
        if old_len > 0 {
            self.emit(ListEvent::removed(self.id, 0, old_len), &mut deferred);
        }

        let items = self.source.to_vec();
        let new_len = {
            let mut state = self.state.write();
            state.source_len = items.len();
            let entries = state.build(items);
            state.entries = entries;
            state.entries.len()
        };
        tracing::debug!(
            target: targets::VIEW,
            view = self.kind,
            id = self.id.as_u64(),
            old_len,
            new_len,
            "rebuilt"
        );
        if new_len > 0 {
            self.emit(ListEvent::added(self.id, 0, new_len), &mut deferred);
        }
        deferred.resume();
        Ok(())
    }

    fn emit(&self, event: ListEvent, deferred: &mut DeferredPanic) {
        deferred.capture(self.changes.try_emit(event));
    }

    fn on_source_event(&self, event: &ListEvent) {
        let mut deferred = DeferredPanic::new();
        match event.kind {
            ListEventKind::Added => self.source_added(event, &mut deferred),
            ListEventKind::Removed => self.source_removed(event, &mut deferred),
            ListEventKind::Changed => self.source_changed(event, &mut deferred),
        }
        deferred.resume();
    }

    fn violation(&self, event: &ListEvent, source_len: usize) -> ! {
        tracing::error!(
            target: targets::VIEW,
            view = self.kind,
            id = self.id.as_u64(),
            ?event,
            source_len,
            "source fired an out-of-range event"
        );
        panic!(
            "{} view received out-of-range event {:?} (source length {})",
            self.kind, event, source_len
        );
    }

    fn fetch(&self, event: &ListEvent, index: usize) -> T {
        self.source
            .get(index)
            .unwrap_or_else(|| self.violation(event, self.source.len()))
    }

    fn source_added(&self, event: &ListEvent, deferred: &mut DeferredPanic) {
        let count = event.len();
        if count == 0 {
            return;
        }
        let items: Vec<T> = event.range().map(|index| self.fetch(event, index)).collect();

        // New entries paired with the position they will finally occupy.
        // Inserting them in ascending final position means each one lands
        // directly at that position.
        let placed: Vec<(usize, Entry<T>)> = {
            let mut state = self.state.write();
            if state.detached {
                return;
            }
            if event.start > state.source_len {
                self.violation(event, state.source_len);
            }
            for entry in state.entries.iter_mut() {
                if entry.source_index >= event.start {
                    entry.source_index += count;
                }
            }
            state.source_len += count;

            let mut fresh: Vec<Entry<T>> = event
                .range()
                .zip(items)
                .filter(|(_, item)| state.accepts(item))
                .map(|(source_index, item)| Entry { source_index, item })
                .collect();
            fresh.sort_by(|a, b| state.order(&a.item, a.source_index, &b.item, b.source_index));
            fresh
                .into_iter()
                .enumerate()
                .map(|(offset, entry)| {
                    (state.insertion_point(&entry.item, entry.source_index) + offset, entry)
                })
                .collect()
        };

        self.insert_placed(placed, deferred);
    }

    /// Inserts entries already sorted by final position, one `Added` per run.
    fn insert_placed(&self, placed: Vec<(usize, Entry<T>)>, deferred: &mut DeferredPanic) {
        let mut groups: Vec<(usize, Vec<Entry<T>>)> = Vec::new();
        for (position, entry) in placed {
            match groups.last_mut() {
                Some((start, run)) if *start + run.len() == position => run.push(entry),
                _ => groups.push((position, vec![entry])),
            }
        }

        for (start, run) in groups {
            let end = start + run.len();
            {
                let mut state = self.state.write();
                if state.detached {
                    return;
                }
                state.entries.splice(start..start, run);
            }
            self.emit(ListEvent::added(self.id, start, end), deferred);
        }
    }

    fn source_removed(&self, event: &ListEvent, deferred: &mut DeferredPanic) {
        let count = event.len();
        if count == 0 {
            return;
        }
        let positions: Vec<usize> = {
            let mut state = self.state.write();
            if state.detached {
                return;
            }
            if event.end > state.source_len {
                self.violation(event, state.source_len);
            }
            let mut positions = Vec::new();
            for (position, entry) in state.entries.iter_mut().enumerate() {
                if entry.source_index >= event.end {
                    entry.source_index -= count;
                } else if entry.source_index >= event.start {
                    positions.push(position);
                }
            }
            state.source_len -= count;
            positions
        };
        self.remove_positions(&positions, deferred);
    }

    /// Removes entries at ascending `positions`, one `Removed` per run.
    fn remove_positions(&self, positions: &[usize], deferred: &mut DeferredPanic) {
        let mut shift = 0;
        for run in contiguous_runs(positions) {
            let start = run.start - shift;
            let end = run.end - shift;
            {
                let mut state = self.state.write();
                if state.detached {
                    return;
                }
                state.entries.drain(start..end);
            }
            shift += run.len();
            self.emit(ListEvent::removed(self.id, start, end), deferred);
        }
    }

    fn source_changed(&self, event: &ListEvent, deferred: &mut DeferredPanic) {
        {
            let state = self.state.read();
            if state.detached {
                return;
            }
            if event.end > state.source_len {
                self.violation(event, state.source_len);
            }
        }
        let mut items: Vec<T> = event.range().map(|index| self.fetch(event, index)).collect();
        if items.len() == 1
            && let Some(item) = items.pop()
        {
            self.relocate(event.start, item, deferred);
            return;
        }
        self.replace_span(event, items, deferred);
    }

    /// Re-places every changed item of a multi-item `Changed` together, so
    /// no item is positioned against a stale copy of another changed one.
    fn replace_span(&self, event: &ListEvent, items: Vec<T>, deferred: &mut DeferredPanic) {
        let (old_positions, placed) = {
            let state = self.state.read();
            if state.detached {
                return;
            }
            let span = event.range();
            let old_positions: Vec<(usize, usize)> = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| span.contains(&entry.source_index))
                .map(|(position, entry)| (position, entry.source_index))
                .collect();
            let rest: Vec<&Entry<T>> = state
                .entries
                .iter()
                .filter(|entry| !span.contains(&entry.source_index))
                .collect();

            let mut fresh: Vec<Entry<T>> = span
                .clone()
                .zip(items)
                .filter(|(_, item)| state.accepts(item))
                .map(|(source_index, item)| Entry { source_index, item })
                .collect();
            fresh.sort_by(|a, b| state.order(&a.item, a.source_index, &b.item, b.source_index));
            let placed: Vec<(usize, Entry<T>)> = fresh
                .into_iter()
                .enumerate()
                .map(|(offset, entry)| {
                    let point = rest.partition_point(|other| {
                        state.order(&other.item, other.source_index, &entry.item, entry.source_index)
                            == Ordering::Less
                    });
                    (point + offset, entry)
                })
                .collect();
            (old_positions, placed)
        };

        // Every changed item kept its slot: report `Changed` instead of a move.
        let in_place = placed.len() == old_positions.len()
            && placed.iter().zip(&old_positions).all(|((position, entry), old)| {
                (*position, entry.source_index) == *old
            });
        let old_positions: Vec<usize> = old_positions
            .into_iter()
            .map(|(position, _)| position)
            .collect();
        if in_place {
            {
                let mut state = self.state.write();
                if state.detached {
                    return;
                }
                for (position, entry) in placed {
                    state.entries[position] = entry;
                }
            }
            for run in contiguous_runs(&old_positions) {
                self.emit(ListEvent::changed(self.id, run.start, run.end), deferred);
            }
            return;
        }

        self.remove_positions(&old_positions, deferred);
        self.insert_placed(placed, deferred);
    }

    /// Re-evaluates membership and position of one changed source item.
    fn relocate(&self, source_index: usize, item: T, deferred: &mut DeferredPanic) {
        let mut state = self.state.write();
        if state.detached {
            return;
        }
        let accepted = state.accepts(&item);
        match (state.position_of_source(source_index), accepted) {
            (Some(position), true) => {
                state.entries.remove(position);
                let target = state.insertion_point(&item, source_index);
                if target == position {
                    state.entries.insert(position, Entry { source_index, item });
                    drop(state);
                    self.emit(ListEvent::changed(self.id, position, position + 1), deferred);
                } else {
                    drop(state);
                    self.emit(ListEvent::removed(self.id, position, position + 1), deferred);
                    let mut state = self.state.write();
                    if state.detached {
                        return;
                    }
                    let target = state.insertion_point(&item, source_index);
                    state.entries.insert(target, Entry { source_index, item });
                    drop(state);
                    self.emit(ListEvent::added(self.id, target, target + 1), deferred);
                }
            }
            (Some(position), false) => {
                state.entries.remove(position);
                drop(state);
                self.emit(ListEvent::removed(self.id, position, position + 1), deferred);
            }
            (None, true) => {
                let target = state.insertion_point(&item, source_index);
                state.entries.insert(target, Entry { source_index, item });
                drop(state);
                self.emit(ListEvent::added(self.id, target, target + 1), deferred);
            }
            (None, false) => {}
        }
    }
}

impl<T> Drop for Projection<T> {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().connection.take() {
            self.source.changes().disconnect(id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for Projection<T> {
    fn list_id(&self) -> ListId {
        self.id
    }

    fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.state
            .read()
            .entries
            .get(index)
            .map(|entry| entry.item.clone())
    }

    fn to_vec(&self) -> Vec<T> {
        self.state
            .read()
            .entries
            .iter()
            .map(|entry| entry.item.clone())
            .collect()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        &self.changes
    }
}
