//! Change events and the common list interface.
//!
//! Every observable list and view in this crate implements [`EventList`]
//! and announces structural changes as [`ListEvent`]s on its
//! [`changes`](EventList::changes) signal.
//!
//! # Event Semantics
//!
//! Events describe index spans, not payloads, as half-open ranges
//! `[start, end)`:
//!
//! - `Added`: the items now at `start..end` were inserted. Indices refer to
//!   the list after the insertion.
//! - `Removed`: the items that were at `start..end` were removed. Indices
//!   refer to the list just before the removal.
//! - `Changed`: the items at `start..end` were replaced or changed in place.
//!
//! An event is always delivered after the list has reached the state it
//! describes, and before the next step of the same operation is applied.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use horizon_eventlist_core::{ConnectionId, Signal};
use serde::{Deserialize, Serialize};

/// The kind of structural change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListEventKind {
    /// Items were inserted.
    Added,
    /// Items were removed.
    Removed,
    /// Items were replaced or changed in place.
    Changed,
}

/// Identifies the list or view that fired an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListId(u64);

impl ListId {
    /// Allocates a fresh, process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A structural change of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEvent {
    /// What happened.
    pub kind: ListEventKind,
    /// The list that fired the event.
    pub source: ListId,
    /// First affected index.
    pub start: usize,
    /// One past the last affected index.
    pub end: usize,
}

impl ListEvent {
    /// Creates an event covering `start..end`.
    pub fn new(kind: ListEventKind, source: ListId, start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "reversed event range {start}..{end}");
        Self {
            kind,
            source,
            start,
            end,
        }
    }

    /// An `Added` event.
    pub fn added(source: ListId, start: usize, end: usize) -> Self {
        Self::new(ListEventKind::Added, source, start, end)
    }

    /// A `Removed` event.
    pub fn removed(source: ListId, start: usize, end: usize) -> Self {
        Self::new(ListEventKind::Removed, source, start, end)
    }

    /// A `Changed` event.
    pub fn changed(source: ListId, start: usize, end: usize) -> Self {
        Self::new(ListEventKind::Changed, source, start, end)
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the event covers no index.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The covered span.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The same change, re-fired by another list.
    pub fn with_source(&self, source: ListId) -> Self {
        Self { source, ..*self }
    }
}

/// A boxed change listener, as accepted by
/// [`EventList::add_change_listener`].
pub type ChangeListener = Box<dyn Fn(&ListEvent) + Send + Sync>;

/// A shared, type-erased event list. Views take their source as this type.
pub type SharedList<T> = Arc<dyn EventList<T>>;

/// The read side shared by observable lists, views and view stacks.
pub trait EventList<T>: Send + Sync {
    /// The id carried by events this list fires.
    fn list_id(&self) -> ListId;

    /// Number of items.
    fn len(&self) -> usize;

    /// Returns `true` if the list has no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The item at `index`, or `None` when out of range.
    fn get(&self, index: usize) -> Option<T>;

    /// A snapshot of all items in order.
    fn to_vec(&self) -> Vec<T>;

    /// The signal on which change events are fired.
    fn changes(&self) -> &Signal<ListEvent>;

    /// Registers a change listener.
    fn add_change_listener(&self, listener: ChangeListener) -> ConnectionId {
        self.changes().connect(listener)
    }

    /// Removes a change listener.
    fn remove_change_listener(&self, id: ConnectionId) -> bool {
        self.changes().disconnect(id)
    }
}

/// Groups ascending, distinct indices into contiguous half-open runs.
pub(crate) fn contiguous_runs(indices: &[usize]) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for &index in indices {
        match runs.last_mut() {
            Some(run) if run.end == index => run.end += 1,
            _ => runs.push(index..index + 1),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let id = ListId::next();
        let event = ListEvent::added(id, 1, 3);
        assert_eq!(event.kind, ListEventKind::Added);
        assert_eq!(event.len(), 2);
        assert_eq!(event.range(), 1..3);
        assert!(!event.is_empty());

        let other = ListId::next();
        assert_ne!(id, other);
        let forwarded = event.with_source(other);
        assert_eq!(forwarded.source, other);
        assert_eq!(forwarded.range(), 1..3);
    }

    #[test]
    fn test_contiguous_runs() {
        assert!(contiguous_runs(&[]).is_empty());
        assert_eq!(contiguous_runs(&[4]), vec![4..5]);
        assert_eq!(contiguous_runs(&[0, 1, 2, 5, 6, 9]), vec![0..3, 5..7, 9..10]);
    }

    #[test]
    fn test_event_kind_serde() {
        let json = serde_json::to_string(&ListEventKind::Removed).unwrap();
        assert_eq!(json, "\"removed\"");
        let kind: ListEventKind = serde_json::from_str("\"changed\"").unwrap();
        assert_eq!(kind, ListEventKind::Changed);
    }
}
