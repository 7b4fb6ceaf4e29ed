//! A view that turns item property changes into list events.
//!
//! [`ObservingView`] mirrors an [`ObservableList`] and subscribes to the
//! property-change signal of every item it contains. When an item reports a
//! change, the view fires `Changed` at each position the item occupies, so
//! downstream sorted and filtered views re-evaluate it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::{ConnectionId, DeferredPanic, PropertyChange, PropertySource, Signal};
use parking_lot::Mutex;

use crate::error::{ListError, ListResult};
use crate::event::{EventList, ListEvent, ListEventKind, ListId};
use crate::list::ObservableList;

/// Extracts the property source of an item, if it has one.
pub type Capability<T> = Arc<dyn Fn(&T) -> Option<Arc<dyn PropertySource>> + Send + Sync>;

/// Identity of a property source: the address of its shared allocation.
fn identity(source: &Arc<dyn PropertySource>) -> usize {
    Arc::as_ptr(source) as *const () as usize
}

struct Registration {
    source: Arc<dyn PropertySource>,
    connection: ConnectionId,
    /// Number of positions the item currently occupies.
    occurrences: usize,
}

struct Tracked<T> {
    item: T,
    /// `None` for items that arrived without the capability.
    key: Option<usize>,
}

struct ObservingState<T> {
    mirror: Vec<Tracked<T>>,
    registrations: HashMap<usize, Registration>,
    connection: Option<ConnectionId>,
    detached: bool,
}

struct ObservingInner<T> {
    id: ListId,
    this: Weak<ObservingInner<T>>,
    source: Arc<ObservableList<T>>,
    capability: Capability<T>,
    state: Mutex<ObservingState<T>>,
    changes: Signal<ListEvent>,
}

/// A live mirror of a list whose items report their own changes.
///
/// Each distinct item holds exactly one property listener, no matter how
/// many positions it occupies; the listener is released when the item's
/// last occurrence leaves the view.
///
/// Mutations go through the view so that every item can be checked for the
/// capability before anything changes. Items inserted into the source list
/// directly are mirrored too; those lacking the capability are logged and
/// left unobserved.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use horizon_eventlist::{
///     EventList, ObservableList, ObservingView, PropertyChange, PropertyChangeSupport,
///     PropertySource, Signal,
/// };
///
/// struct Task {
///     support: PropertyChangeSupport,
/// }
///
/// impl PropertySource for Task {
///     fn property_changes(&self) -> &Signal<PropertyChange> {
///         self.support.signal()
///     }
/// }
///
/// let list = Arc::new(ObservableList::new());
/// let view = ObservingView::new(list);
/// let task = Arc::new(Task { support: PropertyChangeSupport::new() });
/// view.push(task.clone()).unwrap();
/// assert_eq!(view.listener_count(), 1);
///
/// view.changes().connect(|event| println!("{:?}", event));
/// task.support.fire_item_changed();
/// ```
pub struct ObservingView<T> {
    inner: Arc<ObservingInner<T>>,
}

impl<P: PropertySource + 'static> ObservingView<Arc<P>> {
    /// Creates a view over shared items that are property sources
    /// themselves.
    pub fn new(source: Arc<ObservableList<Arc<P>>>) -> Self {
        Self::with_capability(source, |item: &Arc<P>| {
            Some(item.clone() as Arc<dyn PropertySource>)
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ObservingView<T> {
    /// Creates a view whose items expose their property source through
    /// `capability`.
    pub fn with_capability<F>(source: Arc<ObservableList<T>>, capability: F) -> Self
    where
        F: Fn(&T) -> Option<Arc<dyn PropertySource>> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| ObservingInner {
            id: ListId::next(),
            this: this.clone(),
            source,
            capability: Arc::new(capability),
            state: Mutex::new(ObservingState {
                mirror: Vec::new(),
                registrations: HashMap::new(),
                connection: None,
                detached: false,
            }),
            changes: Signal::new(),
        });

        {
            let items = inner.source.to_vec();
            let mut state = inner.state.lock();
            for item in items {
                let key = inner.register(&mut state, &item);
                state.mirror.push(Tracked { item, key });
            }
        }

        let weak = Arc::downgrade(&inner);
        let connection = inner.source.changes().connect(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_event(event);
            }
        });
        inner.state.lock().connection = Some(connection);

        tracing::debug!(
            target: targets::VIEW,
            view = "observing",
            id = inner.id.as_u64(),
            len = inner.state.lock().mirror.len(),
            "observing view created"
        );
        Self { inner }
    }

    /// The list this view mirrors.
    pub fn source(&self) -> &Arc<ObservableList<T>> {
        &self.inner.source
    }

    /// Number of property listeners currently registered, one per distinct
    /// item.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().registrations.len()
    }

    /// Appends an item.
    pub fn push(&self, item: T) -> ListResult<()> {
        self.check_batch(std::slice::from_ref(&item))?;
        self.inner.source.push(item)
    }

    /// Inserts an item at `index`.
    pub fn insert(&self, index: usize, item: T) -> ListResult<()> {
        self.check_batch(std::slice::from_ref(&item))?;
        self.inner.source.insert(index, item)
    }

    /// Appends all items. Nothing is inserted unless every item provides
    /// the capability.
    pub fn extend<I>(&self, items: I) -> ListResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        self.check_batch(&items)?;
        self.inner.source.extend(items)
    }

    /// Inserts all items at `index`, all or nothing.
    pub fn insert_all<I>(&self, index: usize, items: I) -> ListResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        self.check_batch(&items)?;
        self.inner.source.insert_all(index, items)
    }

    /// Replaces the item at `index`, returning the previous one.
    pub fn set(&self, index: usize, item: T) -> ListResult<T> {
        self.check_batch(std::slice::from_ref(&item))?;
        self.inner.source.set(index, item)
    }

    /// Removes the item at `index`.
    pub fn remove(&self, index: usize) -> ListResult<T> {
        self.check_live()?;
        self.inner.source.remove(index)
    }

    /// Removes every item.
    pub fn clear(&self) -> ListResult<bool> {
        self.check_live()?;
        self.inner.source.clear()
    }

    /// Stops mirroring the source and releases every property listener.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Returns `true` once [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.inner.state.lock().detached
    }

    fn check_live(&self) -> ListResult<()> {
        if self.is_detached() {
            return Err(ListError::Detached);
        }
        Ok(())
    }

    fn check_batch(&self, items: &[T]) -> ListResult<()> {
        self.check_live()?;
        match items
            .iter()
            .position(|item| (self.inner.capability)(item).is_none())
        {
            Some(index) => {
                tracing::warn!(
                    target: targets::VIEW,
                    view = "observing",
                    id = self.inner.id.as_u64(),
                    index,
                    "rejected item without property source capability"
                );
                Err(ListError::MissingCapability { index })
            }
            None => Ok(()),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservingView<T> {
    /// Removes the first item equal to `item`.
    pub fn remove_item(&self, item: &T) -> ListResult<bool> {
        self.check_live()?;
        self.inner.source.remove_item(item)
    }

    /// Removes every item equal to any of `items`.
    pub fn remove_all(&self, items: &[T]) -> ListResult<bool> {
        self.check_live()?;
        self.inner.source.remove_all(items)
    }

    /// Keeps only items equal to one of `items`.
    pub fn retain_all(&self, items: &[T]) -> ListResult<bool> {
        self.check_live()?;
        self.inner.source.retain_all(items)
    }
}

impl<T: Clone + Send + Sync + 'static> ObservingInner<T> {
    fn register(&self, state: &mut ObservingState<T>, item: &T) -> Option<usize> {
        let Some(source) = (self.capability)(item) else {
            tracing::warn!(
                target: targets::VIEW,
                view = "observing",
                id = self.id.as_u64(),
                "item without property source capability is not observed"
            );
            return None;
        };
        let key = identity(&source);
        match state.registrations.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().occurrences += 1,
            Entry::Vacant(entry) => {
                let weak = self.this.clone();
                let connection = source.add_property_listener(Box::new(move |_: &PropertyChange| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_property_change(key);
                    }
                }));
                entry.insert(Registration {
                    source,
                    connection,
                    occurrences: 1,
                });
            }
        }
        Some(key)
    }

    fn unregister(state: &mut ObservingState<T>, key: Option<usize>) {
        let Some(key) = key else {
            return;
        };
        let Entry::Occupied(mut entry) = state.registrations.entry(key) else {
            return;
        };
        entry.get_mut().occurrences -= 1;
        if entry.get().occurrences == 0 {
            let registration = entry.remove();
            registration
                .source
                .remove_property_listener(registration.connection);
        }
    }

    fn detach(&self) {
        let (connection, registrations) = {
            let mut state = self.state.lock();
            if state.detached {
                return;
            }
            state.detached = true;
            (
                state.connection.take(),
                std::mem::take(&mut state.registrations),
            )
        };
        if let Some(id) = connection {
            self.source.changes().disconnect(id);
        }
        for registration in registrations.into_values() {
            registration
                .source
                .remove_property_listener(registration.connection);
        }
        tracing::debug!(target: targets::VIEW, view = "observing", id = self.id.as_u64(), "detached");
    }

    fn violation(&self, event: &ListEvent, len: usize) -> ! {
        tracing::error!(
            target: targets::VIEW,
            view = "observing",
            id = self.id.as_u64(),
            ?event,
            len,
            "source fired an out-of-range event"
        );
        panic!("observing view received out-of-range event {:?} (length {})", event, len);
    }

    fn fetch(&self, event: &ListEvent, index: usize) -> T {
        self.source
            .get(index)
            .unwrap_or_else(|| self.violation(event, self.source.len()))
    }

    fn on_source_event(&self, event: &ListEvent) {
        if event.is_empty() {
            return;
        }
        match event.kind {
            ListEventKind::Added => {
                let items: Vec<T> = event.range().map(|index| self.fetch(event, index)).collect();
                let mut state = self.state.lock();
                if state.detached {
                    return;
                }
                if event.start > state.mirror.len() {
                    self.violation(event, state.mirror.len());
                }
                let tracked: Vec<Tracked<T>> = items
                    .into_iter()
                    .map(|item| {
                        let key = self.register(&mut state, &item);
                        Tracked { item, key }
                    })
                    .collect();
                state.mirror.splice(event.start..event.start, tracked);
            }
            ListEventKind::Removed => {
                let mut state = self.state.lock();
                if state.detached {
                    return;
                }
                if event.end > state.mirror.len() {
                    self.violation(event, state.mirror.len());
                }
                let removed: Vec<Tracked<T>> = state.mirror.drain(event.range()).collect();
                for tracked in removed {
                    Self::unregister(&mut state, tracked.key);
                }
            }
            ListEventKind::Changed => {
                let items: Vec<T> = event.range().map(|index| self.fetch(event, index)).collect();
                let mut state = self.state.lock();
                if state.detached {
                    return;
                }
                if event.end > state.mirror.len() {
                    self.violation(event, state.mirror.len());
                }
                for (index, item) in event.range().zip(items) {
                    // Register first so an item replaced by itself keeps its
                    // listener.
                    let key = self.register(&mut state, &item);
                    let old = std::mem::replace(&mut state.mirror[index], Tracked { item, key });
                    Self::unregister(&mut state, old.key);
                }
            }
        }
        self.changes.emit(event.with_source(self.id));
    }

    fn on_property_change(&self, key: usize) {
        let positions: Vec<usize> = {
            let state = self.state.lock();
            if state.detached {
                return;
            }
            state
                .mirror
                .iter()
                .enumerate()
                .filter(|(_, tracked)| tracked.key == Some(key))
                .map(|(position, _)| position)
                .collect()
        };
        tracing::trace!(
            target: targets::VIEW,
            view = "observing",
            id = self.id.as_u64(),
            occurrences = positions.len(),
            "item property changed"
        );
        // One event spanning every occurrence.
        let (Some(&first), Some(&last)) = (positions.first(), positions.last()) else {
            return;
        };
        let mut deferred = DeferredPanic::new();
        deferred.capture(
            self.changes
                .try_emit(ListEvent::changed(self.id, first, last + 1)),
        );
        deferred.resume();
    }
}

impl<T> Drop for ObservingInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(id) = state.connection.take() {
            self.source.signal().disconnect(id);
        }
        for (_, registration) in state.registrations.drain() {
            registration
                .source
                .remove_property_listener(registration.connection);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EventList<T> for ObservingView<T> {
    fn list_id(&self) -> ListId {
        self.inner.id
    }

    fn len(&self) -> usize {
        self.inner.state.lock().mirror.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.inner
            .state
            .lock()
            .mirror
            .get(index)
            .map(|tracked| tracked.item.clone())
    }

    fn to_vec(&self) -> Vec<T> {
        self.inner
            .state
            .lock()
            .mirror
            .iter()
            .map(|tracked| tracked.item.clone())
            .collect()
    }

    fn changes(&self) -> &Signal<ListEvent> {
        &self.inner.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_eventlist_core::{Property, PropertyChangeSupport};

    struct Person {
        name: Property<String>,
        support: PropertyChangeSupport,
    }

    impl Person {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: Property::new(name.to_string()),
                support: PropertyChangeSupport::new(),
            })
        }

        fn rename(&self, name: &str) {
            self.support.set_property("name", &self.name, name.to_string());
        }
    }

    impl PartialEq for Person {
        fn eq(&self, other: &Self) -> bool {
            self.name.get() == other.name.get()
        }
    }

    impl PropertySource for Person {
        fn property_changes(&self) -> &Signal<PropertyChange> {
            self.support.signal()
        }
    }

    fn record<T: Clone + Send + Sync + 'static>(
        view: &ObservingView<T>,
    ) -> Arc<Mutex<Vec<ListEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        view.changes().connect(move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn test_registers_existing_items() {
        let ann = Person::new("ann");
        let list = Arc::new(ObservableList::from_vec(vec![ann.clone(), Person::new("bob")]));
        let view = ObservingView::new(list);
        assert_eq!(view.listener_count(), 2);
        assert_eq!(ann.property_listener_count(), 1);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_property_change_fires_changed() {
        let ann = Person::new("ann");
        let bob = Person::new("bob");
        let view = ObservingView::new(Arc::new(ObservableList::new()));
        view.extend([ann.clone(), bob.clone()]).unwrap();
        let events = record(&view);

        bob.rename("robert");

        assert_eq!(*events.lock(), vec![ListEvent::changed(view.list_id(), 1, 2)]);
    }

    #[test]
    fn test_source_events_are_forwarded() {
        let list = Arc::new(ObservableList::new());
        let view = ObservingView::new(list.clone());
        let events = record(&view);

        view.push(Person::new("ann")).unwrap();
        view.remove(0).unwrap();

        let id = view.list_id();
        assert_eq!(
            *events.lock(),
            vec![ListEvent::added(id, 0, 1), ListEvent::removed(id, 0, 1)]
        );
        assert_eq!(view.listener_count(), 0);
    }

    #[test]
    fn test_duplicate_item_holds_one_listener() {
        let ann = Person::new("ann");
        let view = ObservingView::new(Arc::new(ObservableList::new()));
        view.extend([ann.clone(), Person::new("bob"), ann.clone()]).unwrap();
        assert_eq!(view.listener_count(), 2);
        assert_eq!(ann.property_listener_count(), 1);

        let events = record(&view);
        ann.rename("anna");
        let id = view.list_id();
        assert_eq!(
            *events.lock(),
            vec![ListEvent::changed(id, 0, 3)]
        );

        view.remove(0).unwrap();
        assert_eq!(ann.property_listener_count(), 1);
        view.remove(1).unwrap();
        assert_eq!(ann.property_listener_count(), 0);
        assert_eq!(view.listener_count(), 1);
    }

    #[test]
    fn test_set_moves_registration() {
        let ann = Person::new("ann");
        let bob = Person::new("bob");
        let view = ObservingView::new(Arc::new(ObservableList::from_vec(vec![ann.clone()])));

        view.set(0, bob.clone()).unwrap();

        assert_eq!(ann.property_listener_count(), 0);
        assert_eq!(bob.property_listener_count(), 1);

        view.set(0, bob.clone()).unwrap();
        assert_eq!(bob.property_listener_count(), 1);
    }

    #[test]
    fn test_remove_by_value() {
        let view = ObservingView::new(Arc::new(ObservableList::new()));
        view.extend(["a", "b", "c"].map(Person::new)).unwrap();

        assert!(view.remove_item(&Person::new("b")).unwrap());
        assert!(view.retain_all(&[Person::new("c")]).unwrap());
        assert_eq!(view.len(), 1);
        assert_eq!(view.listener_count(), 1);
        assert!(view.remove_all(&[Person::new("c")]).unwrap());
        assert_eq!(view.listener_count(), 0);
        assert!(!view.clear().unwrap());
    }

    #[derive(Clone)]
    enum Row {
        Person(Arc<Person>),
        Separator,
    }

    fn row_capability(row: &Row) -> Option<Arc<dyn PropertySource>> {
        match row {
            Row::Person(person) => Some(person.clone() as Arc<dyn PropertySource>),
            Row::Separator => None,
        }
    }

    #[test]
    fn test_missing_capability_rejects_whole_batch() {
        let list = Arc::new(ObservableList::new());
        let view = ObservingView::with_capability(list.clone(), row_capability);

        let result = view.extend([Row::Person(Person::new("ann")), Row::Separator]);

        assert_eq!(result, Err(ListError::MissingCapability { index: 1 }));
        assert!(list.is_empty());
        assert_eq!(view.listener_count(), 0);
    }

    #[test]
    fn test_direct_source_insert_without_capability_is_mirrored() {
        let list = Arc::new(ObservableList::new());
        let view = ObservingView::with_capability(list.clone(), row_capability);

        list.push(Row::Separator).unwrap();
        list.push(Row::Person(Person::new("ann"))).unwrap();

        assert_eq!(view.len(), 2);
        assert_eq!(view.listener_count(), 1);
    }

    #[test]
    fn test_detach_releases_listeners() {
        let ann = Person::new("ann");
        let list = Arc::new(ObservableList::from_vec(vec![ann.clone()]));
        let view = ObservingView::new(list.clone());
        let events = record(&view);

        view.detach();

        assert_eq!(ann.property_listener_count(), 0);
        assert_eq!(list.changes().connection_count(), 0);
        assert_eq!(view.push(Person::new("bob")), Err(ListError::Detached));
        assert_eq!(view.remove(0).err(), Some(ListError::Detached));
        ann.rename("anna");
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_drop_releases_listeners() {
        let ann = Person::new("ann");
        let list = Arc::new(ObservableList::from_vec(vec![ann.clone()]));
        let view = ObservingView::new(list.clone());
        drop(view);
        assert_eq!(ann.property_listener_count(), 0);
        assert_eq!(list.changes().connection_count(), 0);
    }
}
