//! Property change notification for list items.
//!
//! Items stored in an observing view announce their own changes through the
//! [`PropertySource`] capability. A change carries the name of the property
//! (or `None` when the whole item should be treated as changed) and the old
//! and new values as type-erased [`PropertyValue`]s.
//!
//! # Example
//!
//! ```
//! use horizon_eventlist_core::property::{Property, PropertyChangeSupport, PropertySource};
//! use horizon_eventlist_core::Signal;
//! use horizon_eventlist_core::property::PropertyChange;
//!
//! struct Contact {
//!     name: Property<String>,
//!     support: PropertyChangeSupport,
//! }
//!
//! impl PropertySource for Contact {
//!     fn property_changes(&self) -> &Signal<PropertyChange> {
//!         self.support.signal()
//!     }
//! }
//!
//! let contact = Contact {
//!     name: Property::new("Ada".to_string()),
//!     support: PropertyChangeSupport::new(),
//! };
//! contact.support.set_property("name", &contact.name, "Grace".to_string());
//! assert_eq!(contact.name.get(), "Grace");
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::signal::{ConnectionId, Signal};

/// A type-erased property value carried by a [`PropertyChange`].
pub type PropertyValue = Arc<dyn Any + Send + Sync>;

/// A boxed property listener, as accepted by
/// [`PropertySource::add_property_listener`].
pub type PropertyListener = Box<dyn Fn(&PropertyChange) + Send + Sync>;

/// Describes one change to an item.
#[derive(Clone)]
pub struct PropertyChange {
    name: Option<Cow<'static, str>>,
    old_value: Option<PropertyValue>,
    new_value: Option<PropertyValue>,
}

impl PropertyChange {
    /// Creates a change for a named property.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        old_value: Option<PropertyValue>,
        new_value: Option<PropertyValue>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            old_value,
            new_value,
        }
    }

    /// Creates a change that marks the whole item as changed.
    pub fn whole_item() -> Self {
        Self {
            name: None,
            old_value: None,
            new_value: None,
        }
    }

    /// The property name, or `None` for a whole-item change.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns `true` when listeners should treat the whole item as changed.
    pub fn affects_whole_item(&self) -> bool {
        self.name.is_none()
    }

    /// The previous value, if one was supplied.
    pub fn old_value(&self) -> Option<&PropertyValue> {
        self.old_value.as_ref()
    }

    /// The new value, if one was supplied.
    pub fn new_value(&self) -> Option<&PropertyValue> {
        self.new_value.as_ref()
    }

    /// Downcasts the old value.
    pub fn old_value_as<V: Any>(&self) -> Option<&V> {
        self.old_value.as_ref().and_then(|v| v.downcast_ref::<V>())
    }

    /// Downcasts the new value.
    pub fn new_value_as<V: Any>(&self) -> Option<&V> {
        self.new_value.as_ref().and_then(|v| v.downcast_ref::<V>())
    }
}

impl fmt::Debug for PropertyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChange")
            .field("name", &self.name)
            .field("has_old_value", &self.old_value.is_some())
            .field("has_new_value", &self.new_value.is_some())
            .finish()
    }
}

/// The capability of an item to report its own property changes.
///
/// Implementors expose a [`Signal`] of [`PropertyChange`]s; the listener
/// management methods are provided on top of it.
pub trait PropertySource: Send + Sync {
    /// The signal fired whenever a property of this item changes.
    fn property_changes(&self) -> &Signal<PropertyChange>;

    /// Registers a listener for property changes.
    fn add_property_listener(&self, listener: PropertyListener) -> ConnectionId {
        self.property_changes().connect(listener)
    }

    /// Removes a listener previously returned by
    /// [`add_property_listener`](Self::add_property_listener).
    fn remove_property_listener(&self, id: ConnectionId) -> bool {
        self.property_changes().disconnect(id)
    }

    /// Number of listeners currently registered on this item.
    fn property_listener_count(&self) -> usize {
        self.property_changes().connection_count()
    }
}

/// A value slot inside an item. Pair it with [`PropertyChangeSupport`] so
/// that writes are reported to observers.
pub struct Property<T> {
    value: RwLock<T>,
}

impl<T: Clone> Property<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// A clone of the held value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Runs `f` against the held value under the read lock.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.value.read())
    }
}

impl<T: Clone + PartialEq> Property<T> {
    /// Stores `value`. Yields the displaced value, or `None` when the two
    /// compare equal and nothing was written.
    pub fn replace(&self, value: T) -> Option<T> {
        let mut current = self.value.write();
        if *current != value {
            Some(std::mem::replace(&mut *current, value))
        } else {
            None
        }
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.get())
            .finish()
    }
}

/// Helper that owns the property-change signal of an item.
///
/// Embed one in an item type and return [`signal`](Self::signal) from
/// [`PropertySource::property_changes`].
#[derive(Debug, Default)]
pub struct PropertyChangeSupport {
    signal: Signal<PropertyChange>,
}

impl PropertyChangeSupport {
    /// Creates a support object with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying signal.
    pub fn signal(&self) -> &Signal<PropertyChange> {
        &self.signal
    }

    /// Fires a change for a named property.
    pub fn fire_property_change<V>(&self, name: impl Into<Cow<'static, str>>, old: V, new: V)
    where
        V: Any + Send + Sync,
    {
        let change = PropertyChange::new(name, Some(Arc::new(old)), Some(Arc::new(new)));
        crate::eventlist_trace!(property = ?change.name(), "firing property change");
        self.signal.emit(change);
    }

    /// Fires a whole-item change.
    pub fn fire_item_changed(&self) {
        crate::eventlist_trace!("firing whole-item change");
        self.signal.emit(PropertyChange::whole_item());
    }

    /// Sets `property` and fires a change when the value actually differs.
    ///
    /// Returns `true` if a change was fired.
    pub fn set_property<T>(
        &self,
        name: impl Into<Cow<'static, str>>,
        property: &Property<T>,
        value: T,
    ) -> bool
    where
        T: Any + Clone + PartialEq + Send + Sync,
    {
        match property.replace(value.clone()) {
            Some(old) => {
                self.fire_property_change(name, old, value);
                true
            }
            None => false,
        }
    }
}

impl PropertySource for PropertyChangeSupport {
    fn property_changes(&self) -> &Signal<PropertyChange> {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn replace_skips_equal_values() {
        let rank = Property::new(3_u32);
        assert_eq!(rank.replace(3), None);
        assert_eq!(rank.replace(7), Some(3));
        assert_eq!(rank.get(), 7);
        assert!(rank.with(|v| *v > 5));
    }

    #[test]
    fn set_property_reports_old_and_new_values() {
        let support = PropertyChangeSupport::new();
        let prop = Property::new("a".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        support.add_property_listener(Box::new(move |change: &PropertyChange| {
            s.lock().push((
                change.name().map(str::to_string),
                change.old_value_as::<String>().cloned(),
                change.new_value_as::<String>().cloned(),
            ));
        }));

        assert!(!support.set_property("label", &prop, "a".to_string()));
        assert!(support.set_property("label", &prop, "b".to_string()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            (
                Some("label".to_string()),
                Some("a".to_string()),
                Some("b".to_string())
            )
        );
    }

    #[test]
    fn whole_item_change_has_no_name() {
        let support = PropertyChangeSupport::new();
        let whole = Arc::new(Mutex::new(None));

        let w = whole.clone();
        let id = support.add_property_listener(Box::new(move |change: &PropertyChange| {
            *w.lock() = Some(change.affects_whole_item());
        }));
        assert_eq!(support.property_listener_count(), 1);

        support.fire_item_changed();
        assert_eq!(*whole.lock(), Some(true));

        assert!(support.remove_property_listener(id));
        assert_eq!(support.property_listener_count(), 0);
    }
}
