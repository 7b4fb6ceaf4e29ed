//! Notification primitives shared by the Horizon EventList crates.
//!
//! [`Signal`] carries list and item change events to listeners in order and
//! isolates listener panics. The [`property`] module lets list items report
//! their own changes, and [`logging`] names the `tracing` targets used across
//! the workspace.
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use horizon_eventlist_core::{Property, PropertyChange, PropertyChangeSupport, PropertySource};
//!
//! let support = PropertyChangeSupport::new();
//! let title = Property::new(String::from("draft"));
//! let names = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = names.clone();
//! support.add_property_listener(Box::new(move |change: &PropertyChange| {
//!     sink.lock().push(change.name().map(str::to_owned));
//! }));
//!
//! support.set_property("title", &title, String::from("final"));
//! support.set_property("title", &title, String::from("final"));
//! assert_eq!(*names.lock(), vec![Some(String::from("title"))]);
//! ```

mod error;
pub mod logging;
pub mod property;
pub mod signal;

#[doc(hidden)]
pub use tracing;

pub use error::{Result, SignalError};
pub use logging::PerfSpan;
pub use property::{
    Property, PropertyChange, PropertyChangeSupport, PropertyListener, PropertySource,
    PropertyValue,
};
pub use signal::{ConnectionId, DeferredPanic, ListenerPanic, Signal};
