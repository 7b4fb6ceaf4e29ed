//! Synchronous change notification.
//!
//! Every list, view and property in the crate announces its changes through a
//! [`Signal`]. Listeners are plain closures; `emit` calls each of them on the
//! current thread and returns once all have run.
//!
//! Delivery rules:
//!
//! - Listeners run in the order they were connected.
//! - Fan-out iterates over a snapshot. A listener connected during an
//!   emission first hears the next one. A listener disconnected during an
//!   emission is skipped if it has not run yet.
//! - A panicking listener is logged and the remaining listeners still run.
//!   [`Signal::emit`] resumes the first panic afterwards and
//!   [`Signal::try_emit`] returns it as a [`ListenerPanic`].
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use horizon_eventlist_core::Signal;
//!
//! let resized = Signal::<(usize, usize)>::new();
//! let total = Arc::new(AtomicUsize::new(0));
//!
//! let sink = total.clone();
//! let id = resized.connect(move |&(old, new)| {
//!     sink.fetch_add(new.abs_diff(old), Ordering::SeqCst);
//! });
//!
//! resized.emit((3, 5));
//! resized.disconnect(id);
//! resized.emit((5, 9));
//! assert_eq!(total.load(Ordering::SeqCst), 2);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::error::SignalError;

new_key_type! {
    /// Handle for one listener registered on a [`Signal`].
    pub struct ConnectionId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

struct Connection<Args> {
    slot: Slot<Args>,
    /// Cleared on disconnect so that snapshots taken before the disconnect
    /// skip the slot.
    active: Arc<AtomicBool>,
}

/// Connections plus their registration order.
///
/// `SlotMap` reuses vacated slots, so its iteration order is not the order
/// in which slots were connected.
struct Connections<Args> {
    slots: SlotMap<ConnectionId, Connection<Args>>,
    order: Vec<ConnectionId>,
}

impl<Args> Connections<Args> {
    fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    fn remove(&mut self, id: ConnectionId) -> bool {
        match self.slots.remove(id) {
            Some(conn) => {
                conn.active.store(false, Ordering::SeqCst);
                self.order.retain(|&other| other != id);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<(Slot<Args>, Arc<AtomicBool>)> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(*id))
            .map(|conn| (conn.slot.clone(), conn.active.clone()))
            .collect()
    }
}

/// A slot failure captured while a signal was fanning out.
///
/// Holds the panic payload so that it can be resumed later with
/// [`ListenerPanic::resume`].
pub struct ListenerPanic {
    payload: Box<dyn Any + Send>,
}

impl ListenerPanic {
    /// Wraps a payload obtained from [`std::panic::catch_unwind`].
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        Self { payload }
    }

    /// Best-effort human readable message of the panic.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "<non-string panic payload>"
        }
    }

    /// Resumes unwinding with the original payload.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for ListenerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerPanic")
            .field("message", &self.message())
            .finish()
    }
}

/// Keeps the first [`ListenerPanic`] seen across several emissions.
///
/// Components that emit several events for one operation use this to finish
/// the whole operation (keeping their state consistent) and only then
/// re-raise the failure.
#[derive(Debug, Default)]
pub struct DeferredPanic {
    first: Option<ListenerPanic>,
}

impl DeferredPanic {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of an emission. Later failures are dropped once
    /// one has been recorded; they have already been logged by the signal.
    pub fn capture(&mut self, outcome: Result<(), ListenerPanic>) {
        if let Err(failure) = outcome {
            if self.first.is_none() {
                self.first = Some(failure);
            }
        }
    }

    /// Returns `true` if no failure has been recorded.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Takes the recorded failure, if any.
    pub fn into_inner(self) -> Option<ListenerPanic> {
        self.first
    }

    /// Resumes the recorded failure, or returns normally when there is none.
    pub fn resume(self) {
        if let Some(failure) = self.first {
            failure.resume();
        }
    }
}

/// A list of listeners that all receive the same payload.
///
/// `Args` is whatever the owner reports: list events for lists,
/// [`PropertyChange`](crate::PropertyChange) for items, `()` for bare
/// pings. The signal is `Send + Sync`; listeners always run on the thread
/// that emits.
pub struct Signal<Args> {
    connections: Mutex<Connections<Args>>,
    /// Muted signals drop emissions.
    blocked: AtomicBool,
}

impl<Args: 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static> Signal<Args> {
    /// An empty signal.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Connections::new()),
            blocked: AtomicBool::new(false),
        }
    }

    /// Registers `slot` after every existing listener.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let mut connections = self.connections.lock();
        let id = connections.slots.insert(Connection {
            slot: Arc::new(slot),
            active: Arc::new(AtomicBool::new(true)),
        });
        connections.order.push(id);
        id
    }

    /// Removes a listener. `false` when `id` was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id)
    }

    /// Like [`disconnect`](Self::disconnect) but an unknown id is an error.
    pub fn try_disconnect(&self, id: ConnectionId) -> Result<(), SignalError> {
        if self.disconnect(id) {
            Ok(())
        } else {
            Err(SignalError::InvalidConnection)
        }
    }

    /// Drops every listener, including ones queued in a running snapshot.
    pub fn disconnect_all(&self) {
        let mut connections = self.connections.lock();
        for (_, conn) in connections.slots.drain() {
            conn.active.store(false, Ordering::SeqCst);
        }
        connections.order.clear();
    }

    /// Number of registered listeners.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().slots.len()
    }

    /// Whether `id` still refers to a registered listener.
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.lock().slots.contains_key(id)
    }

    /// Mutes or unmutes the signal. Emissions made while muted are lost.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Delivers `args` to every listener, then resumes the first listener
    /// panic if there was one.
    pub fn emit(&self, args: Args) {
        if let Err(failure) = self.try_emit(args) {
            failure.resume();
        }
    }

    /// Delivers `args` to every listener and hands back the first listener
    /// panic instead of resuming it.
    #[tracing::instrument(skip_all, target = "horizon_eventlist_core::signal", level = "trace")]
    pub fn try_emit(&self, args: Args) -> Result<(), ListenerPanic> {
        if self.is_blocked() {
            tracing::trace!(target: "horizon_eventlist_core::signal", "signal blocked, skipping emit");
            return Ok(());
        }

        // Release the lock before invoking slots so that they can connect
        // and disconnect re-entrantly.
        let snapshot = self.connections.lock().snapshot();
        tracing::trace!(target: "horizon_eventlist_core::signal", connection_count = snapshot.len(), "emitting signal");

        let mut deferred = DeferredPanic::new();
        for (slot, active) in snapshot {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| slot(&args)));
            if let Err(payload) = outcome {
                let failure = ListenerPanic::new(payload);
                tracing::error!(
                    target: "horizon_eventlist_core::signal",
                    message = failure.message(),
                    "slot panicked during emit, continuing fan-out"
                );
                deferred.capture(Err(failure));
            }
        }

        match deferred.into_inner() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().slots.len())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .finish()
    }
}
