//! Signals
//!
//! A signal owns an ordered list of connections. Emission snapshots the list,
//! releases the lock, and only then calls into slots, so a slot may emit the
//! same signal again or connect/disconnect without deadlocking.

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionId, ConnectionOwner, ConnectionState, DispatchMode};
use crate::error::{ComError, ComResult};
use crate::slot::{Slot, SlotBase, SlotInner};

struct ConnectionEntry<A> {
    id: ConnectionId,
    mode: DispatchMode,
    slot: Weak<SlotInner<A>>,
    state: Arc<ConnectionState>,
}

impl<A> ConnectionEntry<A> {
    fn is_live(&self) -> bool {
        self.state.is_connected() && self.slot.strong_count() > 0
    }
}

pub(crate) struct SignalInner<A> {
    name: String,
    connections: Mutex<Vec<ConnectionEntry<A>>>,
}

impl<A: Send + 'static> ConnectionOwner for SignalInner<A> {
    fn remove(&self, id: ConnectionId) {
        self.connections.lock().retain(|entry| entry.id != id);
    }
}

impl<A> Drop for SignalInner<A> {
    fn drop(&mut self) {
        for entry in self.connections.get_mut().drain(..) {
            entry.state.mark_disconnected();
        }
    }
}

/// A typed emission point.
pub struct Signal<A> {
    inner: Arc<SignalInner<A>>,
}

impl<A: Clone + Send + 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Send + 'static> Signal<A> {
    /// Create an anonymous signal
    pub fn new() -> Self {
        Self::named("<anonymous>")
    }

    /// Create a named signal (the name only shows up in logs)
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                name: name.into(),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signal name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Connect a slot. Slots are notified in connection order.
    pub fn connect(&self, slot: &Slot<A>, mode: DispatchMode) -> Connection {
        let id = ConnectionId::next();
        let state = ConnectionState::new();

        self.inner.connections.lock().push(ConnectionEntry {
            id,
            mode,
            slot: slot.downgrade(),
            state: Arc::clone(&state),
        });

        let owner: Arc<dyn ConnectionOwner> = self.inner.clone();
        let target: Arc<dyn Any + Send + Sync> = slot.inner.clone();
        Connection::new(
            id,
            mode,
            state,
            Arc::downgrade(&owner),
            Arc::downgrade(&target),
        )
    }

    /// Emit to every live, unblocked connection using its own dispatch mode.
    pub fn emit(&self, args: A) {
        self.dispatch(args, None);
    }

    /// Emit with every connection forced to queued dispatch.
    pub fn async_emit(&self, args: A) {
        self.dispatch(args, Some(DispatchMode::Queued));
    }

    /// Number of live connections (blocked ones included)
    pub fn num_connections(&self) -> usize {
        let mut connections = self.inner.connections.lock();
        prune(&mut connections);
        connections.len()
    }

    /// Remove every connection
    pub fn disconnect_all(&self) {
        let drained: Vec<_> = self.inner.connections.lock().drain(..).collect();
        for entry in drained {
            entry.state.mark_disconnected();
        }
    }

    fn dispatch(&self, args: A, forced: Option<DispatchMode>) {
        let targets: Vec<_> = {
            let mut connections = self.inner.connections.lock();
            prune(&mut connections);
            connections
                .iter()
                .filter(|entry| !entry.state.is_blocked())
                .filter_map(|entry| {
                    entry
                        .slot
                        .upgrade()
                        .map(|slot| (slot, forced.unwrap_or(entry.mode)))
                })
                .collect()
        };

        tracing::trace!(signal = %self.inner.name, targets = targets.len(), "Emitting");

        for (slot, mode) in targets {
            match mode {
                DispatchMode::Direct => slot.call(args.clone()),
                DispatchMode::Queued => slot.post(args.clone()),
            }
        }
    }
}

/// Drop entries whose slot died or that were disconnected.
fn prune<A>(connections: &mut Vec<ConnectionEntry<A>>) {
    connections.retain(|entry| {
        let live = entry.is_live();
        if !live {
            entry.state.mark_disconnected();
        }
        live
    });
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.inner.name)
            .field("args", &type_name::<A>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased signal
// ─────────────────────────────────────────────────────────────────────────────

/// Operations available on any signal regardless of its argument type.
pub trait SignalBase: Send + Sync {
    /// Signal name
    fn name(&self) -> &str;

    /// Argument type name, for diagnostics
    fn arg_type_name(&self) -> &'static str;

    /// Argument type identity
    fn arg_type_id(&self) -> TypeId;

    /// Number of live connections
    fn num_connections(&self) -> usize;

    /// Remove every connection
    fn disconnect_all(&self);

    /// Connect to a slot whose argument type is only known at runtime.
    ///
    /// Fails with `SignatureMismatch` and creates nothing when the argument
    /// types differ.
    fn connect_dyn(&self, slot: &dyn SlotBase, mode: DispatchMode) -> ComResult<Connection>;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

impl<A: Clone + Send + 'static> SignalBase for Signal<A> {
    fn name(&self) -> &str {
        Signal::name(self)
    }

    fn arg_type_name(&self) -> &'static str {
        type_name::<A>()
    }

    fn arg_type_id(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn num_connections(&self) -> usize {
        Signal::num_connections(self)
    }

    fn disconnect_all(&self) {
        Signal::disconnect_all(self);
    }

    fn connect_dyn(&self, slot: &dyn SlotBase, mode: DispatchMode) -> ComResult<Connection> {
        let mismatch = || ComError::SignatureMismatch {
            signal: type_name::<A>(),
            slot: slot.arg_type_name(),
        };
        if slot.arg_type_id() != TypeId::of::<A>() {
            return Err(mismatch());
        }
        let typed = slot
            .as_any()
            .downcast_ref::<Slot<A>>()
            .ok_or_else(mismatch)?;
        Ok(self.connect(typed, mode))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connect two type-erased endpoints, checking their signatures.
pub fn connect_erased(
    signal: &dyn SignalBase,
    slot: &dyn SlotBase,
    mode: DispatchMode,
) -> ComResult<Connection> {
    let connection = signal.connect_dyn(slot, mode)?;
    tracing::debug!(
        signal = %signal.name(),
        slot = %slot.name(),
        ?mode,
        "Connected"
    );
    Ok(connection)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
