//! Connections between signals and slots.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How a connected slot is invoked when the signal is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Run on the emitting thread before `emit` returns
    #[default]
    Direct,
    /// Post to the slot's worker and return immediately
    Queued,
}

/// Identifier of a connection, unique within its signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Flags shared between a signal's connection entry and every handle to it
#[derive(Debug)]
pub(crate) struct ConnectionState {
    connected: AtomicBool,
    blocked: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Returns true the first time only
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }
}

/// Implemented by signals so a connection can remove itself without knowing
/// the argument type.
pub(crate) trait ConnectionOwner: Send + Sync {
    fn remove(&self, id: ConnectionId);
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to an established signal → slot connection.
///
/// The handle does not keep either endpoint alive. Disconnecting is
/// idempotent and safe after either endpoint has been dropped.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    mode: DispatchMode,
    state: Arc<ConnectionState>,
    signal: Weak<dyn ConnectionOwner>,
    slot: Weak<dyn Any + Send + Sync>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        mode: DispatchMode,
        state: Arc<ConnectionState>,
        signal: Weak<dyn ConnectionOwner>,
        slot: Weak<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            id,
            mode,
            state,
            signal,
            slot,
        }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Dispatch mode chosen at connection time
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Remove the connection. Extra calls are no-ops.
    pub fn disconnect(&self) {
        if !self.state.mark_disconnected() {
            return;
        }
        if let Some(signal) = self.signal.upgrade() {
            signal.remove(self.id);
        }
    }

    /// Suppress slot invocation while keeping the connection established
    pub fn block(&self) {
        self.state.blocked.store(true, Ordering::SeqCst);
    }

    /// Resume slot invocation
    pub fn unblock(&self) {
        self.state.blocked.store(false, Ordering::SeqCst);
    }

    /// Whether the connection is currently blocked
    pub fn is_blocked(&self) -> bool {
        self.state.is_blocked()
    }

    /// Whether both endpoints are alive and the connection was not removed
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
            && self.signal.strong_count() > 0
            && self.slot.strong_count() > 0
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("connected", &self.is_connected())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Set
// ─────────────────────────────────────────────────────────────────────────────

/// A group of connections torn down together.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: Mutex<Vec<Connection>>,
}

impl ConnectionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the set
    pub fn push(&self, connection: Connection) {
        self.connections.lock().push(connection);
    }

    /// Number of connections held (live or not)
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Block every connection in the set
    pub fn block_all(&self) {
        self.connections.lock().iter().for_each(Connection::block);
    }

    /// Unblock every connection in the set
    pub fn unblock_all(&self) {
        self.connections.lock().iter().for_each(Connection::unblock);
    }

    /// Disconnect and forget every connection
    pub fn disconnect_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain(..).collect();
        for connection in drained {
            connection.disconnect();
        }
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
