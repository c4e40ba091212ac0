//! Name-keyed signal and slot tables.
//!
//! Objects and services expose their communication endpoints through these
//! tables so configuration can wire them by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ComError, ComResult};
use crate::signal::{Signal, SignalBase};
use crate::slot::{Slot, SlotBase};
use crate::worker::Worker;

/// Signals exposed by an object or a service.
#[derive(Default)]
pub struct Signals {
    entries: RwLock<BTreeMap<String, Arc<dyn SignalBase>>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal under `key`, replacing any previous one.
    pub fn add<A: Clone + Send + 'static>(&self, key: impl Into<String>, signal: Signal<A>) {
        self.entries.write().insert(key.into(), Arc::new(signal));
    }

    /// Typed lookup. `None` when the key is unknown or carries other arguments.
    pub fn get<A: Clone + Send + 'static>(&self, key: &str) -> Option<Signal<A>> {
        self.entries
            .read()
            .get(key)
            .and_then(|s| s.as_any().downcast_ref::<Signal<A>>().cloned())
    }

    /// Type-erased lookup
    pub fn get_dyn(&self, key: &str) -> ComResult<Arc<dyn SignalBase>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ComError::SignalNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Disconnect every connection of every signal
    pub fn disconnect_all(&self) {
        for signal in self.entries.read().values() {
            signal.disconnect_all();
        }
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// Slots exposed by a service.
#[derive(Default)]
pub struct Slots {
    entries: RwLock<BTreeMap<String, Arc<dyn SlotBase>>>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot under `key`, replacing any previous one.
    pub fn add<A: Clone + Send + 'static>(&self, key: impl Into<String>, slot: Slot<A>) {
        self.entries.write().insert(key.into(), Arc::new(slot));
    }

    /// Typed lookup. `None` when the key is unknown or takes other arguments.
    pub fn get<A: Clone + Send + 'static>(&self, key: &str) -> Option<Slot<A>> {
        self.entries
            .read()
            .get(key)
            .and_then(|s| s.as_any().downcast_ref::<Slot<A>>().cloned())
    }

    /// Type-erased lookup
    pub fn get_dyn(&self, key: &str) -> ComResult<Arc<dyn SlotBase>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ComError::SlotNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Affine every slot in the table to `worker`
    pub fn set_worker(&self, worker: &Arc<Worker>) {
        for slot in self.entries.read().values() {
            slot.set_worker(Arc::clone(worker));
        }
    }
}

impl std::fmt::Debug for Slots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DispatchMode;
    use crate::signal::connect_erased;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_typed_lookup_checks_arguments() {
        let signals = Signals::new();
        signals.add("modified", Signal::<()>::named("modified"));

        assert!(signals.get::<()>("modified").is_some());
        assert!(signals.get::<i32>("modified").is_none());
        assert!(signals.get::<()>("missing").is_none());
        assert!(matches!(
            signals.get_dyn("missing"),
            Err(ComError::SignalNotFound(_))
        ));
    }

    #[test]
    fn test_wire_by_name() {
        let signals = Signals::new();
        let slots = Slots::new();
        let total = Arc::new(AtomicI32::new(0));
        let sink = Arc::clone(&total);

        signals.add("value", Signal::<i32>::new());
        slots.add("accumulate", Slot::new(move |v: i32| {
            sink.fetch_add(v, Ordering::SeqCst);
        }));

        let signal = signals.get_dyn("value").unwrap();
        let slot = slots.get_dyn("accumulate").unwrap();
        let _connection = connect_erased(signal.as_ref(), slot.as_ref(), DispatchMode::Direct).unwrap();

        signals.get::<i32>("value").unwrap().emit(5);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(slots.keys(), vec!["accumulate".to_string()]);
    }

    #[test]
    fn test_set_worker_applies_to_all_slots() {
        let slots = Slots::new();
        slots.add("a", Slot::new(|_: ()| {}));
        slots.add("b", Slot::new(|_: i32| {}));

        let worker = Worker::spawn("table").unwrap();
        slots.set_worker(&worker);

        assert!(slots.get::<()>("a").unwrap().worker().is_some());
        assert!(slots.get::<i32>("b").unwrap().worker().is_some());
        worker.stop();
    }
}
