//! Slots
//!
//! A slot is a named callable. Signals hold slots weakly, so dropping the last
//! `Slot` handle is enough to cut every connection that targets it.

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::worker::Worker;

pub(crate) struct SlotInner<A> {
    name: String,
    func: Box<dyn Fn(A) + Send + Sync>,
    worker: RwLock<Option<Arc<Worker>>>,
}

impl<A: Send + 'static> SlotInner<A> {
    pub(crate) fn call(&self, args: A) {
        (self.func)(args);
    }

    /// Post the call on the slot's worker, or run it inline when there is none.
    /// Calls queued after the worker stopped are dropped.
    pub(crate) fn post(self: Arc<Self>, args: A) {
        let worker = self.worker.read().clone();
        match worker {
            Some(worker) => {
                let slot = Arc::clone(&self);
                if let Err(e) = worker.post(move || slot.call(args)) {
                    tracing::warn!(slot = %self.name, worker = %worker.name(), error = %e, "Queued slot call dropped");
                }
            }
            None => {
                tracing::debug!(slot = %self.name, "Slot has no worker, running queued call inline");
                self.call(args);
            }
        }
    }
}

/// A typed callable that signals can be connected to.
pub struct Slot<A> {
    pub(crate) inner: Arc<SlotInner<A>>,
}

impl<A: Clone + Send + 'static> Slot<A> {
    /// Create an anonymous slot
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::named("<anonymous>", func)
    }

    /// Create a named slot (the name only shows up in logs)
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SlotInner {
                name: name.into(),
                func: Box::new(func),
                worker: RwLock::new(None),
            }),
        }
    }

    /// Slot name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run the slot synchronously on the calling thread
    pub fn run(&self, args: A) {
        self.inner.call(args);
    }

    /// Run the slot on its worker (inline when it has none, dropped when the
    /// worker has stopped)
    pub fn async_run(&self, args: A) {
        Arc::clone(&self.inner).post(args);
    }

    /// Affine the slot to a worker
    pub fn set_worker(&self, worker: Arc<Worker>) {
        *self.inner.worker.write() = Some(worker);
    }

    /// The worker queued calls are posted to
    pub fn worker(&self) -> Option<Arc<Worker>> {
        self.inner.worker.read().clone()
    }

    pub(crate) fn downgrade(&self) -> Weak<SlotInner<A>> {
        Arc::downgrade(&self.inner)
    }
}

impl<A> Clone for Slot<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Slot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.inner.name)
            .field("args", &type_name::<A>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased slot
// ─────────────────────────────────────────────────────────────────────────────

/// Operations available on any slot regardless of its argument type.
pub trait SlotBase: Send + Sync {
    /// Slot name
    fn name(&self) -> &str;

    /// Argument type name, for diagnostics
    fn arg_type_name(&self) -> &'static str;

    /// Argument type identity, checked at connection time
    fn arg_type_id(&self) -> TypeId;

    /// Affine the slot to a worker
    fn set_worker(&self, worker: Arc<Worker>);

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

impl<A: Clone + Send + 'static> SlotBase for Slot<A> {
    fn name(&self) -> &str {
        Slot::name(self)
    }

    fn arg_type_name(&self) -> &'static str {
        type_name::<A>()
    }

    fn arg_type_id(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn set_worker(&self, worker: Arc<Worker>) {
        Slot::set_worker(self, worker);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_run_is_synchronous() {
        let total = Arc::new(AtomicI32::new(0));
        let sink = Arc::clone(&total);
        let slot = Slot::new(move |v: i32| {
            sink.fetch_add(v, Ordering::SeqCst);
        });

        slot.run(3);
        slot.run(4);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_async_run_uses_worker() {
        let worker = Worker::spawn("slot-worker").unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let current = Arc::clone(&worker);
        let slot = Slot::named("current", move |_: ()| {
            tx.send(current.is_current()).unwrap();
        });
        slot.set_worker(Arc::clone(&worker));

        slot.async_run(());
        worker.stop();
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_stopped_worker_drops_queued_calls() {
        let worker = Worker::spawn("gone").unwrap();
        let total = Arc::new(AtomicI32::new(0));
        let sink = Arc::clone(&total);
        let slot = Slot::new(move |v: i32| {
            sink.fetch_add(v, Ordering::SeqCst);
        });
        slot.set_worker(Arc::clone(&worker));
        worker.stop();

        slot.async_run(5);
        assert_eq!(total.load(Ordering::SeqCst), 0);

        // Direct runs are unaffected
        slot.run(2);
        assert_eq!(total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_erased_type_information() {
        let slot = Slot::named("pair", |_: (i32, i32)| {});
        let erased: &dyn SlotBase = &slot;
        assert_eq!(erased.name(), "pair");
        assert_eq!(erased.arg_type_id(), TypeId::of::<(i32, i32)>());
        assert!(erased.as_any().downcast_ref::<Slot<(i32, i32)>>().is_some());
    }
}
