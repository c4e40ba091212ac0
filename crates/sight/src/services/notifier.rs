// Notifier Service - counts the modifications of an object
//
// Listens to `modified` through its own `notify` slot and re-emits the
// running count on `notified`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sight_com::{Signal, Signals, Slot, Slots};
use sight_data::SIGNAL_MODIFIED;
use sight_service::{HookError, KeyConnection, KeyDecl, Service, ServiceContext};

const OBJECT: &str = "object";

/// Slot connected to the object's `modified` signal
pub const SLOT_NOTIFY: &str = "notify";
/// Emitted with the running count after each notification
pub const SIGNAL_NOTIFIED: &str = "notified";

pub struct NotifierService {
    count: Arc<AtomicU64>,
    notified: Signal<u64>,
}

impl NotifierService {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            notified: Signal::named(SIGNAL_NOTIFIED),
        }
    }
}

impl Default for NotifierService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for NotifierService {
    fn keys(&self) -> Vec<KeyDecl> {
        vec![KeyDecl::input(OBJECT)]
    }

    fn auto_connections(&self) -> Vec<KeyConnection> {
        vec![KeyConnection::new(OBJECT, SIGNAL_MODIFIED, SLOT_NOTIFY)]
    }

    fn register_signals(&self, signals: &Signals) {
        signals.add(SIGNAL_NOTIFIED, self.notified.clone());
    }

    fn register_slots(&self, slots: &Slots) {
        let count = Arc::clone(&self.count);
        let notified = self.notified.clone();
        slots.add(
            SLOT_NOTIFY,
            Slot::named(SLOT_NOTIFY, move |()| {
                let count = count.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(count, "Object modified");
                notified.emit(count);
            }),
        );
    }

    fn starting(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.count.store(0, Ordering::SeqCst);
        tracing::info!(service_id = %ctx.id(), object = ?ctx.object(OBJECT).map(|o| o.id().to_string()), "Watching object");
        Ok(())
    }

    fn updating(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    fn stopping(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        tracing::info!(service_id = %ctx.id(), count = self.count.load(Ordering::SeqCst), "Stopped watching object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sight_data::{Integer, Object};
    use sight_service::{ObjectServiceRegistry, ServiceConfig, ServiceHandle};

    #[test]
    fn test_counts_modifications_while_started() {
        let object = Object::new(Integer::new(0));
        let notifier = ServiceHandle::new(Box::new(NotifierService::new()), ObjectServiceRegistry::new_shared());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let record = Slot::new(move |count: u64| sink.lock().push(count));
        let signal = notifier.signals().get::<u64>(SIGNAL_NOTIFIED).unwrap();
        let _connection = signal.connect(&record, Default::default());

        notifier.configure(ServiceConfig::new().bind(OBJECT, object.clone())).unwrap();
        notifier.start().unwrap();
        object.notify_modified();
        object.notify_modified();
        notifier.stop().unwrap();
        object.notify_modified();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
