//! Service Context
//!
//! What a service sees of itself from inside its hooks: parameters, bound
//! objects, its signal and slot tables, and the registry to publish outputs.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use sight_com::{Job, Signals, Slots, Worker};
use sight_data::Object;

use crate::error::{ServiceError, ServiceResult};
use crate::handle::{ServiceHandle, ServiceInner};
use crate::keys::{Access, KeyDecl};
use crate::registry::ObjectServiceRegistry;

/// Context passed to service hooks
pub struct ServiceContext {
    id: String,
    declared: Vec<KeyDecl>,
    params: RwLock<serde_json::Value>,
    /// Services do not keep their objects alive; the registry does
    bindings: RwLock<BTreeMap<String, Weak<Object>>>,
    registry: Arc<ObjectServiceRegistry>,
    signals: Signals,
    slots: Slots,
    worker: RwLock<Option<Arc<Worker>>>,
    job: RwLock<Option<Job>>,
    service: Weak<ServiceInner>,
}

impl ServiceContext {
    pub(crate) fn new(
        id: String,
        declared: Vec<KeyDecl>,
        registry: Arc<ObjectServiceRegistry>,
        service: Weak<ServiceInner>,
    ) -> Self {
        Self {
            id,
            declared,
            params: RwLock::new(serde_json::Value::Null),
            bindings: RwLock::new(BTreeMap::new()),
            registry,
            signals: Signals::new(),
            slots: Slots::new(),
            worker: RwLock::new(None),
            job: RwLock::new(None),
            service,
        }
    }

    /// Service unique identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared keys
    pub fn keys(&self) -> &[KeyDecl] {
        &self.declared
    }

    pub fn declaration(&self, key: &str) -> Option<&KeyDecl> {
        self.declared.iter().find(|decl| decl.key == key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────────────────

    pub fn params(&self) -> serde_json::Value {
        self.params.read().clone()
    }

    /// Get a parameter as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params
            .read()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_config_string(&self, key: &str) -> Option<String> {
        self.params.read().get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn get_config_f64(&self, key: &str) -> Option<f64> {
        self.params.read().get(key).and_then(|v| v.as_f64())
    }

    pub fn get_config_bool(&self, key: &str) -> Option<bool> {
        self.params.read().get(key).and_then(|v| v.as_bool())
    }

    pub(crate) fn set_params(&self, params: serde_json::Value) {
        *self.params.write() = params;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bound objects
    // ─────────────────────────────────────────────────────────────────────────

    /// Object currently bound to `key`, if it is still alive
    pub fn object(&self, key: &str) -> Option<Arc<Object>> {
        self.bindings.read().get(key).and_then(Weak::upgrade)
    }

    /// Like [`object`](Self::object) but fails with `MissingKey`
    pub fn require(&self, key: &str) -> ServiceResult<Arc<Object>> {
        self.object(key).ok_or_else(|| ServiceError::MissingKey {
            service: self.id.clone(),
            key: key.to_string(),
        })
    }

    /// Keys with a live bound object
    pub fn bound_keys(&self) -> Vec<String> {
        self.bindings
            .read()
            .iter()
            .filter(|(_, object)| object.strong_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn bind(&self, key: &str, object: &Arc<Object>) {
        self.bindings
            .write()
            .insert(key.to_string(), Arc::downgrade(object));
    }

    pub(crate) fn unbind(&self, key: &str) {
        self.bindings.write().remove(key);
    }

    /// Publish (`Some`) or withdraw (`None`) the object of an output key.
    ///
    /// Publishing registers the object in the object-service registry, which
    /// keeps it alive until it is withdrawn or the service stops. When the
    /// registration fails the previous output stays published.
    pub fn set_output(&self, key: &str, object: Option<Arc<Object>>) -> ServiceResult<()> {
        let decl = self.declaration(key).ok_or_else(|| ServiceError::UnknownKey {
            service: self.id.clone(),
            key: key.to_string(),
        })?;
        if decl.access != Access::Output {
            return Err(ServiceError::NotAnOutput {
                service: self.id.clone(),
                key: key.to_string(),
            });
        }

        let previous = self.object(key);
        let Some(object) = object else {
            if let Some(previous) = previous {
                self.registry.unregister_key(previous.id(), key, &self.id);
            }
            self.unbind(key);
            return Ok(());
        };

        let service = self.service.upgrade().ok_or_else(|| ServiceError::Gone {
            service: self.id.clone(),
        })?;
        self.registry
            .register_key(&object, key, &ServiceHandle::from_inner(service), Access::Output)?;
        // An object with the same id replaced the previous one in place
        if let Some(previous) = previous.filter(|previous| previous.id() != object.id()) {
            self.registry.unregister_key(previous.id(), key, &self.id);
        }
        self.bind(key, &object);
        tracing::debug!(service_id = %self.id, key, object = %object.id(), "Output published");
        Ok(())
    }

    pub fn registry(&self) -> &Arc<ObjectServiceRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Communication
    // ─────────────────────────────────────────────────────────────────────────

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// Worker the service's slots run on for queued dispatch
    pub fn worker(&self) -> Option<Arc<Worker>> {
        self.worker.read().clone()
    }

    pub(crate) fn set_worker(&self, worker: Arc<Worker>) {
        self.slots.set_worker(&worker);
        *self.worker.write() = Some(worker);
    }

    /// Start a job the outside world can follow and cancel.
    ///
    /// Replaces the previous job of this service.
    pub fn start_job(&self, name: impl Into<String>, total_work: u64) -> Job {
        let job = Job::new(name, total_work);
        job.run();
        *self.job.write() = Some(job.clone());
        job
    }

    /// Most recent job started by the service
    pub fn current_job(&self) -> Option<Job> {
        self.job.read().clone()
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("id", &self.id)
            .field("bound_keys", &self.bound_keys())
            .finish()
    }
}
