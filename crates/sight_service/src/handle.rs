//! Service Handle
//!
//! Drives a [`Service`] through its lifecycle:
//!
//! ```text
//! Unconfigured ──configure──► Configured ──start──► Started ──stop──► Stopped
//!                                  ▲                 │  ▲                │
//!                                  │          update │  │ swap           │
//!                                  │                 ▼  │                │
//!                                  │          Updating / Swapping        │
//!                                  └──────────── configure / start ──────┘
//! ```
//!
//! Transitions are serialized per service. A failed transition leaves the
//! state where it was, except a failed swap which stops the service.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use sight_com::{
    connect_erased, ConnectionSet, DispatchMode, Job, Signal, Signals, Slot, Slots, Worker,
};
use sight_data::Object;
use tokio::sync::oneshot;

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::keys::{Access, KeyDecl};
use crate::registry::ObjectServiceRegistry;
use crate::service::{
    Service, ServiceConfig, SIGNAL_STARTED, SIGNAL_STOPPED, SIGNAL_SWAPPED, SIGNAL_UPDATED,
    SLOT_START, SLOT_STOP, SLOT_SWAP_KEY, SLOT_UPDATE,
};
use crate::state::ServiceState;

pub(crate) struct ServiceInner {
    state: AtomicU8,
    service: Mutex<Box<dyn Service>>,
    /// Thread currently running a hook, to refuse re-entrant transitions
    hook_thread: Mutex<Option<ThreadId>>,
    context: ServiceContext,
    /// Bindings from `configure`, held until the next successful start
    pending: Mutex<Vec<(String, Arc<Object>)>>,
    connections: ConnectionSet,
    started: Signal<()>,
    updated: Signal<()>,
    swapped: Signal<String>,
    stopped: Signal<()>,
}

impl ServiceInner {
    fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if self.state().is_started() {
            tracing::warn!(service_id = %self.context.id(), "Service dropped while started");
            self.context.registry().unregister_service(self.context.id());
        }
    }
}

/// Exclusive access to the service implementation while a hook runs
struct HookGuard<'a> {
    service: MutexGuard<'a, Box<dyn Service>>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for HookGuard<'_> {
    type Target = dyn Service;

    fn deref(&self) -> &Self::Target {
        &**self.service
    }
}

impl DerefMut for HookGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.service
    }
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle owning a service and its lifecycle state.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<ServiceInner>,
}

impl ServiceHandle {
    /// Wrap a service under a generated id
    pub fn new(service: Box<dyn Service>, registry: Arc<ObjectServiceRegistry>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), service, registry)
    }

    pub fn with_id(
        id: impl Into<String>,
        service: Box<dyn Service>,
        registry: Arc<ObjectServiceRegistry>,
    ) -> Self {
        let id = id.into();
        let declared = service.keys();

        let inner = Arc::new_cyclic(|weak| ServiceInner {
            state: AtomicU8::new(ServiceState::Unconfigured as u8),
            service: Mutex::new(service),
            hook_thread: Mutex::new(None),
            context: ServiceContext::new(id.clone(), declared, registry, weak.clone()),
            pending: Mutex::new(Vec::new()),
            connections: ConnectionSet::new(),
            started: Signal::named(format!("{id}.{SIGNAL_STARTED}")),
            updated: Signal::named(format!("{id}.{SIGNAL_UPDATED}")),
            swapped: Signal::named(format!("{id}.{SIGNAL_SWAPPED}")),
            stopped: Signal::named(format!("{id}.{SIGNAL_STOPPED}")),
        });

        let handle = Self { inner };
        handle.register_lifecycle();
        {
            let service = handle.inner.service.lock();
            service.register_signals(handle.inner.context.signals());
            service.register_slots(handle.inner.context.slots());
        }
        handle
    }

    pub(crate) fn from_inner(inner: Arc<ServiceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ServiceInner> {
        Arc::downgrade(&self.inner)
    }

    fn register_lifecycle(&self) {
        let ctx = &self.inner.context;
        let signals = ctx.signals();
        signals.add(SIGNAL_STARTED, self.inner.started.clone());
        signals.add(SIGNAL_UPDATED, self.inner.updated.clone());
        signals.add(SIGNAL_SWAPPED, self.inner.swapped.clone());
        signals.add(SIGNAL_STOPPED, self.inner.stopped.clone());

        let slots = ctx.slots();
        let weak = self.downgrade();
        slots.add(SLOT_START, lifecycle_slot(&weak, SLOT_START, |h, ()| h.start()));
        slots.add(SLOT_STOP, lifecycle_slot(&weak, SLOT_STOP, |h, ()| h.stop()));
        slots.add(SLOT_UPDATE, lifecycle_slot(&weak, SLOT_UPDATE, |h, ()| h.update()));
        slots.add(
            SLOT_SWAP_KEY,
            lifecycle_slot(&weak, SLOT_SWAP_KEY, |h, (key, object): (String, Arc<Object>)| {
                h.swap(&key, object)
            }),
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Service unique identifier
    pub fn id(&self) -> &str {
        self.inner.context.id()
    }

    /// Get the current service state
    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    pub fn context(&self) -> &ServiceContext {
        &self.inner.context
    }

    pub fn keys(&self) -> &[KeyDecl] {
        self.inner.context.keys()
    }

    pub fn signals(&self) -> &Signals {
        self.inner.context.signals()
    }

    pub fn slots(&self) -> &Slots {
        self.inner.context.slots()
    }

    pub fn started(&self) -> &Signal<()> {
        &self.inner.started
    }

    pub fn updated(&self) -> &Signal<()> {
        &self.inner.updated
    }

    pub fn swapped(&self) -> &Signal<String> {
        &self.inner.swapped
    }

    pub fn stopped(&self) -> &Signal<()> {
        &self.inner.stopped
    }

    /// Most recent job started by the service
    pub fn current_job(&self) -> Option<Job> {
        self.inner.context.current_job()
    }

    /// Affine the service to a worker: its slots run there on queued dispatch
    pub fn set_worker(&self, worker: Arc<Worker>) {
        self.inner.context.set_worker(worker);
    }

    pub fn worker(&self) -> Option<Arc<Worker>> {
        self.inner.context.worker()
    }

    pub fn ptr_eq(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn invalid_state(&self, operation: &'static str) -> ServiceError {
        ServiceError::InvalidState {
            service: self.id().to_string(),
            state: self.state(),
            operation,
        }
    }

    fn lock_service(&self, operation: &'static str) -> ServiceResult<HookGuard<'_>> {
        let current = thread::current().id();
        if *self.inner.hook_thread.lock() == Some(current) {
            return Err(self.invalid_state(operation));
        }
        let service = self.inner.service.lock();
        *self.inner.hook_thread.lock() = Some(current);
        Ok(HookGuard {
            service,
            owner: &self.inner.hook_thread,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and store the configuration, then call `configuring()`.
    ///
    /// Allowed when unconfigured or stopped. On failure nothing changes.
    pub fn configure(&self, config: ServiceConfig) -> ServiceResult<()> {
        let mut service = self.lock_service("configure")?;
        if !self.state().can_configure() {
            return Err(self.invalid_state("configure"));
        }
        let ctx = &self.inner.context;
        let configuration_error = |message: String| ServiceError::Configuration {
            service: self.id().to_string(),
            message,
        };

        if !(config.params.is_object() || config.params.is_null()) {
            return Err(configuration_error("parameters must be a table".to_string()));
        }
        let mut seen = HashSet::new();
        for (key, _) in &config.bindings {
            let decl = ctx
                .declaration(key)
                .ok_or_else(|| configuration_error(format!("unknown key '{key}'")))?;
            if decl.access == Access::Output {
                return Err(configuration_error(format!("output key '{key}' cannot be bound")));
            }
            if !seen.insert(key.as_str()) {
                return Err(configuration_error(format!("key '{key}' is bound twice")));
            }
        }

        let previous = ctx.params();
        ctx.set_params(config.params);
        if let Err(e) = service.configuring(ctx) {
            ctx.set_params(previous);
            return Err(configuration_error(e.to_string()));
        }

        for decl in ctx.keys().iter().filter(|d| d.access != Access::Output) {
            ctx.unbind(&decl.key);
        }
        for (key, object) in &config.bindings {
            ctx.bind(key, object);
        }
        *self.inner.pending.lock() = config.bindings;
        self.inner.set_state(ServiceState::Configured);

        tracing::debug!(service_id = %self.id(), "Service configured");
        Ok(())
    }

    /// Register the bound keys, connect the key signals and call `starting()`.
    ///
    /// Allowed when configured or stopped. On failure every registration and
    /// connection made so far is undone and the state is unchanged.
    pub fn start(&self) -> ServiceResult<()> {
        let mut service = self.lock_service("start")?;
        if !self.state().can_start() {
            return Err(self.invalid_state("start"));
        }
        let ctx = &self.inner.context;
        let registry = ctx.registry();

        let pending = self.inner.pending.lock().clone();
        let mut bound = Vec::new();
        for decl in ctx.keys().iter().filter(|d| d.access != Access::Output) {
            let object = pending
                .iter()
                .find(|(key, _)| *key == decl.key)
                .map(|(_, object)| Arc::clone(object))
                .or_else(|| ctx.object(&decl.key));
            match object {
                Some(object) => bound.push((decl.clone(), object)),
                None if decl.optional => {}
                None => {
                    return Err(ServiceError::MissingKey {
                        service: self.id().to_string(),
                        key: decl.key.clone(),
                    });
                }
            }
        }

        for (decl, object) in &bound {
            if let Err(e) = registry.register_key(object, &decl.key, self, decl.access) {
                registry.unregister_service(self.id());
                tracing::warn!(service_id = %self.id(), error = %e, "Service start refused");
                return Err(e.into());
            }
            ctx.bind(&decl.key, object);
        }

        if let Err(e) = self.connect_auto(&*service) {
            self.inner.connections.disconnect_all();
            registry.unregister_service(self.id());
            return Err(e);
        }

        if let Err(e) = service.starting(ctx) {
            self.inner.connections.disconnect_all();
            registry.unregister_service(self.id());
            tracing::error!(service_id = %self.id(), error = %e, "Service failed to start");
            return Err(ServiceError::Start {
                service: self.id().to_string(),
                message: e.to_string(),
            });
        }

        self.inner.pending.lock().clear();
        self.inner.set_state(ServiceState::Started);
        drop(service);

        tracing::info!(service_id = %self.id(), keys = bound.len(), "Service started");
        self.inner.started.emit(());
        Ok(())
    }

    /// Call `updating()`. Only allowed while started.
    ///
    /// A failing update is reported; the service stays started.
    pub fn update(&self) -> ServiceResult<()> {
        let mut service = self.lock_service("update")?;
        if self.state() != ServiceState::Started {
            return Err(self.invalid_state("update"));
        }

        self.inner.set_state(ServiceState::Updating);
        let result = service.updating(&self.inner.context);
        self.inner.set_state(ServiceState::Started);
        drop(service);

        match result {
            Ok(()) => {
                tracing::trace!(service_id = %self.id(), "Service updated");
                self.inner.updated.emit(());
                Ok(())
            }
            Err(e) => {
                tracing::error!(service_id = %self.id(), error = %e, "Service update failed");
                Err(ServiceError::Update {
                    service: self.id().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Rebind `key` to `object` without a stop/start cycle.
    ///
    /// If the new binding cannot be registered or `swapping()` fails, the
    /// service is stopped.
    pub fn swap(&self, key: &str, object: Arc<Object>) -> ServiceResult<()> {
        let mut service = self.lock_service("swap")?;
        if self.state() != ServiceState::Started {
            return Err(self.invalid_state("swap"));
        }
        let ctx = &self.inner.context;
        let registry = ctx.registry();

        let decl = ctx
            .declaration(key)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownKey {
                service: self.id().to_string(),
                key: key.to_string(),
            })?;
        if decl.access == Access::Output {
            return Err(ServiceError::NotAnOutput {
                service: self.id().to_string(),
                key: key.to_string(),
            });
        }

        self.inner.set_state(ServiceState::Swapping);
        self.inner.connections.disconnect_all();
        if let Some(previous) = ctx.object(key) {
            registry.unregister_key(previous.id(), key, self.id());
        }
        ctx.unbind(key);

        let result = registry
            .register_key(&object, key, self, decl.access)
            .map_err(|e| e.to_string())
            .and_then(|()| {
                ctx.bind(key, &object);
                service.swapping(ctx, key).map_err(|e| e.to_string())
            })
            .and_then(|()| self.connect_auto(&*service).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                self.inner.set_state(ServiceState::Started);
                drop(service);
                tracing::info!(service_id = %self.id(), key, object = %object.id(), "Service swapped");
                self.inner.swapped.emit(key.to_string());
                Ok(())
            }
            Err(message) => {
                tracing::error!(service_id = %self.id(), key, error = %message, "Swap failed, stopping service");
                self.shutdown(&mut *service);
                drop(service);
                self.inner.stopped.emit(());
                Err(ServiceError::Swap {
                    service: self.id().to_string(),
                    key: key.to_string(),
                    message,
                })
            }
        }
    }

    /// Stop the service and release its registrations.
    ///
    /// Errors raised by `stopping()` are logged, never returned. Stopping a
    /// stopped service is a no-op.
    pub fn stop(&self) -> ServiceResult<()> {
        let mut service = self.lock_service("stop")?;
        match self.state() {
            ServiceState::Started => self.shutdown(&mut *service),
            ServiceState::Configured => self.inner.set_state(ServiceState::Stopped),
            ServiceState::Stopped => return Ok(()),
            _ => return Err(self.invalid_state("stop")),
        }
        drop(service);

        tracing::info!(service_id = %self.id(), "Service stopped");
        self.inner.stopped.emit(());
        Ok(())
    }

    fn shutdown(&self, service: &mut dyn Service) {
        let ctx = &self.inner.context;
        if let Err(e) = service.stopping(ctx) {
            tracing::error!(service_id = %self.id(), error = %e, "Service stop failed");
        }
        self.inner.connections.disconnect_all();
        let removed = ctx.registry().unregister_service(self.id());
        tracing::debug!(service_id = %self.id(), removed, "Service registrations released");
        self.inner.set_state(ServiceState::Stopped);
    }

    fn connect_auto(&self, service: &dyn Service) -> ServiceResult<()> {
        let ctx = &self.inner.context;
        for wiring in service.auto_connections() {
            // Optional keys may be unbound
            let Some(object) = ctx.object(&wiring.key) else {
                continue;
            };
            let signal = object.signals().get_dyn(&wiring.signal)?;
            let slot = ctx.slots().get_dyn(&wiring.slot)?;
            let connection = connect_erased(&*signal, &*slot, DispatchMode::Queued)?;
            self.inner.connections.push(connection);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Async variants
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `start` on the service's worker
    pub fn start_async(&self) -> oneshot::Receiver<ServiceResult<()>> {
        self.post(|h| h.start())
    }

    /// Run `update` on the service's worker
    pub fn update_async(&self) -> oneshot::Receiver<ServiceResult<()>> {
        self.post(|h| h.update())
    }

    /// Run `stop` on the service's worker
    pub fn stop_async(&self) -> oneshot::Receiver<ServiceResult<()>> {
        self.post(|h| h.stop())
    }

    /// Run `swap` on the service's worker
    pub fn swap_async(&self, key: impl Into<String>, object: Arc<Object>) -> oneshot::Receiver<ServiceResult<()>> {
        let key = key.into();
        self.post(move |h| h.swap(&key, object))
    }

    /// Post a transition to the worker, or run it inline without one
    fn post<F>(&self, op: F) -> oneshot::Receiver<ServiceResult<()>>
    where
        F: FnOnce(&ServiceHandle) -> ServiceResult<()> + Send + 'static,
    {
        let handle = self.clone();
        if let Some(worker) = self.worker() {
            return match worker.post_task(move || op(&handle)) {
                Ok(rx) => rx,
                Err(e) => ready(Err(e.into())),
            };
        }
        ready(op(&handle))
    }
}

fn ready(result: ServiceResult<()>) -> oneshot::Receiver<ServiceResult<()>> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}

fn lifecycle_slot<A, F>(weak: &Weak<ServiceInner>, name: &str, op: F) -> Slot<A>
where
    A: Clone + Send + 'static,
    F: Fn(&ServiceHandle, A) -> ServiceResult<()> + Send + Sync + 'static,
{
    let weak = weak.clone();
    let name = name.to_string();
    Slot::named(name.clone(), move |args| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let handle = ServiceHandle::from_inner(inner);
        match op(&handle, args) {
            Ok(()) => {}
            Err(e @ ServiceError::InvalidState { .. }) => {
                tracing::debug!(service_id = %handle.id(), slot = %name, error = %e, "Lifecycle slot ignored");
            }
            Err(e) => {
                tracing::warn!(service_id = %handle.id(), slot = %name, error = %e, "Lifecycle slot failed");
            }
        }
    })
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service_id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HookError, RegistryError};
    use sight_com::ComError;
    use sight_data::{Integer, SIGNAL_MODIFIED};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Calls {
        configuring: AtomicUsize,
        starting: AtomicUsize,
        updating: AtomicUsize,
        swapping: AtomicUsize,
        stopping: AtomicUsize,
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    struct Scripted {
        keys: Vec<KeyDecl>,
        calls: Arc<Calls>,
        fail: Option<&'static str>,
        /// Key whose object is marked modified during `updating()`
        touch: Option<&'static str>,
    }

    impl Scripted {
        fn new(keys: Vec<KeyDecl>) -> (Self, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            let scripted = Self {
                keys,
                calls: Arc::clone(&calls),
                fail: None,
                touch: None,
            };
            (scripted, calls)
        }

        fn failing(mut self, hook: &'static str) -> Self {
            self.fail = Some(hook);
            self
        }

        fn check(&self, hook: &str) -> Result<(), HookError> {
            if self.fail == Some(hook) {
                return Err(format!("{hook} failed").into());
            }
            Ok(())
        }
    }

    impl Service for Scripted {
        fn keys(&self) -> Vec<KeyDecl> {
            self.keys.clone()
        }

        fn configuring(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
            self.calls.configuring.fetch_add(1, Ordering::SeqCst);
            self.check("configuring")
        }

        fn starting(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
            self.calls.starting.fetch_add(1, Ordering::SeqCst);
            self.check("starting")
        }

        fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
            self.calls.updating.fetch_add(1, Ordering::SeqCst);
            if let Some(key) = self.touch {
                ctx.require(key)?.notify_modified();
            }
            self.check("updating")
        }

        fn swapping(&mut self, _ctx: &ServiceContext, _key: &str) -> Result<(), HookError> {
            self.calls.swapping.fetch_add(1, Ordering::SeqCst);
            self.check("swapping")
        }

        fn stopping(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
            self.calls.stopping.fetch_add(1, Ordering::SeqCst);
            self.check("stopping")
        }
    }

    fn object(id: &str) -> Arc<Object> {
        Object::with_id(id, Box::new(Integer::new(0)))
    }

    fn target_service(
        registry: &Arc<ObjectServiceRegistry>,
        id: &str,
        x: &Arc<Object>,
    ) -> (ServiceHandle, Arc<Calls>) {
        let (scripted, calls) = Scripted::new(vec![KeyDecl::inout("target")]);
        let handle = ServiceHandle::with_id(id, Box::new(scripted), Arc::clone(registry));
        handle
            .configure(ServiceConfig::new().bind("target", Arc::clone(x)))
            .unwrap();
        (handle, calls)
    }

    #[test]
    fn test_full_lifecycle() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (handle, calls) = target_service(&registry, "svc", &x);
        assert_eq!(handle.state(), ServiceState::Configured);

        let started = Arc::new(AtomicUsize::new(0));
        let observer = {
            let started = Arc::clone(&started);
            Slot::new(move |()| {
                started.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _connection = handle.started().connect(&observer, DispatchMode::Direct);

        handle.start().unwrap();
        assert_eq!(handle.state(), ServiceState::Started);
        assert_eq!(count(&started), 1);
        assert_eq!(registry.find_services("X", "target").len(), 1);

        handle.update().unwrap();
        handle.update().unwrap();
        assert_eq!(count(&calls.updating), 2);

        handle.stop().unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert_eq!(count(&calls.stopping), 1);
        assert!(registry.is_empty());

        handle.start().unwrap();
        assert_eq!(handle.state(), ServiceState::Started);
        assert_eq!(count(&calls.starting), 2);
    }

    #[test]
    fn test_update_before_start_has_no_effect() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (handle, calls) = target_service(&registry, "svc", &x);
        let timestamp = x.timestamp();

        let err = handle.update().unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState { state: ServiceState::Configured, operation: "update", .. }
        ));
        assert_eq!(count(&calls.updating), 0);
        assert_eq!(x.timestamp(), timestamp);
        assert_eq!(handle.state(), ServiceState::Configured);
    }

    #[test]
    fn test_start_requires_configuration() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);

        assert!(matches!(handle.start(), Err(ServiceError::InvalidState { .. })));
        assert_eq!(count(&calls.starting), 0);
        assert_eq!(handle.state(), ServiceState::Unconfigured);
    }

    #[test]
    fn test_configuration_errors_leave_state_unchanged() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![KeyDecl::input("source"), KeyDecl::output("result")]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);

        let unknown = ServiceConfig::new().bind("nope", object("X"));
        assert!(matches!(handle.configure(unknown), Err(ServiceError::Configuration { .. })));

        let output = ServiceConfig::new().bind("result", object("X"));
        assert!(matches!(handle.configure(output), Err(ServiceError::Configuration { .. })));

        let twice = ServiceConfig::new()
            .bind("source", object("A"))
            .bind("source", object("B"));
        assert!(matches!(handle.configure(twice), Err(ServiceError::Configuration { .. })));

        let params = ServiceConfig {
            params: serde_json::json!([1, 2]),
            bindings: Vec::new(),
        };
        assert!(matches!(handle.configure(params), Err(ServiceError::Configuration { .. })));

        assert_eq!(count(&calls.configuring), 0);
        assert_eq!(handle.state(), ServiceState::Unconfigured);
    }

    #[test]
    fn test_configuring_failure() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, _calls) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted.failing("configuring")), registry);

        let err = handle
            .configure(ServiceConfig::new().with_param("threshold", 3))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Configuration { .. }));
        assert_eq!(handle.state(), ServiceState::Unconfigured);
        assert!(handle.context().get_config::<u32>("threshold").is_none());
    }

    #[test]
    fn test_missing_mandatory_key() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![KeyDecl::input("source"), KeyDecl::input("mask").optional()]);
        let handle = ServiceHandle::new(Box::new(scripted), Arc::clone(&registry));
        handle.configure(ServiceConfig::new()).unwrap();

        match handle.start() {
            Err(ServiceError::MissingKey { key, .. }) => assert_eq!(key, "source"),
            other => panic!("expected missing key, got {other:?}"),
        }
        assert_eq!(count(&calls.starting), 0);
        assert_eq!(handle.state(), ServiceState::Configured);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_second_inout_start_fails_first_unaffected() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (first, _) = target_service(&registry, "first", &x);
        let (second, second_calls) = target_service(&registry, "second", &x);

        first.start().unwrap();
        let err = second.start().unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Registry(RegistryError::KeyAlreadyBound { ref holder, .. }) if holder == "first"
        ));

        assert_eq!(first.state(), ServiceState::Started);
        assert_eq!(second.state(), ServiceState::Configured);
        assert_eq!(count(&second_calls.starting), 0);
        let holders: Vec<_> = registry
            .find_services("X", "target")
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(holders, vec!["first"]);
        first.update().unwrap();
    }

    #[test]
    fn test_second_input_start_succeeds() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let handles: Vec<_> = ["viewer", "histogram"]
            .into_iter()
            .map(|id| {
                let (scripted, _) = Scripted::new(vec![KeyDecl::input("image")]);
                let handle = ServiceHandle::with_id(id, Box::new(scripted), Arc::clone(&registry));
                handle
                    .configure(ServiceConfig::new().bind("image", Arc::clone(&x)))
                    .unwrap();
                handle.start().unwrap();
                handle
            })
            .collect();
        assert_eq!(registry.find_services("X", "image").len(), 2);
        assert!(handles.iter().all(ServiceHandle::is_started));
    }

    #[test]
    fn test_starting_failure_rolls_back() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (scripted, _) = Scripted::new(vec![KeyDecl::inout("target").auto_connect()]);
        let handle = ServiceHandle::new(Box::new(scripted.failing("starting")), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("target", Arc::clone(&x)))
            .unwrap();

        assert!(matches!(handle.start(), Err(ServiceError::Start { .. })));
        assert_eq!(handle.state(), ServiceState::Configured);
        assert!(registry.is_empty());
        assert_eq!(x.modified().num_connections(), 0);
    }

    #[test]
    fn test_update_failure_keeps_started() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, _) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted.failing("updating")), registry);
        handle.configure(ServiceConfig::new()).unwrap();
        handle.start().unwrap();

        assert!(matches!(handle.update(), Err(ServiceError::Update { .. })));
        assert_eq!(handle.state(), ServiceState::Started);
    }

    #[test]
    fn test_auto_connection_drives_update() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (scripted, calls) = Scripted::new(vec![KeyDecl::input("image").auto_connect()]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        handle
            .configure(ServiceConfig::new().bind("image", Arc::clone(&x)))
            .unwrap();
        handle.start().unwrap();

        x.notify_modified();
        assert_eq!(count(&calls.updating), 1);

        handle.stop().unwrap();
        x.notify_modified();
        assert_eq!(count(&calls.updating), 1);
        assert_eq!(x.modified().num_connections(), 0);
    }

    #[test]
    fn test_reentrant_update_is_refused() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (mut scripted, calls) = Scripted::new(vec![KeyDecl::inout("target").auto_connect()]);
        scripted.touch = Some("target");
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        handle
            .configure(ServiceConfig::new().bind("target", Arc::clone(&x)))
            .unwrap();
        handle.start().unwrap();

        handle.update().unwrap();
        assert_eq!(count(&calls.updating), 1);
        assert_eq!(handle.state(), ServiceState::Started);
    }

    #[test]
    fn test_swap_rebinds_key() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let y = object("Y");
        let (scripted, calls) = Scripted::new(vec![KeyDecl::input("image").auto_connect()]);
        let handle = ServiceHandle::with_id("viewer", Box::new(scripted), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("image", Arc::clone(&x)))
            .unwrap();
        handle.start().unwrap();

        let swapped = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let swapped = Arc::clone(&swapped);
            Slot::new(move |key: String| swapped.lock().push(key))
        };
        let _connection = handle.swapped().connect(&observer, DispatchMode::Direct);

        handle.swap("image", Arc::clone(&y)).unwrap();

        assert_eq!(handle.state(), ServiceState::Started);
        assert_eq!(count(&calls.swapping), 1);
        assert_eq!(*swapped.lock(), vec!["image"]);
        assert!(registry.find_services("X", "image").is_empty());
        assert_eq!(registry.find_services("Y", "image").len(), 1);
        assert_eq!(handle.context().object("image").unwrap().id(), "Y");

        x.notify_modified();
        assert_eq!(count(&calls.updating), 0);
        y.notify_modified();
        assert_eq!(count(&calls.updating), 1);
    }

    #[test]
    fn test_swap_failure_stops_service() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (scripted, calls) = Scripted::new(vec![KeyDecl::input("image")]);
        let handle = ServiceHandle::new(Box::new(scripted.failing("swapping")), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("image", Arc::clone(&x)))
            .unwrap();
        handle.start().unwrap();

        let err = handle.swap("image", object("Y")).unwrap_err();
        assert!(matches!(err, ServiceError::Swap { .. }));
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert_eq!(count(&calls.stopping), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_swap_unknown_key_keeps_started() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, _) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        handle.configure(ServiceConfig::new()).unwrap();
        handle.start().unwrap();

        assert!(matches!(
            handle.swap("image", object("Y")),
            Err(ServiceError::UnknownKey { .. })
        ));
        assert_eq!(handle.state(), ServiceState::Started);
    }

    #[test]
    fn test_stop_is_best_effort() {
        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let (scripted, calls) = Scripted::new(vec![KeyDecl::inout("target")]);
        let handle = ServiceHandle::new(Box::new(scripted.failing("stopping")), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("target", Arc::clone(&x)))
            .unwrap();
        handle.start().unwrap();

        let stopped = Arc::new(AtomicUsize::new(0));
        let observer = {
            let stopped = Arc::clone(&stopped);
            Slot::new(move |()| {
                stopped.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _connection = handle.stopped().connect(&observer, DispatchMode::Direct);

        handle.stop().unwrap();
        handle.stop().unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert_eq!(count(&calls.stopping), 1);
        assert_eq!(count(&stopped), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stop_configured_skips_stopping() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        assert!(matches!(handle.stop(), Err(ServiceError::InvalidState { .. })));

        handle.configure(ServiceConfig::new()).unwrap();
        handle.stop().unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert_eq!(count(&calls.stopping), 0);
    }

    #[test]
    fn test_output_publication() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, _) = Scripted::new(vec![KeyDecl::input("source"), KeyDecl::output("result")]);
        let handle = ServiceHandle::with_id("producer", Box::new(scripted), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("source", object("S")))
            .unwrap();
        handle.start().unwrap();

        let ctx = handle.context();
        ctx.set_output("result", Some(object("R"))).unwrap();
        assert_eq!(registry.access_of("R", "result", "producer"), Some(Access::Output));
        assert_eq!(ctx.object("result").unwrap().id(), "R");

        assert!(matches!(
            ctx.set_output("source", None),
            Err(ServiceError::NotAnOutput { .. })
        ));

        ctx.set_output("result", None).unwrap();
        assert!(registry.find_services("R", "result").is_empty());
        assert!(ctx.object("result").is_none());
    }

    #[test]
    fn test_refused_output_keeps_previous() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, _) = Scripted::new(vec![KeyDecl::output("result")]);
        let handle = ServiceHandle::with_id("producer", Box::new(scripted), Arc::clone(&registry));
        handle.configure(ServiceConfig::new()).unwrap();
        handle.start().unwrap();

        let ctx = handle.context();
        let first = object("R1");
        ctx.set_output("result", Some(Arc::clone(&first))).unwrap();

        // Another service already writes R2 under the same key
        let taken = object("R2");
        let (other, _) = target_service(&registry, "other", &object("unused"));
        registry
            .register_key(&taken, "result", &other, Access::Output)
            .unwrap();

        let err = ctx.set_output("result", Some(taken)).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Registry(RegistryError::KeyAlreadyBound { ref holder, .. }) if holder == "other"
        ));
        assert!(Arc::ptr_eq(&ctx.object("result").unwrap(), &first));
        assert_eq!(registry.access_of("R1", "result", "producer"), Some(Access::Output));

        // Republishing under the same id replaces the object in place
        let second = object("R1");
        ctx.set_output("result", Some(Arc::clone(&second))).unwrap();
        assert!(Arc::ptr_eq(&registry.object("R1").unwrap(), &second));
        assert_eq!(registry.find_services("R1", "result").len(), 1);
    }

    #[test]
    fn test_lifecycle_slots_by_name() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        handle.configure(ServiceConfig::new()).unwrap();

        let trigger: Signal<()> = Signal::new();
        let start = handle.slots().get_dyn(SLOT_START).unwrap();
        let update = handle.slots().get_dyn(SLOT_UPDATE).unwrap();
        let _a = connect_erased(&trigger, &*start, DispatchMode::Direct).unwrap();
        let _b = connect_erased(&trigger, &*update, DispatchMode::Direct).unwrap();

        trigger.emit(());
        assert_eq!(handle.state(), ServiceState::Started);
        assert_eq!(count(&calls.updating), 1);

        let swap = handle.slots().get_dyn(SLOT_SWAP_KEY).unwrap();
        assert!(matches!(
            connect_erased(&trigger, &*swap, DispatchMode::Direct),
            Err(ComError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_async_transitions_run_on_worker() {
        let registry = ObjectServiceRegistry::new_shared();
        let (scripted, calls) = Scripted::new(vec![]);
        let handle = ServiceHandle::new(Box::new(scripted), registry);
        handle.configure(ServiceConfig::new()).unwrap();

        let worker = Worker::spawn("svc-worker").unwrap();
        handle.set_worker(Arc::clone(&worker));

        handle.start_async().blocking_recv().unwrap().unwrap();
        handle.update_async().blocking_recv().unwrap().unwrap();
        assert_eq!(count(&calls.updating), 1);
        handle.stop_async().blocking_recv().unwrap().unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);

        worker.stop();
        assert!(matches!(
            handle.start_async().blocking_recv().unwrap(),
            Err(ServiceError::Com(ComError::WorkerStopped(_)))
        ));
    }

    #[test]
    fn test_auto_connection_needs_known_signal() {
        struct Wired;
        impl Service for Wired {
            fn keys(&self) -> Vec<KeyDecl> {
                vec![KeyDecl::input("image")]
            }
            fn auto_connections(&self) -> Vec<crate::keys::KeyConnection> {
                vec![crate::keys::KeyConnection::new("image", "no_such_signal", SLOT_UPDATE)]
            }
            fn starting(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
                Ok(())
            }
            fn updating(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
                Ok(())
            }
            fn stopping(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
                Ok(())
            }
        }

        let registry = ObjectServiceRegistry::new_shared();
        let x = object("X");
        let handle = ServiceHandle::new(Box::new(Wired), Arc::clone(&registry));
        handle
            .configure(ServiceConfig::new().bind("image", Arc::clone(&x)))
            .unwrap();

        assert!(matches!(
            handle.start(),
            Err(ServiceError::Com(ComError::SignalNotFound(_)))
        ));
        assert!(registry.is_empty());
        assert!(x.signals().contains(SIGNAL_MODIFIED));
    }
}
