//! The runtime aggregate
//!
//! Owns exactly one of each shared piece: the module registry with its
//! plugin and service factories, the data factory, the object-service
//! registry, the buffer manager and the worker pool.

use std::path::Path;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sight_com::ActiveWorkers;
use sight_data::memory::BufferManager;
use sight_data::{Data, Object};
use sight_runtime::{DiscoveryReport, ExecutableFactory, Linkage, ModuleDescriptor, ModuleError, ModuleRegistry, Plugin};
use sight_service::{ObjectServiceRegistry, Service, ServiceHandle};

use crate::app::{AppConfig, AppConfigManager};
use crate::error::{Error, Result};
use crate::services;
use crate::settings::Settings;

/// Factory of service executables
pub type ServiceFactory = ExecutableFactory<dyn Service>;

/// Factory of data kinds
pub type DataFactory = ExecutableFactory<dyn Data>;

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects the statically linked modules before the runtime is built.
#[derive(Default)]
pub struct RuntimeBuilder {
    settings: Settings,
    modules: Vec<ModuleDescriptor>,
    linkages: Vec<Linkage<dyn Service>>,
}

impl RuntimeBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a linked-in module and its code
    pub fn module(mut self, descriptor: ModuleDescriptor, linkage: Linkage<dyn Service>) -> Self {
        self.modules.push(descriptor);
        self.linkages.push(linkage);
        self
    }

    /// Add code for a module that will be discovered on disk
    pub fn link(mut self, linkage: Linkage<dyn Service>) -> Self {
        self.linkages.push(linkage);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let data = Arc::new(DataFactory::new("data"));
        let modules = ModuleRegistry::new(
            Arc::new(ServiceFactory::new("services")),
            Arc::new(ExecutableFactory::<dyn Plugin>::new("plugins")),
        );

        modules.add(services::descriptor());
        modules.link(services::linkage(Arc::clone(&data)));
        for descriptor in self.modules {
            if !modules.add(descriptor.clone()) {
                tracing::warn!(module = %descriptor.id, "Module already known, ignoring");
            }
        }
        for linkage in self.linkages {
            modules.link(linkage);
        }

        let memory_settings = &self.settings.memory;
        let memory = BufferManager::with_policy(
            memory_settings.policy.build(memory_settings.barrier_bytes),
            memory_settings.dump_dir.clone(),
        );

        let workers = ActiveWorkers::new();
        for name in &self.settings.workers {
            workers.get_or_spawn(name)?;
        }

        tracing::info!(
            modules = modules.modules().len(),
            workers = ?workers.names(),
            memory_policy = ?memory_settings.policy,
            "Runtime built"
        );

        Ok(Runtime {
            settings: self.settings,
            modules,
            data,
            registry: ObjectServiceRegistry::new_shared(),
            memory,
            workers,
            objects: DashMap::new(),
            apps: Mutex::new(Vec::new()),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

pub struct Runtime {
    settings: Settings,
    modules: ModuleRegistry<dyn Service>,
    data: Arc<DataFactory>,
    registry: Arc<ObjectServiceRegistry>,
    memory: BufferManager,
    workers: ActiveWorkers,
    /// Objects created with an explicit id
    objects: DashMap<String, Weak<Object>>,
    /// Launched apps, in launch order
    apps: Mutex<Vec<Arc<AppConfigManager>>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn modules(&self) -> &ModuleRegistry<dyn Service> {
        &self.modules
    }

    pub fn services(&self) -> &Arc<ServiceFactory> {
        self.modules.executables()
    }

    pub fn plugins(&self) -> &Arc<ExecutableFactory<dyn Plugin>> {
        self.modules.plugins()
    }

    pub fn data(&self) -> &Arc<DataFactory> {
        &self.data
    }

    pub fn registry(&self) -> &Arc<ObjectServiceRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &BufferManager {
        &self.memory
    }

    pub fn workers(&self) -> &ActiveWorkers {
        &self.workers
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Modules
    // ─────────────────────────────────────────────────────────────────────────

    /// Scan the configured module paths
    pub async fn discover(&self) -> DiscoveryReport {
        self.modules.discover(&self.settings.module_paths).await
    }

    /// Start the modules matching the autostart patterns.
    ///
    /// Returns the modules that failed; the others keep running.
    pub fn start_modules(&self) -> Vec<(String, ModuleError)> {
        let failures = self.modules.start_matching(&self.settings.autostart);
        for (module, error) in &failures {
            tracing::error!(module = %module, error = %error, "Module failed to start");
        }
        failures
    }

    pub fn start_module(&self, id: &str) -> Result<()> {
        Ok(self.modules.start(id)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Objects & services
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an object of a registered data kind. Its buffers are handed to
    /// the buffer manager.
    ///
    /// An explicit id must not name a live object, whether created here or
    /// published in the object-service registry.
    pub fn create_object(&self, class: &str, id: Option<&str>) -> Result<Arc<Object>> {
        let data = self.data.create(class)?;
        let object = match id {
            Some(id) => {
                if self.registry.object(id).is_some() {
                    return Err(Error::ObjectExists(id.to_string()));
                }
                let object = Object::with_id(id, data);
                match self.objects.entry(id.to_string()) {
                    Entry::Occupied(entry) if entry.get().strong_count() > 0 => {
                        return Err(Error::ObjectExists(id.to_string()));
                    }
                    Entry::Occupied(mut entry) => {
                        entry.insert(Arc::downgrade(&object));
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(Arc::downgrade(&object));
                    }
                }
                object
            }
            None => Object::from_boxed(data),
        };
        self.track_buffers(&object);
        tracing::debug!(object = %object.id(), class, "Object created");
        Ok(object)
    }

    /// Hand the buffers of `object` to the buffer manager. Already managed
    /// buffers are left alone.
    pub fn track_buffers(&self, object: &Object) {
        for buffer in object.buffers() {
            self.memory.register(&buffer);
        }
    }

    /// Create a service whose slots run on `worker`, or the default worker.
    pub fn create_service(&self, class: &str, id: Option<&str>, worker: Option<&str>) -> Result<ServiceHandle> {
        let service = self.services().create(class)?;
        let handle = match id {
            Some(id) => ServiceHandle::with_id(id, service, Arc::clone(&self.registry)),
            None => ServiceHandle::new(service, Arc::clone(&self.registry)),
        };
        let worker = match worker {
            Some(name) => self.workers.get_or_spawn(name)?,
            None => self.workers.default_worker()?,
        };
        tracing::debug!(service_id = %handle.id(), class, worker = %worker.name(), "Service created");
        handle.set_worker(worker);
        Ok(handle)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apps
    // ─────────────────────────────────────────────────────────────────────────

    /// Read an app configuration file and launch it
    pub async fn load_app(&self, path: impl AsRef<Path>) -> Result<Arc<AppConfigManager>> {
        let config = AppConfig::load(path).await?;
        self.launch_app(config)
    }

    pub fn launch_app(&self, config: AppConfig) -> Result<Arc<AppConfigManager>> {
        if self.app(&config.id).is_some() {
            return Err(Error::AppRunning(config.id));
        }
        let app = Arc::new(AppConfigManager::new(config));
        app.launch(self)?;
        self.apps.lock().push(Arc::clone(&app));
        Ok(app)
    }

    /// A running app
    pub fn app(&self, id: &str) -> Option<Arc<AppConfigManager>> {
        self.apps.lock().iter().find(|app| app.id() == id).cloned()
    }

    /// Stop and forget an app. Returns false if it was not running.
    pub fn stop_app(&self, id: &str) -> bool {
        let app = {
            let mut apps = self.apps.lock();
            match apps.iter().position(|app| app.id() == id) {
                Some(index) => apps.remove(index),
                None => return false,
            }
        };
        app.stop();
        true
    }

    /// Stop apps in reverse launch order, then every module and worker
    pub fn shutdown(&self) {
        let apps: Vec<_> = self.apps.lock().drain(..).collect();
        for app in apps.iter().rev() {
            app.stop();
        }
        self.modules.stop_all();
        self.workers.clear();
        tracing::info!("Runtime shut down");
    }
}
