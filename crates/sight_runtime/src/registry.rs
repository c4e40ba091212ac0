//! Module Registry
//!
//! Owns every known module, resolves their requirements and drives their
//! start/stop transitions. Modules contribute code through a [`Linkage`]
//! declared up front; its executables become visible in the shared factory
//! when the module starts. Plugin hooks run without the registry lock held,
//! so a plugin may query the registry or start other modules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use wildmatch::WildMatch;

use crate::descriptor::ModuleDescriptor;
use crate::discovery::{discover, DiscoveryReport};
use crate::error::{ModuleError, ModuleResult};
use crate::factory::{Constructor, ExecutableFactory};
use crate::plugin::{ModuleContext, Plugin};

// ─────────────────────────────────────────────────────────────────────────────
// Linkage
// ─────────────────────────────────────────────────────────────────────────────

/// Code contributed by a module: its plugin entry point and the executables
/// it registers.
pub struct Linkage<X: ?Sized> {
    module: String,
    plugin: Option<Constructor<dyn Plugin>>,
    executables: Vec<(String, Constructor<X>)>,
}

impl<X: ?Sized> Linkage<X> {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            plugin: None,
            executables: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Set the plugin entry point
    pub fn plugin<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.plugin = Some(Arc::new(constructor));
        self
    }

    /// Contribute an executable under `key`
    pub fn executable<F>(mut self, key: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<X> + Send + Sync + 'static,
    {
        self.executables.push((key.into(), Arc::new(constructor)));
        self
    }

    /// Keys of the contributed executables, in declaration order
    pub fn executable_keys(&self) -> Vec<&str> {
        self.executables.iter().map(|(key, _)| key.as_str()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Info
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of a module's state
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub descriptor: ModuleDescriptor,
    pub started_at: Option<DateTime<Utc>>,
    pub linked: bool,
}

impl ModuleInfo {
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }
}

struct ModuleEntry {
    descriptor: ModuleDescriptor,
    plugin: Option<Box<dyn Plugin>>,
    started_at: Option<DateTime<Utc>>,
    /// A start is in flight
    starting: bool,
    /// Executables were registered by a previous start
    registered: bool,
}

/// What a start needs once the registry lock is released
struct StartPlan<X: ?Sized> {
    executables: Vec<(String, Constructor<X>)>,
    plugin: Option<Constructor<dyn Plugin>>,
    plugin_key: Option<String>,
    linked: bool,
    context: ModuleContext,
}

struct Inner<X: ?Sized> {
    entries: BTreeMap<String, ModuleEntry>,
    linkages: HashMap<String, Linkage<X>>,
    start_order: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of modules contributing executables of type `X`.
pub struct ModuleRegistry<X: ?Sized> {
    executables: Arc<ExecutableFactory<X>>,
    plugins: Arc<ExecutableFactory<dyn Plugin>>,
    inner: Mutex<Inner<X>>,
}

impl<X: ?Sized> ModuleRegistry<X> {
    pub fn new(
        executables: Arc<ExecutableFactory<X>>,
        plugins: Arc<ExecutableFactory<dyn Plugin>>,
    ) -> Self {
        Self {
            executables,
            plugins,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                linkages: HashMap::new(),
                start_order: Vec::new(),
            }),
        }
    }

    /// Factory the linked executables are registered into
    pub fn executables(&self) -> &Arc<ExecutableFactory<X>> {
        &self.executables
    }

    /// Factory of plugin entry points named by descriptors
    pub fn plugins(&self) -> &Arc<ExecutableFactory<dyn Plugin>> {
        &self.plugins
    }

    /// Declare the code of a module. The module itself may be added before
    /// or after.
    pub fn link(&self, linkage: Linkage<X>) {
        let mut inner = self.inner.lock();
        if inner.linkages.contains_key(&linkage.module) {
            tracing::warn!(module = %linkage.module, "Module linked twice, keeping the first linkage");
            return;
        }
        tracing::debug!(
            module = %linkage.module,
            executables = linkage.executables.len(),
            "Module linked"
        );
        inner.linkages.insert(linkage.module.clone(), linkage);
    }

    /// Add a module. Returns false (and logs) if the id is already known.
    pub fn add(&self, descriptor: ModuleDescriptor) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&descriptor.id) {
            tracing::warn!(module = %descriptor.id, "Module already registered, ignoring");
            return false;
        }
        inner.entries.insert(
            descriptor.id.clone(),
            ModuleEntry {
                descriptor,
                plugin: None,
                started_at: None,
                starting: false,
                registered: false,
            },
        );
        true
    }

    /// Discover modules under `search_paths` and add them.
    ///
    /// The report lists what was found, including ids that were already
    /// known and therefore ignored, and every descriptor that was skipped.
    pub async fn discover(&self, search_paths: &[PathBuf]) -> DiscoveryReport {
        let report = discover(search_paths).await;
        for descriptor in &report.modules {
            self.add(descriptor.clone());
        }
        tracing::info!(
            found = report.modules.len(),
            skipped = report.errors.len(),
            "Module discovery finished"
        );
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Known module ids, sorted
    pub fn modules(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn descriptor(&self, id: &str) -> Option<ModuleDescriptor> {
        self.inner
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.descriptor.clone())
    }

    pub fn info(&self, id: &str) -> Option<ModuleInfo> {
        let inner = self.inner.lock();
        inner.entries.get(id).map(|entry| ModuleInfo {
            descriptor: entry.descriptor.clone(),
            started_at: entry.started_at,
            linked: inner.linkages.contains_key(id),
        })
    }

    pub fn is_started(&self, id: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(id)
            .is_some_and(|entry| entry.started_at.is_some())
    }

    /// Started modules in start order
    pub fn started(&self) -> Vec<String> {
        self.inner.lock().start_order.clone()
    }

    pub fn parameter(&self, module: &str, key: &str) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(module)
            .and_then(|entry| entry.descriptor.parameters.get(key).cloned())
    }

    /// Known module ids matching any of the wildcard patterns
    pub fn matching(&self, patterns: &[String]) -> Vec<String> {
        let patterns: Vec<_> = patterns.iter().map(|p| WildMatch::new(p)).collect();
        self.modules()
            .into_iter()
            .filter(|id| patterns.iter().any(|p| p.matches(id)))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Start / Stop
    // ─────────────────────────────────────────────────────────────────────────

    /// Order in which `requested` and their transitive requirements must
    /// start: requirements first, in declaration order.
    pub fn resolve_start_order(&self, requested: &[&str]) -> ModuleResult<Vec<String>> {
        resolve(&self.inner.lock().entries, requested)
    }

    /// Start a module and its requirements. Already started modules, and
    /// modules whose start is already in flight, are left alone.
    ///
    /// A module whose requirement failed is not started. Modules started
    /// before the failure stay started.
    pub fn start(&self, id: &str) -> ModuleResult<()> {
        let order = self.resolve_start_order(&[id])?;

        let mut failed: HashSet<String> = HashSet::new();
        let mut first_error = None;

        for module in order {
            let requirements = match self.inner.lock().entries.get(&module) {
                Some(entry) if entry.started_at.is_none() => entry.descriptor.requirements.clone(),
                _ => continue,
            };

            if let Some(requirement) = requirements.into_iter().find(|r| failed.contains(r)) {
                tracing::warn!(module = %module, requirement = %requirement, "Requirement failed, not starting");
                failed.insert(module.clone());
                first_error.get_or_insert(ModuleError::RequirementFailed { module, requirement });
                continue;
            }

            if let Err(e) = self.start_one(&module) {
                tracing::error!(module = %module, error = %e, "Module failed to start");
                failed.insert(module);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start every module matching one of `patterns`. Failures are logged and
    /// returned; they do not prevent unrelated modules from starting.
    pub fn start_matching(&self, patterns: &[String]) -> Vec<(String, ModuleError)> {
        let mut errors = Vec::new();
        for id in self.matching(patterns) {
            if let Err(e) = self.start(&id) {
                errors.push((id, e));
            }
        }
        errors
    }

    fn start_one(&self, id: &str) -> ModuleResult<()> {
        let plan = {
            let mut inner = self.inner.lock();
            let Inner { entries, linkages, .. } = &mut *inner;

            let entry = entries.get_mut(id).ok_or_else(|| unknown(id))?;
            if entry.started_at.is_some() || entry.starting {
                return Ok(());
            }
            if !entry.descriptor.enabled {
                return Err(ModuleError::Disabled(id.to_string()));
            }

            let linkage = linkages.get(id);
            entry.starting = true;
            StartPlan {
                executables: match linkage {
                    Some(linkage) if !entry.registered => linkage.executables.clone(),
                    _ => Vec::new(),
                },
                plugin: linkage.and_then(|l| l.plugin.clone()),
                plugin_key: entry.descriptor.plugin.clone(),
                linked: linkage.is_some(),
                context: ModuleContext {
                    id: entry.descriptor.id.clone(),
                    version: entry.descriptor.version.clone(),
                    parameters: entry.descriptor.parameters.clone(),
                    location: entry.descriptor.location.clone(),
                },
            }
        };

        let result = self.run_start(id, &plan);

        let mut inner = self.inner.lock();
        let Inner { entries, start_order, .. } = &mut *inner;
        let entry = entries.get_mut(id).ok_or_else(|| unknown(id))?;
        entry.starting = false;
        let plugin = result?;

        entry.plugin = plugin;
        entry.registered |= plan.linked;
        entry.started_at = Some(Utc::now());
        start_order.push(id.to_string());

        tracing::info!(
            module = %id,
            version = %entry.descriptor.version,
            executables = plan.executables.len(),
            "Module started"
        );
        Ok(())
    }

    /// Register the executables, then build and start the plugin. Undoes the
    /// registrations on failure.
    fn run_start(&self, id: &str, plan: &StartPlan<X>) -> ModuleResult<Option<Box<dyn Plugin>>> {
        let mut registered = Vec::new();
        for (key, constructor) in &plan.executables {
            if let Err(source) = self
                .executables
                .register_shared(key.clone(), Arc::clone(constructor))
            {
                self.rollback(&registered);
                return Err(ModuleError::Registration {
                    module: id.to_string(),
                    source,
                });
            }
            registered.push(key.clone());
        }

        let mut plugin = match (&plan.plugin, &plan.plugin_key) {
            (Some(constructor), _) => Some(constructor()),
            (None, Some(key)) => match self.plugins.create(key) {
                Ok(plugin) => Some(plugin),
                Err(source) => {
                    self.rollback(&registered);
                    return Err(ModuleError::PluginFactory {
                        module: id.to_string(),
                        source,
                    });
                }
            },
            (None, None) => None,
        };

        if let Some(plugin) = plugin.as_mut() {
            if let Err(e) = plugin.start(&plan.context) {
                self.rollback(&registered);
                return Err(ModuleError::Start {
                    module: id.to_string(),
                    message: e.to_string(),
                });
            }
        }
        Ok(plugin)
    }

    fn rollback(&self, keys: &[String]) {
        for key in keys {
            self.executables.unregister(key);
        }
    }

    /// Stop a module. Started modules that depend on it are stopped first.
    ///
    /// Stopping a module that is not started is a no-op. Plugin stop
    /// failures are logged, never returned.
    pub fn stop(&self, id: &str) -> ModuleResult<()> {
        let to_stop: Vec<String> = {
            let inner = self.inner.lock();
            let Some(entry) = inner.entries.get(id) else {
                return Err(unknown(id));
            };
            if entry.started_at.is_none() {
                return Ok(());
            }
            inner
                .start_order
                .iter()
                .rev()
                .filter(|module| module.as_str() == id || depends_on(&inner.entries, module, id))
                .cloned()
                .collect()
        };

        for module in to_stop {
            self.stop_one(&module);
        }
        Ok(())
    }

    /// Stop every started module in reverse start order
    pub fn stop_all(&self) {
        let order: Vec<String> = self.inner.lock().start_order.iter().rev().cloned().collect();
        for module in order {
            self.stop_one(&module);
        }
    }

    /// Mark a module stopped, then run its plugin's stop hook unlocked
    fn stop_one(&self, id: &str) {
        let plugin = {
            let mut inner = self.inner.lock();
            let Inner { entries, start_order, .. } = &mut *inner;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            if entry.started_at.take().is_none() {
                return;
            }
            start_order.retain(|module| module != id);
            entry.plugin.take()
        };

        if let Some(mut plugin) = plugin {
            if let Err(e) = plugin.stop() {
                tracing::error!(module = %id, error = %e, "Plugin failed to stop");
            }
        }
        tracing::info!(module = %id, "Module stopped");
    }
}

impl<X: ?Sized> std::fmt::Debug for ModuleRegistry<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules())
            .field("started", &self.started())
            .finish()
    }
}

fn unknown(id: &str) -> ModuleError {
    ModuleError::UnknownModule {
        module: id.to_string(),
        required_by: None,
    }
}

/// Whether `module` transitively requires `target`
fn depends_on(entries: &BTreeMap<String, ModuleEntry>, module: &str, target: &str) -> bool {
    let mut stack = vec![module.to_string()];
    let mut visited = HashSet::new();
    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(entry) = entries.get(&current) else {
            continue;
        };
        for requirement in &entry.descriptor.requirements {
            if requirement == target {
                return true;
            }
            stack.push(requirement.clone());
        }
    }
    false
}

fn resolve(entries: &BTreeMap<String, ModuleEntry>, requested: &[&str]) -> ModuleResult<Vec<String>> {
    let mut order = Vec::new();
    let mut done = HashSet::new();
    let mut path = Vec::new();
    for id in requested {
        visit(entries, id, None, &mut path, &mut done, &mut order)?;
    }
    Ok(order)
}

fn visit(
    entries: &BTreeMap<String, ModuleEntry>,
    id: &str,
    required_by: Option<&str>,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<String>,
) -> ModuleResult<()> {
    if done.contains(id) {
        return Ok(());
    }
    if let Some(position) = path.iter().position(|p| p == id) {
        let mut cycle = path[position..].to_vec();
        cycle.push(id.to_string());
        return Err(ModuleError::CyclicDependency(cycle));
    }
    let entry = entries.get(id).ok_or_else(|| ModuleError::UnknownModule {
        module: id.to_string(),
        required_by: required_by.map(str::to_string),
    })?;

    path.push(id.to_string());
    for requirement in &entry.descriptor.requirements {
        visit(entries, requirement, Some(id), path, done, order)?;
    }
    path.pop();

    done.insert(id.to_string());
    order.push(id.to_string());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
