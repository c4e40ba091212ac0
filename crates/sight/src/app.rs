//! App configurations
//!
//! An app is an ordered stream of instructions read from a TOML file:
//!
//! ```toml
//! id = "viewer"
//!
//! [[instruction]]
//! kind = "object"
//! id = "image"
//! type = "sight::data::Array"
//!
//! [[instruction]]
//! kind = "service"
//! id = "filler"
//! type = "sight::service::Fill"
//! params = { value = 255, size = 16 }
//! bindings = { array = "image" }
//!
//! [[instruction]]
//! kind = "start"
//! id = "filler"
//! ```
//!
//! [`AppConfigManager`] executes the stream in phases: objects, services,
//! connections, starts, then updates. Stopping runs the phases in reverse.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sight_com::{connect_erased, ConnectionSet, DispatchMode};
use sight_data::{Boolean, Float, Integer, Object, StringData};
use sight_service::{ServiceConfig, ServiceHandle};

use crate::error::{Error, Result};
use crate::runtime::Runtime;

// ─────────────────────────────────────────────────────────────────────────────
// Instructions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub id: String,
    #[serde(default, rename = "instruction")]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Instruction {
    /// Create an object from the data factory
    Object {
        id: String,
        #[serde(rename = "type")]
        class: String,
        /// Initial value of a scalar kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    /// Create and configure a service
    Service {
        id: String,
        #[serde(rename = "type")]
        class: String,
        /// Worker the service slots run on; the default worker when unset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<String>,
        #[serde(default)]
        params: serde_json::Value,
        /// key → object id
        #[serde(default)]
        bindings: BTreeMap<String, String>,
    },
    /// Connect a signal to a slot
    Connect {
        signal: Endpoint,
        slot: Endpoint,
        #[serde(default)]
        mode: DispatchMode,
    },
    Start { id: String },
    Update { id: String },
}

/// A signal or slot of an object or service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub owner: String,
    pub name: String,
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::AppConfig(e.to_string()))
    }

    /// Read an app configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        tracing::info!(app = %config.id, file = %path.display(), instructions = config.instructions.len(), "App config loaded");
        Ok(config)
    }

    /// Check that ids are unique and every reference names something declared
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut services = HashSet::new();
        for instruction in &self.instructions {
            let id = match instruction {
                Instruction::Object { id, .. } => id,
                Instruction::Service { id, .. } => {
                    services.insert(id.as_str());
                    id
                }
                _ => continue,
            };
            if !ids.insert(id.as_str()) {
                return Err(Error::DuplicateId(id.clone()));
            }
        }

        for instruction in &self.instructions {
            match instruction {
                Instruction::Start { id } | Instruction::Update { id } if !services.contains(id.as_str()) => {
                    return Err(Error::UnknownService(id.clone()));
                }
                Instruction::Connect { signal, slot, .. } => {
                    if !ids.contains(signal.owner.as_str()) {
                        return Err(Error::UnknownEndpoint(signal.owner.clone()));
                    }
                    if !services.contains(slot.owner.as_str()) {
                        return Err(Error::UnknownEndpoint(slot.owner.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// A service that failed to start or update during launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    pub service: String,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
struct AppState {
    running: bool,
    objects: BTreeMap<String, Arc<Object>>,
    /// In creation order
    services: Vec<ServiceHandle>,
    connections: ConnectionSet,
    failures: Vec<LaunchFailure>,
}

/// Runs one app configuration against a runtime.
#[derive(Debug)]
pub struct AppConfigManager {
    config: AppConfig,
    state: Mutex<AppState>,
}

impl AppConfigManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AppState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Execute the instruction stream.
    ///
    /// Structural errors (unknown types, ids or endpoints, bad bindings or
    /// parameters) tear the app down and are returned. Services failing to
    /// start or update are logged and reported by [`failures`](Self::failures).
    pub fn launch(&self, runtime: &Runtime) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.running {
            return Err(Error::AppRunning(self.config.id.clone()));
        }
        self.config.validate()?;

        tracing::info!(app = %self.config.id, "Launching app");
        state.failures.clear();
        if let Err(e) = self.build(runtime, state) {
            tracing::error!(app = %self.config.id, error = %e, "App launch failed, tearing down");
            Self::teardown(state);
            return Err(e);
        }
        state.running = true;

        let mut started = HashSet::new();
        for instruction in &self.config.instructions {
            if let Instruction::Start { id } = instruction {
                let Some(service) = find_service(&state.services, id) else {
                    continue;
                };
                match service.start() {
                    Ok(()) => {
                        started.insert(id.clone());
                    }
                    Err(e) => {
                        tracing::error!(app = %self.config.id, service_id = %id, error = %e, "Service failed to start");
                        state.failures.push(LaunchFailure {
                            service: id.clone(),
                            operation: "start",
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        for instruction in &self.config.instructions {
            if let Instruction::Update { id } = instruction {
                if !started.contains(id) {
                    tracing::warn!(app = %self.config.id, service_id = %id, "Skipping update of a service that is not started");
                    continue;
                }
                let Some(service) = find_service(&state.services, id) else {
                    continue;
                };
                if let Err(e) = service.update() {
                    state.failures.push(LaunchFailure {
                        service: id.clone(),
                        operation: "update",
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            app = %self.config.id,
            objects = state.objects.len(),
            services = state.services.len(),
            failures = state.failures.len(),
            "App launched"
        );
        Ok(())
    }

    /// Objects, services and connections
    fn build(&self, runtime: &Runtime, state: &mut AppState) -> Result<()> {
        for instruction in &self.config.instructions {
            if let Instruction::Object { id, class, value } = instruction {
                let object = runtime.create_object(class, Some(id.as_str()))?;
                if let Some(value) = value {
                    set_value(&object, value)?;
                }
                state.objects.insert(id.clone(), object);
            }
        }

        for instruction in &self.config.instructions {
            if let Instruction::Service {
                id,
                class,
                worker,
                params,
                bindings,
            } = instruction
            {
                let service = runtime.create_service(class, Some(id.as_str()), worker.as_deref())?;
                state.services.push(service.clone());

                let mut config = ServiceConfig {
                    params: params.clone(),
                    bindings: Vec::with_capacity(bindings.len()),
                };
                for (key, object_id) in bindings {
                    let object = state
                        .objects
                        .get(object_id)
                        .cloned()
                        .or_else(|| runtime.registry().object(object_id))
                        .ok_or_else(|| Error::UnknownObject(object_id.clone()))?;
                    config.bindings.push((key.clone(), object));
                }
                service.configure(config)?;
            }
        }

        for instruction in &self.config.instructions {
            if let Instruction::Connect { signal, slot, mode } = instruction {
                let source = match state.objects.get(&signal.owner) {
                    Some(object) => object.signals().get_dyn(&signal.name)?,
                    None => find_service(&state.services, &signal.owner)
                        .ok_or_else(|| Error::UnknownEndpoint(signal.owner.clone()))?
                        .signals()
                        .get_dyn(&signal.name)?,
                };
                let target = find_service(&state.services, &slot.owner)
                    .ok_or_else(|| Error::UnknownEndpoint(slot.owner.clone()))?
                    .slots()
                    .get_dyn(&slot.name)?;
                state
                    .connections
                    .push(connect_erased(source.as_ref(), target.as_ref(), *mode)?);
            }
        }
        Ok(())
    }

    /// Stop services in reverse order, disconnect, release the objects
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        Self::teardown(&mut state);
        tracing::info!(app = %self.config.id, "App stopped");
    }

    fn teardown(state: &mut AppState) {
        for service in state.services.iter().rev() {
            if service.is_started() {
                if let Err(e) = service.stop() {
                    tracing::warn!(service_id = %service.id(), error = %e, "Service failed to stop");
                }
            }
        }
        state.connections.disconnect_all();
        state.services.clear();
        state.objects.clear();
        state.running = false;
    }

    pub fn object(&self, id: &str) -> Option<Arc<Object>> {
        self.state.lock().objects.get(id).cloned()
    }

    pub fn service(&self, id: &str) -> Option<ServiceHandle> {
        find_service(&self.state.lock().services, id).cloned()
    }

    /// Service ids in creation order
    pub fn services(&self) -> Vec<String> {
        self.state
            .lock()
            .services
            .iter()
            .map(|service| service.id().to_string())
            .collect()
    }

    /// Object ids, sorted
    pub fn objects(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Failures of the last launch
    pub fn failures(&self) -> Vec<LaunchFailure> {
        self.state.lock().failures.clone()
    }
}

impl Drop for AppConfigManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_service<'a>(services: &'a [ServiceHandle], id: &str) -> Option<&'a ServiceHandle> {
    services.iter().find(|service| service.id() == id)
}

/// Initialize a scalar object from a TOML value
fn set_value(object: &Object, value: &serde_json::Value) -> Result<()> {
    let invalid = || Error::AppConfig(format!("invalid value {value} for object '{}' of type {}", object.id(), object.class_name()));
    let mut lock = object.write_lock()?;
    if let Some(data) = lock.get_mut::<Integer>() {
        data.value = value.as_i64().ok_or_else(invalid)?;
    } else if let Some(data) = lock.get_mut::<Float>() {
        data.value = value.as_f64().ok_or_else(invalid)?;
    } else if let Some(data) = lock.get_mut::<Boolean>() {
        data.value = value.as_bool().ok_or_else(invalid)?;
    } else if let Some(data) = lock.get_mut::<StringData>() {
        data.value = value.as_str().ok_or_else(invalid)?.to_string();
    } else {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWER: &str = r#"
        id = "viewer"

        [[instruction]]
        kind = "object"
        id = "count"
        type = "sight::data::Integer"
        value = 3

        [[instruction]]
        kind = "service"
        id = "copy"
        type = "sight::service::Copy"
        bindings = { source = "count" }

        [[instruction]]
        kind = "connect"
        signal = { owner = "count", name = "modified" }
        slot = { owner = "copy", name = "update" }
        mode = "queued"

        [[instruction]]
        kind = "start"
        id = "copy"
    "#;

    #[test]
    fn test_parse_instruction_stream() {
        let config = AppConfig::parse(VIEWER).unwrap();
        assert_eq!(config.id, "viewer");
        assert_eq!(config.instructions.len(), 4);
        assert_eq!(
            config.instructions[0],
            Instruction::Object {
                id: "count".to_string(),
                class: "sight::data::Integer".to_string(),
                value: Some(serde_json::json!(3)),
            }
        );
        match &config.instructions[1] {
            Instruction::Service { worker, params, bindings, .. } => {
                assert!(worker.is_none());
                assert!(params.is_null());
                assert_eq!(bindings["source"], "count");
            }
            other => panic!("unexpected instruction {other:?}"),
        }
        assert!(matches!(
            &config.instructions[2],
            Instruction::Connect { mode: DispatchMode::Queued, .. }
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = AppConfig::parse("id = \"x\"\n[[instruction]]\nkind = \"explode\"\n").unwrap_err();
        assert!(matches!(err, Error::AppConfig(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let config = AppConfig {
            id: "dup".to_string(),
            instructions: vec![
                Instruction::Object {
                    id: "a".to_string(),
                    class: Integer::CLASS.to_string(),
                    value: None,
                },
                Instruction::Service {
                    id: "a".to_string(),
                    class: "sight::service::Copy".to_string(),
                    worker: None,
                    params: serde_json::Value::Null,
                    bindings: BTreeMap::new(),
                },
            ],
        };
        assert!(matches!(config.validate(), Err(Error::DuplicateId(id)) if id == "a"));
    }

    #[test]
    fn test_validate_rejects_unknown_references() {
        let start = AppConfig {
            id: "app".to_string(),
            instructions: vec![Instruction::Start { id: "ghost".to_string() }],
        };
        assert!(matches!(start.validate(), Err(Error::UnknownService(_))));

        let connect = AppConfig {
            id: "app".to_string(),
            instructions: vec![
                Instruction::Object {
                    id: "a".to_string(),
                    class: Integer::CLASS.to_string(),
                    value: None,
                },
                Instruction::Connect {
                    signal: Endpoint {
                        owner: "a".to_string(),
                        name: "modified".to_string(),
                    },
                    slot: Endpoint {
                        owner: "a".to_string(),
                        name: "update".to_string(),
                    },
                    mode: DispatchMode::Direct,
                },
            ],
        };
        assert!(matches!(connect.validate(), Err(Error::UnknownEndpoint(owner)) if owner == "a"));
    }

    #[test]
    fn test_set_value_checks_the_kind() {
        let object = Object::new(Integer::default());
        set_value(&object, &serde_json::json!(42)).unwrap();
        assert_eq!(object.read_lock().unwrap().get::<Integer>().unwrap().value, 42);
        assert!(set_value(&object, &serde_json::json!("text")).is_err());

        let text = Object::new(StringData::default());
        set_value(&text, &serde_json::json!("hello")).unwrap();
        assert_eq!(text.read_lock().unwrap().get::<StringData>().unwrap().value, "hello");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = AppConfig::load("/definitely/not/app.toml").await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
