//! Object-Service Registry
//!
//! Tracks which services use which object under which key. The registry owns
//! the objects it maps (services only hold them weakly) and enforces a single
//! writer per (object, key) at registration time. Actual concurrent access is
//! governed by the object lock tokens, not by this registry.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sight_com::Signal;
use sight_data::Object;

use crate::error::{RegistryError, RegistryResult};
use crate::handle::{ServiceHandle, ServiceInner};
use crate::keys::Access;

/// `(object_id, key, service_id)` carried by registry notifications
pub type Registration = (String, String, String);

struct Holder {
    service_id: String,
    service: Weak<ServiceInner>,
    access: Access,
}

impl Holder {
    fn is_alive(&self) -> bool {
        self.service.strong_count() > 0
    }
}

struct KeyEntry {
    object: Arc<Object>,
    /// Registration order
    holders: Vec<Holder>,
}

/// Live mapping (object, key) → services.
pub struct ObjectServiceRegistry {
    entries: DashMap<(String, String), KeyEntry>,
    registered: Signal<Registration>,
    unregistered: Signal<Registration>,
}

impl Default for ObjectServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            registered: Signal::named("osr.registered"),
            unregistered: Signal::named("osr.unregistered"),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Emitted after every registration
    pub fn registered(&self) -> &Signal<Registration> {
        &self.registered
    }

    /// Emitted after every removal
    pub fn unregistered(&self) -> &Signal<Registration> {
        &self.unregistered
    }

    /// Associate `service` with `object` under `key`.
    ///
    /// Writer access fails with `KeyAlreadyBound` when another live service
    /// already writes the same (object, key). A service registering the same
    /// pair again replaces its access. Object ids are unique among live
    /// entries: a different object carrying a registered id fails with
    /// `IdentifierConflict`, unless the only holder is this service under
    /// this key, in which case the object is replaced.
    pub fn register_key(
        &self,
        object: &Arc<Object>,
        key: &str,
        service: &ServiceHandle,
        access: Access,
    ) -> RegistryResult<()> {
        let service_id = service.id().to_string();
        let holder = Holder {
            service_id: service_id.clone(),
            service: service.downgrade(),
            access,
        };

        if self.is_taken_elsewhere(object, key) {
            return Err(RegistryError::IdentifierConflict {
                object: object.id().to_string(),
            });
        }

        match self.entries.entry((object.id().to_string(), key.to_string())) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.holders.retain(Holder::is_alive);

                if !Arc::ptr_eq(&entry.object, object) {
                    if entry.holders.iter().any(|h| h.service_id != service_id) {
                        return Err(RegistryError::IdentifierConflict {
                            object: object.id().to_string(),
                        });
                    }
                    entry.object = Arc::clone(object);
                }

                if access.is_writer() {
                    if let Some(writer) = entry
                        .holders
                        .iter()
                        .find(|h| h.access.is_writer() && h.service_id != service_id)
                    {
                        return Err(RegistryError::KeyAlreadyBound {
                            object: object.id().to_string(),
                            key: key.to_string(),
                            holder: writer.service_id.clone(),
                        });
                    }
                }

                match entry.holders.iter_mut().find(|h| h.service_id == service_id) {
                    Some(existing) => *existing = holder,
                    None => entry.holders.push(holder),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(KeyEntry {
                    object: Arc::clone(object),
                    holders: vec![holder],
                });
            }
        }

        tracing::debug!(object = %object.id(), key, service_id = %service_id, %access, "Key registered");
        self.registered
            .emit((object.id().to_string(), key.to_string(), service_id));
        Ok(())
    }

    /// Whether another live entry under a different key maps the id of
    /// `object` to a different object
    fn is_taken_elsewhere(&self, object: &Arc<Object>, key: &str) -> bool {
        self.entries.iter().any(|entry| {
            let (object_id, entry_key) = entry.key();
            object_id == object.id()
                && entry_key != key
                && !Arc::ptr_eq(&entry.object, object)
                && entry.holders.iter().any(Holder::is_alive)
        })
    }

    /// Remove an association. No-op when absent.
    pub fn unregister_key(&self, object_id: &str, key: &str, service_id: &str) -> bool {
        let map_key = (object_id.to_string(), key.to_string());
        let removed = match self.entries.get_mut(&map_key) {
            Some(mut entry) => {
                let before = entry.holders.len();
                entry.holders.retain(|h| h.service_id != service_id);
                before != entry.holders.len()
            }
            None => false,
        };
        // Drop the object once nobody uses it
        self.entries
            .remove_if(&map_key, |_, entry| entry.holders.iter().all(|h| !h.is_alive()));

        if removed {
            tracing::debug!(object = %object_id, key, service_id, "Key unregistered");
            self.unregistered.emit((
                object_id.to_string(),
                key.to_string(),
                service_id.to_string(),
            ));
        }
        removed
    }

    /// Remove every association of a service. Returns how many were removed.
    pub fn unregister_service(&self, service_id: &str) -> usize {
        let pairs: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|entry| entry.holders.iter().any(|h| h.service_id == service_id))
            .map(|entry| entry.key().clone())
            .collect();

        pairs
            .iter()
            .filter(|(object_id, key)| self.unregister_key(object_id, key, service_id))
            .count()
    }

    /// Live services bound to (object, key), in registration order
    pub fn find_services(&self, object_id: &str, key: &str) -> Vec<ServiceHandle> {
        self.entries
            .get(&(object_id.to_string(), key.to_string()))
            .map(|entry| {
                entry
                    .holders
                    .iter()
                    .filter_map(|h| h.service.upgrade())
                    .map(ServiceHandle::from_inner)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Access `service_id` holds on (object, key)
    pub fn access_of(&self, object_id: &str, key: &str, service_id: &str) -> Option<Access> {
        self.entries
            .get(&(object_id.to_string(), key.to_string()))
            .and_then(|entry| {
                entry
                    .holders
                    .iter()
                    .find(|h| h.service_id == service_id)
                    .map(|h| h.access)
            })
    }

    /// Keys an object is registered under, sorted
    pub fn keys_of(&self, object_id: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == object_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// `(key, object)` pairs a service is registered with, sorted by key
    pub fn objects_of(&self, service_id: &str) -> Vec<(String, Arc<Object>)> {
        let mut objects: Vec<(String, Arc<Object>)> = self
            .entries
            .iter()
            .filter(|entry| entry.holders.iter().any(|h| h.service_id == service_id))
            .map(|entry| (entry.key().1.clone(), Arc::clone(&entry.object)))
            .collect();
        objects.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));
        objects
    }

    /// A registered object by id
    pub fn object(&self, object_id: &str) -> Option<Arc<Object>> {
        self.entries
            .iter()
            .find(|entry| entry.key().0 == object_id && entry.holders.iter().any(Holder::is_alive))
            .map(|entry| Arc::clone(&entry.object))
    }

    /// Number of registered (object, key) pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ObjectServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectServiceRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
