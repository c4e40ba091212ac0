//! Executable Factory
//!
//! Maps a textual type key to a constructor for a polymorphic executable
//! (`dyn Plugin`, `dyn Service`, `dyn Data`, ...). Registration is expected
//! to happen during start-up; `create` may be called from any thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FactoryError, FactoryResult};

/// Shared constructor of a boxed executable
pub type Constructor<X> = Arc<dyn Fn() -> Box<X> + Send + Sync>;

/// String-keyed constructor registry.
pub struct ExecutableFactory<X: ?Sized> {
    name: &'static str,
    constructors: RwLock<BTreeMap<String, Constructor<X>>>,
}

impl<X: ?Sized> ExecutableFactory<X> {
    /// Create an empty factory. `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            constructors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a constructor.
    ///
    /// Fails with `DuplicateKey` if `key` is taken; the first registration
    /// stays in place.
    pub fn register<F>(&self, key: impl Into<String>, constructor: F) -> FactoryResult<()>
    where
        F: Fn() -> Box<X> + Send + Sync + 'static,
    {
        self.register_shared(key, Arc::new(constructor))
    }

    /// Register an already shared constructor
    pub fn register_shared(&self, key: impl Into<String>, constructor: Constructor<X>) -> FactoryResult<()> {
        let key = key.into();
        let mut constructors = self.constructors.write();
        if constructors.contains_key(&key) {
            tracing::warn!(factory = self.name, key = %key, "Duplicate factory key");
            return Err(FactoryError::DuplicateKey(key));
        }
        tracing::trace!(factory = self.name, key = %key, "Factory registered");
        constructors.insert(key, constructor);
        Ok(())
    }

    /// Construct a new executable
    pub fn create(&self, key: &str) -> FactoryResult<Box<X>> {
        let constructor = self
            .constructors
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| FactoryError::UnknownKey(key.to_string()))?;
        Ok(constructor())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.read().contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.constructors.read().keys().cloned().collect()
    }

    /// Remove a registration. Only used to roll back a failed module start.
    pub(crate) fn unregister(&self, key: &str) -> bool {
        self.constructors.write().remove(key).is_some()
    }
}

impl<X: ?Sized> std::fmt::Debug for ExecutableFactory<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableFactory")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}
