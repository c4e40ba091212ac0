//! The `Data` trait implemented by every object payload, and the copy cache
//! used by deep copies.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DataError, DataResult};
use crate::memory::Buffer;
use crate::object::Object;

/// Payload of an [`Object`].
///
/// Implementations are plain Rust values; sharing and locking are handled by
/// the owning object.
pub trait Data: Any + Send + Sync + std::fmt::Debug {
    /// Class name, also the key the kind is registered under in factories
    fn class_name(&self) -> &'static str;

    /// Copy the direct content of `source` into `self`. Nested objects are
    /// shared, not duplicated.
    fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()>;

    /// Duplicate the content, deep-copying nested objects through `cache`.
    fn deep_copy(&self, cache: &mut CopyCache) -> DataResult<Box<dyn Data>>;

    /// Buffers backing this payload. They are pinned while the object is
    /// locked.
    fn buffers(&self) -> Vec<Buffer> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Downcast `source` to the concrete kind of a shallow copy target.
pub fn downcast_source<'a, T: Data>(
    target: &T,
    source: &'a dyn Data,
) -> DataResult<&'a T> {
    source
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| DataError::TypeMismatch {
            expected: target.class_name().to_string(),
            found: source.class_name().to_string(),
        })
}

/// Maps source objects to their copies during one deep-copy pass.
///
/// A sub-object reachable several times from the copied graph is copied
/// once; every reference to it in the copy points to that single copy.
#[derive(Default)]
pub struct CopyCache {
    copies: HashMap<usize, Arc<Object>>,
}

impl CopyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(source: &Arc<Object>) -> usize {
        Arc::as_ptr(source) as usize
    }

    /// Copy already made for `source` in this pass
    pub fn get(&self, source: &Arc<Object>) -> Option<Arc<Object>> {
        self.copies.get(&Self::key(source)).cloned()
    }

    pub fn insert(&mut self, source: &Arc<Object>, copy: Arc<Object>) {
        self.copies.insert(Self::key(source), copy);
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// Stand-in payload of an object whose deep copy is still in progress
#[derive(Debug)]
pub(crate) struct Pending;

impl Data for Pending {
    fn class_name(&self) -> &'static str {
        "sight::data::Pending"
    }

    fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()> {
        downcast_source(self, source).map(|_| ())
    }

    fn deep_copy(&self, _cache: &mut CopyCache) -> DataResult<Box<dyn Data>> {
        Ok(Box::new(Pending))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
