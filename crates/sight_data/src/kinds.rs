//! Built-in data kinds.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::{downcast_source, CopyCache, Data};
use crate::error::DataResult;
use crate::memory::{Buffer, MappedBytes, MappedBytesMut};
use crate::object::Object;

macro_rules! scalar_data {
    ($(#[$meta:meta])* $name:ident, $inner:ty, $class:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub value: $inner,
        }

        impl $name {
            pub const CLASS: &'static str = $class;

            pub fn new(value: impl Into<$inner>) -> Self {
                Self { value: value.into() }
            }
        }

        impl Data for $name {
            fn class_name(&self) -> &'static str {
                Self::CLASS
            }

            fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()> {
                self.value = downcast_source(self, source)?.value.clone();
                Ok(())
            }

            fn deep_copy(&self, _cache: &mut CopyCache) -> DataResult<Box<dyn Data>> {
                Ok(Box::new(self.clone()))
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

scalar_data!(
    /// Signed integer
    Integer, i64, "sight::data::Integer"
);
scalar_data!(
    /// Double precision float
    Float, f64, "sight::data::Float"
);
scalar_data!(Boolean, bool, "sight::data::Boolean");
scalar_data!(
    /// UTF-8 text
    StringData, String, "sight::data::String"
);

// ─────────────────────────────────────────────────────────────────────────────
// Containers
// ─────────────────────────────────────────────────────────────────────────────

/// Named sub-objects
#[derive(Debug, Clone, Default)]
pub struct Composite {
    pub entries: BTreeMap<String, Arc<Object>>,
}

impl Composite {
    pub const CLASS: &'static str = "sight::data::Composite";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, object: Arc<Object>) -> Option<Arc<Object>> {
        self.entries.insert(key.into(), object)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Object>> {
        self.entries.get(key)
    }
}

impl Data for Composite {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()> {
        self.entries = downcast_source(self, source)?.entries.clone();
        Ok(())
    }

    fn deep_copy(&self, cache: &mut CopyCache) -> DataResult<Box<dyn Data>> {
        let mut entries = BTreeMap::new();
        for (key, object) in &self.entries {
            entries.insert(key.clone(), object.deep_copy(cache)?);
        }
        Ok(Box::new(Composite { entries }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Ordered sub-objects
#[derive(Debug, Clone, Default)]
pub struct Vector {
    pub items: Vec<Arc<Object>>,
}

impl Vector {
    pub const CLASS: &'static str = "sight::data::Vector";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Data for Vector {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()> {
        self.items = downcast_source(self, source)?.items.clone();
        Ok(())
    }

    fn deep_copy(&self, cache: &mut CopyCache) -> DataResult<Box<dyn Data>> {
        let items = self
            .items
            .iter()
            .map(|item| item.deep_copy(cache))
            .collect::<DataResult<Vec<_>>>()?;
        Ok(Box::new(Vector { items }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Array
// ─────────────────────────────────────────────────────────────────────────────

/// Raw byte array backed by a dumpable [`Buffer`].
///
/// The buffer is pinned whenever the owning object is locked, so the
/// accessors only fail when used outside a lock on a dumped buffer.
#[derive(Debug, Clone)]
pub struct Array {
    buffer: Buffer,
}

impl Default for Array {
    fn default() -> Self {
        Self::zeroed(0)
    }
}

impl Array {
    pub const CLASS: &'static str = "sight::data::Array";

    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            buffer: Buffer::new(bytes),
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            buffer: Buffer::zeroed(len),
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> DataResult<MappedBytes<'_>> {
        Ok(self.buffer.read()?)
    }

    pub fn bytes_mut(&mut self) -> DataResult<MappedBytesMut<'_>> {
        Ok(self.buffer.write()?)
    }

    /// Resize, zero-filling new bytes
    pub fn resize(&mut self, len: usize) -> DataResult<()> {
        self.buffer.write()?.resize(len, 0);
        Ok(())
    }
}

impl Data for Array {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    /// Shares the source buffer
    fn shallow_copy_from(&mut self, source: &dyn Data) -> DataResult<()> {
        self.buffer = downcast_source(self, source)?.buffer.clone();
        Ok(())
    }

    /// The copy's buffer joins the source buffer's manager
    fn deep_copy(&self, _cache: &mut CopyCache) -> DataResult<Box<dyn Data>> {
        Ok(Box::new(Array {
            buffer: self.buffer.duplicate()?,
        }))
    }

    fn buffers(&self) -> Vec<Buffer> {
        vec![self.buffer.clone()]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn make<T: Data + Default>() -> Box<dyn Data> {
    Box::new(T::default())
}

/// Constructors for every built-in kind, keyed by class name
pub fn builtin_kinds() -> [(&'static str, fn() -> Box<dyn Data>); 7] {
    [
        (Integer::CLASS, make::<Integer>),
        (Float::CLASS, make::<Float>),
        (Boolean::CLASS, make::<Boolean>),
        (StringData::CLASS, make::<StringData>),
        (Composite::CLASS, make::<Composite>),
        (Vector::CLASS, make::<Vector>),
        (Array::CLASS, make::<Array>),
    ]
}
