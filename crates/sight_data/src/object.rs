//! Objects
//!
//! An object is the shared data entity services work on: an identity, a
//! payload implementing [`Data`], named sub-object fields and a signal table.
//! Objects are always handled through `Arc<Object>`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sight_com::{Signal, Signals};

use crate::data::{CopyCache, Data, Pending};
use crate::error::{DataError, DataResult};
use crate::lock::{ReadLock, WriteLock};
use crate::memory::Buffer;
use crate::mt::Gate;

/// Signal emitted after the payload changed
pub const SIGNAL_MODIFIED: &str = "modified";
/// Signal emitted with the names of fields added or replaced
pub const SIGNAL_ADDED_FIELDS: &str = "added_fields";
/// Signal emitted with the names of removed fields
pub const SIGNAL_REMOVED_FIELDS: &str = "removed_fields";

pub struct Object {
    id: String,
    class_name: &'static str,
    payload: RwLock<Box<dyn Data>>,
    gate: Gate,
    fields: RwLock<BTreeMap<String, Arc<Object>>>,
    signals: Signals,
    modified: Signal<()>,
    added_fields: Signal<Vec<String>>,
    removed_fields: Signal<Vec<String>>,
    timestamp: AtomicU64,
}

impl Object {
    /// Wrap a payload in a new object with a generated id
    pub fn new(data: impl Data) -> Arc<Self> {
        Self::from_boxed(Box::new(data))
    }

    pub fn from_boxed(data: Box<dyn Data>) -> Arc<Self> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), data)
    }

    pub fn with_id(id: impl Into<String>, data: Box<dyn Data>) -> Arc<Self> {
        let class_name = data.class_name();
        Arc::new(Self::build(id.into(), class_name, data))
    }

    fn build(id: String, class_name: &'static str, payload: Box<dyn Data>) -> Self {
        let modified = Signal::named(format!("{id}.{SIGNAL_MODIFIED}"));
        let added_fields = Signal::named(format!("{id}.{SIGNAL_ADDED_FIELDS}"));
        let removed_fields = Signal::named(format!("{id}.{SIGNAL_REMOVED_FIELDS}"));

        let signals = Signals::new();
        signals.add(SIGNAL_MODIFIED, modified.clone());
        signals.add(SIGNAL_ADDED_FIELDS, added_fields.clone());
        signals.add(SIGNAL_REMOVED_FIELDS, removed_fields.clone());

        Self {
            id,
            class_name,
            payload: RwLock::new(payload),
            gate: Gate::new(),
            fields: RwLock::new(BTreeMap::new()),
            signals,
            modified,
            added_fields,
            removed_fields,
            timestamp: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Incremented on every [`Object::notify_modified`]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn modified(&self) -> &Signal<()> {
        &self.modified
    }

    pub fn added_fields(&self) -> &Signal<Vec<String>> {
        &self.added_fields
    }

    pub fn removed_fields(&self) -> &Signal<Vec<String>> {
        &self.removed_fields
    }

    /// Bump the timestamp and emit `modified`. Call it with no lock held.
    pub fn notify_modified(&self) {
        self.timestamp.fetch_add(1, Ordering::SeqCst);
        self.modified.emit(());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Locking
    // ─────────────────────────────────────────────────────────────────────────

    /// Shared access to the payload. Blocks while a writer holds the object,
    /// and while dumped buffers are read back from disk.
    pub fn read_lock(&self) -> DataResult<ReadLock<'_>> {
        ReadLock::acquire(self)
    }

    /// Exclusive access to the payload. Blocks until every reader and writer
    /// has left, and while dumped buffers are read back from disk.
    pub fn write_lock(&self) -> DataResult<WriteLock<'_>> {
        WriteLock::acquire(self)
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }

    pub(crate) fn payload(&self) -> &RwLock<Box<dyn Data>> {
        &self.payload
    }

    /// Buffers backing the payload, without pinning them
    pub fn buffers(&self) -> Vec<Buffer> {
        self.payload.read().buffers()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fields
    // ─────────────────────────────────────────────────────────────────────────

    pub fn field(&self, name: &str) -> Option<Arc<Object>> {
        self.fields.read().get(name).cloned()
    }

    /// Like [`Object::field`] but fails when the field is missing
    pub fn require_field(&self, name: &str) -> DataResult<Arc<Object>> {
        self.field(name)
            .ok_or_else(|| DataError::FieldNotFound(name.to_string()))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// Add or replace a field, then emit `added_fields`
    pub fn set_field(&self, name: impl Into<String>, value: Arc<Object>) {
        let name = name.into();
        self.fields.write().insert(name.clone(), value);
        self.added_fields.emit(vec![name]);
    }

    /// Remove a field, emitting `removed_fields` if it existed
    pub fn remove_field(&self, name: &str) -> Option<Arc<Object>> {
        let removed = self.fields.write().remove(name);
        if removed.is_some() {
            self.removed_fields.emit(vec![name.to_string()]);
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Copy
    // ─────────────────────────────────────────────────────────────────────────

    /// Make `self` share the content of `source`.
    ///
    /// Nested objects and fields are shared with `source`, not duplicated.
    /// Both objects are locked for the whole copy, always in address order, so
    /// two threads copying in opposite directions cannot deadlock.
    pub fn shallow_copy(&self, source: &Object) -> DataResult<()> {
        if std::ptr::eq(self, source) {
            return Ok(());
        }
        if self.class_name != source.class_name {
            return Err(DataError::TypeMismatch {
                expected: self.class_name.to_string(),
                found: source.class_name.to_string(),
            });
        }

        let (src, mut dst) = if std::ptr::from_ref(source) < std::ptr::from_ref(self) {
            let src = source.read_lock()?;
            (src, self.write_lock()?)
        } else {
            let dst = self.write_lock()?;
            (source.read_lock()?, dst)
        };
        dst.data_mut().shallow_copy_from(src.data())?;
        let fields = source.fields.read().clone();
        *self.fields.write() = fields;
        Ok(())
    }

    /// Duplicate this object and everything reachable from it.
    ///
    /// Objects already copied in the same pass (same `cache`) are reused, so
    /// shared sub-objects stay shared in the copy and cycles terminate.
    pub fn deep_copy(self: &Arc<Self>, cache: &mut CopyCache) -> DataResult<Arc<Object>> {
        if let Some(copy) = cache.get(self) {
            return Ok(copy);
        }

        let copy = Arc::new(Self::build(
            uuid::Uuid::new_v4().to_string(),
            self.class_name,
            Box::new(Pending),
        ));
        cache.insert(self, Arc::clone(&copy));

        let payload = {
            let lock = self.read_lock()?;
            lock.data().deep_copy(cache)?
        };
        *copy.payload.write() = payload;

        let fields = self.fields.read().clone();
        let mut copied = BTreeMap::new();
        for (name, field) in fields {
            copied.insert(name, field.deep_copy(cache)?);
        }
        *copy.fields.write() = copied;

        Ok(copy)
    }

    /// Deep copy with a fresh cache
    pub fn duplicate(self: &Arc<Self>) -> DataResult<Arc<Object>> {
        self.deep_copy(&mut CopyCache::new())
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class_name)
            .field("fields", &self.field_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Array, Composite, Integer, StringData, Vector};
    use sight_com::{DispatchMode, Slot};
    use std::sync::atomic::AtomicUsize;

    fn integer(value: i64) -> Arc<Object> {
        Object::new(Integer::new(value))
    }

    #[test]
    fn test_deep_copy_preserves_shared_references() {
        let shared = integer(7);
        let mut inner = Vector::new();
        inner.items.push(Arc::clone(&shared));
        inner.items.push(Arc::clone(&shared));

        let mut composite = Composite::new();
        composite.insert("a", Arc::clone(&shared));
        composite.insert("list", Object::new(inner));
        let root = Object::new(composite);

        let mut cache = CopyCache::new();
        let copy = root.deep_copy(&mut cache).unwrap();
        assert_ne!(copy.id(), root.id());

        let lock = copy.read_lock().unwrap();
        let copied = lock.get::<Composite>().unwrap();
        let a = Arc::clone(copied.get("a").unwrap());
        let list = Arc::clone(copied.get("list").unwrap());
        drop(lock);

        assert!(!Arc::ptr_eq(&a, &shared));
        let list_lock = list.read_lock().unwrap();
        let items = &list_lock.get::<Vector>().unwrap().items;
        assert!(Arc::ptr_eq(&items[0], &a));
        assert!(Arc::ptr_eq(&items[1], &a));
        drop(list_lock);

        // Copying again against the same cache yields the same copies
        let again = root.deep_copy(&mut cache).unwrap();
        assert!(Arc::ptr_eq(&again, &copy));
        assert!(Arc::ptr_eq(&shared.deep_copy(&mut cache).unwrap(), &a));
    }

    #[test]
    fn test_deep_copy_of_cycle_terminates() {
        let root = Object::new(Composite::new());
        let child = Object::new(Composite::new());
        child.set_field("parent", Arc::clone(&root));
        root.write_lock()
            .unwrap()
            .get_mut::<Composite>()
            .unwrap()
            .insert("child", Arc::clone(&child));

        let copy = root.duplicate().unwrap();
        let copied_child = Arc::clone(copy.read_lock().unwrap().get::<Composite>().unwrap().get("child").unwrap());
        assert!(Arc::ptr_eq(&copied_child.field("parent").unwrap(), &copy));

        // Break the cycles so the test does not leak
        copied_child.remove_field("parent");
        child.remove_field("parent");
    }

    #[test]
    fn test_deep_copy_duplicates_array_bytes() {
        let source = Object::new(Array::new(vec![1, 2, 3]));
        let copy = source.duplicate().unwrap();

        copy.write_lock()
            .unwrap()
            .get_mut::<Array>()
            .unwrap()
            .bytes_mut()
            .unwrap()[0] = 9;

        let lock = source.read_lock().unwrap();
        assert_eq!(&*lock.get::<Array>().unwrap().bytes().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_shallow_copy_checks_class() {
        let target = integer(1);
        let text = Object::new(StringData::new("hello"));
        assert!(matches!(
            target.shallow_copy(&text),
            Err(DataError::TypeMismatch { .. })
        ));

        target.shallow_copy(&integer(5)).unwrap();
        assert_eq!(target.read_lock().unwrap().get::<Integer>().unwrap().value, 5);
    }

    #[test]
    fn test_shallow_copy_shares_fields() {
        let source = integer(1);
        let note = Object::new(StringData::new("note"));
        source.set_field("comment", Arc::clone(&note));

        let target = integer(0);
        target.shallow_copy(&source).unwrap();
        assert!(Arc::ptr_eq(&target.field("comment").unwrap(), &note));
    }

    #[test]
    fn test_crossed_shallow_copies_complete() {
        let a = integer(1);
        let b = integer(2);
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let copiers: Vec<_> = [(Arc::clone(&a), Arc::clone(&b)), (Arc::clone(&b), Arc::clone(&a))]
            .into_iter()
            .cycle()
            .take(4)
            .map(|(target, source)| {
                let done = done_tx.clone();
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        target.shallow_copy(&source).unwrap();
                    }
                    let _ = done.send(());
                })
            })
            .collect();

        for _ in 0..copiers.len() {
            done_rx
                .recv_timeout(std::time::Duration::from_secs(10))
                .expect("crossed copies deadlocked");
        }
        for copier in copiers {
            copier.join().unwrap();
        }
        let a = a.read_lock().unwrap().get::<Integer>().unwrap().value;
        let b = b.read_lock().unwrap().get::<Integer>().unwrap().value;
        assert_eq!(a, b);
    }

    #[test]
    fn test_field_signals() {
        let object = integer(0);
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let on_added = {
            let added = Arc::clone(&added);
            Slot::new(move |names: Vec<String>| {
                added.fetch_add(names.len(), Ordering::SeqCst);
            })
        };
        let on_removed = {
            let removed = Arc::clone(&removed);
            Slot::new(move |names: Vec<String>| {
                removed.fetch_add(names.len(), Ordering::SeqCst);
            })
        };
        object.added_fields().connect(&on_added, DispatchMode::Direct);
        object.removed_fields().connect(&on_removed, DispatchMode::Direct);

        object.set_field("x", integer(1));
        assert!(object.remove_field("x").is_some());
        assert!(object.remove_field("x").is_none());

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(matches!(object.require_field("x"), Err(DataError::FieldNotFound(_))));
    }

    #[test]
    fn test_signal_table_exposes_modified() {
        let object = integer(0);
        let hits = Arc::new(AtomicUsize::new(0));
        let slot = {
            let hits = Arc::clone(&hits);
            Slot::new(move |_: ()| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let modified = object.signals().get::<()>(SIGNAL_MODIFIED).unwrap();
        modified.connect(&slot, DispatchMode::Direct);

        object.notify_modified();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(object.timestamp(), 1);
    }
}
