//! Dumpable byte buffers.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;

use super::manager::{BufferManager, ManagerInner};
use super::{MappedBytes, MappedBytesMut, MemoryError, MemoryResult};

/// Identifier of a buffer, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);
static ACCESS_CLOCK: AtomicU64 = AtomicU64::new(1);

fn tick() -> u64 {
    ACCESS_CLOCK.fetch_add(1, Ordering::Relaxed)
}

enum Storage {
    Resident(Vec<u8>),
    Dumped { file: NamedTempFile, len: usize },
}

pub(crate) struct BufferInner {
    id: BufferId,
    storage: RwLock<Storage>,
    pins: AtomicUsize,
    last_access: AtomicU64,
    manager: RwLock<Weak<ManagerInner>>,
}

/// Snapshot of a buffer's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub id: BufferId,
    pub size: usize,
    pub dumped: bool,
    pub pins: usize,
    pub last_access: u64,
}

/// Shared handle to a byte buffer that can live in memory or on disk.
#[derive(Clone)]
pub struct Buffer {
    pub(crate) inner: Arc<BufferInner>,
}

impl Buffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
                storage: RwLock::new(Storage::Resident(bytes)),
                pins: AtomicUsize::new(0),
                last_access: AtomicU64::new(tick()),
                manager: RwLock::new(Weak::new()),
            }),
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Size in bytes, whether resident or dumped
    pub fn len(&self) -> usize {
        match &*self.inner.storage.read() {
            Storage::Resident(bytes) => bytes.len(),
            Storage::Dumped { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dumped(&self) -> bool {
        matches!(&*self.inner.storage.read(), Storage::Dumped { .. })
    }

    pub fn pin_count(&self) -> usize {
        self.inner.pins.load(Ordering::SeqCst)
    }

    pub fn last_access(&self) -> u64 {
        self.inner.last_access.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            id: self.id(),
            size: self.len(),
            dumped: self.is_dumped(),
            pins: self.pin_count(),
            last_access: self.last_access(),
        }
    }

    /// Copy the bytes into a new buffer, managed by the same manager as this
    /// one. Fails if the buffer is currently dumped.
    pub fn duplicate(&self) -> MemoryResult<Buffer> {
        let copy = Buffer::new(self.read()?.to_vec());
        if let Some(manager) = self.manager() {
            manager.register(&copy);
        }
        Ok(copy)
    }

    /// Whether two handles refer to the same buffer
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the bytes. Fails if the buffer is currently dumped.
    pub fn read(&self) -> MemoryResult<MappedBytes<'_>> {
        self.touch();
        RwLockReadGuard::try_map(self.inner.storage.read(), |storage| match storage {
            Storage::Resident(bytes) => Some(bytes.as_slice()),
            Storage::Dumped { .. } => None,
        })
        .map_err(|_| MemoryError::Dumped(self.id()))
    }

    /// Mutate the bytes. Fails if the buffer is currently dumped.
    pub fn write(&self) -> MemoryResult<MappedBytesMut<'_>> {
        self.touch();
        RwLockWriteGuard::try_map(self.inner.storage.write(), |storage| match storage {
            Storage::Resident(bytes) => Some(bytes),
            Storage::Dumped { .. } => None,
        })
        .map_err(|_| MemoryError::Dumped(self.id()))
    }

    /// Keep the buffer resident for the lifetime of the returned pin.
    ///
    /// A dumped buffer is restored first; this blocks for the duration of the
    /// read from disk.
    pub fn pin(&self) -> MemoryResult<BufferPin> {
        self.inner.pins.fetch_add(1, Ordering::SeqCst);
        let pin = BufferPin {
            buffer: self.clone(),
        };
        self.restore()?;
        self.touch();
        if let Some(manager) = self.manager() {
            manager.on_pinned(self);
        }
        Ok(pin)
    }

    /// Write the bytes to a temporary file and free the memory.
    ///
    /// Returns `Ok(false)` when the buffer was already dumped.
    pub(crate) fn dump_to(&self, dir: Option<&Path>) -> MemoryResult<bool> {
        let mut storage = self.inner.storage.write();
        if self.pin_count() > 0 {
            return Err(MemoryError::Pinned(self.id()));
        }
        let bytes = match &*storage {
            Storage::Resident(bytes) => bytes,
            Storage::Dumped { .. } => return Ok(false),
        };

        let mut file = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        let len = bytes.len();
        *storage = Storage::Dumped { file, len };
        tracing::debug!(buffer = %self.id(), bytes = len, "Buffer dumped");
        Ok(true)
    }

    /// Load a dumped buffer back into memory.
    ///
    /// Returns `Ok(false)` when the buffer was already resident.
    pub(crate) fn restore(&self) -> MemoryResult<bool> {
        if !self.is_dumped() {
            return Ok(false);
        }
        let mut storage = self.inner.storage.write();
        let (file, len) = match &mut *storage {
            Storage::Resident(_) => return Ok(false),
            Storage::Dumped { file, len } => (file, *len),
        };

        let mut bytes = Vec::with_capacity(len);
        let handle = file.as_file_mut();
        handle.seek(SeekFrom::Start(0))?;
        handle.read_to_end(&mut bytes)?;

        // Dropping the old storage removes the temporary file
        *storage = Storage::Resident(bytes);
        tracing::debug!(buffer = %self.id(), bytes = len, "Buffer restored");
        Ok(true)
    }

    pub(crate) fn attach(&self, manager: Weak<ManagerInner>) {
        *self.inner.manager.write() = manager;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.inner.manager.read().strong_count() > 0
    }

    fn manager(&self) -> Option<BufferManager> {
        self.inner
            .manager
            .read()
            .upgrade()
            .map(BufferManager::from_inner)
    }

    fn touch(&self) {
        self.inner.last_access.store(tick(), Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("dumped", &self.is_dumped())
            .field("pins", &self.pin_count())
            .finish()
    }
}

/// Keeps a buffer resident while alive.
#[derive(Debug)]
pub struct BufferPin {
    buffer: Buffer,
}

impl BufferPin {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

impl Drop for BufferPin {
    fn drop(&mut self) {
        if self.buffer.inner.pins.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(manager) = self.buffer.manager() {
                manager.on_unpinned(&self.buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Buffer::new(vec![1, 2, 3, 4]);

        assert!(buffer.dump_to(Some(dir.path())).unwrap());
        assert!(buffer.is_dumped());
        assert_eq!(buffer.len(), 4);
        assert!(matches!(buffer.read(), Err(MemoryError::Dumped(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let pin = buffer.pin().unwrap();
        assert!(!buffer.is_dumped());
        assert_eq!(&*buffer.read().unwrap(), &[1, 2, 3, 4]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        drop(pin);
    }

    #[test]
    fn test_pinned_buffer_refuses_dump() {
        let buffer = Buffer::zeroed(16);
        let pin = buffer.pin().unwrap();

        assert!(matches!(buffer.dump_to(None), Err(MemoryError::Pinned(_))));
        drop(pin);
        assert_eq!(buffer.pin_count(), 0);
        assert!(buffer.dump_to(None).unwrap());
        assert!(!buffer.dump_to(None).unwrap());
    }

    #[test]
    fn test_write_is_visible_to_clones() {
        let buffer = Buffer::zeroed(2);
        let other = buffer.clone();
        buffer.write().unwrap()[1] = 7;
        assert_eq!(&*other.read().unwrap(), &[0, 7]);
        assert!(buffer.ptr_eq(&other));
    }
}
