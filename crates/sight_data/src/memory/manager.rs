//! Buffer manager
//!
//! Keeps track of every managed buffer and forwards usage events to the
//! active dump policy.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::buffer::{Buffer, BufferId, BufferInfo, BufferInner};
use super::policy::{DumpPolicy, NeverDump};
use super::MemoryResult;

pub(crate) struct ManagerInner {
    buffers: DashMap<BufferId, Weak<BufferInner>>,
    policy: RwLock<Arc<dyn DumpPolicy>>,
    dump_dir: Option<PathBuf>,
}

/// Memory usage summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of live managed buffers
    pub buffers: usize,
    /// Bytes held by every managed buffer
    pub managed_bytes: usize,
    /// Bytes currently on disk
    pub dumped_bytes: usize,
}

impl MemoryStats {
    /// Bytes currently in memory
    pub fn resident_bytes(&self) -> usize {
        self.managed_bytes - self.dumped_bytes
    }
}

/// Cloneable handle to the buffer manager.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<ManagerInner>,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferManager {
    /// Manager with the `NeverDump` policy, dumping to the system temp dir
    pub fn new() -> Self {
        Self::with_policy(Arc::new(NeverDump), None)
    }

    pub fn with_policy(policy: Arc<dyn DumpPolicy>, dump_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                buffers: DashMap::new(),
                policy: RwLock::new(policy),
                dump_dir,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Start managing a buffer. Registering twice is a no-op.
    pub fn register(&self, buffer: &Buffer) {
        if self.inner.buffers.contains_key(&buffer.id()) {
            return;
        }
        if buffer.is_attached() {
            tracing::warn!(buffer = %buffer.id(), "Buffer already managed elsewhere, moving it");
        }
        buffer.attach(Arc::downgrade(&self.inner));
        self.inner
            .buffers
            .insert(buffer.id(), Arc::downgrade(&buffer.inner));
        tracing::trace!(buffer = %buffer.id(), bytes = buffer.len(), "Buffer registered");
        self.policy().on_registered(self, buffer);
    }

    /// Stop managing a buffer, restoring it if it was dumped.
    pub fn unregister(&self, buffer: &Buffer) -> MemoryResult<()> {
        if self.inner.buffers.remove(&buffer.id()).is_none() {
            return Ok(());
        }
        buffer.attach(Weak::new());
        buffer.restore()?;
        Ok(())
    }

    /// Current dump policy
    pub fn policy(&self) -> Arc<dyn DumpPolicy> {
        Arc::clone(&*self.inner.policy.read())
    }

    /// Swap the dump policy and let the new one look at every buffer
    pub fn set_policy(&self, policy: Arc<dyn DumpPolicy>) {
        tracing::info!(policy = policy.name(), "Memory dump policy changed");
        *self.inner.policy.write() = policy;
        self.refresh();
    }

    /// Ask the policy to re-evaluate every buffer
    pub fn refresh(&self) {
        self.policy().refresh(self);
    }

    /// Dump a buffer now. Returns false when it was already dumped.
    pub fn dump(&self, buffer: &Buffer) -> MemoryResult<bool> {
        buffer.dump_to(self.inner.dump_dir.as_deref())
    }

    /// Restore a buffer now. Returns false when it was already resident.
    pub fn restore(&self, buffer: &Buffer) -> MemoryResult<bool> {
        buffer.restore()
    }

    /// Every live managed buffer. Dead entries are pruned.
    pub fn buffers(&self) -> Vec<Buffer> {
        let mut live = Vec::with_capacity(self.inner.buffers.len());
        self.inner.buffers.retain(|_, weak| match weak.upgrade() {
            Some(inner) => {
                live.push(Buffer { inner });
                true
            }
            None => false,
        });
        live.sort_by_key(Buffer::id);
        live
    }

    pub fn infos(&self) -> Vec<BufferInfo> {
        self.buffers().iter().map(Buffer::info).collect()
    }

    pub fn stats(&self) -> MemoryStats {
        self.buffers()
            .iter()
            .fold(MemoryStats::default(), |mut stats, buffer| {
                let size = buffer.len();
                stats.buffers += 1;
                stats.managed_bytes += size;
                if buffer.is_dumped() {
                    stats.dumped_bytes += size;
                }
                stats
            })
    }

    pub(crate) fn on_pinned(&self, buffer: &Buffer) {
        self.policy().on_pinned(self, buffer);
    }

    pub(crate) fn on_unpinned(&self, buffer: &Buffer) {
        self.policy().on_unpinned(self, buffer);
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("policy", &self.policy().name())
            .field("stats", &self.stats())
            .finish()
    }
}
