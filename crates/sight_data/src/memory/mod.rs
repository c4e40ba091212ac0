//! Buffer memory management
//!
//! Large data buffers can be dumped to secondary storage when they are not in
//! use and are restored transparently when a lock pins them again. When and
//! what to dump is decided by a pluggable [`DumpPolicy`].

mod buffer;
mod manager;
mod policy;

pub use buffer::{Buffer, BufferId, BufferInfo, BufferPin};
pub use manager::{BufferManager, MemoryStats};
pub use policy::{AlwaysDump, BarrierDump, DumpPolicy, NeverDump, PolicyKind};

use std::io;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

/// Borrowed bytes of a resident buffer
pub type MappedBytes<'a> = MappedRwLockReadGuard<'a, [u8]>;

/// Mutable bytes of a resident buffer
pub type MappedBytesMut<'a> = MappedRwLockWriteGuard<'a, Vec<u8>>;

/// Errors raised while dumping or restoring buffers.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Buffer {0} is pinned and cannot be dumped")]
    Pinned(BufferId),

    #[error("Buffer {0} is dumped; pin it before accessing its bytes")]
    Dumped(BufferId),

    #[error("Dump I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;
