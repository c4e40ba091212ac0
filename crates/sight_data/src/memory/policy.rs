//! Dump policies
//!
//! A policy reacts to buffer events and decides which unpinned buffers go to
//! disk. Pinned buffers are never dumped whatever the policy says.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::buffer::Buffer;
use super::manager::BufferManager;
use super::MemoryError;

/// Decides when managed buffers are dumped.
pub trait DumpPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// A buffer started being managed
    fn on_registered(&self, _manager: &BufferManager, _buffer: &Buffer) {}

    /// A buffer was pinned (and restored if needed)
    fn on_pinned(&self, _manager: &BufferManager, _buffer: &Buffer) {}

    /// The last pin of a buffer was released
    fn on_unpinned(&self, _manager: &BufferManager, _buffer: &Buffer) {}

    /// Re-evaluate every buffer
    fn refresh(&self, _manager: &BufferManager) {}
}

fn try_dump(manager: &BufferManager, buffer: &Buffer) {
    match manager.dump(buffer) {
        Ok(_) | Err(MemoryError::Pinned(_)) => {}
        Err(e) => tracing::warn!(buffer = %buffer.id(), error = %e, "Failed to dump buffer"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

/// Keep everything in memory
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDump;

impl DumpPolicy for NeverDump {
    fn name(&self) -> &'static str {
        "never"
    }
}

/// Dump every buffer as soon as nobody holds it
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDump;

impl DumpPolicy for AlwaysDump {
    fn name(&self) -> &'static str {
        "always"
    }

    fn on_registered(&self, manager: &BufferManager, buffer: &Buffer) {
        if buffer.pin_count() == 0 {
            try_dump(manager, buffer);
        }
    }

    fn on_unpinned(&self, manager: &BufferManager, buffer: &Buffer) {
        try_dump(manager, buffer);
    }

    fn refresh(&self, manager: &BufferManager) {
        for buffer in manager.buffers() {
            if buffer.pin_count() == 0 {
                try_dump(manager, &buffer);
            }
        }
    }
}

/// Keep resident bytes under a barrier by dumping the least recently used
/// unpinned buffers.
#[derive(Debug, Clone, Copy)]
pub struct BarrierDump {
    barrier: usize,
}

impl BarrierDump {
    pub fn new(barrier: usize) -> Self {
        Self { barrier }
    }

    pub fn barrier(&self) -> usize {
        self.barrier
    }

    fn apply(&self, manager: &BufferManager) {
        let mut resident: usize = 0;
        let mut candidates = Vec::new();
        for buffer in manager.buffers() {
            if buffer.is_dumped() {
                continue;
            }
            resident += buffer.len();
            if buffer.pin_count() == 0 {
                candidates.push(buffer);
            }
        }
        if resident <= self.barrier {
            return;
        }

        candidates.sort_by_key(Buffer::last_access);
        for buffer in candidates {
            if resident <= self.barrier {
                break;
            }
            let size = buffer.len();
            if let Ok(true) = manager.dump(&buffer) {
                resident = resident.saturating_sub(size);
            }
        }

        if resident > self.barrier {
            tracing::debug!(
                resident,
                barrier = self.barrier,
                "Barrier exceeded by pinned buffers"
            );
        }
    }
}

impl DumpPolicy for BarrierDump {
    fn name(&self) -> &'static str {
        "barrier"
    }

    fn on_registered(&self, manager: &BufferManager, _buffer: &Buffer) {
        self.apply(manager);
    }

    fn on_pinned(&self, manager: &BufferManager, _buffer: &Buffer) {
        self.apply(manager);
    }

    fn on_unpinned(&self, manager: &BufferManager, _buffer: &Buffer) {
        self.apply(manager);
    }

    fn refresh(&self, manager: &BufferManager) {
        self.apply(manager);
    }
}

/// Policy selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Never,
    Always,
    Barrier,
}

impl PolicyKind {
    /// Instantiate the policy. `barrier` is only used by `Barrier`.
    pub fn build(self, barrier: usize) -> Arc<dyn DumpPolicy> {
        match self {
            PolicyKind::Never => Arc::new(NeverDump),
            PolicyKind::Always => Arc::new(AlwaysDump),
            PolicyKind::Barrier => Arc::new(BarrierDump::new(barrier)),
        }
    }
}
