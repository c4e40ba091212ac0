//! Scoped lock tokens over an object's payload.
//!
//! A token holds the object's gate, a guard on its payload, and a pin on every
//! buffer the payload exposes, so buffers stay resident while any token is
//! alive. Everything is released when the token is dropped.

use std::mem;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::data::Data;
use crate::error::DataResult;
use crate::memory::BufferPin;
use crate::mt::Gate;
use crate::object::Object;

/// Shared access to the gate, released on drop
struct SharedGate<'a>(&'a Gate);

impl<'a> SharedGate<'a> {
    fn acquire(gate: &'a Gate) -> Self {
        gate.acquire_read();
        Self(gate)
    }

    fn upgrade(self) -> Result<ExclusiveGate<'a>, Self> {
        if !self.0.upgrade() {
            return Err(self);
        }
        let gate = self.0;
        mem::forget(self);
        Ok(ExclusiveGate(gate))
    }
}

impl Drop for SharedGate<'_> {
    fn drop(&mut self) {
        self.0.release_read();
    }
}

/// Exclusive access to the gate, released on drop
struct ExclusiveGate<'a>(&'a Gate);

impl<'a> ExclusiveGate<'a> {
    fn acquire(gate: &'a Gate) -> Self {
        gate.acquire_write();
        Self(gate)
    }

    fn downgrade(self) -> SharedGate<'a> {
        let gate = self.0;
        mem::forget(self);
        gate.downgrade();
        SharedGate(gate)
    }
}

impl Drop for ExclusiveGate<'_> {
    fn drop(&mut self) {
        self.0.release_write();
    }
}

fn pin_buffers(data: &dyn Data) -> DataResult<Vec<BufferPin>> {
    let pins = data
        .buffers()
        .iter()
        .map(|buffer| buffer.pin())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pins)
}

// ─────────────────────────────────────────────────────────────────────────────
// Read Lock
// ─────────────────────────────────────────────────────────────────────────────

/// Shared read access to an object's payload.
pub struct ReadLock<'a> {
    // Field order is drop order: payload guard, pins, then the gate.
    guard: RwLockReadGuard<'a, Box<dyn Data>>,
    pins: Vec<BufferPin>,
    gate: SharedGate<'a>,
    object: &'a Object,
}

impl<'a> ReadLock<'a> {
    pub(crate) fn acquire(object: &'a Object) -> DataResult<Self> {
        let gate = SharedGate::acquire(object.gate());
        let guard = object.payload().read();
        let pins = pin_buffers(&**guard)?;
        Ok(Self {
            guard,
            pins,
            gate,
            object,
        })
    }

    pub fn object(&self) -> &'a Object {
        self.object
    }

    pub fn data(&self) -> &dyn Data {
        &**self.guard
    }

    /// Payload as a concrete kind
    pub fn get<T: Data>(&self) -> Option<&T> {
        self.data().as_any().downcast_ref::<T>()
    }

    /// Turn this read lock into a write lock without releasing access.
    ///
    /// Waits for every other reader to leave. Fails immediately with
    /// [`UpgradeConflict`] if another upgrade on the same object is already
    /// pending; the conflict hands the read lock back so the caller can drop
    /// it and retry.
    pub fn upgrade(self) -> Result<WriteLock<'a>, UpgradeConflict<'a>> {
        let ReadLock {
            guard,
            pins,
            gate,
            object,
        } = self;

        match gate.upgrade() {
            Ok(gate) => {
                drop(guard);
                let guard = object.payload().write();
                Ok(WriteLock {
                    guard,
                    pins,
                    gate,
                    object,
                })
            }
            Err(gate) => Err(UpgradeConflict {
                lock: ReadLock {
                    guard,
                    pins,
                    gate,
                    object,
                },
            }),
        }
    }
}

impl std::fmt::Debug for ReadLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadLock")
            .field("object", &self.object.id())
            .field("pins", &self.pins.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write Lock
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive write access to an object's payload.
///
/// Emit change notifications after dropping the lock; slots that lock the
/// object again would otherwise wait on it.
pub struct WriteLock<'a> {
    guard: RwLockWriteGuard<'a, Box<dyn Data>>,
    pins: Vec<BufferPin>,
    gate: ExclusiveGate<'a>,
    object: &'a Object,
}

impl<'a> WriteLock<'a> {
    pub(crate) fn acquire(object: &'a Object) -> DataResult<Self> {
        let gate = ExclusiveGate::acquire(object.gate());
        let guard = object.payload().write();
        let pins = pin_buffers(&**guard)?;
        Ok(Self {
            guard,
            pins,
            gate,
            object,
        })
    }

    pub fn object(&self) -> &'a Object {
        self.object
    }

    pub fn data(&self) -> &dyn Data {
        &**self.guard
    }

    pub fn data_mut(&mut self) -> &mut dyn Data {
        &mut **self.guard
    }

    pub fn get<T: Data>(&self) -> Option<&T> {
        self.data().as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: Data>(&mut self) -> Option<&mut T> {
        self.data_mut().as_any_mut().downcast_mut::<T>()
    }

    /// Give up exclusive access but keep reading, without letting a writer in
    pub fn downgrade(self) -> ReadLock<'a> {
        let WriteLock {
            guard,
            pins,
            gate,
            object,
        } = self;
        drop(guard);
        let gate = gate.downgrade();
        let guard = object.payload().read();
        ReadLock {
            guard,
            pins,
            gate,
            object,
        }
    }
}

impl std::fmt::Debug for WriteLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLock")
            .field("object", &self.object.id())
            .field("pins", &self.pins.len())
            .finish()
    }
}

/// Another upgrade is already pending on the object.
#[derive(Debug, thiserror::Error)]
#[error("Upgrade conflict on object {}", .lock.object().id())]
pub struct UpgradeConflict<'a> {
    lock: ReadLock<'a>,
}

impl<'a> UpgradeConflict<'a> {
    /// The read lock the failed upgrade started from
    pub fn into_read_lock(self) -> ReadLock<'a> {
        self.lock
    }
}
