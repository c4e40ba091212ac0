//! Sight Data - shared objects and the locking discipline around them
//!
//! This crate provides:
//! - `Object`, the shared data entity with identity, fields and signals
//! - The `Data` trait and built-in kinds (`Integer`, `Composite`, `Array`, ...)
//! - Deep and shallow copy, with a `CopyCache` preserving shared references
//! - Scoped `ReadLock` / `WriteLock` tokens with in-place upgrade
//! - `memory`: dumpable buffers and the dump policies of the buffer manager

mod data;
mod error;
mod kinds;
mod lock;
pub mod memory;
pub mod mt;
mod object;

pub use data::*;
pub use error::*;
pub use kinds::*;
pub use lock::*;
pub use object::*;
