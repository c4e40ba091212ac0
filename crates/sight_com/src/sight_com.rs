//! Sight Communication - signals, slots and workers
//!
//! This crate provides the communication layer shared by data objects and
//! services:
//! - Typed `Signal<A>` / `Slot<A>` pairs with direct and queued dispatch
//! - Name-keyed `Signals` / `Slots` tables for configuration-driven wiring
//! - `Worker` threads owning a serial task queue, and the `ActiveWorkers` pool
//! - `Job`, a cooperative progress/cancel object polled by long updates

mod connection;
mod error;
mod job;
mod signal;
mod slot;
mod tables;
mod worker;

pub use connection::*;
pub use error::*;
pub use job::*;
pub use signal::*;
pub use slot::*;
pub use tables::*;
pub use worker::*;
