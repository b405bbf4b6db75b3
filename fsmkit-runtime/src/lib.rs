//! # fsmkit-runtime
//!
//! Concurrent drivers for fsmkit machines.
//!
//! This crate provides:
//! - A mutex-guarded [`SynchronizedMachine`]
//! - A dedicated-thread [`MachineActor`] with configurable queue behavior
//! - A [`PoolActor`] that runs on a shared [`Executor`]
//! - Cancellable, awaitable [`TransitionFuture`]s
//! - A [`MachineRegistry`] of pool actors keyed by id
//! - YAML/env runtime configuration
//!
//! Every driver applies commands one at a time, in submission order, and
//! publishes a [`fsmkit_core::StampedState`] after each mutating command.

pub mod actor;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod handle;
pub mod pool;
pub mod registry;
pub mod synchronized;

#[cfg(test)]
pub(crate) mod testing;

pub use actor::MachineActor;
pub use command::{Command, Published, Reply};
pub use config::{ActorConfig, Config, ConfigError, PoolConfig, QueueKind, QueueMode};
pub use error::RuntimeError;
pub use executor::{rayon_pool, Executor, Job};
pub use future::{CommandResult, TransitionFuture};
pub use handle::MachineHandle;
pub use pool::PoolActor;
pub use registry::MachineRegistry;
pub use synchronized::SynchronizedMachine;
