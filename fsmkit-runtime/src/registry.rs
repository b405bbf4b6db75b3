//! Many machines sharing one executor.

use crate::command::Reply;
use crate::config::PoolConfig;
use crate::error::RuntimeError;
use crate::executor::{rayon_pool, Executor};
use crate::handle::MachineHandle;
use crate::pool::PoolActor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fsmkit_core::{Event, Machine, StampedState};
use std::sync::Arc;

/// Registry of pool actors keyed by machine id.
///
/// Every registered machine is driven by jobs on the same executor, so a
/// handful of threads can serve any number of independent machines.
pub struct MachineRegistry<E: Event> {
    machines: DashMap<String, Arc<PoolActor<E>>>,
    executor: Arc<dyn Executor>,
    backlog: Option<usize>,
}

impl<E: Event> MachineRegistry<E> {
    /// Creates a registry over a fresh rayon pool sized by `config`.
    pub fn new(config: &PoolConfig) -> Result<Self, RuntimeError> {
        let pool = rayon_pool(config.threads)?;
        Ok(Self::with_executor(pool, config))
    }

    /// Creates a registry over an existing executor.
    pub fn with_executor(executor: Arc<dyn Executor>, config: &PoolConfig) -> Self {
        Self {
            machines: DashMap::new(),
            executor,
            backlog: config.backlog(),
        }
    }

    /// Registers a machine, generating a uuid when `id` is `None`.
    ///
    /// Returns the id the machine is registered under.
    pub fn register(&self, id: Option<String>, machine: Machine<E>) -> Result<String, RuntimeError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        match self.machines.entry(id.clone()) {
            Entry::Occupied(_) => Err(RuntimeError::DuplicateMachine(id)),
            Entry::Vacant(slot) => {
                let actor = PoolActor::new(machine, self.executor.clone(), self.backlog)?;
                slot.insert(Arc::new(actor));
                tracing::info!("registered machine '{}'", id);
                Ok(id)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<PoolActor<E>>> {
        self.machines.get(id).map(|entry| entry.value().clone())
    }

    fn require(&self, id: &str) -> Result<Arc<PoolActor<E>>, RuntimeError> {
        self.get(id)
            .ok_or_else(|| RuntimeError::UnknownMachine(id.to_string()))
    }

    /// Unregisters a machine. Commands already accepted still run.
    pub fn remove(&self, id: &str) -> Option<Arc<PoolActor<E>>> {
        let removed = self.machines.remove(id).map(|(_, actor)| actor);
        if removed.is_some() {
            tracing::info!("removed machine '{}'", id);
        }
        removed
    }

    /// Transits the machine registered under `id` and waits for the reply.
    pub fn transit(&self, id: &str, event: E) -> Result<Reply<E>, RuntimeError> {
        self.require(id)?.transit(event)
    }

    /// Latest snapshot of the machine registered under `id`.
    pub fn stamped(&self, id: &str) -> Result<StampedState<E>, RuntimeError> {
        Ok(self.require(id)?.stamped())
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.machines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl<E: Event> std::fmt::Debug for MachineRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineRegistry")
            .field("machines", &self.machines.len())
            .field("backlog", &self.backlog)
            .finish()
    }
}
