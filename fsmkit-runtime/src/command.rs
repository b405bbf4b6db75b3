//! Commands and the single-writer driver that applies them.
//!
//! Every wrapper funnels work through [`Command`], so transitions, property
//! access and reconfiguration are ordered the same way for a given machine.

use crate::error::RuntimeError;
use fsmkit_core::{
    Event, Machine, MachineBuilder, StampedState, StateRef, TransitOutcome,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A unit of work for a machine.
pub enum Command<E: Event> {
    /// Dispatch an external event.
    Transit(E),
    /// Install new state objects on existing nodes.
    ReplaceStates(Vec<(String, StateRef<E>)>),
    /// Swap the whole graph, keeping position and properties.
    Reconfigure {
        builder: MachineBuilder<E>,
        replacements: HashMap<String, StateRef<E>>,
    },
    SetProperty { key: String, value: Value },
    GetProperty { key: String },
}

impl<E: Event> Command<E> {
    /// Returns true if executing this command bumps the generation.
    pub fn mutates(&self) -> bool {
        !matches!(self, Command::GetProperty { .. })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Transit(_) => "transit",
            Command::ReplaceStates(_) => "replace_states",
            Command::Reconfigure { .. } => "reconfigure",
            Command::SetProperty { .. } => "set_property",
            Command::GetProperty { .. } => "get_property",
        }
    }

    /// Applies the command. `generation` stamps the resulting snapshot.
    pub fn apply(self, machine: &mut Machine<E>, generation: u64) -> Result<Reply<E>, RuntimeError> {
        match self {
            Command::Transit(event) => {
                let outcome = machine.transit(event)?;
                Ok(Reply::Transited {
                    outcome,
                    stamp: machine.stamp(generation),
                })
            }
            Command::ReplaceStates(states) => {
                machine.replace_states(states)?;
                Ok(Reply::Reconfigured {
                    stamp: machine.stamp(generation),
                })
            }
            Command::Reconfigure {
                builder,
                replacements,
            } => {
                *machine = machine.reconfigure(&builder, replacements)?;
                Ok(Reply::Reconfigured {
                    stamp: machine.stamp(generation),
                })
            }
            Command::SetProperty { key, value } => {
                machine.set_property(key, value)?;
                Ok(Reply::PropertySet)
            }
            Command::GetProperty { key } => Ok(Reply::Property(machine.property(&key).cloned())),
        }
    }
}

impl<E: Event> std::fmt::Debug for Command<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Transit(event) => write!(f, "Transit({:?})", event.symbol()),
            Command::ReplaceStates(states) => {
                let names: Vec<&str> = states.iter().map(|(n, _)| n.as_str()).collect();
                write!(f, "ReplaceStates({:?})", names)
            }
            Command::Reconfigure { builder, .. } => write!(f, "Reconfigure({})", builder.name()),
            Command::SetProperty { key, .. } => write!(f, "SetProperty({})", key),
            Command::GetProperty { key } => write!(f, "GetProperty({})", key),
        }
    }
}

/// Result of a command.
pub enum Reply<E: Event> {
    Transited {
        outcome: TransitOutcome,
        stamp: StampedState<E>,
    },
    Reconfigured {
        stamp: StampedState<E>,
    },
    PropertySet,
    Property(Option<Value>),
    /// A conditional command found a different generation and did nothing.
    Stale {
        generation: u64,
    },
}

impl<E: Event> Reply<E> {
    /// The snapshot taken right after the command, if it produced one.
    pub fn stamp(&self) -> Option<&StampedState<E>> {
        match self {
            Reply::Transited { stamp, .. } | Reply::Reconfigured { stamp } => Some(stamp),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<TransitOutcome> {
        match self {
            Reply::Transited { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Reply::Stale { .. })
    }

    /// Maps a stale reply onto `None`.
    pub fn fresh(self) -> Option<Self> {
        (!self.is_stale()).then_some(self)
    }

    pub fn into_property(self) -> Option<Value> {
        match self {
            Reply::Property(value) => value,
            _ => None,
        }
    }
}

impl<E: Event> std::fmt::Debug for Reply<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Transited { outcome, stamp } => f
                .debug_struct("Transited")
                .field("outcome", outcome)
                .field("stamp", stamp)
                .finish(),
            Reply::Reconfigured { stamp } => {
                f.debug_struct("Reconfigured").field("stamp", stamp).finish()
            }
            Reply::PropertySet => f.write_str("PropertySet"),
            Reply::Property(value) => f.debug_tuple("Property").field(value).finish(),
            Reply::Stale { generation } => f
                .debug_struct("Stale")
                .field("generation", generation)
                .finish(),
        }
    }
}

/// Latest published snapshot of a machine, readable without queuing.
pub type Published<E> = Arc<RwLock<StampedState<E>>>;

/// Exclusive owner of a machine plus its generation counter.
///
/// Exactly one thread at a time holds a `Driver`; the wrappers differ only in
/// how they guarantee that.
pub(crate) struct Driver<E: Event> {
    machine: Machine<E>,
    generation: u64,
    published: Published<E>,
}

impl<E: Event> Driver<E> {
    /// Takes ownership of `machine`, completing its initialization if needed.
    pub(crate) fn new(mut machine: Machine<E>) -> Result<Self, RuntimeError> {
        machine.complete_initialization()?;
        let published = Arc::new(RwLock::new(machine.stamp(0)));
        Ok(Self {
            machine,
            generation: 0,
            published,
        })
    }

    pub(crate) fn published(&self) -> Published<E> {
        self.published.clone()
    }

    pub(crate) fn machine(&self) -> &Machine<E> {
        &self.machine
    }

    /// Runs one command.
    ///
    /// With `expected` set, the command only runs if the generation still
    /// matches; otherwise the reply is [`Reply::Stale`] and nothing changes.
    /// Mutating commands bump the generation even when they fail, so that
    /// conditional callers can make progress after an error.
    pub(crate) fn execute(
        &mut self,
        command: Command<E>,
        expected: Option<u64>,
    ) -> Result<Reply<E>, RuntimeError> {
        if let Some(expected) = expected {
            if expected != self.generation {
                tracing::warn!(
                    "machine '{}': stale {} (expected generation {}, current {})",
                    self.machine.name(),
                    command.kind(),
                    expected,
                    self.generation
                );
                return Ok(Reply::Stale {
                    generation: self.generation,
                });
            }
        }

        let mutates = command.mutates();
        let next = if mutates {
            self.generation + 1
        } else {
            self.generation
        };

        let machine = &mut self.machine;
        let result = panic::catch_unwind(AssertUnwindSafe(|| command.apply(machine, next)))
            .unwrap_or_else(|payload| Err(RuntimeError::Panicked(panic_message(payload))));

        if mutates {
            self.generation = next;
            *self.published.write() = self.machine.stamp(next);
        }
        if let Err(e) = &result {
            tracing::debug!("machine '{}': command failed: {}", self.machine.name(), e);
        }
        result
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
