//! The surface shared by every concurrent driver.

use crate::command::{Command, Reply};
use crate::error::RuntimeError;
use fsmkit_core::{Event, MachineBuilder, StampedState, StateRef};
use serde_json::Value;
use std::collections::HashMap;

/// A machine that may be driven from many threads.
///
/// Implementations differ in where commands run (caller thread, dedicated
/// thread, shared pool) but all apply them one at a time in submission order.
pub trait MachineHandle<E: Event>: Send + Sync {
    /// Runs a command and waits for its reply.
    fn execute(&self, command: Command<E>) -> Result<Reply<E>, RuntimeError>;

    /// Runs a command only if the generation still equals `expected`.
    ///
    /// A mismatch is not an error: the reply is [`Reply::Stale`] and the
    /// machine is untouched.
    fn execute_if(&self, expected: u64, command: Command<E>) -> Result<Reply<E>, RuntimeError>;

    /// The latest committed snapshot. Never waits for queued commands.
    fn stamped(&self) -> StampedState<E>;

    fn transit(&self, event: E) -> Result<Reply<E>, RuntimeError> {
        self.execute(Command::Transit(event))
    }

    /// Conditional transit. `Ok(None)` means the generation had moved on.
    fn transit_if(&self, expected: u64, event: E) -> Result<Option<Reply<E>>, RuntimeError> {
        Ok(self.execute_if(expected, Command::Transit(event))?.fresh())
    }

    fn replace_states(&self, states: Vec<(String, StateRef<E>)>) -> Result<(), RuntimeError> {
        self.execute(Command::ReplaceStates(states)).map(|_| ())
    }

    /// Swaps the whole graph; see [`fsmkit_core::Machine::reconfigure`].
    fn reconfigure(
        &self,
        builder: MachineBuilder<E>,
        replacements: HashMap<String, StateRef<E>>,
    ) -> Result<StampedState<E>, RuntimeError> {
        let reply = self.execute(Command::Reconfigure {
            builder,
            replacements,
        })?;
        match reply {
            Reply::Reconfigured { stamp } => Ok(stamp),
            _ => Ok(self.stamped()),
        }
    }

    fn set_property(&self, key: &str, value: Value) -> Result<(), RuntimeError> {
        self.execute(Command::SetProperty {
            key: key.to_string(),
            value,
        })
        .map(|_| ())
    }

    fn property(&self, key: &str) -> Result<Option<Value>, RuntimeError> {
        self.execute(Command::GetProperty {
            key: key.to_string(),
        })
        .map(Reply::into_property)
    }

    fn current_name(&self) -> String {
        self.stamped().name().to_string()
    }

    fn generation(&self) -> u64 {
        self.stamped().generation()
    }
}
