//! Mutex-guarded machine.

use crate::command::{Command, Driver, Published, Reply};
use crate::error::RuntimeError;
use crate::handle::MachineHandle;
use fsmkit_core::{Event, Machine, StampedState};
use parking_lot::Mutex;

/// Runs every command on the calling thread under one lock.
///
/// Commands are totally ordered by lock acquisition. There is no queue, so
/// nothing can be cancelled; a reconfiguration replaces the machine while the
/// lock is held, so no transit ever sees a half-swapped graph.
pub struct SynchronizedMachine<E: Event> {
    driver: Mutex<Driver<E>>,
    published: Published<E>,
}

impl<E: Event> SynchronizedMachine<E> {
    pub fn new(machine: Machine<E>) -> Result<Self, RuntimeError> {
        let driver = Driver::new(machine)?;
        let published = driver.published();
        tracing::debug!("synchronized machine '{}' ready", driver.machine().name());
        Ok(Self {
            driver: Mutex::new(driver),
            published,
        })
    }

    /// Runs `f` against the machine while holding the lock.
    pub fn with_machine<R>(&self, f: impl FnOnce(&Machine<E>) -> R) -> R {
        f(self.driver.lock().machine())
    }
}

impl<E: Event> MachineHandle<E> for SynchronizedMachine<E> {
    fn execute(&self, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.driver.lock().execute(command, None)
    }

    fn execute_if(&self, expected: u64, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.driver.lock().execute(command, Some(expected))
    }

    fn stamped(&self) -> StampedState<E> {
        self.published.read().clone()
    }
}

impl<E: Event> std::fmt::Debug for SynchronizedMachine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedMachine")
            .field("stamp", &*self.published.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ring, Sig};
    use fsmkit_core::{MachineBuilder, NoopState, Signal, StateRef, Target};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_transit_and_snapshot() {
        let machine = SynchronizedMachine::new(ring().construct().unwrap()).unwrap();
        let reply = machine.transit(Signal('a')).unwrap();

        assert_eq!(reply.stamp().unwrap().name(), "second");
        assert_eq!(machine.current_name(), "second");
        assert_eq!(machine.generation(), 1);
        assert!(machine.with_machine(|m| m.is_initialized()));
    }

    #[test]
    fn test_parallel_callers_are_serialized() {
        let machine = Arc::new(SynchronizedMachine::new(ring().build().unwrap()).unwrap());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let machine = machine.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        machine.transit(Signal('a')).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // 100 steps around a 3-ring.
        assert_eq!(machine.generation(), 100);
        assert_eq!(machine.current_name(), "second");
    }

    #[test]
    fn test_cas_transit() {
        let machine = SynchronizedMachine::new(ring().build().unwrap()).unwrap();
        let generation = machine.generation();

        assert!(machine.transit_if(generation, Signal('a')).unwrap().is_some());
        assert!(machine.transit_if(generation, Signal('a')).unwrap().is_none());
        assert_eq!(machine.current_name(), "second");
        assert_eq!(machine.generation(), generation + 1);
    }

    #[test]
    fn test_invalid_event_surfaces() {
        let machine = SynchronizedMachine::new(ring().build().unwrap()).unwrap();
        let err = machine.transit(Signal('x')).unwrap_err();
        assert!(err.is_invalid_event());
        assert_eq!(machine.current_name(), "first");
        assert_eq!(machine.generation(), 1);
    }

    #[test]
    fn test_reconfigure_keeps_position_and_properties() {
        let machine = SynchronizedMachine::new(ring().build().unwrap()).unwrap();
        machine.transit(Signal('a')).unwrap();
        machine.set_property("owner", json!("ops")).unwrap();

        let shortcut: MachineBuilder<Sig> = ring().transition("second", 'b', Target::node("first"));
        let stamp = machine.reconfigure(shortcut, HashMap::new()).unwrap();

        assert_eq!(stamp.name(), "second");
        assert_eq!(machine.property("owner").unwrap(), Some(json!("ops")));
        machine.transit(Signal('b')).unwrap();
        assert_eq!(machine.current_name(), "first");
    }

    #[test]
    fn test_replace_unknown_state_is_specification_error() {
        let machine = SynchronizedMachine::new(ring().build().unwrap()).unwrap();
        let err = machine
            .replace_states(vec![("ghost".to_string(), Arc::new(NoopState) as StateRef<Sig>)])
            .unwrap_err();
        assert!(err.is_specification());
    }
}
