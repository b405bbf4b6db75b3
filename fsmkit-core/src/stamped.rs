//! Generation-stamped snapshots of a machine's current state.

use crate::event::Event;
use crate::state::StateRef;
use std::sync::Arc;

/// An immutable (state, generation) pair.
///
/// Concurrent drivers publish a fresh stamp after every committed command and
/// use the generation for compare-and-swap style submissions.
pub struct StampedState<E: Event> {
    name: Arc<str>,
    state: StateRef<E>,
    generation: u64,
}

impl<E: Event> StampedState<E> {
    pub fn new(name: impl Into<Arc<str>>, state: StateRef<E>, generation: u64) -> Self {
        Self {
            name: name.into(),
            state,
            generation,
        }
    }

    /// Name of the node the machine was on.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &StateRef<E> {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if both stamps refer to the same state object.
    pub fn same_state(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl<E: Event> Clone for StampedState<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: self.state.clone(),
            generation: self.generation,
        }
    }
}

impl<E: Event> std::fmt::Debug for StampedState<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampedState")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .finish()
    }
}
