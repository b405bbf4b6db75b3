//! Internal (callback-generated) event queue.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How many internal events a callback may queue during one external transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalEvents {
    /// Posting an internal event is an error.
    #[default]
    Disabled,
    /// At most one internal event may be pending at a time.
    Single,
    /// Any number of internal events, drained in FIFO order.
    Unbounded,
}

/// Pending events of the transit in progress.
pub(crate) struct InternalQueue<E> {
    mode: InternalEvents,
    pending: VecDeque<E>,
    active: bool,
}

impl<E> InternalQueue<E> {
    pub(crate) fn new(mode: InternalEvents) -> Self {
        Self {
            mode,
            pending: VecDeque::new(),
            active: false,
        }
    }

    pub(crate) fn mode(&self) -> InternalEvents {
        self.mode
    }

    /// Starts a transit with `event` as the sole pending item.
    pub(crate) fn begin(&mut self, event: E) {
        self.pending.clear();
        self.pending.push_back(event);
        self.active = true;
    }

    /// Ends the transit, discarding anything left over after an error or veto.
    pub(crate) fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.active = false;
        dropped
    }

    pub(crate) fn next(&mut self) -> Option<E> {
        self.pending.pop_front()
    }

    /// Queues an event posted by a callback.
    pub(crate) fn post(&mut self, event: E) -> Result<(), CoreError> {
        if !self.active {
            return Err(CoreError::NotDispatching);
        }
        match self.mode {
            InternalEvents::Disabled => Err(CoreError::InternalEventsDisabled),
            InternalEvents::Single if !self.pending.is_empty() => {
                Err(CoreError::InternalEventOverflow)
            }
            InternalEvents::Single | InternalEvents::Unbounded => {
                self.pending.push_back(event);
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
