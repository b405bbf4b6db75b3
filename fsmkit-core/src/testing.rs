//! Shared fixtures for unit tests.

use crate::aspect::{Aspect, NodeRef};
use crate::error::BoxError;
use crate::event::Event;
use crate::state::{MachineView, NodeState, Params};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Letter {
    A,
    B,
    C,
}

impl Event for Letter {
    type Symbol = Letter;

    fn symbol(&self) -> Letter {
        *self
    }
}

/// Appends "enter:<node>" / "leave:<node>" entries to a shared journal.
pub(crate) struct Recorder {
    pub(crate) node: &'static str,
    pub(crate) journal: Arc<Mutex<Vec<String>>>,
    pub(crate) attached: AtomicUsize,
    pub(crate) detached: AtomicUsize,
    pub(crate) invalid: AtomicUsize,
}

impl Recorder {
    pub(crate) fn new(node: &'static str, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            node,
            journal,
            attached: AtomicUsize::new(0),
            detached: AtomicUsize::new(0),
            invalid: AtomicUsize::new(0),
        }
    }
}

impl NodeState<Letter> for Recorder {
    fn on_entering(&self, _event: &Letter, _m: &mut MachineView<'_, Letter>) -> Result<(), BoxError> {
        self.journal.lock().push(format!("enter:{}", self.node));
        Ok(())
    }

    fn on_leaving(&self, _event: &Letter, _m: &mut MachineView<'_, Letter>) -> Result<(), BoxError> {
        self.journal.lock().push(format!("leave:{}", self.node));
        Ok(())
    }

    fn on_invalid_transition(&self, _event: &Letter, _m: &mut MachineView<'_, Letter>) {
        self.invalid.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attached(&self, _params: &Params, _m: &mut MachineView<'_, Letter>) -> Result<(), BoxError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_detached(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts every interception point; vetoes the configured points.
#[derive(Default)]
pub(crate) struct CountingAspect {
    pub(crate) starts: AtomicUsize,
    pub(crate) nulls: AtomicUsize,
    pub(crate) leaves: AtomicUsize,
    pub(crate) enters: AtomicUsize,
    pub(crate) finishes: AtomicUsize,
    pub(crate) veto_start: bool,
    pub(crate) veto_leave: bool,
    pub(crate) veto_enter: bool,
}

impl Aspect<Letter> for CountingAspect {
    fn on_transition_start(&self, _event: &Letter, _current: NodeRef<'_, Letter>) -> bool {
        self.starts.fetch_add(1, Ordering::SeqCst);
        !self.veto_start
    }

    fn on_null_transition(&self, _event: &Letter, _current: NodeRef<'_, Letter>) {
        self.nulls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_leaving_state(
        &self,
        _event: &Letter,
        _from: NodeRef<'_, Letter>,
        _to: NodeRef<'_, Letter>,
    ) -> bool {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        !self.veto_leave
    }

    fn on_entering_state(
        &self,
        _event: &Letter,
        _from: NodeRef<'_, Letter>,
        _to: NodeRef<'_, Letter>,
    ) -> bool {
        self.enters.fetch_add(1, Ordering::SeqCst);
        !self.veto_enter
    }

    fn on_transition_finish(
        &self,
        _event: &Letter,
        _from: NodeRef<'_, Letter>,
        _to: NodeRef<'_, Letter>,
    ) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
