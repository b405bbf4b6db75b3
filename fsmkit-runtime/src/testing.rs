//! Shared fixtures for unit tests.

use crossbeam_channel::{Receiver, Sender};
use fsmkit_core::{BoxError, MachineBuilder, MachineView, NodeState, NoopState, Signal, Target};
use std::time::Duration;

pub(crate) type Sig = Signal<char>;

/// first -a-> second -a-> third -a-> first, 'n' stays everywhere.
pub(crate) fn ring() -> MachineBuilder<Sig> {
    MachineBuilder::new("ring")
        .state("first", || NoopState)
        .state("second", || NoopState)
        .state("third", || NoopState)
        .transition("first", 'a', Target::node("second"))
        .transition("second", 'a', Target::node("third"))
        .transition("third", 'a', Target::node("first"))
        .transition("first", 'n', Target::null())
        .transition("second", 'n', Target::null())
        .transition("third", 'n', Target::null())
        .initial("first")
}

/// Blocks `on_entering` until the test opens it.
pub(crate) struct Gate {
    entered: Sender<()>,
    open: Receiver<()>,
}

/// Test side of a [`Gate`].
pub(crate) struct GateHandle {
    entered: Receiver<()>,
    open: Sender<()>,
}

impl GateHandle {
    /// Waits until the gated callback is running.
    pub(crate) fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("gate was never entered");
    }

    pub(crate) fn open(&self) {
        let _ = self.open.send(());
    }
}

pub(crate) fn gate() -> (Gate, GateHandle) {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (open_tx, open_rx) = crossbeam_channel::unbounded();
    (
        Gate {
            entered: entered_tx,
            open: open_rx,
        },
        GateHandle {
            entered: entered_rx,
            open: open_tx,
        },
    )
}

impl NodeState<Sig> for Gate {
    fn on_entering(&self, _event: &Sig, _m: &mut MachineView<'_, Sig>) -> Result<(), BoxError> {
        let _ = self.entered.send(());
        self.open.recv_timeout(Duration::from_secs(5))?;
        Ok(())
    }
}

/// A ring whose "second" node blocks on entry until opened.
pub(crate) fn gated_ring() -> (MachineBuilder<Sig>, GateHandle) {
    let (gate, handle) = gate();
    let gate = std::sync::Arc::new(gate);
    let builder = MachineBuilder::new("gated")
        .state("first", || NoopState)
        .shared_state("second", gate)
        .state("third", || NoopState)
        .transition("first", 'a', Target::node("second"))
        .transition("second", 'a', Target::node("third"))
        .transition("third", 'a', Target::node("first"))
        .initial("first");
    (builder, handle)
}
