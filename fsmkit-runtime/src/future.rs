//! Completion handles for queued commands.
//!
//! A command travels as an [`Envelope`] carrying a [`Promise`]; the caller
//! keeps the matching [`TransitionFuture`]. Both share one slot, so a future
//! handed out while the command is still queued resolves as soon as the
//! command runs, whichever worker runs it.

use crate::command::{Command, Driver, Reply};
use crate::error::RuntimeError;
use fsmkit_core::Event;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub type CommandResult<E> = Result<Reply<E>, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Done,
    Cancelled,
    /// Dropped unexecuted by a shut-down driver.
    Abandoned,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled | Phase::Abandoned)
    }
}

struct SlotState<E: Event> {
    phase: Phase,
    result: Option<CommandResult<E>>,
    waker: Option<Waker>,
}

struct Slot<E: Event> {
    state: Mutex<SlotState<E>>,
    ready: Condvar,
}

impl<E: Event> Slot<E> {
    fn new(phase: Phase, result: Option<CommandResult<E>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                phase,
                result,
                waker: None,
            }),
            ready: Condvar::new(),
        })
    }

    /// Moves to a terminal phase and wakes every waiter.
    fn settle(&self, phase: Phase, result: CommandResult<E>) {
        let waker = {
            let mut state = self.state.lock();
            state.phase = phase;
            state.result = Some(result);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Worker side of a command's slot.
///
/// Dropping a promise that never completed settles its future with
/// [`RuntimeError::ShutDown`].
pub(crate) struct Promise<E: Event> {
    slot: Arc<Slot<E>>,
}

impl<E: Event> Promise<E> {
    /// Claims the command for execution. Fails if it was cancelled.
    fn begin(&self) -> bool {
        let mut state = self.slot.state.lock();
        if state.phase != Phase::Queued {
            return false;
        }
        state.phase = Phase::Running;
        true
    }

    fn complete(self, result: CommandResult<E>) {
        self.slot.settle(Phase::Done, result);
    }
}

impl<E: Event> Drop for Promise<E> {
    fn drop(&mut self) {
        let unfinished = matches!(
            self.slot.state.lock().phase,
            Phase::Queued | Phase::Running
        );
        if unfinished {
            self.slot.settle(Phase::Abandoned, Err(RuntimeError::ShutDown));
        }
    }
}

/// A command on its way to a driver.
pub(crate) struct Envelope<E: Event> {
    command: Command<E>,
    expected: Option<u64>,
    promise: Promise<E>,
}

impl<E: Event> Envelope<E> {
    /// Wraps `command`, returning the envelope and the caller's future.
    pub(crate) fn new(command: Command<E>, expected: Option<u64>) -> (Self, TransitionFuture<E>) {
        let slot = Slot::new(Phase::Queued, None);
        let future = TransitionFuture {
            slot: slot.clone(),
            rejected: false,
        };
        let envelope = Self {
            command,
            expected,
            promise: Promise { slot },
        };
        (envelope, future)
    }

    /// Executes the command unless it was cancelled while queued.
    pub(crate) fn run(self, driver: &mut Driver<E>) {
        let Envelope {
            command,
            expected,
            promise,
        } = self;
        if !promise.begin() {
            tracing::trace!("skipping cancelled {}", command.kind());
            return;
        }
        let result = driver.execute(command, expected);
        promise.complete(result);
    }
}

/// Caller side of a queued command.
///
/// Resolve it by blocking ([`wait`](Self::wait),
/// [`wait_timeout`](Self::wait_timeout)) or by `.await`. Blocking waits must
/// not be used from inside the driver that runs the command.
pub struct TransitionFuture<E: Event> {
    slot: Arc<Slot<E>>,
    rejected: bool,
}

impl<E: Event> TransitionFuture<E> {
    /// A future that already failed because the command was not accepted.
    pub(crate) fn rejected(error: RuntimeError) -> Self {
        Self {
            slot: Slot::new(Phase::Done, Some(Err(error))),
            rejected: true,
        }
    }

    /// Returns true if the command was never accepted by the queue.
    ///
    /// Such a future resolves to a submission failure, never to a
    /// transition error.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Cancels the command if no worker has picked it up yet.
    ///
    /// Returns false once execution has started or finished.
    pub fn cancel(&self) -> bool {
        let waker = {
            let mut state = self.slot.state.lock();
            if state.phase != Phase::Queued {
                return false;
            }
            state.phase = Phase::Cancelled;
            state.result = Some(Err(RuntimeError::Cancelled));
            state.waker.take()
        };
        self.slot.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.state.lock().phase == Phase::Cancelled
    }

    /// Returns true once the command has finished, was cancelled or was
    /// abandoned.
    pub fn is_done(&self) -> bool {
        self.slot.state.lock().phase.is_terminal()
    }

    /// Blocks until the command completes.
    pub fn wait(self) -> CommandResult<E> {
        let mut state = self.slot.state.lock();
        while !state.phase.is_terminal() {
            self.slot.ready.wait(&mut state);
        }
        take_result(&mut state)
    }

    /// Blocks for at most `timeout`.
    ///
    /// Returns [`RuntimeError::Timeout`] if the command is still pending; the
    /// future stays usable and can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> CommandResult<E> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        while !state.phase.is_terminal() {
            if self.slot.ready.wait_until(&mut state, deadline).timed_out()
                && !state.phase.is_terminal()
            {
                return Err(RuntimeError::Timeout);
            }
        }
        take_result(&mut state)
    }
}

fn take_result<E: Event>(state: &mut SlotState<E>) -> CommandResult<E> {
    state.result.take().unwrap_or(Err(RuntimeError::Cancelled))
}

impl<E: Event> Future for TransitionFuture<E> {
    type Output = CommandResult<E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        if state.phase.is_terminal() {
            return Poll::Ready(take_result(&mut state));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<E: Event> std::fmt::Debug for TransitionFuture<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionFuture")
            .field("phase", &self.slot.state.lock().phase)
            .field("rejected", &self.rejected)
            .finish()
    }
}
