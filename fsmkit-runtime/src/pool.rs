//! Thread-pool actor.
//!
//! Each machine keeps a backlog of envelopes and a pending counter. The
//! submission that moves the counter off zero schedules one drain job on
//! the shared executor; the drain runs a single command and reschedules
//! itself while work remains. At most one drain exists per machine, so
//! commands run one at a time, in backlog order, on whichever pool thread
//! picks the job up.

use crate::command::{Command, Driver, Published, Reply};
use crate::error::RuntimeError;
use crate::executor::Executor;
use crate::future::{Envelope, TransitionFuture};
use crate::handle::MachineHandle;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use fsmkit_core::{Event, Machine, StampedState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner<E: Event> {
    name: String,
    driver: Mutex<Driver<E>>,
    /// Commands accepted but not yet drained.
    pending: AtomicUsize,
    backlog_tx: Sender<Envelope<E>>,
    backlog_rx: Receiver<Envelope<E>>,
    capacity: Option<usize>,
    executor: Arc<dyn Executor>,
    published: Published<E>,
}

/// A machine driven by jobs on a shared executor.
pub struct PoolActor<E: Event> {
    inner: Arc<Inner<E>>,
}

impl<E: Event> PoolActor<E> {
    /// Wraps `machine`. `capacity` bounds the backlog; `None` is unbounded.
    pub fn new(
        machine: Machine<E>,
        executor: Arc<dyn Executor>,
        capacity: Option<usize>,
    ) -> Result<Self, RuntimeError> {
        let driver = Driver::new(machine)?;
        let published = driver.published();
        let name = driver.machine().name().to_string();
        let (backlog_tx, backlog_rx) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };

        tracing::debug!("pool actor for machine '{}' ready", name);

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                driver: Mutex::new(driver),
                pending: AtomicUsize::new(0),
                backlog_tx,
                backlog_rx,
                capacity,
                executor,
                published,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Commands accepted but not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Enqueues a command without waiting for its result.
    pub fn post(&self, command: Command<E>) -> Result<(), RuntimeError> {
        let (envelope, _future) = Envelope::new(command, None);
        self.inner.enqueue(envelope)
    }

    /// Enqueues a command and returns a cancellable future for its result.
    pub fn submit(&self, command: Command<E>) -> TransitionFuture<E> {
        self.submit_inner(command, None)
    }

    /// Enqueues a command that only runs if the generation still equals
    /// `expected` when it is drained.
    pub fn submit_if(&self, expected: u64, command: Command<E>) -> TransitionFuture<E> {
        self.submit_inner(command, Some(expected))
    }

    fn submit_inner(&self, command: Command<E>, expected: Option<u64>) -> TransitionFuture<E> {
        let (envelope, future) = Envelope::new(command, expected);
        match self.inner.enqueue(envelope) {
            Ok(()) => future,
            Err(e) => TransitionFuture::rejected(e),
        }
    }
}

impl<E: Event> Inner<E> {
    fn enqueue(self: &Arc<Self>, envelope: Envelope<E>) -> Result<(), RuntimeError> {
        // The envelope must be visible before the counter moves, or a
        // concurrent drain could observe a count with nothing to receive.
        self.backlog_tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => {
                tracing::warn!("pool actor '{}': backlog full", self.name);
                RuntimeError::QueueFull {
                    capacity: self.capacity.unwrap_or(usize::MAX),
                }
            }
            TrySendError::Disconnected(_) => RuntimeError::ShutDown,
        })?;

        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.schedule();
        }
        Ok(())
    }

    fn schedule(self: &Arc<Self>) {
        let inner = self.clone();
        self.executor.execute(Box::new(move || inner.drain_one()));
    }

    fn drain_one(self: Arc<Self>) {
        if let Ok(envelope) = self.backlog_rx.try_recv() {
            let mut driver = self.driver.lock();
            envelope.run(&mut driver);
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) > 1 {
            self.schedule();
        }
    }
}

impl<E: Event> MachineHandle<E> for PoolActor<E> {
    /// Blocks until a pool thread has run the command.
    ///
    /// Must not be called from a callback running on this actor: the drain
    /// holds the driver lock, so the nested command can never run.
    fn execute(&self, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.submit(command).wait()
    }

    fn execute_if(&self, expected: u64, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.submit_if(expected, command).wait()
    }

    fn stamped(&self) -> StampedState<E> {
        self.inner.published.read().clone()
    }
}

impl<E: Event> std::fmt::Debug for PoolActor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolActor")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
