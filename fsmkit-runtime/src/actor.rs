//! Dedicated-thread actor.
//!
//! ```text
//! callers ──send──▶ command queue ──▶ worker thread ──▶ Driver ──▶ Machine
//!    ▲                (crossbeam)          │
//!    └──── TransitionFuture ◀── Promise ───┘
//! ```
//!
//! One private thread owns the machine. Commands are applied strictly in
//! queue order, so submission order is commit order.

use crate::command::{Command, Driver, Published, Reply};
use crate::config::{ActorConfig, QueueMode};
use crate::error::RuntimeError;
use crate::future::{Envelope, TransitionFuture};
use crate::handle::MachineHandle;
use crossbeam_channel::{select, Receiver, SendTimeoutError, Sender, TrySendError};
use fsmkit_core::{Event, Machine, StampedState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// A machine driven by its own worker thread.
pub struct MachineActor<E: Event> {
    name: String,
    queue: Sender<Envelope<E>>,
    mode: QueueMode,
    /// Dropping the sender wakes the worker for shutdown.
    shutdown: Mutex<Option<Sender<()>>>,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    published: Published<E>,
}

impl<E: Event> MachineActor<E> {
    /// Moves `machine` onto a new worker thread.
    pub fn spawn(machine: Machine<E>, config: &ActorConfig) -> Result<Self, RuntimeError> {
        let driver = Driver::new(machine)?;
        let published = driver.published();
        let name = driver.machine().name().to_string();
        let mode = config.queue_mode();

        let (queue, commands) = match mode.capacity() {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(0);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_worker(driver, commands, shutdown_rx))
            .map_err(|e| RuntimeError::Executor(e.to_string()))?;

        tracing::info!("actor for machine '{}' started ({:?})", name, mode);

        Ok(Self {
            name,
            queue,
            mode,
            shutdown: Mutex::new(Some(shutdown)),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            published,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commands waiting for the worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a command and returns immediately; its result is only logged.
    pub fn post(&self, command: Command<E>) -> Result<(), RuntimeError> {
        let (envelope, _future) = Envelope::new(command, None);
        self.send(envelope)
    }

    /// Enqueues a command and returns a cancellable future for its result.
    ///
    /// A queue that refuses the command yields a rejected future.
    pub fn submit(&self, command: Command<E>) -> TransitionFuture<E> {
        self.submit_inner(command, None)
    }

    /// Like [`submit`](Self::submit), but the command only runs if the
    /// generation still equals `expected` when the worker reaches it.
    pub fn submit_if(&self, expected: u64, command: Command<E>) -> TransitionFuture<E> {
        self.submit_inner(command, Some(expected))
    }

    fn submit_inner(&self, command: Command<E>, expected: Option<u64>) -> TransitionFuture<E> {
        let (envelope, future) = Envelope::new(command, expected);
        match self.send(envelope) {
            Ok(()) => future,
            Err(e) => TransitionFuture::rejected(e),
        }
    }

    fn send(&self, envelope: Envelope<E>) -> Result<(), RuntimeError> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutDown);
        }
        let capacity = self.mode.capacity().unwrap_or(usize::MAX);
        let full = || {
            tracing::warn!("actor '{}': command queue full", self.name);
            RuntimeError::QueueFull { capacity }
        };

        match self.mode {
            QueueMode::Unbounded | QueueMode::Blocking { .. } => self
                .queue
                .send(envelope)
                .map_err(|_| RuntimeError::ShutDown),
            QueueMode::Timeout { timeout, .. } => {
                self.queue
                    .send_timeout(envelope, timeout)
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => full(),
                        SendTimeoutError::Disconnected(_) => RuntimeError::ShutDown,
                    })
            }
            QueueMode::NonBlocking { .. } => {
                self.queue.try_send(envelope).map_err(|e| match e {
                    TrySendError::Full(_) => full(),
                    TrySendError::Disconnected(_) => RuntimeError::ShutDown,
                })
            }
        }
    }

    /// Stops the worker. Queued commands are dropped and their futures
    /// resolve to [`RuntimeError::ShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // Called from a callback on the worker itself.
                return;
            }
            if worker.join().is_err() {
                tracing::error!("actor '{}': worker thread panicked", self.name);
            }
        }
        tracing::info!("actor for machine '{}' stopped", self.name);
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

fn run_worker<E: Event>(
    mut driver: Driver<E>,
    commands: Receiver<Envelope<E>>,
    shutdown: Receiver<()>,
) {
    loop {
        select! {
            recv(commands) -> envelope => match envelope {
                Ok(envelope) => envelope.run(&mut driver),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }

    let dropped = commands.try_iter().count();
    if dropped > 0 {
        tracing::debug!(
            "actor '{}': dropped {} queued command(s) at shutdown",
            driver.machine().name(),
            dropped
        );
    }
}

impl<E: Event> MachineHandle<E> for MachineActor<E> {
    /// Blocks until the worker has run the command.
    ///
    /// Must not be called from a callback running on this actor's worker.
    fn execute(&self, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.submit(command).wait()
    }

    fn execute_if(&self, expected: u64, command: Command<E>) -> Result<Reply<E>, RuntimeError> {
        self.submit_if(expected, command).wait()
    }

    fn stamped(&self) -> StampedState<E> {
        self.published.read().clone()
    }
}

impl<E: Event> Drop for MachineActor<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<E: Event> std::fmt::Debug for MachineActor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineActor")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("queued", &self.queue.len())
            .field("stopping", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;
    use crate::testing::{gated_ring, ring, Sig};
    use fsmkit_core::{MachineBuilder, Signal, Target};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(queue: QueueKind, capacity: usize) -> ActorConfig {
        ActorConfig {
            queue,
            capacity,
            send_timeout_ms: 20,
            thread_name: "fsmkit-test-actor".to_string(),
        }
    }

    fn actor(builder: MachineBuilder<Sig>, queue: QueueKind, capacity: usize) -> MachineActor<Sig> {
        MachineActor::spawn(builder.build().unwrap(), &config(queue, capacity)).unwrap()
    }

    #[test]
    fn test_blocking_transit() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        let reply = actor.transit(Signal('a')).unwrap();
        assert_eq!(reply.stamp().unwrap().name(), "second");
        assert_eq!(actor.current_name(), "second");
        assert_eq!(actor.generation(), 1);
    }

    #[test]
    fn test_post_is_applied_in_order() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        for _ in 0..5 {
            actor.post(Command::Transit(Signal('a'))).unwrap();
        }
        // A blocking command queued behind the posts observes all of them.
        actor.set_property("marker", json!(true)).unwrap();
        assert_eq!(actor.generation(), 6);
        assert_eq!(actor.current_name(), "third");
    }

    #[test]
    fn test_invalid_event_is_reported() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        let err = actor.transit(Signal('x')).unwrap_err();
        assert!(err.is_invalid_event());
        assert!(!err.is_submission_failure());
        assert_eq!(actor.current_name(), "first");
        assert_eq!(actor.generation(), 1);
    }

    #[test]
    fn test_cancel_queued_command() {
        let (builder, gate) = gated_ring();
        let actor = actor(builder, QueueKind::Unbounded, 0);

        let first = actor.submit(Command::Transit(Signal('a')));
        gate.wait_entered();
        let second = actor.submit(Command::Transit(Signal('a')));

        assert!(second.cancel());
        assert!(!first.cancel());
        gate.open();

        assert_eq!(first.wait().unwrap().stamp().unwrap().name(), "second");
        assert!(matches!(second.wait(), Err(RuntimeError::Cancelled)));
        assert_eq!(actor.current_name(), "second");
        assert_eq!(actor.generation(), 1);
    }

    #[test]
    fn test_cas_against_queued_commands() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        let generation = actor.generation();

        let winner = actor.submit_if(generation, Command::Transit(Signal('a')));
        let loser = actor.submit_if(generation, Command::Transit(Signal('a')));

        assert!(!winner.wait().unwrap().is_stale());
        assert!(loser.wait().unwrap().is_stale());
        assert_eq!(actor.generation(), generation + 1);
        assert!(actor.transit_if(generation, Signal('a')).unwrap().is_none());
        assert!(actor.transit_if(generation + 1, Signal('a')).unwrap().is_some());
    }

    #[test]
    fn test_non_blocking_queue_rejects_when_full() {
        let (builder, gate) = gated_ring();
        let actor = actor(builder, QueueKind::NonBlocking, 1);

        let running = actor.submit(Command::Transit(Signal('a')));
        gate.wait_entered();
        let queued = actor.submit(Command::Transit(Signal('a')));
        let rejected = actor.submit(Command::Transit(Signal('a')));

        assert!(!queued.is_rejected());
        assert!(rejected.is_rejected());
        let err = rejected.wait().unwrap_err();
        assert!(err.is_submission_failure());
        assert!(matches!(err, RuntimeError::QueueFull { capacity: 1 }));
        assert!(actor.post(Command::Transit(Signal('a'))).is_err());

        gate.open();
        running.wait().unwrap();
        queued.wait().unwrap();
        assert_eq!(actor.current_name(), "third");
    }

    #[test]
    fn test_blocking_queue_waits_for_room() {
        let (builder, gate) = gated_ring();
        let actor = Arc::new(actor(builder, QueueKind::Blocking, 1));

        let running = actor.submit(Command::Transit(Signal('a')));
        gate.wait_entered();
        let queued = actor.submit(Command::Transit(Signal('a')));
        assert!(!queued.is_rejected());

        let (sent_tx, sent_rx) = crossbeam_channel::bounded(1);
        let sender = {
            let actor = actor.clone();
            std::thread::spawn(move || {
                let future = actor.submit(Command::Transit(Signal('a')));
                sent_tx.send(()).unwrap();
                future.wait()
            })
        };

        // The queue is full, so the third submission is still parked.
        assert!(sent_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(actor.queued(), 1);

        gate.open();
        let first = running.wait().unwrap();
        let second = queued.wait().unwrap();
        sent_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let third = sender.join().unwrap().unwrap();

        let generations: Vec<u64> = [first, second, third]
            .iter()
            .map(|reply| reply.stamp().unwrap().generation())
            .collect();
        assert_eq!(generations, vec![1, 2, 3]);
        assert_eq!(actor.current_name(), "first");
    }

    #[test]
    fn test_timeout_queue_rejects_after_waiting() {
        let (builder, gate) = gated_ring();
        let actor = actor(builder, QueueKind::Timeout, 1);

        let running = actor.submit(Command::Transit(Signal('a')));
        gate.wait_entered();
        let _queued = actor.submit(Command::Transit(Signal('a')));
        let rejected = actor.submit(Command::Transit(Signal('a')));
        assert!(rejected.is_rejected());

        gate.open();
        running.wait().unwrap();
    }

    #[test]
    fn test_shutdown_abandons_queued_commands() {
        let (builder, gate) = gated_ring();
        let actor = actor(builder, QueueKind::Unbounded, 0);

        let running = actor.submit(Command::Transit(Signal('a')));
        gate.wait_entered();
        let queued = actor.submit(Command::Transit(Signal('a')));

        let actor = Arc::new(actor);
        let stopper = {
            let actor = actor.clone();
            std::thread::spawn(move || actor.shutdown())
        };
        // Let the worker observe shutdown before releasing the gate.
        while !actor.is_shut_down() {
            std::thread::sleep(Duration::from_millis(1));
        }
        gate.open();
        stopper.join().unwrap();

        assert!(running.wait().is_ok());
        match queued.wait() {
            Err(RuntimeError::ShutDown) => {}
            // The worker may have picked it up before seeing the signal.
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
        assert!(matches!(
            actor.transit(Signal('a')),
            Err(RuntimeError::ShutDown)
        ));
    }

    #[test]
    fn test_reconfigure_through_queue() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        actor.transit(Signal('a')).unwrap();

        let shortcut = ring().transition("second", 'b', Target::node("first"));
        let stamp = actor.reconfigure(shortcut, HashMap::new()).unwrap();
        assert_eq!(stamp.name(), "second");

        actor.transit(Signal('b')).unwrap();
        assert_eq!(actor.current_name(), "first");
    }

    #[tokio::test]
    async fn test_await_submission() {
        let actor = actor(ring(), QueueKind::Unbounded, 0);
        let reply = actor.submit(Command::Transit(Signal('a'))).await.unwrap();
        assert_eq!(reply.stamp().unwrap().generation(), 1);

        let value = actor
            .submit(Command::GetProperty { key: "missing".into() })
            .await
            .unwrap()
            .into_property();
        assert!(value.is_none());
    }
}
