//! Pluggable executors for [`PoolActor`](crate::PoolActor).
//!
//! A pool actor never owns threads. It hands short drain jobs to whatever
//! executor the application already runs: a rayon pool, a tokio runtime's
//! blocking pool, or anything implementing [`Executor`].

use crate::error::RuntimeError;
use std::sync::Arc;

/// Unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on some set of threads, in any order.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

impl Executor for rayon::ThreadPool {
    fn execute(&self, job: Job) {
        self.spawn(job);
    }
}

impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        // Callbacks may block, so keep them off the async workers.
        drop(self.spawn_blocking(job));
    }
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Builds a named rayon pool; `threads == 0` means one per CPU.
pub fn rayon_pool(threads: usize) -> Result<Arc<rayon::ThreadPool>, RuntimeError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("fsmkit-pool-{}", i))
        .build()
        .map(Arc::new)
        .map_err(|e| RuntimeError::Executor(e.to_string()))
}
