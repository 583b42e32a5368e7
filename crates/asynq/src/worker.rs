//! Worker threads that run queued calls

use crate::queue::Shared;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Identifier of a worker attached to a [`TaskQueue`](crate::TaskQueue)
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub(crate) u64);

impl WorkerId {
    /// Raw numeric ID
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker thread pulling items off a queue
pub(crate) struct Worker {
    /// Worker ID
    id: WorkerId,

    /// Set to stop the worker after its current item
    stop: Arc<AtomicBool>,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread for `shared`
    pub(crate) fn spawn(id: WorkerId, shared: Arc<Shared>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("asynq-worker-{}", id))
            .spawn(move || Worker::run_loop(id, &shared, &flag))?;

        Ok(Self {
            id,
            stop,
            handle: Some(handle),
        })
    }

    /// Worker ID
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Ask the worker to exit once its current item is done
    pub(crate) fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the worker thread to exit.
    ///
    /// A worker joining itself (a call that shuts down its own queue) is
    /// detached instead.
    pub(crate) fn join(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!(worker = %self.id, "Worker thread panicked");
        }
    }

    /// Worker thread main loop
    fn run_loop(id: WorkerId, shared: &Shared, stop: &AtomicBool) {
        tracing::debug!(worker = %id, "Worker started");
        while let Some(item) = shared.next_item(stop) {
            shared.execute(id, item);
        }
        tracing::debug!(worker = %id, "Worker stopped");
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("stopping", &self.stop.load(Ordering::Acquire))
            .finish()
    }
}
