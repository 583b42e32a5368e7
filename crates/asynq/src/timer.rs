//! Deadline thread for call timeouts
//!
//! A call with a timeout registers a deadline when a worker starts running
//! it. The timer thread waits on a condvar until the earliest deadline and
//! hands expired entries back to the queue, which decides whether the call
//! is retried or given up on.

use crate::queue::{QueuedCall, Shared};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Entry in the deadline heap
pub(crate) struct Deadline {
    /// When the attempt times out
    at: Instant,
    /// Registration order, for ties
    seq: u64,
    /// The call being timed
    pub(crate) call: Arc<QueuedCall>,
    /// Which attempt of the call this deadline belongs to
    pub(crate) attempt: u32,
    /// Series label, kept for a retry
    pub(crate) series: Option<String>,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Deadline {}

#[derive(Default)]
struct TimerState {
    deadlines: BinaryHeap<Deadline>,
    next_seq: u64,
}

/// Deadlines of running calls, served by one timer thread
#[derive(Default)]
pub(crate) struct DeadlineTimer {
    state: Mutex<TimerState>,
    /// Wakes the timer thread on a new deadline or on shutdown
    notify: Condvar,
    shutdown: AtomicBool,
}

impl DeadlineTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start the timer thread for `shared`
    pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("asynq-timer".to_string())
            .spawn(move || {
                tracing::debug!("Timer thread started");
                while let Some(expired) = shared.timer().next_expired() {
                    for deadline in expired {
                        shared.expire(deadline);
                    }
                }
                tracing::debug!("Timer thread stopped");
            })
    }

    /// Time out `attempt` of `call` at `at`
    pub(crate) fn register(
        &self,
        at: Instant,
        call: Arc<QueuedCall>,
        attempt: u32,
        series: Option<String>,
    ) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.deadlines.push(Deadline {
            at,
            seq,
            call,
            attempt,
            series,
        });
        // It may need to wake earlier than currently scheduled
        self.notify.notify_one();
    }

    /// Block until at least one deadline has passed and take all that have.
    ///
    /// Returns `None` once the timer is stopped.
    fn next_expired(&self) -> Option<Vec<Deadline>> {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                return None;
            }
            let now = Instant::now();
            match state.deadlines.peek().map(|d| d.at) {
                Some(at) if at <= now => break,
                Some(at) => {
                    self.notify.wait_until(&mut state, at);
                }
                None => self.notify.wait(&mut state),
            }
        }

        let now = Instant::now();
        let mut expired = Vec::new();
        while state.deadlines.peek().is_some_and(|d| d.at <= now) {
            if let Some(deadline) = state.deadlines.pop() {
                expired.push(deadline);
            }
        }
        Some(expired)
    }

    /// Ask the timer thread to exit. Deadlines not yet reached are dropped.
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        let dropped = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.deadlines).len()
        };
        self.notify.notify_all();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped pending call deadlines");
        }
    }
}

/// Wait for the timer thread to exit, unless called from it
pub(crate) fn join(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("Timer thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asynq_core::{CallError, Deferred, Kwargs, Value};
    use std::time::Duration;

    fn call() -> Arc<QueuedCall> {
        let noop = |_: &asynq_core::Args, _: &Kwargs| Ok::<_, CallError>(Value::Null);
        Arc::new(QueuedCall::new(
            Box::new(noop),
            Vec::new(),
            Kwargs::new(),
            Deferred::new(),
            None,
        ))
    }

    #[test]
    fn test_earliest_deadline_expires_first() {
        let timer = DeadlineTimer::new();
        let now = Instant::now();
        timer.register(now + Duration::from_millis(200), call(), 1, None);
        timer.register(now, call(), 0, Some("a".to_string()));
        timer.register(now + Duration::from_secs(60), call(), 2, None);

        let first = timer.next_expired().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempt, 0);
        assert_eq!(first[0].series.as_deref(), Some("a"));

        // Blocks until the 200ms deadline, leaving the distant one queued
        let second = timer.next_expired().unwrap();
        assert_eq!(second.iter().map(|d| d.attempt).collect::<Vec<_>>(), vec![1]);
        assert!(Instant::now() >= now + Duration::from_millis(200));
    }

    #[test]
    fn test_stop_wakes_waiting_thread() {
        let timer = Arc::new(DeadlineTimer::new());
        timer.register(Instant::now() + Duration::from_secs(60), call(), 0, None);

        let waiter = {
            let timer = Arc::clone(&timer);
            thread::spawn(move || timer.next_expired().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        timer.stop();
        assert!(waiter.join().unwrap());
    }
}
