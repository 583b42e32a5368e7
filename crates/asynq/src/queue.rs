//! Task queue
//!
//! A [`TaskQueue`] holds calls in a priority heap and hands them to a pool of
//! worker threads. Every submitted call gets a [`Deferred`] that resolves with
//! its [`CallEnvelope`], and that handle is also tracked in the queue's own
//! [`PendingSet`] so callers can wait for the whole queue to drain.

use crate::config::{OverflowPolicy, QueueConfig};
use crate::error::QueueError;
use crate::load::LoadInfo;
use crate::priority::{validate_niceness, PriorityKey, SeriesClock, Tier};
use crate::timer::{self, Deadline, DeadlineTimer};
use crate::worker::{Worker, WorkerId};
use asynq_core::{
    describe_call, Args, CallEnvelope, CallFailure, CallRunner, CallStats, Callable, Deferred,
    Kwargs, PendingError, PendingSet, WaitOutcome,
};
use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Scheduling options for [`TaskQueue::call`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// UNIX-style niceness, -20 (most urgent) to 20 (least urgent)
    pub niceness: i32,

    /// Series label. Calls of one series keep their relative order.
    pub series: Option<String>,

    /// Run before every ordinary call
    pub do_next: bool,

    /// Run after every ordinary call. Ignored when `do_next` is set.
    pub do_last: bool,

    /// Time allowed per attempt, counted from dispatch. A call that runs
    /// out of time is retried once ahead of everything else; a second
    /// timeout resolves it with a `Timeout` failure.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Default options: niceness 0, default series
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the niceness
    pub fn niceness(mut self, niceness: i32) -> Self {
        self.niceness = niceness;
        self
    }

    /// Put the call in a series
    pub fn series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    /// Run ahead of every ordinary call
    pub fn do_next(mut self) -> Self {
        self.do_next = true;
        self
    }

    /// Run behind every ordinary call
    pub fn do_last(mut self) -> Self {
        self.do_last = true;
        self
    }

    /// Give each attempt at most `timeout` to finish
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn tier(&self) -> Tier {
        if self.do_next {
            Tier::Next
        } else if self.do_last {
            Tier::Last
        } else {
            Tier::Normal
        }
    }
}

enum Placement {
    Priority(f64),
    Scheduled(CallOptions),
}

/// Attempt value once a call's handle has been resolved
const SETTLED: u32 = u32::MAX;

/// A submitted call, shared by its attempts
pub(crate) struct QueuedCall {
    callable: Box<dyn Callable>,
    args: Args,
    kwargs: Kwargs,
    deferred: Deferred<CallEnvelope>,
    timeout: Option<Duration>,
    /// The only attempt still allowed to resolve the handle
    attempt: AtomicU32,
}

impl QueuedCall {
    pub(crate) fn new(
        callable: Box<dyn Callable>,
        args: Args,
        kwargs: Kwargs,
        deferred: Deferred<CallEnvelope>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            callable,
            args,
            kwargs,
            deferred,
            timeout,
            attempt: AtomicU32::new(0),
        }
    }

    fn describe(&self) -> String {
        describe_call(self.callable.name(), &self.args, &self.kwargs)
    }

    /// Claim the handle for `attempt`. Fails if that attempt timed out.
    fn settle(&self, attempt: u32) -> bool {
        self.attempt
            .compare_exchange(attempt, SETTLED, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    /// Retire `attempt` after a timeout. Fails if it already settled.
    fn supersede(&self, attempt: u32) -> bool {
        self.attempt
            .compare_exchange(attempt, attempt + 1, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }
}

/// A call waiting in the heap
pub(crate) struct QueueItem {
    key: PriorityKey,
    series: Option<String>,
    call: Arc<QueuedCall>,
    attempt: u32,
}

impl QueueItem {
    fn cancel(self) {
        let failure = CallFailure::cancelled("Removed from queue before running")
            .with_call(self.call.describe());
        self.call.settle(self.attempt);
        self.call.deferred.resolve(CallEnvelope::failure(failure));
    }
}

// Reverse ordering for min-heap (smallest key first)
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueueItem {}

struct QueueState {
    heap: BinaryHeap<QueueItem>,
    next_seq: u64,
    series: SeriesClock,
    accepting: bool,
}

/// State shared between the queue handle and its workers
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    /// Signaled when an item is pushed or the queue stops accepting work
    work_ready: Condvar,
    /// Signaled when items leave the heap
    space_ready: Condvar,
    runner: CallRunner,
    pending: PendingSet,
    load: LoadInfo,
    timer: DeadlineTimer,
    config: QueueConfig,
}

impl Shared {
    pub(crate) fn timer(&self) -> &DeadlineTimer {
        &self.timer
    }

    /// Block until an item is available.
    ///
    /// Returns `None` when `stop` is set, or when the queue has stopped
    /// accepting work and the heap is empty.
    pub(crate) fn next_item(&self, stop: &AtomicBool) -> Option<QueueItem> {
        let mut state = self.state.lock();
        loop {
            if stop.load(AtomicOrdering::Acquire) {
                return None;
            }
            if let Some(item) = state.heap.pop() {
                self.load.publish(state.heap.len());
                drop(state);
                self.space_ready.notify_one();
                return Some(item);
            }
            if !state.accepting {
                return None;
            }
            self.work_ready.wait(&mut state);
        }
    }

    /// Run one item and resolve its handle
    pub(crate) fn execute(&self, worker: WorkerId, item: QueueItem) {
        let QueueItem {
            key,
            series,
            call,
            attempt,
        } = item;
        tracing::debug!(worker = %worker, priority = key.priority(), seq = key.seq(), attempt, "Dispatching call");

        if let Some(timeout) = call.timeout {
            self.timer
                .register(Instant::now() + timeout, Arc::clone(&call), attempt, series);
        }

        let envelope = self.runner.invoke(&*call.callable, &call.args, &call.kwargs);

        if !call.settle(attempt) {
            tracing::debug!(worker = %worker, call = %call.describe(), attempt, "Dropping result of timed-out attempt");
            return;
        }
        if let Some(failure) = envelope.failure_info() {
            tracing::warn!(worker = %worker, %failure, "Queued call failed");
        }
        if self.config.spew {
            tracing::info!(
                worker = %worker,
                call = %call.describe(),
                status = %envelope.status(),
                elapsed = envelope.elapsed(),
                "Call done"
            );
        }
        call.deferred.resolve(envelope);
    }

    /// Handle a passed deadline: retry the first attempt, give up on the second.
    ///
    /// A retry goes ahead of every queued call and is not subject to
    /// `max_queued`. Once the queue has stopped accepting work a timed-out
    /// call is failed without a retry.
    pub(crate) fn expire(&self, deadline: Deadline) {
        let Deadline {
            call,
            attempt,
            series,
            ..
        } = deadline;
        if !call.supersede(attempt) {
            return;
        }
        let timeout = call.timeout.unwrap_or_default();

        if attempt == 0 {
            let mut state = self.state.lock();
            if state.accepting {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.heap.push(QueueItem {
                    key: PriorityKey::new(Tier::Next, 0.0, seq),
                    series,
                    call: Arc::clone(&call),
                    attempt: attempt + 1,
                });
                self.load.publish(state.heap.len());
                drop(state);

                self.work_ready.notify_one();
                tracing::warn!(call = %call.describe(), ?timeout, "Call timed out, retrying");
                return;
            }
        }

        let message = if attempt == 0 {
            format!("Timed out after {:?}", timeout)
        } else {
            "Timed out after two tries, gave up".to_string()
        };
        let failure = CallFailure::timeout(message).with_call(call.describe());
        tracing::warn!(%failure, "Call timed out");
        call.settle(attempt + 1);
        call.deferred.resolve(CallEnvelope::failure(failure));
    }
}

/// Priority-ordered queue of calls served by a pool of worker threads
pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    next_worker_id: AtomicU64,
    closed: AtomicBool,
}

impl TaskQueue {
    /// Create a queue and start `config.workers` workers (0 = one per CPU)
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let count = config.effective_workers();
        let queue = Self::idle(config)?;
        for _ in 0..count {
            queue.attach_worker()?;
        }
        tracing::debug!(workers = count, "Task queue started");
        Ok(queue)
    }

    /// Create a queue without any workers.
    ///
    /// Calls are queued but nothing runs until a worker is attached with
    /// [`attach_worker`](Self::attach_worker).
    pub fn idle(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                series: SeriesClock::new(),
                accepting: true,
            }),
            work_ready: Condvar::new(),
            space_ready: Condvar::new(),
            runner: CallRunner::new(config.collect_stats),
            pending: PendingSet::new(),
            load: LoadInfo::new(),
            timer: DeadlineTimer::new(),
            config,
        });
        let timer_thread = DeadlineTimer::spawn(Arc::clone(&shared)).map_err(QueueError::Spawn)?;
        Ok(Self {
            shared,
            workers: Mutex::new(Vec::new()),
            timer_thread: Mutex::new(Some(timer_thread)),
            next_worker_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a call at an explicit priority. Lower values run first; equal
    /// priorities run in submission order.
    ///
    /// With a `max_queued` limit in place this either fails with
    /// [`QueueError::Full`] or blocks until a worker takes an item, depending
    /// on the overflow policy. Blocking with no workers attached waits until
    /// one is attached or the queue shuts down.
    pub fn submit<C>(
        &self,
        priority: f64,
        callable: C,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<Deferred<CallEnvelope>, QueueError>
    where
        C: Callable + 'static,
    {
        self.enqueue(Placement::Priority(priority), Box::new(callable), args, kwargs)
    }

    /// Queue a call scheduled by niceness and series
    pub fn call<C>(
        &self,
        callable: C,
        args: Args,
        kwargs: Kwargs,
        options: CallOptions,
    ) -> Result<Deferred<CallEnvelope>, QueueError>
    where
        C: Callable + 'static,
    {
        validate_niceness(options.niceness)?;
        self.enqueue(Placement::Scheduled(options), Box::new(callable), args, kwargs)
    }

    fn enqueue(
        &self,
        placement: Placement,
        callable: Box<dyn Callable>,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<Deferred<CallEnvelope>, QueueError> {
        let timeout = match &placement {
            Placement::Scheduled(options) => options.timeout,
            Placement::Priority(_) => None,
        };
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        loop {
            if !state.accepting {
                return Err(QueueError::ShutDown);
            }
            match shared.config.max_queued {
                Some(limit) if state.heap.len() >= limit => match shared.config.overflow {
                    OverflowPolicy::Reject => return Err(QueueError::Full { limit }),
                    OverflowPolicy::Block => shared.space_ready.wait(&mut state),
                },
                _ => break,
            }
        }

        let (key, series) = {
            let seq = state.next_seq;
            match placement {
                Placement::Priority(priority) => (PriorityKey::new(Tier::Normal, priority, seq), None),
                Placement::Scheduled(options) => {
                    let priority = state
                        .series
                        .priority(options.niceness, options.series.as_deref())?;
                    (PriorityKey::new(options.tier(), priority, seq), options.series)
                }
            }
        };
        state.next_seq += 1;

        // Tracked before it becomes visible to workers
        let deferred = Deferred::new();
        shared.pending.put(&deferred);
        let call = QueuedCall::new(callable, args, kwargs, deferred.clone(), timeout);
        state.heap.push(QueueItem {
            key,
            series,
            call: Arc::new(call),
            attempt: 0,
        });
        shared.load.publish(state.heap.len());
        drop(state);

        shared.work_ready.notify_one();
        Ok(deferred)
    }

    /// Remove every queued call of `series`.
    ///
    /// The removed calls resolve with a `Cancelled` failure. Calls already
    /// running are unaffected. The series' serial is dropped unless new
    /// calls of it were queued meanwhile. Returns the number removed.
    pub fn cancel_series(&self, series: &str) -> usize {
        let count = self.cancel_where(|item| item.series.as_deref() == Some(series));

        let mut state = self.shared.state.lock();
        if !state.heap.iter().any(|item| item.series.as_deref() == Some(series)) {
            state.series.forget(series);
        }
        count
    }

    /// Number of series with a serial counter
    pub fn series_count(&self) -> usize {
        self.shared.state.lock().series.series_count()
    }

    /// Remove every queued call. Returns the number removed.
    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    fn cancel_where(&self, select: impl Fn(&QueueItem) -> bool) -> usize {
        let removed: Vec<QueueItem> = {
            let mut state = self.shared.state.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.heap)
                .into_vec()
                .into_iter()
                .partition(|item| select(item));
            state.heap = BinaryHeap::from(kept);
            if !removed.is_empty() {
                self.shared.load.publish(state.heap.len());
            }
            removed
        };
        if removed.is_empty() {
            return 0;
        }
        self.shared.space_ready.notify_all();

        let count = removed.len();
        tracing::debug!(count, "Cancelled queued calls");
        for item in removed {
            item.cancel();
        }
        count
    }

    /// Start another worker thread
    pub fn attach_worker(&self) -> Result<WorkerId, QueueError> {
        if !self.is_running() {
            return Err(QueueError::ShutDown);
        }
        let id = WorkerId(self.next_worker_id.fetch_add(1, AtomicOrdering::Relaxed));
        let worker = Worker::spawn(id, Arc::clone(&self.shared)).map_err(QueueError::Spawn)?;
        self.workers.lock().push(worker);
        Ok(id)
    }

    /// Stop and join a worker once it finishes its current call.
    ///
    /// Returns `false` if no worker has that ID.
    pub fn detach_worker(&self, id: WorkerId) -> bool {
        let worker = {
            let mut workers = self.workers.lock();
            match workers.iter().position(|w| w.id() == id) {
                Some(index) => workers.swap_remove(index),
                None => return false,
            }
        };
        worker.signal_stop();

        // Wake it if it is idle
        drop(self.shared.state.lock());
        self.shared.work_ready.notify_all();

        worker.join();
        tracing::debug!(worker = %id, "Worker detached");
        true
    }

    /// Number of attached workers
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Number of calls waiting to be dispatched
    pub fn queued(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Number of calls submitted but not yet resolved
    pub fn outstanding(&self) -> usize {
        self.shared.pending.count()
    }

    /// The set tracking every submitted call
    pub fn pending(&self) -> &PendingSet {
        &self.shared.pending
    }

    /// Block until every submitted call has resolved
    pub fn wait_all(&self) -> WaitOutcome {
        self.shared.pending.wait_all()
    }

    /// Block until fewer than `n` submitted calls are unresolved
    pub fn wait_until_fewer(&self, n: i64) -> Result<WaitOutcome, PendingError> {
        self.shared.pending.wait_until_fewer(n)
    }

    /// Receive the queued count every time it goes up or down
    pub fn subscribe(&self) -> Receiver<usize> {
        self.shared.load.subscribe()
    }

    /// Load publisher, for pausing and resuming updates
    pub fn load_info(&self) -> &LoadInfo {
        &self.shared.load
    }

    /// Recorded call times in seconds (empty unless `collect_stats` is on)
    pub fn stats(&self) -> Vec<f64> {
        self.shared.runner.stats()
    }

    /// Summary of the recorded call times
    pub fn summary(&self) -> Option<CallStats> {
        self.shared.runner.summary()
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Check if the queue still accepts work
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Stop accepting work, let the workers drain the queue and join them.
    ///
    /// Calls still queued once the workers are gone (a queue with no
    /// workers) are cancelled. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.state.lock().accepting = false;
        self.shared.work_ready.notify_all();
        self.shared.space_ready.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.join();
        }

        let orphaned = self.cancel_all();
        if orphaned > 0 {
            tracing::warn!(orphaned, "Cancelled calls left without workers at shutdown");
        }

        self.shared.timer.stop();
        if let Some(handle) = self.timer_thread.lock().take() {
            timer::join(handle);
        }

        if !self.closed.swap(true, AtomicOrdering::AcqRel) {
            self.shared.load.close();
            tracing::debug!("Task queue shut down");
        }
    }

    /// Cancel everything still queued, then shut down.
    ///
    /// Returns the number of calls cancelled.
    pub fn shutdown_now(&self) -> usize {
        self.shared.state.lock().accepting = false;
        self.shared.space_ready.notify_all();
        let cancelled = self.cancel_all();
        self.shutdown();
        cancelled
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .field("outstanding", &self.outstanding())
            .field("running", &self.is_running())
            .finish()
    }
}
