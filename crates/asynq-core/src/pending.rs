//! Pending set: tracking of outstanding asynchronous handles
//!
//! A [`PendingSet`] observes handles it is given with [`PendingSet::put`] and
//! lets callers wait until all of them, any one of them, or all but fewer
//! than N of them have completed. It never creates, owns or cancels the
//! handles it tracks.
//!
//! Both collections (outstanding handles and registered waiters) live under a
//! single mutex. A resolution re-evaluates the waiters inside the same
//! critical section that removes the handle, so a `put` can never slip in
//! between a resolution and the zero check it triggers. Satisfied waiters are
//! resolved after the lock is released, which lets their callbacks call back
//! into the set.

use crate::deferred::{Deferred, Handle};
use crate::error::PendingError;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How a wait ended
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The wait condition was met
    Satisfied,
    /// The wait was released early by [`PendingSet::quit_waiting`]
    Released,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Condition {
    /// Outstanding count is zero
    All,
    /// Any handle resolved after registration
    Any,
    /// Outstanding count is strictly below the threshold
    Fewer(usize),
}

impl Condition {
    fn is_met(self, outstanding: usize, resolution: bool) -> bool {
        match self {
            Condition::All => outstanding == 0,
            Condition::Any => resolution,
            Condition::Fewer(n) => outstanding < n,
        }
    }
}

struct Waiter {
    id: u64,
    condition: Condition,
    deferred: Deferred<WaitOutcome>,
}

#[derive(Default)]
struct PendingState {
    outstanding: FxHashSet<u64>,
    waiters: Vec<Waiter>,
    next_handle_id: u64,
    next_waiter_id: u64,
}

impl PendingState {
    /// Remove and return every waiter satisfied by a resolution that just happened
    fn take_satisfied(&mut self) -> Vec<Deferred<WaitOutcome>> {
        let outstanding = self.outstanding.len();
        if self.waiters.is_empty() {
            return Vec::new();
        }
        let (ready, waiting): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.condition.is_met(outstanding, true));
        self.waiters = waiting;
        ready.into_iter().map(|w| w.deferred).collect()
    }
}

fn release(waiters: Vec<Deferred<WaitOutcome>>, outcome: WaitOutcome) {
    for deferred in waiters {
        deferred.resolve(outcome);
    }
}

/// Tracker of outstanding handles with all / any / fewer-than-N waits
///
/// Cloning a `PendingSet` yields another reference to the same set.
#[derive(Clone, Default)]
pub struct PendingSet {
    state: Arc<Mutex<PendingState>>,
}

impl PendingSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `handle` until it completes.
    ///
    /// Completion with a success or a failure is treated the same. A handle
    /// that has already completed is counted and removed immediately.
    pub fn put<H: Handle + ?Sized>(&self, handle: &H) {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_handle_id;
            state.next_handle_id += 1;
            state.outstanding.insert(id);
            id
        };

        let set = Arc::downgrade(&self.state);
        handle.on_complete(Box::new(move || Self::handle_completed(&set, id)));
    }

    fn handle_completed(set: &Weak<Mutex<PendingState>>, id: u64) {
        let Some(state) = set.upgrade() else {
            return;
        };
        let ready = {
            let mut state = state.lock();
            if !state.outstanding.remove(&id) {
                return;
            }
            state.take_satisfied()
        };
        release(ready, WaitOutcome::Satisfied);
    }

    /// Handle that resolves once no handles are outstanding.
    ///
    /// Handles put after this call but before it resolves are waited for too.
    /// Resolves immediately if the set is empty.
    pub fn defer_to_all(&self) -> Deferred<WaitOutcome> {
        self.register(Condition::All).1
    }

    /// Handle that resolves when any outstanding handle completes.
    ///
    /// Only completions after this call count. With nothing outstanding it
    /// stays pending until a handle put later completes, or until
    /// [`quit_waiting`](Self::quit_waiting).
    pub fn defer_to_any(&self) -> Deferred<WaitOutcome> {
        self.register(Condition::Any).1
    }

    /// Handle that resolves once strictly fewer than `n` handles are
    /// outstanding. `n == 0` is the same as [`defer_to_all`](Self::defer_to_all).
    pub fn defer_until_fewer(&self, n: i64) -> Result<Deferred<WaitOutcome>, PendingError> {
        let condition = match usize::try_from(n) {
            Err(_) => return Err(PendingError::NegativeThreshold(n)),
            Ok(0) => Condition::All,
            Ok(n) => Condition::Fewer(n),
        };
        Ok(self.register(condition).1)
    }

    fn register(&self, condition: Condition) -> (Option<u64>, Deferred<WaitOutcome>) {
        let mut state = self.state.lock();
        if condition.is_met(state.outstanding.len(), false) {
            return (None, Deferred::resolved(WaitOutcome::Satisfied));
        }
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let deferred = Deferred::new();
        state.waiters.push(Waiter {
            id,
            condition,
            deferred: deferred.clone(),
        });
        (Some(id), deferred)
    }

    /// Release every pending waiter now, whether or not its condition holds.
    ///
    /// Tracked handles are untouched and keep being removed as they complete.
    /// Returns the number of waiters released.
    pub fn quit_waiting(&self) -> usize {
        let waiters = std::mem::take(&mut self.state.lock().waiters);
        let released = waiters.len();
        if released > 0 {
            tracing::debug!(released, "Releasing pending-set waiters");
        }
        release(
            waiters.into_iter().map(|w| w.deferred).collect(),
            WaitOutcome::Released,
        );
        released
    }

    /// Number of outstanding handles
    pub fn count(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Check if no handles are outstanding
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Number of registered waiters that have not been released yet
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Block until no handles are outstanding
    pub fn wait_all(&self) -> WaitOutcome {
        self.defer_to_all().wait()
    }

    /// Block until any outstanding handle completes
    pub fn wait_any(&self) -> WaitOutcome {
        self.defer_to_any().wait()
    }

    /// Block until fewer than `n` handles are outstanding
    pub fn wait_until_fewer(&self, n: i64) -> Result<WaitOutcome, PendingError> {
        Ok(self.defer_until_fewer(n)?.wait())
    }

    /// Block until no handles are outstanding or `timeout` elapses.
    ///
    /// On timeout the waiter is unregistered and `None` is returned.
    pub fn wait_all_timeout(&self, timeout: Duration) -> Option<WaitOutcome> {
        self.wait_timeout(Condition::All, timeout)
    }

    /// Block until any outstanding handle completes or `timeout` elapses.
    ///
    /// On timeout the waiter is unregistered and `None` is returned.
    pub fn wait_any_timeout(&self, timeout: Duration) -> Option<WaitOutcome> {
        self.wait_timeout(Condition::Any, timeout)
    }

    fn wait_timeout(&self, condition: Condition, timeout: Duration) -> Option<WaitOutcome> {
        let (id, deferred) = self.register(condition);
        if let Some(outcome) = deferred.wait_timeout(timeout) {
            return Some(outcome);
        }
        let Some(id) = id else {
            return deferred.try_get();
        };
        let removed = {
            let mut state = self.state.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != id);
            state.waiters.len() < before
        };
        if removed {
            None
        } else {
            // Already taken for release; resolution follows outside the lock
            Some(deferred.wait())
        }
    }
}

impl std::fmt::Debug for PendingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingSet")
            .field("outstanding", &state.outstanding.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
