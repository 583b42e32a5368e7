//! Deferred handles
//!
//! A [`Deferred`] is a one-shot completion token: it starts pending, is
//! resolved exactly once with a value, and runs every continuation that was
//! attached to it. Threads may also block on it with [`Deferred::wait`].
//!
//! The [`Handle`] trait is the narrow view the pending set needs of any
//! asynchronous operation: attach a continuation, query resolved state.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An asynchronous operation that can report its completion
pub trait Handle {
    /// Register `f` to run once the operation completes, successfully or not.
    ///
    /// If the operation has already completed, `f` runs immediately on the
    /// calling thread.
    fn on_complete(&self, f: Box<dyn FnOnce() + Send>);

    /// Check if the operation has completed
    fn is_resolved(&self) -> bool;
}

type Callback<T> = Box<dyn FnOnce(&T) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Resolved(Arc<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

/// One-shot completion handle
///
/// Clones share the same underlying state.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Deferred<T> {
    /// Create a new pending handle
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Create a handle that is already resolved with `value`
    pub fn resolved(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Resolved(Arc::new(value))),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Resolve the handle with `value`, running all attached callbacks.
    ///
    /// Returns `false` (and drops `value`) if the handle was already resolved.
    /// Callbacks run on the calling thread, after the internal lock has been
    /// released, in the order they were attached. A panicking callback is
    /// logged and does not stop the ones after it.
    pub fn resolve(&self, value: T) -> bool {
        let value = Arc::new(value);
        let callbacks = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Resolved(_) => return false,
                State::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = State::Resolved(Arc::clone(&value));
                    callbacks
                }
            }
        };
        self.inner.resolved.notify_all();

        for callback in callbacks {
            run_callback(callback, &value);
        }
        true
    }

    /// Attach a callback that receives the resolved value.
    ///
    /// Runs immediately if the handle is already resolved. A panic raised
    /// by `f` is logged, never propagated.
    pub fn add_callback<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(f));
                    return;
                }
                State::Resolved(value) => Arc::clone(value),
            }
        };
        run_callback(f, &value);
    }

    /// Check if the handle has been resolved
    pub fn is_resolved(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Resolved(_))
    }

    /// Number of callbacks waiting for resolution
    pub fn callback_count(&self) -> usize {
        match &*self.inner.state.lock() {
            State::Pending(callbacks) => callbacks.len(),
            State::Resolved(_) => 0,
        }
    }

    /// Check if two handles share the same underlying state
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn run_callback<T, F>(f: F, value: &T)
where
    F: FnOnce(&T),
{
    if panic::catch_unwind(AssertUnwindSafe(|| f(value))).is_err() {
        tracing::error!("Deferred callback panicked");
    }
}

impl<T: Clone> Deferred<T> {
    /// Get the value if the handle is resolved, without blocking
    pub fn try_get(&self) -> Option<T> {
        match &*self.inner.state.lock() {
            State::Resolved(value) => Some(T::clone(value)),
            State::Pending(_) => None,
        }
    }

    /// Block the calling thread until the handle is resolved
    pub fn wait(&self) -> T {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Resolved(value) = &*state {
                return T::clone(value);
            }
            self.inner.resolved.wait(&mut state);
        }
    }

    /// Block until the handle is resolved or `timeout` elapses.
    ///
    /// Returns `None` on timeout. The handle itself is unaffected and may
    /// still resolve later.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let State::Resolved(value) = &*state {
                return Some(T::clone(value));
            }
            if self
                .inner
                .resolved
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match &*state {
                    State::Resolved(value) => Some(T::clone(value)),
                    State::Pending(_) => None,
                };
            }
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Handle for Deferred<T> {
    fn on_complete(&self, f: Box<dyn FnOnce() + Send>) {
        self.add_callback(move |_| f());
    }

    fn is_resolved(&self) -> bool {
        Deferred::is_resolved(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_deferred_resolve_once() {
        let d = Deferred::new();
        assert!(!d.is_resolved());

        assert!(d.resolve(1));
        assert!(d.is_resolved());

        // Second resolve is rejected, first value sticks
        assert!(!d.resolve(2));
        assert_eq!(d.try_get(), Some(1));
    }

    #[test]
    fn test_deferred_callbacks_in_order() {
        let d = Deferred::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let log = log.clone();
            d.add_callback(move |v: &i32| log.lock().push((tag, *v)));
        }
        assert_eq!(d.callback_count(), 3);

        d.resolve(7);
        assert_eq!(*log.lock(), vec![(0, 7), (1, 7), (2, 7)]);
        assert_eq!(d.callback_count(), 0);
    }

    #[test]
    fn test_callback_after_resolution_runs_immediately() {
        let d = Deferred::resolved("done".to_string());
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        d.add_callback(move |v: &String| {
            assert_eq!(v, "done");
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_across_threads() {
        let d = Deferred::new();
        let resolver = d.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve(42u32);
        });

        assert_eq!(d.wait(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let d: Deferred<u8> = Deferred::new();
        assert_eq!(d.wait_timeout(Duration::from_millis(10)), None);

        d.resolve(3);
        assert_eq!(d.wait_timeout(Duration::from_millis(10)), Some(3));
    }

    #[test]
    fn test_callback_may_reenter_handle() {
        let d = Deferred::new();
        let inner = d.clone();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        d.add_callback(move |_: &i32| {
            // Already resolved from inside the callback; must not deadlock
            assert!(inner.is_resolved());
            assert!(!inner.resolve(9));
            s.fetch_add(1, Ordering::SeqCst);
        });

        d.resolve(1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_trait_on_complete() {
        let d: Deferred<()> = Deferred::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        Handle::on_complete(&d, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!Handle::is_resolved(&d));

        d.resolve(());
        assert!(Handle::is_resolved(&d));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_skip_siblings() {
        let d = Deferred::new();
        let hits = Arc::new(AtomicUsize::new(0));

        d.add_callback(|_: &i32| panic!("first callback fails"));
        let h = hits.clone();
        d.add_callback(move |_: &i32| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(d.resolve(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(d.try_get(), Some(1));

        // The immediate path swallows the panic as well
        d.add_callback(|_: &i32| panic!("late callback fails"));
        let h = hits.clone();
        d.add_callback(move |_: &i32| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let a: Deferred<i32> = Deferred::new();
        let b = a.clone();
        let c = Deferred::new();

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));

        b.resolve(5);
        assert_eq!(a.try_get(), Some(5));
    }
}
