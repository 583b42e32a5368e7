//! Call runner
//!
//! [`CallRunner`] executes one unit of work and turns whatever happens into a
//! [`CallEnvelope`]. Returned errors and panics alike become failure
//! envelopes, so a dispatching worker can keep servicing other work after a
//! call goes wrong.

use crate::envelope::{CallEnvelope, CallFailure};
use crate::error::CallError;
use crate::value::{describe_call, Args, Kwargs, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// A unit of work callable with positional and keyword arguments
pub trait Callable: Send + Sync {
    /// Run the call
    fn call(&self, args: &Args, kwargs: &Kwargs) -> Result<Value, CallError>;

    /// Name used in logs and failure descriptions
    fn name(&self) -> &str {
        "<callable>"
    }
}

impl<F> Callable for F
where
    F: Fn(&Args, &Kwargs) -> Result<Value, CallError> + Send + Sync,
{
    fn call(&self, args: &Args, kwargs: &Kwargs) -> Result<Value, CallError> {
        self(args, kwargs)
    }
}

/// A callable with a name attached
pub struct Named<F> {
    name: String,
    f: F,
}

impl<F> Callable for Named<F>
where
    F: Fn(&Args, &Kwargs) -> Result<Value, CallError> + Send + Sync,
{
    fn call(&self, args: &Args, kwargs: &Kwargs) -> Result<Value, CallError> {
        (self.f)(args, kwargs)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Give a closure a name for logs and failure descriptions
pub fn named<F>(name: impl Into<String>, f: F) -> Named<F>
where
    F: Fn(&Args, &Kwargs) -> Result<Value, CallError> + Send + Sync,
{
    Named {
        name: name.into(),
        f,
    }
}

/// Summary of collected call times, in seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStats {
    /// Number of timed calls
    pub count: usize,

    /// Fastest call
    pub min: f64,

    /// Slowest call
    pub max: f64,

    /// Mean call time
    pub mean: f64,
}

impl CallStats {
    /// Summarize a list of call times. Returns `None` for an empty list.
    pub fn from_times(times: &[f64]) -> Option<Self> {
        if times.is_empty() {
            return None;
        }
        let (min, max, sum) = times.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &t| (min.min(t), max.max(t), sum + t),
        );
        Some(Self {
            count: times.len(),
            min,
            max,
            mean: sum / times.len() as f64,
        })
    }
}

/// Executes calls and wraps their results in envelopes
pub struct CallRunner {
    collect_stats: bool,
    call_times: Mutex<Vec<f64>>,
}

impl CallRunner {
    /// Create a runner. With `collect_stats`, every call's duration is
    /// recorded and attached to its envelope.
    pub fn new(collect_stats: bool) -> Self {
        Self {
            collect_stats,
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Check if call times are being collected
    pub fn collects_stats(&self) -> bool {
        self.collect_stats
    }

    /// Run `callable` with the given arguments. Never panics.
    pub fn invoke<C>(&self, callable: &C, args: &Args, kwargs: &Kwargs) -> CallEnvelope
    where
        C: Callable + ?Sized,
    {
        let envelope = self.execute(|| callable.call(args, kwargs));
        if envelope.is_success() {
            return envelope;
        }

        let envelope = envelope
            .map_failure(|failure| failure.with_call(describe_call(callable.name(), args, kwargs)));
        if let Some(failure) = envelope.failure_info() {
            tracing::debug!(%failure, "Call failed");
        }
        envelope
    }

    /// Run a typed closure. Errors and panics become failure envelopes.
    pub fn run<T, E, F>(&self, f: F) -> CallEnvelope<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let envelope = self.execute(f);
        if let Some(failure) = envelope.failure_info() {
            tracing::debug!(%failure, "Call failed");
        }
        envelope
    }

    fn execute<T, E, F>(&self, f: F) -> CallEnvelope<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let elapsed = start.elapsed().as_secs_f64();

        let envelope = match result {
            Ok(Ok(value)) => CallEnvelope::success(value),
            Ok(Err(e)) => CallEnvelope::failure(CallFailure::error(e.to_string())),
            Err(payload) => CallEnvelope::failure(CallFailure::panic(panic_message(&*payload))),
        };

        if self.collect_stats {
            self.call_times.lock().push(elapsed);
            envelope.with_elapsed(elapsed)
        } else {
            envelope
        }
    }

    /// Copy of the recorded call times, in call order
    pub fn stats(&self) -> Vec<f64> {
        self.call_times.lock().clone()
    }

    /// Take the recorded call times, leaving the record empty
    pub fn take_stats(&self) -> Vec<f64> {
        std::mem::take(&mut *self.call_times.lock())
    }

    /// Summary of the recorded call times
    pub fn summary(&self) -> Option<CallStats> {
        CallStats::from_times(&self.call_times.lock())
    }
}

impl Default for CallRunner {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for CallRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRunner")
            .field("collect_stats", &self.collect_stats)
            .field("recorded", &self.call_times.lock().len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
