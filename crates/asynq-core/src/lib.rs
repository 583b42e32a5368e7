//! AsynQ Core
//!
//! Building blocks shared by the AsynQ task queue:
//! - Call envelopes (tagged success/failure results with timing)
//! - Call runner (executes one call, never lets a failure escape)
//! - Deferred handles (one-shot completion tokens with continuations)
//! - Pending set (tracks in-flight handles, wait for all / any / fewer than N)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod deferred;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod runner;
pub mod value;

pub use deferred::{Deferred, Handle};
pub use envelope::{CallEnvelope, CallFailure, FailureKind, Outcome, Status};
pub use error::{CallError, PendingError};
pub use pending::{PendingSet, WaitOutcome};
pub use runner::{named, CallRunner, CallStats, Callable, Named};
pub use value::{describe_call, Args, Kwargs, Value};
