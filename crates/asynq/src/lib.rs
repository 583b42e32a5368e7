//! AsynQ
//!
//! Priority task queue served by a pool of worker threads:
//! - **Queue**: calls ordered by priority, or by niceness within series (`queue`, `priority`)
//! - **Workers**: attachable/detachable worker threads (`worker`)
//! - **Timeouts**: per-call deadlines with one retry (`timer`)
//! - **Load**: queued-count subscriptions (`load`)
//! - **Config**: TOML-loadable queue settings (`config`)
//!
//! Every call resolves a [`Deferred`] with a [`CallEnvelope`]; failures are
//! captured in the envelope and never stop a worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use asynq::{named, CallOptions, Kwargs, QueueConfig, TaskQueue};
//! use serde_json::json;
//!
//! let queue = TaskQueue::new(QueueConfig::with_workers(2))?;
//! let divide = named("divide", |args, _| {
//!     let x = args[0].as_i64().ok_or("x must be an integer")?;
//!     let y = args[1].as_i64().ok_or("y must be an integer")?;
//!     Ok(json!(x / y))
//! });
//!
//! let d = queue.call(divide, vec![json!(1000), json!(2)], Kwargs::new(), CallOptions::new())?;
//! assert_eq!(d.wait().value(), Some(&json!(500)));
//! queue.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod load;
pub mod priority;
pub mod queue;
mod timer;
pub mod worker;

pub use config::{OverflowPolicy, QueueConfig};
pub use error::{ConfigError, QueueError};
pub use load::LoadInfo;
pub use priority::{PriorityKey, SeriesClock, Tier};
pub use queue::{CallOptions, TaskQueue};
pub use worker::WorkerId;

pub use asynq_core::{
    named, Args, CallEnvelope, CallError, CallFailure, CallRunner, CallStats, Callable, Deferred,
    FailureKind, Handle, Kwargs, Outcome, PendingError, PendingSet, Status, Value, WaitOutcome,
};
