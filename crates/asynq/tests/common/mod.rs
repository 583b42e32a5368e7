//! Shared helpers for queue integration tests

#![allow(dead_code)]

use asynq::{named, Args, Callable, Kwargs, Value};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once; filter from `RUST_LOG`, default `warn`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Integer division of the two positional arguments
pub fn divide() -> impl Callable {
    named("divide", |args: &Args, _: &Kwargs| {
        let x = args[0].as_i64().ok_or("x must be an integer")?;
        let y = args[1].as_i64().ok_or("y must be an integer")?;
        Ok(json!(x / y))
    })
}

/// Callable that appends its first argument to `log` and returns it
pub fn recorder(log: &Arc<Mutex<Vec<Value>>>) -> impl Callable {
    let log = Arc::clone(log);
    named("record", move |args: &Args, _: &Kwargs| {
        let value = args.first().cloned().unwrap_or(Value::Null);
        log.lock().push(value.clone());
        Ok(value)
    })
}

/// Callable that sleeps for its first argument in milliseconds
pub fn sleeper() -> impl Callable {
    named("sleep", |args: &Args, _: &Kwargs| {
        let ms = args[0].as_u64().ok_or("delay must be a non-negative integer")?;
        thread::sleep(Duration::from_millis(ms));
        Ok(json!(ms))
    })
}

/// Positional args from integers
pub fn ints(values: &[i64]) -> Args {
    values.iter().map(|v| json!(v)).collect()
}
