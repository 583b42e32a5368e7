//! Call envelopes: the tagged result of running one call
//!
//! A [`CallEnvelope`] is created fresh by the runner for every invocation and
//! never mutated afterwards. It carries either the call's return value or a
//! description of why it failed, plus the elapsed time when the runner was
//! collecting stats.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short status tag of an envelope
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// The call ran and returned a result
    Result,
    /// The call failed
    Error,
}

impl Status {
    /// Single-character tag (`'r'` or `'e'`)
    pub fn as_char(self) -> char {
        match self {
            Status::Result => 'r',
            Status::Error => 'e',
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// How a call failed
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The callable returned an error
    Error,
    /// The callable panicked
    Panic,
    /// The call was removed from a queue before it ran
    Cancelled,
    /// The call ran out of time
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Error => "Error",
            FailureKind::Panic => "Panic",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// Description of a failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} '{message}'{}", .call.as_ref().map(|c| format!(" in {}", c)).unwrap_or_default())]
pub struct CallFailure {
    kind: FailureKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call: Option<String>,
}

impl CallFailure {
    /// Create a failure of the given kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            call: None,
        }
    }

    /// Failure for a callable that returned an error
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    /// Failure for a callable that panicked
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Panic, message)
    }

    /// Failure for a call that was cancelled before running
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    /// Failure for a call that did not finish in time
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Attach the description of the call that failed
    pub fn with_call(mut self, call: impl Into<String>) -> Self {
        self.call = Some(call.into());
        self
    }

    /// Kind of failure
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Failure message (error text or panic payload)
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Description of the failed call, if known
    pub fn call(&self) -> Option<&str> {
        self.call.as_deref()
    }
}

/// Success value or failure description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result")]
pub enum Outcome<T> {
    /// The call returned a value
    #[serde(rename = "r")]
    Success(T),
    /// The call failed
    #[serde(rename = "e")]
    Failure(CallFailure),
}

/// Tagged result of one call, with optional timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope<T = Value> {
    outcome: Outcome<T>,
    /// Elapsed execution time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elapsed: Option<f64>,
}

impl<T> CallEnvelope<T> {
    /// Envelope for a successful call
    pub fn success(value: T) -> Self {
        Self {
            outcome: Outcome::Success(value),
            elapsed: None,
        }
    }

    /// Envelope for a failed call
    pub fn failure(failure: CallFailure) -> Self {
        Self {
            outcome: Outcome::Failure(failure),
            elapsed: None,
        }
    }

    /// Attach the measured execution time in seconds
    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed = Some(seconds);
        self
    }

    /// Status tag of this envelope
    pub fn status(&self) -> Status {
        match self.outcome {
            Outcome::Success(_) => Status::Result,
            Outcome::Failure(_) => Status::Error,
        }
    }

    /// Check if the call succeeded
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Check if the call failed
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// The outcome of the call
    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure description, if any
    pub fn failure_info(&self) -> Option<&CallFailure> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// Elapsed execution time in seconds, if it was measured
    pub fn elapsed(&self) -> Option<f64> {
        self.elapsed
    }

    /// Transform the failure description, keeping success values and timing
    pub fn map_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(CallFailure) -> CallFailure,
    {
        let outcome = match self.outcome {
            Outcome::Failure(failure) => Outcome::Failure(f(failure)),
            success => success,
        };
        Self {
            outcome,
            elapsed: self.elapsed,
        }
    }

    /// Convert into a standard `Result`, dropping the timing
    pub fn into_result(self) -> Result<T, CallFailure> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let env = CallEnvelope::success(json!(500));
        assert!(env.is_success());
        assert_eq!(env.status(), Status::Result);
        assert_eq!(env.status().as_char(), 'r');
        assert_eq!(env.value(), Some(&json!(500)));
        assert!(env.failure_info().is_none());
        assert_eq!(env.elapsed(), None);
    }

    #[test]
    fn test_failure_envelope() {
        let failure = CallFailure::panic("attempt to divide by zero").with_call("divide(1, 0)");
        let env: CallEnvelope = CallEnvelope::failure(failure.clone());

        assert!(env.is_failure());
        assert_eq!(env.status().to_string(), "e");
        assert_eq!(env.failure_info(), Some(&failure));
        assert_eq!(env.into_result(), Err(failure));
    }

    #[test]
    fn test_failure_display() {
        let failure = CallFailure::error("boom").with_call("f()");
        assert_eq!(failure.to_string(), "Error 'boom' in f()");

        let bare = CallFailure::cancelled("series dropped");
        assert_eq!(bare.to_string(), "Cancelled 'series dropped'");
        assert_eq!(bare.call(), None);

        let late = CallFailure::timeout("Timed out after two tries, gave up").with_call("slow()");
        assert_eq!(late.kind(), FailureKind::Timeout);
        assert_eq!(late.to_string(), "Timeout 'Timed out after two tries, gave up' in slow()");
        assert_eq!(serde_json::to_value(late.kind()).unwrap(), json!("timeout"));
    }

    #[test]
    fn test_map_failure_keeps_timing() {
        let env: CallEnvelope = CallEnvelope::failure(CallFailure::error("boom")).with_elapsed(0.5);
        let env = env.map_failure(|f| f.with_call("g(1)"));
        assert_eq!(env.failure_info().unwrap().call(), Some("g(1)"));
        assert_eq!(env.elapsed(), Some(0.5));

        let ok = CallEnvelope::success(1).map_failure(|f| f.with_call("unused"));
        assert_eq!(ok.value(), Some(&1));
    }

    #[test]
    fn test_envelope_wire_format() {
        let env = CallEnvelope::success(json!(500)).with_elapsed(0.25);
        let encoded = serde_json::to_value(&env).unwrap();
        assert_eq!(
            encoded,
            json!({"outcome": {"status": "r", "result": 500}, "elapsed": 0.25})
        );

        let failed: CallEnvelope = CallEnvelope::failure(CallFailure::error("bad input"));
        let encoded = serde_json::to_value(&failed).unwrap();
        assert_eq!(encoded["outcome"]["status"], json!("e"));
        assert_eq!(encoded["outcome"]["result"]["kind"], json!("error"));
        assert!(encoded.get("elapsed").is_none());

        let decoded: CallEnvelope = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, failed);
    }
}
