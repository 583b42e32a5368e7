//! Error types

/// Error returned by a callable that fails without panicking.
///
/// Any `std::error::Error` converts into it with `?`, and so do plain
/// strings via `.into()`.
pub type CallError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Misuse of a [`PendingSet`](crate::PendingSet)
///
/// These are raised synchronously at the call site, never deferred into a
/// handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    /// `defer_until_fewer` was called with a negative threshold
    #[error("Threshold must be non-negative, got {0}")]
    NegativeThreshold(i64),
}
