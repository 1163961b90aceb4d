//! Arbiter error taxonomy.

use thiserror::Error;

/// Terminal outcomes an approval request can fail with.
///
/// Always delivered through the request's own completion channel,
/// never raised past the arbiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArbiterError {
    /// The waiting queue is at capacity.
    #[error("approval queue is full")]
    QueueFull,

    /// The request sat unanswered past the maximum age.
    #[error("approval request expired")]
    Expired,

    /// The host failed to open the approval window.
    #[error("approval window could not be opened")]
    WindowFailed,

    /// Explicitly torn down (queue cleared, window force-closed, or
    /// the linked original was cancelled).
    #[error("approval request cancelled")]
    Cancelled,
}
