//! Error types for update coordination.

use thiserror::Error;
use ward_types::AccountId;

/// Terminal or per-attempt failures of an update request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// The update would replace a known-non-zero portfolio aggregate
    /// with zero. Rejected outright to avoid user-visible flicker
    /// from partial snapshots; never retried.
    #[error("rejected: would regress non-zero portfolio total {current} to zero")]
    ZeroRegression {
        /// The cached grand total the update tried to wipe out.
        current: u128,
    },

    /// A transaction update referenced an account the cache does not
    /// know yet. Retryable: the balance snapshot may simply not have
    /// landed.
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    /// The request was evicted at admission because the queue was at
    /// capacity and it lost the priority comparison.
    #[error("update queue at capacity")]
    QueueFull,

    /// Every attempt failed.
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Message of the last per-attempt failure.
        last: String,
    },

    /// The request was dropped by a queue clear or coordinator reset.
    #[error("update cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Data-integrity rejections are terminal immediately; they would
    /// fail identically on every retry.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, UpdateError::ZeroRegression { .. })
    }
}
