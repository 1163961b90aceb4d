//! Prioritized, debounced, lock-grouped wallet cache updates.
//!
//! Every portfolio mutation in the wallet (price polls, balance
//! polls, detected transactions, user actions) flows through one
//! coordinator, which owns the shared [`ward_types::WalletCache`] and
//! applies updates under priority ordering, per-region mutual
//! exclusion, and debouncing. Submission never blocks: requests are
//! queued and drained in batches on a fixed tick, with user actions
//! triggering an immediate out-of-band drain.
//!
//! The coordinator is synchronous and deterministic. Time is injected
//! by the caller, and side effects beyond the in-memory cache are
//! returned as [`CoordinatorAction`] values for the runner to
//! execute.

mod apply;
mod config;
mod coordinator;
mod error;
mod request;

pub use config::{ConflictStrategy, CoordinatorConfig};
pub use coordinator::{CoordinatorAction, CoordinatorState, UpdateCoordinator};
pub use error::UpdateError;
pub use request::{CompletionSender, SubmitOutcome, UpdateSubmission};
