//! Approval popup arbitration.
//!
//! Dapp requests that need user interaction compete for a single
//! approval window. The [`PopupArbiter`] owns the active-window slot
//! and a FIFO queue of waiting requests, deduplicates interchangeable
//! read-only requests from the same page, and expires requests that
//! sit unanswered too long.
//!
//! The arbiter itself performs no I/O. Every call returns the
//! [`ArbiterAction`]s the runner must execute (open, focus, close,
//! notify), and the runner feeds host events (window opened, window
//! closed) back in.

mod arbiter;
mod config;
mod error;

pub use arbiter::{
    ApprovalSender, ApprovalSubmission, ArbiterAction, PopupArbiter, QueueStatus,
};
pub use config::ArbiterConfig;
pub use error::ArbiterError;
