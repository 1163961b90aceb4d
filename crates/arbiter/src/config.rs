//! Arbiter tuning knobs.

use std::time::Duration;

/// Configuration for the popup arbiter.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Maximum waiting requests. Submissions beyond this are rejected
    /// immediately rather than queued indefinitely.
    pub max_queue_size: usize,

    /// Cadence of the queue-drain tick.
    pub process_interval: Duration,

    /// Cadence of the stale-request sweep.
    pub sweep_interval: Duration,

    /// Requests older than this are cancelled by the sweep regardless
    /// of status.
    pub max_request_age: Duration,

    /// Approval window width in pixels.
    pub popup_width: u32,

    /// Approval window height in pixels.
    pub popup_height: u32,

    /// Pause before the next drain after a window closes or fails to
    /// open, so the host settles between windows.
    pub reopen_delay: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10,
            process_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
            max_request_age: Duration::from_secs(3600),
            popup_width: 428,
            popup_height: 620,
            reopen_delay: Duration::from_millis(500),
        }
    }
}

impl ArbiterConfig {
    /// Default configuration with a different queue capacity.
    pub fn with_max_queue_size(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            ..Default::default()
        }
    }
}
