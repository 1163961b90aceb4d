//! Coordinator configuration.

use std::time::Duration;

/// How same-lock-group collisions inside one drained batch resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Highest priority wins; the rest are requeued.
    HighestPriority,
    /// Most recently submitted wins; the rest are requeued.
    MostRecent,
}

/// Configuration for the update coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Queue capacity. Admission beyond this evicts the single
    /// lowest-priority queued entry (oldest first on ties).
    pub max_queue_size: usize,

    /// Drain cadence. The runner is expected to call
    /// [`crate::UpdateCoordinator::on_tick`] at this interval.
    pub drain_interval: Duration,

    /// Maximum requests taken from the queue per drain.
    pub batch_size: usize,

    /// Default attempt ceiling for requests that do not carry their
    /// own.
    pub max_retries: u32,

    /// Window after a completed update during which an update with
    /// the same (kind, source) identity is silently dropped.
    pub debounce_window: Duration,

    /// Delay before a requeued request (lock busy, conflict loser,
    /// retry) becomes drainable again.
    pub requeue_delay: Duration,

    /// Batch conflict resolution strategy.
    pub conflict_strategy: ConflictStrategy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            drain_interval: Duration::from_millis(100),
            batch_size: 5,
            max_retries: 3,
            debounce_window: Duration::from_millis(250),
            requeue_delay: Duration::from_millis(100),
            conflict_strategy: ConflictStrategy::HighestPriority,
        }
    }
}

impl CoordinatorConfig {
    /// Config with a custom queue capacity.
    pub fn with_max_queue_size(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            ..Default::default()
        }
    }
}
