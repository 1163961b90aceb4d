//! The update coordinator: queueing, draining, and application.

use crate::apply;
use crate::config::{ConflictStrategy, CoordinatorConfig};
use crate::error::UpdateError;
use crate::request::{SubmitOutcome, UpdateRequest, UpdateSubmission};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use ward_types::{LockGroup, UpdateId, UpdateKind, UpdatePriority, WalletCache};

/// Side effects for the runner to execute after a coordinator call.
#[derive(Debug)]
pub enum CoordinatorAction {
    /// Hand the updated cache to the persistence collaborator.
    /// Fire-and-forget; storage is eventually consistent.
    PersistCache(Box<WalletCache>),
}

/// Introspection snapshot of the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Whether a drain is in progress (always false between calls;
    /// kept for parity with runner-side sampling).
    pub is_draining: bool,
    /// Requests waiting in the priority queue.
    pub queue_length: usize,
    /// Requests parked until their requeue delay elapses.
    pub deferred_length: usize,
    /// When the last apply attempt started.
    pub last_update: Option<Duration>,
    /// When the last apply succeeded.
    pub last_successful_update: Option<Duration>,
    /// Total successful applies.
    pub successful_updates: u64,
    /// Total terminally failed requests.
    pub failed_updates: u64,
    /// Id of the request currently applying, if any.
    pub current_update: Option<UpdateId>,
}

/// A requeued request waiting out its delay.
#[derive(Debug)]
struct Deferred {
    ready_at: Duration,
    request: UpdateRequest,
}

/// Central coordinator for all wallet cache updates.
///
/// Owns the cache exclusively. Producers submit; the runner ticks.
pub struct UpdateCoordinator {
    config: CoordinatorConfig,
    /// Priority-ordered queue: highest priority first, FIFO within a
    /// band.
    queue: VecDeque<UpdateRequest>,
    /// Requeued requests (lock busy, conflict losers, retries).
    deferred: Vec<Deferred>,
    /// Completion times by (kind, source) identity, for debouncing.
    completions: HashMap<(UpdateKind, String), Duration>,
    /// Lock groups currently applying. Advisory: meaningful because
    /// the coordinator runs single-threaded and applies run to
    /// completion.
    locks: HashSet<LockGroup>,
    /// Reentrancy guard so an overlapping drain tick is a no-op.
    draining: bool,
    cache: WalletCache,
    state: CoordinatorState,
}

impl UpdateCoordinator {
    /// Coordinator with an empty cache.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_cache(config, WalletCache::new())
    }

    /// Coordinator resuming from a persisted cache.
    pub fn with_cache(config: CoordinatorConfig, cache: WalletCache) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            deferred: Vec::new(),
            completions: HashMap::new(),
            locks: HashSet::new(),
            draining: false,
            cache,
            state: CoordinatorState::default(),
        }
    }

    /// Submit an update. Never blocks: the request is queued (or
    /// debounced) and the call returns immediately. User-action
    /// priority triggers an immediate out-of-band drain, whose
    /// actions are returned alongside the outcome.
    pub fn submit(
        &mut self,
        submission: UpdateSubmission,
        now: Duration,
    ) -> (SubmitOutcome, Vec<CoordinatorAction>) {
        let kind = submission.payload.kind();
        let id = UpdateId::derive(kind, &submission.source, now);

        // Identity-based debounce against recently completed updates.
        let identity = (kind, submission.source.clone());
        if let Some(completed_at) = self.completions.get(&identity) {
            if now.saturating_sub(*completed_at) < self.config.debounce_window {
                debug!(%id, "debouncing update");
                // Sender dropped unfired: the silent-drop contract.
                return (SubmitOutcome::Debounced(id), Vec::new());
            }
        }

        let request = UpdateRequest {
            id: id.clone(),
            priority: submission.priority,
            source: submission.source,
            submitted_at: now,
            retry_count: 0,
            max_retries: submission.max_retries.unwrap_or(self.config.max_retries),
            completion: submission.completion,
            payload: submission.payload,
        };

        if self.queue.len() >= self.config.max_queue_size {
            warn!("update queue full, evicting lowest priority entry");
            self.evict_lowest_priority();
        }

        let priority = request.priority;
        self.insert_by_priority(request);
        self.state.queue_length = self.queue.len();

        info!(%id, %kind, %priority, queue = self.queue.len(), "queued update");

        let actions = if priority >= UpdatePriority::UserAction {
            self.drain(now)
        } else {
            Vec::new()
        };

        (SubmitOutcome::Queued(id), actions)
    }

    /// Fixed-cadence tick: promote deferred requests whose delay has
    /// elapsed, then drain a batch.
    pub fn on_tick(&mut self, now: Duration) -> Vec<CoordinatorAction> {
        self.promote_deferred(now);
        self.prune_completions(now);
        self.drain(now)
    }

    /// Drop every queued and deferred request, firing their
    /// completion channels with a cancellation error.
    pub fn clear_queue(&mut self) {
        for mut request in self.queue.drain(..) {
            request.complete(Err(UpdateError::Cancelled));
        }
        for mut deferred in self.deferred.drain(..) {
            deferred.request.complete(Err(UpdateError::Cancelled));
        }
        self.state.queue_length = 0;
        self.state.deferred_length = 0;
        info!("update queue cleared");
    }

    /// Clear the queue and forget all debounce and lock state.
    pub fn reset(&mut self) {
        self.clear_queue();
        self.locks.clear();
        self.completions.clear();
        self.state = CoordinatorState::default();
        info!("coordinator reset");
    }

    /// Introspection snapshot.
    pub fn state(&self) -> CoordinatorState {
        self.state.clone()
    }

    /// Read access to the shared cache.
    pub fn cache(&self) -> &WalletCache {
        &self.cache
    }

    /// Drain up to one batch of the highest-priority queued requests.
    fn drain(&mut self, now: Duration) -> Vec<CoordinatorAction> {
        // Overlapping drains are no-ops; a slow batch must not be
        // interleaved with the next tick's.
        if self.draining || self.queue.is_empty() {
            return Vec::new();
        }
        self.draining = true;
        self.state.is_draining = true;

        let take = self.config.batch_size.min(self.queue.len());
        let batch: Vec<UpdateRequest> = self.queue.drain(..take).collect();
        let batch = self.resolve_conflicts(batch, now);

        let mut actions = Vec::new();
        for request in batch {
            let group = request.kind().lock_group();
            if self.locks.contains(&group) {
                debug!(id = %request.id, %group, "lock group busy, requeuing");
                self.defer(request, now);
                continue;
            }
            self.locks.insert(group);
            self.apply_request(request, now, &mut actions);
            self.locks.remove(&group);
        }

        self.draining = false;
        self.state.is_draining = false;
        self.state.queue_length = self.queue.len();
        self.state.deferred_length = self.deferred.len();
        actions
    }

    /// Within one batch, keep a single request per lock group and
    /// requeue the rest, per the configured strategy.
    fn resolve_conflicts(&mut self, batch: Vec<UpdateRequest>, now: Duration) -> Vec<UpdateRequest> {
        let mut winners: Vec<UpdateRequest> = Vec::new();
        let mut winner_for_group: HashMap<LockGroup, usize> = HashMap::new();

        for request in batch {
            let group = request.kind().lock_group();
            match winner_for_group.get(&group) {
                None => {
                    winner_for_group.insert(group, winners.len());
                    winners.push(request);
                }
                Some(&index) => {
                    let incumbent = &winners[index];
                    let replace = match self.config.conflict_strategy {
                        ConflictStrategy::HighestPriority => request.priority > incumbent.priority,
                        ConflictStrategy::MostRecent => {
                            request.submitted_at > incumbent.submitted_at
                        }
                    };
                    let loser = if replace {
                        std::mem::replace(&mut winners[index], request)
                    } else {
                        request
                    };
                    debug!(id = %loser.id, %group, "batch conflict, requeuing loser");
                    self.defer(loser, now);
                }
            }
        }

        winners
    }

    /// Validate and apply a single request, settling its outcome.
    fn apply_request(
        &mut self,
        mut request: UpdateRequest,
        now: Duration,
        actions: &mut Vec<CoordinatorAction>,
    ) {
        self.state.current_update = Some(request.id.clone());
        self.state.last_update = Some(now);
        debug!(id = %request.id, kind = %request.kind(), "applying update");

        match apply::apply(&mut self.cache, &request.payload) {
            Ok(()) => {
                self.completions.insert(request.identity(), now);
                self.state.successful_updates += 1;
                self.state.last_successful_update = Some(now);
                request.complete(Ok(()));
                actions.push(CoordinatorAction::PersistCache(Box::new(self.cache.clone())));
            }
            Err(err) if err.is_data_integrity() => {
                // Would fail identically every retry; terminal now.
                self.state.failed_updates += 1;
                warn!(id = %request.id, %err, "update rejected");
                request.complete(Err(err));
            }
            Err(err) => self.handle_failure(request, err, now),
        }

        self.state.current_update = None;
    }

    /// Retry with demoted priority, or fail terminally once the
    /// attempt ceiling is reached.
    fn handle_failure(&mut self, mut request: UpdateRequest, err: UpdateError, now: Duration) {
        request.retry_count += 1;

        if request.retry_count < request.max_retries {
            warn!(
                id = %request.id,
                attempt = request.retry_count,
                max = request.max_retries,
                %err,
                "update failed, retrying at lower priority"
            );
            request.priority = request.priority.demote();
            self.defer(request, now);
        } else {
            self.state.failed_updates += 1;
            error!(id = %request.id, attempts = request.retry_count, %err, "update failed permanently");
            request.complete(Err(UpdateError::RetriesExhausted {
                attempts: request.retry_count,
                last: err.to_string(),
            }));
        }
    }

    /// Stable priority insertion: before the first entry with a
    /// strictly lower priority, so equal priorities stay FIFO.
    fn insert_by_priority(&mut self, request: UpdateRequest) {
        let position = self
            .queue
            .iter()
            .position(|queued| request.priority > queued.priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, request);
    }

    /// Evict the lowest-priority queued entry, oldest first on ties.
    fn evict_lowest_priority(&mut self) {
        let victim = self
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, request)| (request.priority, request.submitted_at))
            .map(|(index, _)| index);

        if let Some(index) = victim {
            if let Some(mut evicted) = self.queue.remove(index) {
                debug!(id = %evicted.id, "evicted low priority update");
                evicted.complete(Err(UpdateError::QueueFull));
            }
        }
    }

    /// Park a request until its requeue delay elapses.
    fn defer(&mut self, request: UpdateRequest, now: Duration) {
        self.deferred.push(Deferred {
            ready_at: now + self.config.requeue_delay,
            request,
        });
        self.state.deferred_length = self.deferred.len();
    }

    /// Move ready deferred requests back into the priority queue.
    fn promote_deferred(&mut self, now: Duration) {
        let mut remaining = Vec::new();
        for deferred in self.deferred.drain(..) {
            if deferred.ready_at <= now {
                let position = self
                    .queue
                    .iter()
                    .position(|queued| deferred.request.priority > queued.priority)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, deferred.request);
            } else {
                remaining.push(deferred);
            }
        }
        self.deferred = remaining;
        self.state.queue_length = self.queue.len();
        self.state.deferred_length = self.deferred.len();
    }

    /// Forget debounce entries old enough to never match again.
    fn prune_completions(&mut self, now: Duration) {
        let window = self.config.debounce_window;
        self.completions
            .retain(|_, completed_at| now.saturating_sub(*completed_at) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CompletionSender;
    use std::collections::BTreeMap;
    use tokio::sync::oneshot;
    use tokio::sync::oneshot::error::TryRecvError;
    use ward_types::{
        AccountId, BalanceUpdate, PriceUpdate, TokenBalance, TokenId, TransactionRecord,
        TransactionStatus, UpdatePayload,
    };

    type Completion = oneshot::Receiver<Result<(), UpdateError>>;

    fn channel() -> (CompletionSender, Completion) {
        oneshot::channel()
    }

    fn balance_payload(account: &str, amount: u128) -> UpdatePayload {
        let mut balances = BTreeMap::new();
        balances.insert(
            AccountId::new(account),
            vec![TokenBalance {
                token: TokenId::new("USDC"),
                amount,
                decimals: 6,
            }],
        );
        UpdatePayload::BalanceOnly(BalanceUpdate {
            balances,
            authoritative: false,
        })
    }

    fn price_payload(price: u128) -> UpdatePayload {
        let mut prices = BTreeMap::new();
        prices.insert(TokenId::new("USDC"), price);
        UpdatePayload::PriceOnly(PriceUpdate { prices })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_user_action_drains_immediately() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());
        let (tx, mut rx) = channel();

        let submission = UpdateSubmission::new(
            balance_payload("0xalice", 500_000_000),
            UpdatePriority::UserAction,
            "user-refresh",
        )
        .with_completion(tx);

        let (outcome, actions) = coordinator.submit(submission, ms(10));

        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(actions.len(), 1, "successful apply emits one persist action");
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(coordinator.state().successful_updates, 1);
    }

    #[test]
    fn test_lower_priorities_wait_for_tick() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());
        let (tx, mut rx) = channel();

        let submission = UpdateSubmission::new(
            price_payload(1_000_000),
            UpdatePriority::Interval,
            "price-poller",
        )
        .with_completion(tx);

        let (_, actions) = coordinator.submit(submission, ms(10));
        assert!(actions.is_empty());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(coordinator.state().queue_length, 1);

        let actions = coordinator.on_tick(ms(110));
        assert_eq!(actions.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_debounce_same_identity() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());

        let first = UpdateSubmission::new(
            price_payload(1_000_000),
            UpdatePriority::UserAction,
            "price-poller",
        );
        let (outcome, _) = coordinator.submit(first, ms(10));
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));

        // Same (kind, source) 100ms after completion: dropped, and the
        // completion channel just closes.
        let (tx, mut rx) = channel();
        let second = UpdateSubmission::new(
            price_payload(2_000_000),
            UpdatePriority::UserAction,
            "price-poller",
        )
        .with_completion(tx);
        let (outcome, actions) = coordinator.submit(second, ms(110));
        assert!(matches!(outcome, SubmitOutcome::Debounced(_)));
        assert!(actions.is_empty());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(coordinator.cache().prices[&TokenId::new("USDC")], 1_000_000);

        // Past the 250ms window it goes through again.
        let third = UpdateSubmission::new(
            price_payload(2_000_000),
            UpdatePriority::UserAction,
            "price-poller",
        );
        let (outcome, _) = coordinator.submit(third, ms(300));
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(coordinator.cache().prices[&TokenId::new("USDC")], 2_000_000);

        // A different source with the same kind is a different identity.
        let other = UpdateSubmission::new(
            price_payload(3_000_000),
            UpdatePriority::UserAction,
            "websocket-feed",
        );
        let (outcome, _) = coordinator.submit(other, ms(320));
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    }

    #[test]
    fn test_capacity_evicts_lowest_priority_oldest() {
        let config = CoordinatorConfig::with_max_queue_size(2);
        let mut coordinator = UpdateCoordinator::new(config);

        let (tx_old, mut rx_old) = channel();
        let old = UpdateSubmission::new(
            price_payload(1),
            UpdatePriority::BackgroundSync,
            "sync-a",
        )
        .with_completion(tx_old);
        coordinator.submit(old, ms(1));

        let newer = UpdateSubmission::new(
            price_payload(2),
            UpdatePriority::BackgroundSync,
            "sync-b",
        );
        coordinator.submit(newer, ms(2));

        // Queue is full; the oldest lowest-priority entry is evicted
        // with a capacity error, never silently.
        let incoming =
            UpdateSubmission::new(price_payload(3), UpdatePriority::Interval, "poller");
        coordinator.submit(incoming, ms(3));

        assert_eq!(rx_old.try_recv().unwrap(), Err(UpdateError::QueueFull));
        assert_eq!(coordinator.state().queue_length, 2);
    }

    #[test]
    fn test_batch_conflict_highest_priority_wins() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());

        // Same lock group (token-data), different priorities.
        let (tx_low, mut rx_low) = channel();
        let low = UpdateSubmission::new(
            balance_payload("0xalice", 100),
            UpdatePriority::Interval,
            "balance-poller",
        )
        .with_completion(tx_low);
        coordinator.submit(low, ms(10));

        let (tx_high, mut rx_high) = channel();
        let high = UpdateSubmission::new(
            price_payload(1_000_000),
            UpdatePriority::PriceUpdate,
            "price-poller",
        )
        .with_completion(tx_high);
        coordinator.submit(high, ms(11));

        coordinator.on_tick(ms(100));
        assert_eq!(rx_high.try_recv().unwrap(), Ok(()));
        assert_eq!(rx_low.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(coordinator.state().deferred_length, 1);

        // The loser re-enters after its requeue delay.
        coordinator.on_tick(ms(250));
        assert_eq!(rx_low.try_recv().unwrap(), Ok(()));
        assert_eq!(coordinator.state().deferred_length, 0);
    }

    #[test]
    fn test_batch_conflict_most_recent_wins() {
        let config = CoordinatorConfig {
            conflict_strategy: ConflictStrategy::MostRecent,
            ..Default::default()
        };
        let mut coordinator = UpdateCoordinator::new(config);

        let (tx_first, mut rx_first) = channel();
        let first = UpdateSubmission::new(
            price_payload(1_000_000),
            UpdatePriority::Interval,
            "poller-a",
        )
        .with_completion(tx_first);
        coordinator.submit(first, ms(10));

        let (tx_second, mut rx_second) = channel();
        let second = UpdateSubmission::new(
            price_payload(2_000_000),
            UpdatePriority::Interval,
            "poller-b",
        )
        .with_completion(tx_second);
        coordinator.submit(second, ms(20));

        coordinator.on_tick(ms(100));
        assert_eq!(rx_second.try_recv().unwrap(), Ok(()));
        assert_eq!(rx_first.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(coordinator.cache().prices[&TokenId::new("USDC")], 2_000_000);
    }

    #[test]
    fn test_retry_exhaustion_fires_callback_once() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());

        // Transaction for an account no balance snapshot has
        // introduced: fails retryably every attempt.
        let record = TransactionRecord {
            hash: "0xbeef".into(),
            account: AccountId::new("0xnobody"),
            token: TokenId::new("USDC"),
            amount: 5,
            status: TransactionStatus::Pending,
            timestamp_ms: 0,
        };
        let (tx, mut rx) = channel();
        let submission = UpdateSubmission::new(
            UpdatePayload::Transaction(record),
            UpdatePriority::UserAction,
            "tx-detector",
        )
        .with_completion(tx);

        // Attempt 1 (immediate), then 2 and 3 across ticks.
        coordinator.submit(submission, ms(0));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        coordinator.on_tick(ms(150));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        coordinator.on_tick(ms(300));

        match rx.try_recv().unwrap() {
            Err(UpdateError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected completion: {other:?}"),
        }

        // Gone from the coordinator entirely.
        let state = coordinator.state();
        assert_eq!(state.queue_length, 0);
        assert_eq!(state.deferred_length, 0);
        assert_eq!(state.failed_updates, 1);

        // A later tick must not fire the channel again.
        coordinator.on_tick(ms(450));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_zero_regression_rejected_terminally() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());

        // Seed a 500 aggregate.
        coordinator.submit(
            UpdateSubmission::new(
                price_payload(1_000_000),
                UpdatePriority::UserAction,
                "price-poller",
            ),
            ms(0),
        );
        coordinator.submit(
            UpdateSubmission::new(
                balance_payload("0xalice", 500_000_000),
                UpdatePriority::UserAction,
                "balance-poller",
            ),
            ms(10),
        );
        assert_eq!(coordinator.cache().grand_total(), 500_000_000);

        let (tx, mut rx) = channel();
        let zeroing = UpdateSubmission::new(
            balance_payload("0xalice", 0),
            UpdatePriority::UserAction,
            "flaky-source",
        )
        .with_completion(tx);
        coordinator.submit(zeroing, ms(20));

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(UpdateError::ZeroRegression { current: 500_000_000 })
        ));
        assert_eq!(coordinator.cache().grand_total(), 500_000_000);

        // Rejected, not retried: nothing left queued or deferred.
        assert_eq!(coordinator.state().deferred_length, 0);
        assert_eq!(coordinator.state().queue_length, 0);
    }

    #[test]
    fn test_clear_queue_cancels_pending() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());
        let (tx, mut rx) = channel();
        coordinator.submit(
            UpdateSubmission::new(price_payload(1), UpdatePriority::Interval, "poller")
                .with_completion(tx),
            ms(0),
        );

        coordinator.clear_queue();
        assert_eq!(rx.try_recv().unwrap(), Err(UpdateError::Cancelled));
        assert_eq!(coordinator.state().queue_length, 0);
    }

    #[test]
    fn test_priority_queue_order() {
        let mut coordinator = UpdateCoordinator::new(CoordinatorConfig::default());

        // Fill with distinct lock groups so a single tick applies all
        // of them, highest priority first.
        coordinator.submit(
            UpdateSubmission::new(
                UpdatePayload::TokenList(vec![]),
                UpdatePriority::BackgroundSync,
                "token-sync",
            ),
            ms(1),
        );
        coordinator.submit(
            UpdateSubmission::new(price_payload(1), UpdatePriority::PriceUpdate, "poller"),
            ms(2),
        );
        coordinator.submit(
            UpdateSubmission::new(UpdatePayload::RollupOnly, UpdatePriority::ChainEvent, "events"),
            ms(3),
        );

        let actions = coordinator.on_tick(ms(100));
        assert_eq!(actions.len(), 3);
        assert_eq!(coordinator.state().successful_updates, 3);
    }
}
