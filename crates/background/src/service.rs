//! The background event loop and its producer-facing handle.

use crate::events::BackgroundEvent;
use crate::traits::{CacheStore, Notifier, WindowPresenter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use ward_arbiter::{
    ApprovalSubmission, ArbiterAction, ArbiterConfig, ArbiterError, PopupArbiter,
};
use ward_coordinator::{
    CoordinatorAction, CoordinatorConfig, UpdateCoordinator, UpdateError, UpdateSubmission,
};
use ward_types::{ApprovalId, DappOrigin, UpdatePayload, UpdatePriority, WindowId};

/// Capacity of the event channel between handles and the loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The event loop has stopped; no more submissions are accepted.
    #[error("background service is not running")]
    Stopped,
}

/// Top-level configuration for the background service.
#[derive(Debug, Clone, Default)]
pub struct BackgroundConfig {
    pub coordinator: CoordinatorConfig,
    pub arbiter: ArbiterConfig,
}

/// Host collaborators the service delegates all I/O to.
pub struct Collaborators {
    pub store: Arc<dyn CacheStore>,
    pub presenter: Arc<dyn WindowPresenter>,
    pub notifier: Arc<dyn Notifier>,
}

/// Cloneable submission side of the background service.
#[derive(Clone)]
pub struct BackgroundHandle {
    events: mpsc::Sender<BackgroundEvent>,
}

impl BackgroundHandle {
    /// Submit a cache update. Returns a receiver that resolves with
    /// the update's terminal outcome; a debounced duplicate simply
    /// closes the channel.
    pub async fn submit_update(
        &self,
        payload: UpdatePayload,
        priority: UpdatePriority,
        source: impl Into<String>,
    ) -> Result<oneshot::Receiver<Result<(), UpdateError>>, ServiceError> {
        let (tx, rx) = oneshot::channel();
        let submission = UpdateSubmission::new(payload, priority, source).with_completion(tx);
        self.send(BackgroundEvent::SubmitUpdate(submission)).await?;
        Ok(rx)
    }

    /// Request interactive approval for a dapp method. The receiver
    /// resolves once the approval window has been presented (or with
    /// the mirrored outcome, or an error).
    pub async fn request_approval(
        &self,
        id: ApprovalId,
        method: impl Into<String>,
        origin: DappOrigin,
    ) -> Result<oneshot::Receiver<Result<bool, ArbiterError>>, ServiceError> {
        let (tx, rx) = oneshot::channel();
        let submission = ApprovalSubmission::new(id, method, origin).with_completion(tx);
        self.send(BackgroundEvent::RequestApproval(submission)).await?;
        Ok(rx)
    }

    /// Report an explicit approval outcome from the UI.
    pub async fn approval_complete(&self, id: ApprovalId, result: bool) -> Result<(), ServiceError> {
        self.send(BackgroundEvent::ApprovalComplete { id, result })
            .await
    }

    /// Forward a host-level window-close notification.
    pub async fn window_closed(&self, window: WindowId) -> Result<(), ServiceError> {
        self.send(BackgroundEvent::WindowClosed(window)).await
    }

    /// Cancel all queued updates.
    pub async fn clear_updates(&self) -> Result<(), ServiceError> {
        self.send(BackgroundEvent::ClearUpdates).await
    }

    /// Cancel all queued approval requests.
    pub async fn clear_approvals(&self) -> Result<(), ServiceError> {
        self.send(BackgroundEvent::ClearApprovals).await
    }

    /// Ask the event loop to stop. Best-effort.
    pub async fn shutdown(&self) {
        let _ = self.events.send(BackgroundEvent::Shutdown).await;
    }

    async fn send(&self, event: BackgroundEvent) -> Result<(), ServiceError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ServiceError::Stopped)
    }
}

/// Owns exactly one coordinator, one arbiter, and the collaborator
/// handles, and runs them from a single task. The components only see
/// the relative clock this service maintains.
pub struct BackgroundService {
    config: BackgroundConfig,
    coordinator: UpdateCoordinator,
    arbiter: PopupArbiter,
    store: Arc<dyn CacheStore>,
    presenter: Arc<dyn WindowPresenter>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::Receiver<BackgroundEvent>,
    started: Instant,
}

impl BackgroundService {
    pub fn new(config: BackgroundConfig, collaborators: Collaborators) -> (Self, BackgroundHandle) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let service = Self {
            coordinator: UpdateCoordinator::new(config.coordinator.clone()),
            arbiter: PopupArbiter::new(config.arbiter.clone()),
            config,
            store: collaborators.store,
            presenter: collaborators.presenter,
            notifier: collaborators.notifier,
            events: rx,
            started: Instant::now(),
        };
        (service, BackgroundHandle { events: tx })
    }

    /// Run until shutdown. Restores the persisted cache first, then
    /// multiplexes the two component tickers and the event channel.
    pub async fn run(mut self) {
        match self.store.load().await {
            Ok(Some(cache)) => {
                info!("restored persisted wallet cache");
                self.coordinator =
                    UpdateCoordinator::with_cache(self.config.coordinator.clone(), cache);
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to load persisted cache, starting empty"),
        }

        let mut drain_tick = tokio::time::interval(self.config.coordinator.drain_interval);
        let mut popup_tick = tokio::time::interval(self.config.arbiter.process_interval);
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        popup_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("background service started");
        loop {
            tokio::select! {
                _ = drain_tick.tick() => {
                    let now = self.now();
                    let actions = self.coordinator.on_tick(now);
                    self.run_coordinator_actions(actions).await;
                }
                _ = popup_tick.tick() => {
                    let now = self.now();
                    let actions = self.arbiter.on_tick(now);
                    self.run_arbiter_actions(actions).await;
                }
                event = self.events.recv() => match event {
                    Some(BackgroundEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
            }
        }
        info!("background service stopped");
    }

    async fn handle_event(&mut self, event: BackgroundEvent) {
        let now = self.now();
        match event {
            BackgroundEvent::SubmitUpdate(submission) => {
                let (outcome, actions) = self.coordinator.submit(submission, now);
                debug!(id = %outcome.id(), "update submission handled");
                self.run_coordinator_actions(actions).await;
            }
            BackgroundEvent::RequestApproval(submission) => {
                let actions = self.arbiter.submit(submission, now);
                self.run_arbiter_actions(actions).await;
            }
            BackgroundEvent::ApprovalComplete { id, result } => {
                let actions = self.arbiter.mark_complete(&id, result, now);
                self.run_arbiter_actions(actions).await;
            }
            BackgroundEvent::WindowClosed(window) => {
                let actions = self.arbiter.on_window_closed(window, now);
                self.run_arbiter_actions(actions).await;
            }
            BackgroundEvent::ClearUpdates => self.coordinator.clear_queue(),
            BackgroundEvent::ClearApprovals => {
                let actions = self.arbiter.clear_queue();
                self.run_arbiter_actions(actions).await;
            }
            BackgroundEvent::Shutdown => {}
        }
    }

    async fn run_coordinator_actions(&mut self, actions: Vec<CoordinatorAction>) {
        for action in actions {
            match action {
                CoordinatorAction::PersistCache(cache) => {
                    // Best-effort: the in-memory cache stays
                    // authoritative if storage misbehaves.
                    if let Err(err) = self.store.persist(*cache).await {
                        warn!(%err, "cache persist failed");
                    }
                }
            }
        }
    }

    /// Execute arbiter actions, feeding window-open outcomes straight
    /// back in until the arbiter has nothing more to ask.
    async fn run_arbiter_actions(&mut self, mut actions: Vec<ArbiterAction>) {
        while !actions.is_empty() {
            let mut next = Vec::new();
            for action in actions {
                match action {
                    ArbiterAction::OpenWindow {
                        id,
                        url,
                        width,
                        height,
                    } => match self.presenter.open(url, width, height).await {
                        Ok(window) => next.extend(self.arbiter.on_window_opened(&id, window)),
                        Err(err) => {
                            warn!(%id, %err, "approval window open failed");
                            let now = self.now();
                            next.extend(self.arbiter.on_window_open_failed(&id, now));
                        }
                    },
                    ArbiterAction::FocusWindow(window) => {
                        if let Err(err) = self.presenter.focus(window).await {
                            debug!(%window, %err, "window focus failed");
                        }
                    }
                    ArbiterAction::CloseWindow(window) => {
                        if let Err(err) = self.presenter.close(window).await {
                            debug!(%window, %err, "window close failed");
                        }
                    }
                    ArbiterAction::Notify { message } => self.notifier.notify(message).await,
                    ArbiterAction::ClearNotification => self.notifier.clear().await,
                }
            }
            actions = next;
        }
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{BoxFuture, HostError};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;
    use ward_types::{AccountId, BalanceUpdate, TabId, TokenBalance, TokenId, WalletCache};

    #[derive(Default)]
    struct MemoryStore {
        cache: Mutex<Option<WalletCache>>,
    }

    impl CacheStore for MemoryStore {
        fn persist(&self, cache: WalletCache) -> BoxFuture<Result<(), HostError>> {
            *self.cache.lock().unwrap() = Some(cache);
            Box::pin(async { Ok(()) })
        }

        fn load(&self) -> BoxFuture<Result<Option<WalletCache>, HostError>> {
            let cache = self.cache.lock().unwrap().clone();
            Box::pin(async move { Ok(cache) })
        }
    }

    #[derive(Default)]
    struct TestPresenter {
        next_window: AtomicU32,
        opened: Mutex<Vec<String>>,
        closed: Mutex<Vec<WindowId>>,
        fail_opens: AtomicBool,
    }

    impl WindowPresenter for TestPresenter {
        fn open(&self, url: String, _width: u32, _height: u32) -> BoxFuture<Result<WindowId, HostError>> {
            if self.fail_opens.load(Ordering::SeqCst) {
                return Box::pin(async { Err(HostError("no window for you".into())) });
            }
            self.opened.lock().unwrap().push(url);
            let id = WindowId(self.next_window.fetch_add(1, Ordering::SeqCst) + 1);
            Box::pin(async move { Ok(id) })
        }

        fn focus(&self, _window: WindowId) -> BoxFuture<Result<(), HostError>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self, window: WindowId) -> BoxFuture<Result<(), HostError>> {
            self.closed.lock().unwrap().push(window);
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct NullNotifier;

    impl Notifier for NullNotifier {
        fn notify(&self, _message: String) -> BoxFuture<()> {
            Box::pin(async {})
        }

        fn clear(&self) -> BoxFuture<()> {
            Box::pin(async {})
        }
    }

    fn balance_payload(account: &str, amount: u128) -> UpdatePayload {
        let mut balances = BTreeMap::new();
        balances.insert(
            AccountId::new(account),
            vec![TokenBalance {
                token: TokenId::new("ETH"),
                amount,
                decimals: 18,
            }],
        );
        UpdatePayload::BalanceOnly(BalanceUpdate {
            balances,
            authoritative: false,
        })
    }

    fn spawn_service(
        store: Arc<MemoryStore>,
        presenter: Arc<TestPresenter>,
    ) -> (BackgroundHandle, tokio::task::JoinHandle<()>) {
        // Fast arbiter cadence so slot handover happens within test
        // timeouts.
        let config = BackgroundConfig {
            arbiter: ArbiterConfig {
                process_interval: Duration::from_millis(20),
                reopen_delay: Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let (service, handle) = BackgroundService::new(
            config,
            Collaborators {
                store,
                presenter,
                notifier: Arc::new(NullNotifier),
            },
        );
        let join = tokio::spawn(service.run());
        (handle, join)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_user_action_update_applies_and_persists() {
        let store = Arc::new(MemoryStore::default());
        let presenter = Arc::new(TestPresenter::default());
        let (handle, join) = spawn_service(store.clone(), presenter);

        let rx = handle
            .submit_update(
                balance_payload("0xalice", 1_000_000_000_000_000_000),
                UpdatePriority::UserAction,
                "test-producer",
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));

        let persisted = store.cache.lock().unwrap().clone().unwrap();
        assert!(persisted.has_account(&AccountId::new("0xalice")));

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_approval_flow_presents_and_completes() {
        let store = Arc::new(MemoryStore::default());
        let presenter = Arc::new(TestPresenter::default());
        let (handle, join) = spawn_service(store, presenter.clone());

        let rx = handle
            .request_approval(
                ApprovalId::new("req-1"),
                "eth_sign",
                DappOrigin::from_tab(TabId(3)),
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(true));
        assert_eq!(presenter.opened.lock().unwrap().len(), 1);

        // The UI reports the outcome; the window is closed for it.
        handle
            .approval_complete(ApprovalId::new("req-1"), true)
            .await
            .unwrap();
        handle.shutdown().await;
        join.await.unwrap();
        assert_eq!(presenter.closed.lock().unwrap().as_slice(), &[WindowId(1)]);
    }

    #[tokio::test]
    async fn test_window_open_failure_rejects_request() {
        let store = Arc::new(MemoryStore::default());
        let presenter = Arc::new(TestPresenter::default());
        presenter.fail_opens.store(true, Ordering::SeqCst);
        let (handle, join) = spawn_service(store, presenter);

        let rx = handle
            .request_approval(
                ApprovalId::new("req-1"),
                "eth_sign",
                DappOrigin::from_tab(TabId(3)),
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Err(ArbiterError::WindowFailed));

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_approval_waits_for_close() {
        let store = Arc::new(MemoryStore::default());
        let presenter = Arc::new(TestPresenter::default());
        let (handle, join) = spawn_service(store, presenter.clone());

        let rx1 = handle
            .request_approval(
                ApprovalId::new("req-1"),
                "eth_sign",
                DappOrigin::from_tab(TabId(1)),
            )
            .await
            .unwrap();
        assert_eq!(rx1.await.unwrap(), Ok(true));

        let rx2 = handle
            .request_approval(
                ApprovalId::new("req-2"),
                "eth_sign",
                DappOrigin::from_tab(TabId(2)),
            )
            .await
            .unwrap();
        assert_eq!(presenter.opened.lock().unwrap().len(), 1);

        // Closing the first window frees the slot; the queued request
        // goes up on a later tick.
        handle.window_closed(WindowId(1)).await.unwrap();
        assert_eq!(rx2.await.unwrap(), Ok(true));
        assert_eq!(presenter.opened.lock().unwrap().len(), 2);

        handle.shutdown().await;
        join.await.unwrap();
    }
}
