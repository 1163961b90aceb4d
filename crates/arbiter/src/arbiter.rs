//! The popup arbiter state machine.

use crate::config::ArbiterConfig;
use crate::error::ArbiterError;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ward_types::{ApprovalId, ApprovalStatus, DappOrigin, WindowId};

/// Methods that are safe to answer once for near-simultaneous calls
/// from the same page. A second such request from an origin that
/// already has one in flight mirrors the first instead of opening
/// another window.
const IDEMPOTENT_METHODS: &[&str] = &[
    "eth_requestAccounts",
    "eth_accounts",
    "wallet_getPermissions",
    "web3_clientVersion",
    "eth_chainId",
    "net_version",
];

fn is_idempotent_method(method: &str) -> bool {
    IDEMPOTENT_METHODS.contains(&method)
}

/// Completion side of an approval request. Resolves `Ok(true)` when
/// the approval window has been presented for it (or, for a mirrored
/// request, with the original's outcome), `Err` on rejection, expiry,
/// or teardown.
pub type ApprovalSender = oneshot::Sender<Result<bool, ArbiterError>>;

/// A dapp request in need of user interaction.
#[derive(Debug)]
pub struct ApprovalSubmission {
    /// Caller-supplied request identity, used for duplicate
    /// suppression and completion.
    pub id: ApprovalId,
    /// The dapp method awaiting approval (e.g. `eth_sign`).
    pub method: String,
    /// The page context the request came from.
    pub origin: DappOrigin,
    /// Completion channel; optional for fire-and-forget callers.
    pub completion: Option<ApprovalSender>,
}

impl ApprovalSubmission {
    pub fn new(id: ApprovalId, method: impl Into<String>, origin: DappOrigin) -> Self {
        Self {
            id,
            method: method.into(),
            origin,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: ApprovalSender) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// Side effects for the runner to execute after an arbiter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterAction {
    /// Open the approval window for a request. The runner reports the
    /// outcome back via `on_window_opened` / `on_window_open_failed`.
    OpenWindow {
        id: ApprovalId,
        url: String,
        width: u32,
        height: u32,
    },
    /// Bring an already-open approval window to the front.
    FocusWindow(WindowId),
    /// Close an approval window.
    CloseWindow(WindowId),
    /// Best-effort user notification; failures never come back.
    Notify { message: String },
    /// Clear the queued-requests notification.
    ClearNotification,
}

/// Introspection snapshot of the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Whether a window is active (or being opened).
    pub active: bool,
    /// Requests waiting in the queue.
    pub queued: usize,
    /// Submission time of the oldest queued request.
    pub oldest_queued: Option<Duration>,
}

/// The active-window slot. `Opening` covers the suspension between
/// asking the host for a window and hearing back.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ActiveSlot {
    Opening(ApprovalId),
    Open { id: ApprovalId, window: WindowId },
}

impl ActiveSlot {
    fn id(&self) -> &ApprovalId {
        match self {
            ActiveSlot::Opening(id) => id,
            ActiveSlot::Open { id, .. } => id,
        }
    }
}

/// Everything the arbiter remembers about one request.
#[derive(Debug)]
struct TrackedRequest {
    method: String,
    origin: DappOrigin,
    created_at: Duration,
    status: ApprovalStatus,
    /// Outcome to hand to mirrors once terminal.
    result: Option<bool>,
    /// Requests mirroring this one, resolved when it terminates.
    mirrors: Vec<ApprovalId>,
    completion: Option<ApprovalSender>,
}

impl TrackedRequest {
    fn complete(&mut self, result: Result<bool, ArbiterError>) {
        if let Some(sender) = self.completion.take() {
            // A dropped receiver means nobody is waiting; fine.
            let _ = sender.send(result);
        }
    }
}

/// Guarantees at most one interactive approval window at a time.
///
/// Owns the active slot and the waiting queue exclusively. All window
/// and notification I/O is delegated to the runner through
/// [`ArbiterAction`]s.
pub struct PopupArbiter {
    config: ArbiterConfig,
    active: Option<ActiveSlot>,
    queue: VecDeque<ApprovalId>,
    tracked: HashMap<ApprovalId, TrackedRequest>,
    /// Earliest time the next drain may run, set after a window closes
    /// or fails to open.
    drain_after: Option<Duration>,
    last_sweep: Duration,
}

impl PopupArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            active: None,
            queue: VecDeque::new(),
            tracked: HashMap::new(),
            drain_after: None,
            last_sweep: Duration::ZERO,
        }
    }

    /// Submit an approval request.
    ///
    /// Outcomes, in order of precedence: duplicate ids are dropped
    /// silently; idempotent read-only methods from an origin that
    /// already has a request in flight mirror that request; a full
    /// queue rejects immediately; otherwise the request queues and is
    /// presented as soon as the window slot frees up.
    pub fn submit(&mut self, submission: ApprovalSubmission, now: Duration) -> Vec<ArbiterAction> {
        let ApprovalSubmission {
            id,
            method,
            origin,
            completion,
        } = submission;

        if let Some(existing) = self.tracked.get(&id) {
            if existing.status.is_open() {
                debug!(%id, "duplicate approval request, ignoring");
                // The new sender drops unfired; the caller's earlier
                // submission still resolves normally.
                drop(completion);
                // If its window is already up, draw the eye to it.
                if let Some(ActiveSlot::Open { id: active, window }) = &self.active {
                    if *active == id {
                        return vec![ArbiterAction::FocusWindow(*window)];
                    }
                }
                return Vec::new();
            }
        }

        if origin.is_known() && is_idempotent_method(&method) {
            if let Some(original_id) = self.find_open_from_origin(&origin) {
                debug!(%id, original = %original_id, %method, "mirroring read-only request");
                self.tracked.insert(
                    id.clone(),
                    TrackedRequest {
                        method,
                        origin,
                        created_at: now,
                        status: ApprovalStatus::Pending,
                        result: None,
                        mirrors: Vec::new(),
                        completion,
                    },
                );
                if let Some(original) = self.tracked.get_mut(&original_id) {
                    original.mirrors.push(id);
                }
                return Vec::new();
            }
        }

        if self.queue.len() >= self.config.max_queue_size {
            warn!(%id, %method, "approval queue full, rejecting request");
            if let Some(sender) = completion {
                let _ = sender.send(Err(ArbiterError::QueueFull));
            }
            return Vec::new();
        }

        info!(%id, %method, queued = self.queue.len(), "approval request received");
        self.tracked.insert(
            id.clone(),
            TrackedRequest {
                method,
                origin,
                created_at: now,
                status: ApprovalStatus::Pending,
                result: None,
                mirrors: Vec::new(),
                completion,
            },
        );
        self.queue.push_back(id);

        if self.active.is_some() {
            // Behind an open window: tell the user something is
            // waiting, but do not touch the slot.
            vec![ArbiterAction::Notify {
                message: format!("{} request(s) waiting for approval", self.queue.len()),
            }]
        } else {
            self.drain(now)
        }
    }

    /// Fixed-cadence tick: run the stale sweep when due, then try to
    /// present the next queued request.
    pub fn on_tick(&mut self, now: Duration) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();
        if now.saturating_sub(self.last_sweep) >= self.config.sweep_interval {
            self.last_sweep = now;
            actions.extend(self.sweep(now));
        }
        actions.extend(self.drain(now));
        actions
    }

    /// The host opened the window we asked for.
    pub fn on_window_opened(&mut self, id: &ApprovalId, window: WindowId) -> Vec<ArbiterAction> {
        match &self.active {
            Some(ActiveSlot::Opening(opening)) if opening == id => {}
            _ => {
                // Stale report (the request expired or was torn down
                // while the open was in flight); close the orphan.
                warn!(%id, %window, "window opened for a request no longer active");
                return vec![ArbiterAction::CloseWindow(window)];
            }
        }

        self.active = Some(ActiveSlot::Open {
            id: id.clone(),
            window,
        });
        info!(%id, %window, "approval window presented");

        // The caller's promise resolves at presentation; the user
        // interacts with the window directly from here.
        if let Some(request) = self.tracked.get_mut(id) {
            request.result = Some(true);
            request.complete(Ok(true));
        }
        Vec::new()
    }

    /// The host could not open the window. The request fails
    /// terminally and the next drain waits out the reopen delay.
    pub fn on_window_open_failed(&mut self, id: &ApprovalId, now: Duration) -> Vec<ArbiterAction> {
        match &self.active {
            Some(slot) if slot.id() == id => {}
            _ => return Vec::new(),
        }

        warn!(%id, "approval window failed to open");
        self.active = None;
        self.drain_after = Some(now + self.config.reopen_delay);
        self.finalize(id.clone(), ApprovalStatus::Cancelled, Err(ArbiterError::WindowFailed));
        Vec::new()
    }

    /// Host-level window-close event. Only the active slot's window is
    /// of interest; the user closing it completes the request.
    pub fn on_window_closed(&mut self, window: WindowId, now: Duration) -> Vec<ArbiterAction> {
        let id = match &self.active {
            Some(ActiveSlot::Open { id, window: open }) if *open == window => id.clone(),
            _ => return Vec::new(),
        };

        info!(%id, %window, "approval window closed");
        self.active = None;
        self.drain_after = Some(now + self.config.reopen_delay);
        self.finalize(id, ApprovalStatus::Completed, Ok(true));
        vec![ArbiterAction::ClearNotification]
    }

    /// Explicit completion with a known outcome, closing the window
    /// early if the request owns it.
    pub fn mark_complete(
        &mut self,
        id: &ApprovalId,
        result: bool,
        now: Duration,
    ) -> Vec<ArbiterAction> {
        let Some(request) = self.tracked.get_mut(id) else {
            return Vec::new();
        };
        if request.status.is_terminal() {
            return Vec::new();
        }
        request.result = Some(result);

        let mut actions = Vec::new();
        if let Some(slot) = &self.active {
            if slot.id() == id {
                if let ActiveSlot::Open { window, .. } = slot {
                    actions.push(ArbiterAction::CloseWindow(*window));
                }
                self.active = None;
                self.drain_after = Some(now + self.config.reopen_delay);
                actions.push(ArbiterAction::ClearNotification);
            }
        }
        self.queue.retain(|queued| queued != id);

        info!(%id, result, "approval request completed");
        self.finalize(id.clone(), ApprovalStatus::Completed, Ok(result));
        actions
    }

    /// Force-close the active window, cancelling its request.
    pub fn close_active(&mut self, now: Duration) -> Vec<ArbiterAction> {
        let Some(slot) = self.active.take() else {
            return Vec::new();
        };
        let id = slot.id().clone();
        self.drain_after = Some(now + self.config.reopen_delay);
        self.finalize(id, ApprovalStatus::Cancelled, Err(ArbiterError::Cancelled));

        match slot {
            ActiveSlot::Open { window, .. } => vec![
                ArbiterAction::CloseWindow(window),
                ArbiterAction::ClearNotification,
            ],
            ActiveSlot::Opening(_) => vec![ArbiterAction::ClearNotification],
        }
    }

    /// Cancel every queued (not active) request.
    pub fn clear_queue(&mut self) -> Vec<ArbiterAction> {
        let queued: Vec<ApprovalId> = self.queue.drain(..).collect();
        for id in queued {
            self.finalize(id, ApprovalStatus::Cancelled, Err(ArbiterError::Cancelled));
        }
        info!("approval queue cleared");
        vec![ArbiterAction::ClearNotification]
    }

    /// Introspection snapshot.
    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            active: self.active.is_some(),
            queued: self.queue.len(),
            oldest_queued: self
                .queue
                .iter()
                .filter_map(|id| self.tracked.get(id))
                .map(|request| request.created_at)
                .min(),
        }
    }

    /// Present the next queued request if the slot is free and the
    /// reopen delay has passed.
    fn drain(&mut self, now: Duration) -> Vec<ArbiterAction> {
        if self.active.is_some() {
            return Vec::new();
        }
        if let Some(after) = self.drain_after {
            if now < after {
                return Vec::new();
            }
            self.drain_after = None;
        }

        while let Some(id) = self.queue.pop_front() {
            let Some(request) = self.tracked.get_mut(&id) else {
                continue;
            };
            if request.status != ApprovalStatus::Pending {
                continue;
            }
            request.status = ApprovalStatus::Active;
            let url = format!("/approvals.html?request={}&method={}", id, request.method);
            debug!(%id, "presenting approval request");
            // Slot claimed in the same uninterrupted step as the
            // dequeue; the open itself is asynchronous.
            self.active = Some(ActiveSlot::Opening(id.clone()));
            return vec![ArbiterAction::OpenWindow {
                id,
                url,
                width: self.config.popup_width,
                height: self.config.popup_height,
            }];
        }
        Vec::new()
    }

    /// Cancel requests older than the maximum age, whatever their
    /// status, and forget old terminal entries.
    fn sweep(&mut self, now: Duration) -> Vec<ArbiterAction> {
        let max_age = self.config.max_request_age;
        let expired: Vec<ApprovalId> = self
            .tracked
            .iter()
            .filter(|(_, request)| {
                request.status.is_open() && now.saturating_sub(request.created_at) > max_age
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut actions = Vec::new();
        for id in expired {
            warn!(%id, "approval request expired");
            if let Some(slot) = &self.active {
                if *slot.id() == id {
                    if let ActiveSlot::Open { window, .. } = slot {
                        actions.push(ArbiterAction::CloseWindow(*window));
                    }
                    self.active = None;
                    self.drain_after = Some(now + self.config.reopen_delay);
                }
            }
            self.queue.retain(|queued| *queued != id);
            self.finalize(id, ApprovalStatus::Cancelled, Err(ArbiterError::Expired));
        }

        // Terminal entries are kept around briefly for late mirror
        // lookups, then dropped.
        self.tracked.retain(|_, request| {
            request.status.is_open() || now.saturating_sub(request.created_at) <= max_age
        });

        actions
    }

    /// Move a request to a terminal state, settle its channel, and
    /// propagate the outcome to its mirrors.
    fn finalize(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        outcome: Result<bool, ArbiterError>,
    ) {
        let mirrors = if let Some(request) = self.tracked.get_mut(&id) {
            request.status = status;
            if let Ok(result) = &outcome {
                request.result = Some(*result);
            }
            request.complete(outcome.clone());
            std::mem::take(&mut request.mirrors)
        } else {
            Vec::new()
        };

        for mirror_id in mirrors {
            if let Some(mirror) = self.tracked.get_mut(&mirror_id) {
                if mirror.status.is_open() {
                    debug!(id = %mirror_id, "resolving mirrored request");
                    mirror.status = status;
                    mirror.complete(outcome.clone());
                }
            }
        }
    }

    /// The most recent open request attributable to this origin.
    fn find_open_from_origin(&self, origin: &DappOrigin) -> Option<ApprovalId> {
        self.tracked
            .iter()
            .filter(|(_, request)| request.status.is_open() && request.origin.matches(origin))
            .max_by_key(|(_, request)| request.created_at)
            .map(|(id, _)| id.clone())
    }
}
