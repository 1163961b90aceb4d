//! Update submissions and the queued request they become.

use crate::error::UpdateError;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use ward_types::{UpdateId, UpdateKind, UpdatePayload, UpdatePriority};

/// Delivery-once completion channel for a submitted update.
///
/// Fired exactly once when the request reaches a terminal state. A
/// debounced submission drops its sender unfired; the caller observes
/// the closed channel and may resubmit after the debounce window.
pub type CompletionSender = oneshot::Sender<Result<(), UpdateError>>;

/// What a producer hands to [`crate::UpdateCoordinator::submit`].
#[derive(Debug)]
pub struct UpdateSubmission {
    /// Kind-specific update data.
    pub payload: UpdatePayload,
    /// Priority band.
    pub priority: UpdatePriority,
    /// Producer name, diagnostic only (and part of the debounce
    /// identity).
    pub source: String,
    /// Per-request attempt ceiling; the config default applies when
    /// absent.
    pub max_retries: Option<u32>,
    /// Optional completion channel.
    pub completion: Option<CompletionSender>,
}

impl UpdateSubmission {
    /// A submission with the config-default retry ceiling and no
    /// completion channel.
    pub fn new(payload: UpdatePayload, priority: UpdatePriority, source: impl Into<String>) -> Self {
        Self {
            payload,
            priority,
            source: source.into(),
            max_retries: None,
            completion: None,
        }
    }

    /// Attach a completion channel.
    pub fn with_completion(mut self, completion: CompletionSender) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Override the retry ceiling for this request.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// How a submission was admitted.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted to the queue (or applied immediately for user-action
    /// priority).
    Queued(UpdateId),
    /// Dropped: an update with the same (kind, source) identity
    /// completed within the debounce window.
    Debounced(UpdateId),
}

impl SubmitOutcome {
    /// The id assigned to the submission either way.
    pub fn id(&self) -> &UpdateId {
        match self {
            SubmitOutcome::Queued(id) | SubmitOutcome::Debounced(id) => id,
        }
    }
}

/// A queued update request. Mutated only by the coordinator
/// (`retry_count`, priority demotion on retry).
#[derive(Debug)]
pub(crate) struct UpdateRequest {
    pub id: UpdateId,
    pub payload: UpdatePayload,
    pub priority: UpdatePriority,
    pub source: String,
    pub submitted_at: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub completion: Option<CompletionSender>,
}

impl UpdateRequest {
    pub fn kind(&self) -> UpdateKind {
        self.payload.kind()
    }

    /// Debounce identity: (kind, source).
    pub fn identity(&self) -> (UpdateKind, String) {
        (self.kind(), self.source.clone())
    }

    /// Fire the completion channel. Safe to call at most once per
    /// request; the sender is consumed.
    pub fn complete(&mut self, result: Result<(), UpdateError>) {
        if let Some(sender) = self.completion.take() {
            if sender.send(result).is_err() {
                debug!(id = %self.id, "completion receiver dropped");
            }
        }
    }
}
