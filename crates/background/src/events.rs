//! Events multiplexed into the background event loop.

use ward_arbiter::ApprovalSubmission;
use ward_coordinator::UpdateSubmission;
use ward_types::{ApprovalId, WindowId};

/// Everything the outside world can ask of the background service.
#[derive(Debug)]
pub enum BackgroundEvent {
    /// A producer submits a cache update.
    SubmitUpdate(UpdateSubmission),
    /// A dapp requests interactive approval.
    RequestApproval(ApprovalSubmission),
    /// The approval UI reports an explicit outcome for a request.
    ApprovalComplete { id: ApprovalId, result: bool },
    /// Host-level window-close notification.
    WindowClosed(WindowId),
    /// Cancel every queued (not in-flight) update.
    ClearUpdates,
    /// Cancel every queued (not active) approval request.
    ClearApprovals,
    /// Stop the event loop.
    Shutdown,
}
