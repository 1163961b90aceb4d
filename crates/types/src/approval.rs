//! Interactive approval request types.

use crate::identifiers::{TabId, WindowId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a dapp request came from: the tab and/or window hosting the
/// page. Either may be absent for requests without page context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappOrigin {
    /// Tab hosting the requesting page.
    pub tab_id: Option<TabId>,
    /// Window hosting the requesting page.
    pub window_id: Option<WindowId>,
}

impl DappOrigin {
    /// Origin with a known tab.
    pub fn from_tab(tab_id: TabId) -> Self {
        DappOrigin {
            tab_id: Some(tab_id),
            window_id: None,
        }
    }

    /// Origin with a known window.
    pub fn from_window(window_id: WindowId) -> Self {
        DappOrigin {
            tab_id: None,
            window_id: Some(window_id),
        }
    }

    /// Whether we have any identifying information at all.
    pub fn is_known(&self) -> bool {
        self.tab_id.is_some() || self.window_id.is_some()
    }

    /// Whether two origins refer to the same page context.
    ///
    /// Matches on window id or tab id; unknown origins never match
    /// (we cannot safely deduplicate requests we cannot attribute).
    pub fn matches(&self, other: &DappOrigin) -> bool {
        if let (Some(a), Some(b)) = (self.window_id, other.window_id) {
            if a == b {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (self.tab_id, other.tab_id) {
            if a == b {
                return true;
            }
        }
        false
    }
}

/// Lifecycle state of an interactive approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Queued or mirroring another request; no window yet.
    Pending,
    /// Owns the single open approval window.
    Active,
    /// Finished normally (window closed or explicitly completed).
    Completed,
    /// Expired, rejected, or torn down before completion.
    Cancelled,
}

impl ApprovalStatus {
    /// Whether this request still blocks duplicates with the same id.
    pub fn is_open(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Active)
    }

    /// Whether this request has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Completed | ApprovalStatus::Cancelled)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Active => "active",
            ApprovalStatus::Completed => "completed",
            ApprovalStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_matching() {
        let tab = DappOrigin::from_tab(TabId(4));
        let same_tab = DappOrigin {
            tab_id: Some(TabId(4)),
            window_id: Some(WindowId(9)),
        };
        let other_tab = DappOrigin::from_tab(TabId(5));
        let unknown = DappOrigin::default();

        assert!(tab.matches(&same_tab));
        assert!(!tab.matches(&other_tab));
        assert!(!unknown.matches(&unknown));
        assert!(!unknown.is_known());
    }

    #[test]
    fn test_status_predicates() {
        assert!(ApprovalStatus::Pending.is_open());
        assert!(ApprovalStatus::Active.is_open());
        assert!(ApprovalStatus::Completed.is_terminal());
        assert!(!ApprovalStatus::Cancelled.is_open());
    }
}
