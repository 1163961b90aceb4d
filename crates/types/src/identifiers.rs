//! Domain-specific identifier types.

use crate::update::UpdateKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of a queued update request.
///
/// Derived from (kind, source, submission time) so a given producer
/// submitting the same kind of update at a given instant always maps
/// to the same id. Deduplication keys on the (kind, source) prefix;
/// the timestamp suffix keeps ids unique across resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateId(String);

impl UpdateId {
    /// Derive an id from the update kind, producer name, and submission time.
    pub fn derive(kind: UpdateKind, source: &str, submitted_at: Duration) -> Self {
        UpdateId(format!(
            "{}-{}-{}",
            kind.as_str(),
            source,
            submitted_at.as_millis()
        ))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an interactive approval request.
///
/// Assigned by the dapp side of the connection (EIP-1193 request ids),
/// so it is an opaque string rather than a locally minted integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(String);

impl ApprovalId {
    /// Create an approval id from the dapp-supplied request id.
    pub fn new(id: impl Into<String>) -> Self {
        ApprovalId(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Host browser window identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window({})", self.0)
    }
}

/// Host browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tab({})", self.0)
    }
}

/// Wallet account identifier (checksummed address string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from an address string.
    pub fn new(address: impl Into<String>) -> Self {
        AccountId(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifier (symbol, or contract address for unlisted tokens).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(String);

impl TokenId {
    /// Create a token id.
    pub fn new(id: impl Into<String>) -> Self {
        TokenId(id.into())
    }

    /// Get the token id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upstream RPC provider name (unique key in the routing table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderName(String);

impl ProviderName {
    /// Create a provider name.
    pub fn new(name: impl Into<String>) -> Self {
        ProviderName(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_id_derivation() {
        let a = UpdateId::derive(UpdateKind::PriceOnly, "poller", Duration::from_millis(1200));
        let b = UpdateId::derive(UpdateKind::PriceOnly, "poller", Duration::from_millis(1200));
        let c = UpdateId::derive(UpdateKind::PriceOnly, "poller", Duration::from_millis(1300));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "price_only-poller-1200");
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(ApprovalId::new("abc").to_string(), "req-abc");
        assert_eq!(WindowId(7).to_string(), "Window(7)");
        assert_eq!(TabId(3).to_string(), "Tab(3)");
    }
}
