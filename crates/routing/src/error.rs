//! Error types for provider routing.

use std::time::Duration;
use thiserror::Error;
use ward_types::ProviderName;

/// Errors from the router itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The named provider is not in the routing table.
    #[error("provider {0} not found")]
    UnknownProvider(ProviderName),

    /// A forced provider exists but cannot be used right now.
    #[error("provider {0} not available")]
    ProviderUnavailable(ProviderName),

    /// Every enabled, unsuspended weight summed to an empty pool.
    #[error("no providers available in weighted pool")]
    NoProvidersAvailable,

    /// Failover found no healthy provider left to try.
    #[error("all providers failed; check RPC configuration")]
    AllProvidersFailed,
}

/// A failure reported against a provider by the transport layer.
///
/// The distinction that matters to routing is authentication versus
/// everything else: auth failures will not succeed on retry, so the
/// provider is disabled outright instead of cooling down.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider throttled us.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Credentials rejected (401/403, bad API key).
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ProviderError {
    /// Whether this failure class is permanent for the provider.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}
