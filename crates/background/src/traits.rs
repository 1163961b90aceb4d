//! Collaborator seams to the host runtime.
//!
//! The extension host provides storage, window management,
//! notifications, and network transport. The core only ever sees
//! these traits, so tests run against in-memory fakes.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use ward_routing::ProviderError;
use ward_types::{ProviderName, WalletCache, WindowId};

/// Boxed future returned by collaborator methods, so the traits stay
/// object-safe.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A host-side operation failed. Opaque: the core only logs these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("host operation failed: {0}")]
pub struct HostError(pub String);

/// Eventually-consistent key-value persistence for the wallet cache.
pub trait CacheStore: Send + Sync {
    /// Persist the latest cache snapshot. Best-effort: failures are
    /// logged and the in-memory cache stays authoritative.
    fn persist(&self, cache: WalletCache) -> BoxFuture<Result<(), HostError>>;

    /// Load the last persisted snapshot, if any.
    fn load(&self) -> BoxFuture<Result<Option<WalletCache>, HostError>>;
}

/// Opens, focuses, and closes approval windows.
pub trait WindowPresenter: Send + Sync {
    fn open(&self, url: String, width: u32, height: u32) -> BoxFuture<Result<WindowId, HostError>>;

    fn focus(&self, window: WindowId) -> BoxFuture<Result<(), HostError>>;

    fn close(&self, window: WindowId) -> BoxFuture<Result<(), HostError>>;
}

/// Best-effort user-visible notifications. Infallible by contract:
/// implementations swallow and log their own errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: String) -> BoxFuture<()>;

    fn clear(&self) -> BoxFuture<()>;
}

/// Performs the actual RPC call against a chosen provider. The router
/// only selects and scores; transport lives host-side.
pub trait ProviderTransport: Send + Sync {
    fn call(
        &self,
        provider: ProviderName,
        method: String,
        params: Value,
    ) -> BoxFuture<Result<Value, ProviderError>>;
}
