//! Background service runtime.
//!
//! Composes the three orchestration components — update coordinator,
//! provider router, popup arbiter — into a single-task event loop and
//! wires them to the host through collaborator traits. The components
//! themselves are synchronous state machines; this crate owns every
//! clock, channel, and I/O call around them.
//!
//! One [`BackgroundService`] (and therefore one coordinator, one
//! router, one arbiter) exists per process. Producers talk to it
//! through a cloneable [`BackgroundHandle`].

mod client;
mod events;
mod service;
mod traits;

pub use client::RoutedClient;
pub use events::BackgroundEvent;
pub use service::{BackgroundConfig, BackgroundHandle, BackgroundService, Collaborators, ServiceError};
pub use traits::{BoxFuture, CacheStore, HostError, Notifier, ProviderTransport, WindowPresenter};
