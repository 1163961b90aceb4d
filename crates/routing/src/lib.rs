//! Weighted provider routing with health tracking and failover.
//!
//! The router owns a table of named upstream RPC provider
//! configurations and picks one per call using weighted random
//! selection. It scores every reported outcome, auto-suspends
//! providers that keep failing, disables providers whose credentials
//! are rejected, and fails over to the remaining weighted pool when a
//! call goes bad.
//!
//! The router only selects and scores. The actual RPC transport lives
//! with the caller: select a provider, make the call, then report the
//! outcome back so health tracking stays current.
//!
//! Randomness is injected as a [`rand::Rng`] so selection is
//! reproducible under test with a seeded generator.

mod config;
mod error;
mod router;

pub use config::RouterConfig;
pub use error::{ProviderError, RouterError};
pub use router::{
    CostTier, ProviderConfig, ProviderRouter, ProviderStats, RoutingOverride, SelectOptions,
};
