//! Shared data model for the Ward wallet background core.
//!
//! These types are pure data: no I/O, no clocks, no channels. The
//! coordinator, router, and arbiter crates build their machinery on
//! top of them, and hosts serialize them for persistence.

mod approval;
mod cache;
mod identifiers;
mod update;

pub use approval::{ApprovalStatus, DappOrigin};
pub use cache::{PortfolioRollups, TokenBalance, WalletCache};
pub use identifiers::{AccountId, ApprovalId, ProviderName, TabId, TokenId, UpdateId, WindowId};
pub use update::{
    BalanceUpdate, LockGroup, PortfolioSnapshot, PriceUpdate, TokenInfo, TransactionRecord,
    TransactionStatus, UpdateKind, UpdatePayload, UpdatePriority,
};
