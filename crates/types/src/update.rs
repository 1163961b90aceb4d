//! Update request classification and payloads.

use crate::cache::TokenBalance;
use crate::identifiers::{AccountId, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Priority band of an update request. Higher wins.
///
/// The bands are fixed: background sync sits at the bottom, direct
/// user actions at the top. Retried requests are demoted one band per
/// attempt so a flapping producer cannot starve fresher data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum UpdatePriority {
    /// Lowest priority: opportunistic background sync.
    BackgroundSync = 1,
    /// Regular interval refreshes.
    Interval = 2,
    /// On-chain events (detected transactions).
    ChainEvent = 3,
    /// Market price updates.
    PriceUpdate = 4,
    /// Highest priority: user-initiated actions.
    UserAction = 5,
}

impl UpdatePriority {
    /// Numeric rank of this band (1..=5).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Demote one band, saturating at the bottom.
    pub fn demote(self) -> Self {
        match self {
            UpdatePriority::UserAction => UpdatePriority::PriceUpdate,
            UpdatePriority::PriceUpdate => UpdatePriority::ChainEvent,
            UpdatePriority::ChainEvent => UpdatePriority::Interval,
            UpdatePriority::Interval | UpdatePriority::BackgroundSync => {
                UpdatePriority::BackgroundSync
            }
        }
    }
}

impl fmt::Display for UpdatePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePriority::BackgroundSync => "background-sync",
            UpdatePriority::Interval => "interval",
            UpdatePriority::ChainEvent => "chain-event",
            UpdatePriority::PriceUpdate => "price-update",
            UpdatePriority::UserAction => "user-action",
        };
        write!(f, "{name}")
    }
}

/// The kind of data an update request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Complete portfolio replacement (balances + rollups).
    FullPortfolio,
    /// Market prices only.
    PriceOnly,
    /// Account balances only.
    BalanceOnly,
    /// A single transaction record.
    Transaction,
    /// Recompute derived rollups without touching underlying data.
    RollupOnly,
    /// Tracked token metadata list.
    TokenList,
}

impl UpdateKind {
    /// Stable snake_case tag, used in update id derivation.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateKind::FullPortfolio => "full_portfolio",
            UpdateKind::PriceOnly => "price_only",
            UpdateKind::BalanceOnly => "balance_only",
            UpdateKind::Transaction => "transaction",
            UpdateKind::RollupOnly => "rollup_only",
            UpdateKind::TokenList => "token_list",
        }
    }

    /// The cache region this kind writes to.
    ///
    /// Kinds sharing a lock group must never have their apply
    /// sequences interleaved.
    pub fn lock_group(self) -> LockGroup {
        match self {
            UpdateKind::PriceOnly | UpdateKind::BalanceOnly => LockGroup::TokenData,
            UpdateKind::FullPortfolio | UpdateKind::RollupOnly => LockGroup::Portfolio,
            UpdateKind::Transaction => LockGroup::Transactions,
            UpdateKind::TokenList => LockGroup::TokenList,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named bucket of update kinds that write the same cache region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockGroup {
    /// Per-token prices and balances.
    TokenData,
    /// Portfolio snapshots and rollups.
    Portfolio,
    /// Transaction history.
    Transactions,
    /// Tracked token metadata.
    TokenList,
}

impl fmt::Display for LockGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockGroup::TokenData => "token-data",
            LockGroup::Portfolio => "portfolio",
            LockGroup::Transactions => "transactions",
            LockGroup::TokenList => "token-list",
        };
        write!(f, "{name}")
    }
}

/// Kind-specific update data.
///
/// One variant per [`UpdateKind`]; the coordinator dispatches on this
/// exhaustively, so adding a kind without a handler is a compile error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpdatePayload {
    /// Complete portfolio snapshot.
    FullPortfolio(PortfolioSnapshot),
    /// New market prices.
    PriceOnly(PriceUpdate),
    /// New account balances.
    BalanceOnly(BalanceUpdate),
    /// A detected or submitted transaction.
    Transaction(TransactionRecord),
    /// Recompute rollups from whatever is cached.
    RollupOnly,
    /// Replacement token metadata list.
    TokenList(Vec<TokenInfo>),
}

impl UpdatePayload {
    /// The kind tag for this payload.
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdatePayload::FullPortfolio(_) => UpdateKind::FullPortfolio,
            UpdatePayload::PriceOnly(_) => UpdateKind::PriceOnly,
            UpdatePayload::BalanceOnly(_) => UpdateKind::BalanceOnly,
            UpdatePayload::Transaction(_) => UpdateKind::Transaction,
            UpdatePayload::RollupOnly => UpdateKind::RollupOnly,
            UpdatePayload::TokenList(_) => UpdateKind::TokenList,
        }
    }
}

/// Complete portfolio snapshot: balances for every account plus the
/// producer's own view of the grand total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Balances per account.
    pub accounts: BTreeMap<AccountId, Vec<TokenBalance>>,
    /// Producer-computed total fiat value, in micro-units.
    pub grand_total: u128,
    /// Bypass the zero-regression guard.
    ///
    /// Set when the producer knows the snapshot is correct even if it
    /// zeroes a previously non-zero total (e.g. the user removed all
    /// accounts).
    pub authoritative: bool,
}

/// Market price update, micro-fiat-units per whole token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// New prices; tokens absent from the map keep their cached price.
    pub prices: BTreeMap<TokenId, u128>,
}

/// Balance update for one or more accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Replacement balances per account; accounts absent from the map
    /// are untouched.
    pub balances: BTreeMap<AccountId, Vec<TokenBalance>>,
    /// Bypass the zero-regression guard.
    pub authoritative: bool,
}

/// Lifecycle state of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Broadcast but not yet mined.
    Pending,
    /// Confirmed on chain.
    Confirmed,
    /// Reverted or dropped.
    Failed,
}

/// A single tracked transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash (unique key in the cache).
    pub hash: String,
    /// Account the transaction belongs to.
    pub account: AccountId,
    /// Token moved.
    pub token: TokenId,
    /// Amount in token base units.
    pub amount: u128,
    /// Current lifecycle state.
    pub status: TransactionStatus,
    /// Wall-clock timestamp (ms since Unix epoch), as reported by the
    /// producer.
    pub timestamp_ms: u64,
}

/// Metadata for a token the wallet tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token identifier.
    pub token: TokenId,
    /// Human-readable name.
    pub name: String,
    /// Base-unit decimals.
    pub decimals: u8,
}
