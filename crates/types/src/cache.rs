//! The shared wallet cache and its derived rollups.
//!
//! The cache is the single mutable region all portfolio data flows
//! into. It is owned exclusively by the update coordinator; every
//! other component routes mutations through coordinator submissions.

use crate::identifiers::{AccountId, TokenId};
use crate::update::{TokenInfo, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A token position held by one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Which token.
    pub token: TokenId,
    /// Held amount in token base units.
    pub amount: u128,
    /// Base-unit decimals for this token.
    pub decimals: u8,
}

impl TokenBalance {
    /// Fiat value of this position given a price in micro-units per
    /// whole token.
    pub fn fiat_value(&self, price: u128) -> u128 {
        // amount is in base units; scale down by the token's decimals.
        self.amount.saturating_mul(price) / 10u128.pow(self.decimals as u32)
    }
}

/// Derived fiat totals, recomputed from balances and prices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioRollups {
    /// Total fiat value per account, micro-units.
    pub per_account: BTreeMap<AccountId, u128>,
    /// Total fiat value across all accounts, micro-units.
    pub grand_total: u128,
}

/// The in-memory wallet cache.
///
/// Balances, prices, transactions, and the token list are primary
/// data written by update handlers; `rollups` is a projection and is
/// recomputed after every write that can change it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletCache {
    /// Token positions per account.
    pub balances: BTreeMap<AccountId, Vec<TokenBalance>>,
    /// Market prices, micro-units per whole token.
    pub prices: BTreeMap<TokenId, u128>,
    /// Tracked transactions keyed by hash.
    pub transactions: BTreeMap<String, TransactionRecord>,
    /// Metadata for tracked tokens.
    pub token_list: Vec<TokenInfo>,
    /// Derived fiat totals.
    pub rollups: PortfolioRollups,
}

impl WalletCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the per-account and grand-total rollups from the
    /// current balances and prices. Tokens with no cached price count
    /// as zero.
    pub fn recompute_rollups(&mut self) {
        let mut per_account = BTreeMap::new();
        let mut grand_total: u128 = 0;

        for (account, positions) in &self.balances {
            let total: u128 = positions
                .iter()
                .map(|p| {
                    let price = self.prices.get(&p.token).copied().unwrap_or(0);
                    p.fiat_value(price)
                })
                .sum();
            per_account.insert(account.clone(), total);
            grand_total = grand_total.saturating_add(total);
        }

        self.rollups = PortfolioRollups {
            per_account,
            grand_total,
        };
    }

    /// Current grand-total fiat value.
    pub fn grand_total(&self) -> u128 {
        self.rollups.grand_total
    }

    /// Whether an account has a balance entry.
    pub fn has_account(&self, account: &AccountId) -> bool {
        self.balances.contains_key(account)
    }
}
