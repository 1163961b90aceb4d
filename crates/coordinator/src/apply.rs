//! Per-kind update handlers.
//!
//! Each handler mutates the wallet cache and recomputes whichever
//! projections its write can invalidate. Portfolio-shaped updates are
//! trial-applied to a scratch copy first so the zero-regression guard
//! judges the real resulting aggregate, not the producer's claim.

use crate::error::UpdateError;
use tracing::{debug, warn};
use ward_types::{
    BalanceUpdate, PortfolioSnapshot, PriceUpdate, TokenInfo, TransactionRecord, UpdatePayload,
    WalletCache,
};

/// Apply one update payload to the cache.
pub(crate) fn apply(cache: &mut WalletCache, payload: &UpdatePayload) -> Result<(), UpdateError> {
    match payload {
        UpdatePayload::FullPortfolio(snapshot) => apply_full_portfolio(cache, snapshot),
        UpdatePayload::PriceOnly(update) => apply_prices(cache, update),
        UpdatePayload::BalanceOnly(update) => apply_balances(cache, update),
        UpdatePayload::Transaction(record) => apply_transaction(cache, record),
        UpdatePayload::RollupOnly => {
            cache.recompute_rollups();
            debug!(grand_total = cache.grand_total(), "rollups recomputed");
            Ok(())
        }
        UpdatePayload::TokenList(tokens) => apply_token_list(cache, tokens),
    }
}

fn apply_full_portfolio(
    cache: &mut WalletCache,
    snapshot: &PortfolioSnapshot,
) -> Result<(), UpdateError> {
    let mut trial = cache.clone();
    trial.balances = snapshot.accounts.clone();
    trial.recompute_rollups();

    guard_zero_regression(cache, &trial, snapshot.authoritative)?;

    *cache = trial;
    debug!(
        accounts = cache.balances.len(),
        grand_total = cache.grand_total(),
        "full portfolio applied"
    );
    Ok(())
}

fn apply_prices(cache: &mut WalletCache, update: &PriceUpdate) -> Result<(), UpdateError> {
    for (token, price) in &update.prices {
        cache.prices.insert(token.clone(), *price);
    }
    cache.recompute_rollups();
    debug!(tokens = update.prices.len(), "prices applied");
    Ok(())
}

fn apply_balances(cache: &mut WalletCache, update: &BalanceUpdate) -> Result<(), UpdateError> {
    let mut trial = cache.clone();
    for (account, positions) in &update.balances {
        trial.balances.insert(account.clone(), positions.clone());
    }
    trial.recompute_rollups();

    guard_zero_regression(cache, &trial, update.authoritative)?;

    *cache = trial;
    debug!(accounts = update.balances.len(), "balances applied");
    Ok(())
}

fn apply_transaction(cache: &mut WalletCache, record: &TransactionRecord) -> Result<(), UpdateError> {
    if !cache.has_account(&record.account) {
        return Err(UpdateError::UnknownAccount(record.account.clone()));
    }
    cache
        .transactions
        .insert(record.hash.clone(), record.clone());
    debug!(hash = %record.hash, account = %record.account, "transaction recorded");
    Ok(())
}

fn apply_token_list(cache: &mut WalletCache, tokens: &[TokenInfo]) -> Result<(), UpdateError> {
    cache.token_list = tokens.to_vec();
    debug!(tokens = tokens.len(), "token list replaced");
    Ok(())
}

/// Reject an update whose result would wipe a known-non-zero grand
/// total, unless the producer flagged it authoritative.
fn guard_zero_regression(
    current: &WalletCache,
    trial: &WalletCache,
    authoritative: bool,
) -> Result<(), UpdateError> {
    if !authoritative && current.grand_total() > 0 && trial.grand_total() == 0 {
        warn!(
            current = current.grand_total(),
            "rejecting zero portfolio value over non-zero cached value"
        );
        return Err(UpdateError::ZeroRegression {
            current: current.grand_total(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use ward_types::{AccountId, TokenBalance, TokenId, TransactionStatus};

    fn priced_cache() -> WalletCache {
        let mut cache = WalletCache::new();
        cache.balances.insert(
            AccountId::new("0xalice"),
            vec![TokenBalance {
                token: TokenId::new("USDC"),
                amount: 500_000_000,
                decimals: 6,
            }],
        );
        cache.prices.insert(TokenId::new("USDC"), 1_000_000);
        cache.recompute_rollups();
        cache
    }

    #[test]
    fn test_zero_balance_update_rejected() {
        let mut cache = priced_cache();
        assert_eq!(cache.grand_total(), 500_000_000);

        let mut balances = BTreeMap::new();
        balances.insert(AccountId::new("0xalice"), vec![]);
        let update = UpdatePayload::BalanceOnly(BalanceUpdate {
            balances,
            authoritative: false,
        });

        let err = apply(&mut cache, &update).unwrap_err();
        assert_eq!(
            err,
            UpdateError::ZeroRegression {
                current: 500_000_000
            }
        );
        // Rejected update leaves the cache untouched.
        assert_eq!(cache.grand_total(), 500_000_000);
    }

    #[test]
    fn test_authoritative_zero_accepted() {
        let mut cache = priced_cache();

        let mut balances = BTreeMap::new();
        balances.insert(AccountId::new("0xalice"), vec![]);
        let update = UpdatePayload::BalanceOnly(BalanceUpdate {
            balances,
            authoritative: true,
        });

        apply(&mut cache, &update).unwrap();
        assert_eq!(cache.grand_total(), 0);
    }

    #[test]
    fn test_price_update_recomputes_rollups() {
        let mut cache = priced_cache();

        let mut prices = BTreeMap::new();
        prices.insert(TokenId::new("USDC"), 2_000_000);
        apply(&mut cache, &UpdatePayload::PriceOnly(PriceUpdate { prices })).unwrap();

        assert_eq!(cache.grand_total(), 1_000_000_000);
    }

    #[test]
    fn test_transaction_requires_known_account() {
        let mut cache = priced_cache();
        let record = TransactionRecord {
            hash: "0xdead".into(),
            account: AccountId::new("0xstranger"),
            token: TokenId::new("USDC"),
            amount: 1,
            status: TransactionStatus::Pending,
            timestamp_ms: 0,
        };

        let err = apply(&mut cache, &UpdatePayload::Transaction(record.clone())).unwrap_err();
        assert!(matches!(err, UpdateError::UnknownAccount(_)));

        let known = TransactionRecord {
            account: AccountId::new("0xalice"),
            ..record
        };
        apply(&mut cache, &UpdatePayload::Transaction(known)).unwrap();
        assert!(cache.transactions.contains_key("0xdead"));
    }

    #[test]
    fn test_full_portfolio_replaces_balances() {
        let mut cache = priced_cache();

        let mut accounts = BTreeMap::new();
        accounts.insert(
            AccountId::new("0xbob"),
            vec![TokenBalance {
                token: TokenId::new("USDC"),
                amount: 42_000_000,
                decimals: 6,
            }],
        );
        let snapshot = PortfolioSnapshot {
            accounts,
            grand_total: 42_000_000,
            authoritative: false,
        };

        apply(&mut cache, &UpdatePayload::FullPortfolio(snapshot)).unwrap();
        assert!(!cache.has_account(&AccountId::new("0xalice")));
        assert_eq!(cache.grand_total(), 42_000_000);
    }
}
