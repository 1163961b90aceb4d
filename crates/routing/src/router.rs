//! The provider routing table and selection algorithm.

use crate::config::RouterConfig;
use crate::error::{ProviderError, RouterError};
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use ward_types::ProviderName;

/// Pricing tier of a provider plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostTier {
    /// Free plan, usually quota-limited.
    Free,
    /// Paid plan.
    Paid,
}

/// A routing rule forcing selection of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOverride {
    /// Force until explicitly cleared.
    Permanent,
    /// Force for the next `n` selections, then revert to weighted
    /// routing.
    Remaining(u32),
    /// Force until the given instant passes.
    Until(Duration),
}

/// Per-provider configuration and health state.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique provider key.
    pub name: ProviderName,
    /// Selection mass in the weighted pool.
    pub weight: u32,
    /// Manual on/off switch.
    pub enabled: bool,
    /// Automatic, time-bounded exclusion.
    pub suspended: bool,
    /// When the suspension lifts; checked lazily on next consideration.
    pub suspended_until: Option<Duration>,
    /// Active forced-selection rule, if any.
    pub routing_override: Option<RoutingOverride>,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Rolling average response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Rolling success rate, 0-100.
    pub success_rate: f64,
    /// Pricing tier.
    pub cost_tier: CostTier,
    /// Remaining free-tier quota, if tracked.
    pub remaining_quota: Option<u64>,
    /// Total selections routed to this provider.
    pub total_requests: u64,
    /// Last time this provider was selected.
    pub last_used: Option<Duration>,
    /// Last time a failure was reported.
    pub last_failure: Option<Duration>,
    /// Message of the last reported failure.
    pub last_error: Option<String>,
}

impl ProviderConfig {
    /// A fresh, enabled provider with the given weight.
    pub fn new(name: ProviderName, weight: u32, cost_tier: CostTier) -> Self {
        Self {
            name,
            weight,
            enabled: true,
            suspended: false,
            suspended_until: None,
            routing_override: None,
            failure_count: 0,
            avg_response_time_ms: 0.0,
            success_rate: 100.0,
            cost_tier,
            remaining_quota: None,
            total_requests: 0,
            last_used: None,
            last_failure: None,
            last_error: None,
        }
    }

    /// Set a tracked free-tier quota.
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.remaining_quota = Some(quota);
        self
    }

    /// Register the provider disabled (e.g. no API key configured yet).
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Clear the suspension if its deadline has passed.
    ///
    /// Failure count is kept; it resets on the first subsequent
    /// success, not on expiry.
    fn clear_expired_suspension(&mut self, now: Duration) {
        if self.suspended {
            if let Some(until) = self.suspended_until {
                if until <= now {
                    self.suspended = false;
                    self.suspended_until = None;
                    info!(provider = %self.name, "suspension expired, resuming");
                }
            }
        }
    }

    /// Whether this provider may appear in the weighted pool.
    fn eligible(&self) -> bool {
        self.enabled && !self.suspended
    }
}

/// Read-only health snapshot for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    pub name: ProviderName,
    pub enabled: bool,
    pub suspended: bool,
    pub weight: u32,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub failure_count: u32,
    pub total_requests: u64,
    pub last_used: Option<Duration>,
}

/// Options for a single selection.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Restrict to free-tier providers when any are eligible.
    pub prefer_cost: bool,
    /// Pick the lowest measured average response time instead of
    /// drawing from the weighted pool.
    pub prefer_speed: bool,
    /// Use exactly this provider or fail.
    pub force: Option<ProviderName>,
}

/// Weighted provider router.
///
/// Owns the provider-health table exclusively; callers select a
/// provider, run their call through the transport collaborator, and
/// report the outcome back here.
#[derive(Debug)]
pub struct ProviderRouter {
    config: RouterConfig,
    /// Routing table. Insertion-ordered so pool construction and
    /// tie-breaking are deterministic.
    providers: IndexMap<ProviderName, ProviderConfig>,
    /// Provider currently under an override, if any.
    override_provider: Option<ProviderName>,
}

impl ProviderRouter {
    /// Create an empty router.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            providers: IndexMap::new(),
            override_provider: None,
        }
    }

    /// Create a router seeded with the stock provider table: a primary
    /// at weight 7, a backup at weight 5, and a third registered but
    /// disabled until an operator configures credentials for it.
    pub fn with_default_providers(config: RouterConfig) -> Self {
        let mut router = Self::new(config);
        router.add_provider(
            ProviderConfig::new(ProviderName::new("alchemy"), 7, CostTier::Free)
                .with_quota(300_000_000),
        );
        router.add_provider(
            ProviderConfig::new(ProviderName::new("infura"), 5, CostTier::Free)
                .with_quota(100_000),
        );
        router.add_provider(
            ProviderConfig::new(ProviderName::new("quicknode"), 0, CostTier::Free).disabled(),
        );
        router
    }

    /// Add (or replace) a provider.
    pub fn add_provider(&mut self, provider: ProviderConfig) {
        info!(provider = %provider.name, weight = provider.weight, "provider added");
        self.providers.insert(provider.name.clone(), provider);
    }

    /// Remove a provider entirely.
    pub fn remove_provider(&mut self, name: &ProviderName) {
        if self.override_provider.as_ref() == Some(name) {
            self.override_provider = None;
        }
        if self.providers.shift_remove(name).is_some() {
            info!(provider = %name, "provider removed");
        }
    }

    /// Enable a provider.
    pub fn enable(&mut self, name: &ProviderName) -> Result<(), RouterError> {
        let provider = self.provider_mut(name)?;
        provider.enabled = true;
        info!(provider = %name, "provider enabled");
        Ok(())
    }

    /// Disable a provider (manual off switch; also used for auth
    /// failures). Clears any override pointing at it.
    pub fn disable(&mut self, name: &ProviderName) -> Result<(), RouterError> {
        let provider = self.provider_mut(name)?;
        provider.enabled = false;
        provider.routing_override = None;
        if self.override_provider.as_ref() == Some(name) {
            self.override_provider = None;
        }
        info!(provider = %name, "provider disabled");
        Ok(())
    }

    /// Suspend a provider until the given deadline (or for the
    /// configured suspend duration if none given).
    pub fn suspend(
        &mut self,
        name: &ProviderName,
        until: Option<Duration>,
        now: Duration,
    ) -> Result<(), RouterError> {
        let suspend_duration = self.config.suspend_duration;
        let provider = self.provider_mut(name)?;
        provider.suspended = true;
        provider.suspended_until = Some(until.unwrap_or(now + suspend_duration));
        warn!(provider = %name, until = ?provider.suspended_until, "provider suspended");
        Ok(())
    }

    /// Lift a suspension and forget the failures that caused it.
    pub fn resume(&mut self, name: &ProviderName) -> Result<(), RouterError> {
        let provider = self.provider_mut(name)?;
        provider.suspended = false;
        provider.suspended_until = None;
        provider.failure_count = 0;
        info!(provider = %name, "provider resumed");
        Ok(())
    }

    /// Change a provider's selection weight, clamped to the configured
    /// minimum.
    pub fn set_weight(&mut self, name: &ProviderName, weight: u32) -> Result<(), RouterError> {
        let min_weight = self.config.min_weight;
        let provider = self.provider_mut(name)?;
        provider.weight = weight.max(min_weight);
        info!(provider = %name, weight = provider.weight, "provider weight set");
        Ok(())
    }

    /// Install a forced-selection override for a provider.
    pub fn set_override(
        &mut self,
        name: &ProviderName,
        routing_override: RoutingOverride,
    ) -> Result<(), RouterError> {
        let provider = self.provider_mut(name)?;
        provider.routing_override = Some(routing_override);
        self.override_provider = Some(name.clone());
        info!(provider = %name, ?routing_override, "routing override set");
        Ok(())
    }

    /// Clear any active override.
    pub fn clear_override(&mut self) {
        if let Some(name) = self.override_provider.take() {
            if let Some(provider) = self.providers.get_mut(&name) {
                provider.routing_override = None;
            }
            info!(provider = %name, "routing override cleared");
        }
    }

    /// Select a provider for the next call.
    ///
    /// Order of precedence: explicit force, active override,
    /// preference filters, weighted random draw.
    pub fn select(
        &mut self,
        rng: &mut impl Rng,
        options: &SelectOptions,
        now: Duration,
    ) -> Result<ProviderName, RouterError> {
        // 1. Explicitly forced provider: use it or fail fast.
        if let Some(forced) = &options.force {
            let provider = self
                .providers
                .get(forced)
                .ok_or_else(|| RouterError::UnknownProvider(forced.clone()))?;
            if !provider.enabled {
                return Err(RouterError::ProviderUnavailable(forced.clone()));
            }
            let name = forced.clone();
            self.record_selection(&name, now);
            return Ok(name);
        }

        // 2. Active override.
        if let Some(name) = self.check_override(now) {
            self.record_selection(&name, now);
            return Ok(name);
        }

        // 3/4. Preference filter, then weighted draw.
        let candidates = self.eligible_providers(now, options);

        if options.prefer_speed {
            // Among measured candidates, take the fastest directly.
            let fastest = candidates
                .iter()
                .filter(|name| {
                    self.providers
                        .get(*name)
                        .is_some_and(|p| p.avg_response_time_ms > 0.0)
                })
                .min_by(|a, b| {
                    let pa = self.providers[*a].avg_response_time_ms;
                    let pb = self.providers[*b].avg_response_time_ms;
                    pa.total_cmp(&pb)
                })
                .cloned();
            if let Some(name) = fastest {
                debug!(provider = %name, "selected fastest provider");
                self.record_selection(&name, now);
                return Ok(name);
            }
            // No measurements yet; fall through to the weighted draw.
        }

        let name = self.weighted_draw(rng, &candidates)?;
        self.record_selection(&name, now);
        Ok(name)
    }

    /// Record a successful call: update rolling metrics and clear the
    /// failure streak.
    pub fn report_success(&mut self, name: &ProviderName, response_time: Duration, _now: Duration) {
        let Some(provider) = self.providers.get_mut(name) else {
            return;
        };

        let n = provider.total_requests.max(1) as f64;
        let latest_ms = response_time.as_secs_f64() * 1000.0;
        provider.avg_response_time_ms =
            (provider.avg_response_time_ms * (n - 1.0) + latest_ms) / n;
        provider.success_rate = (provider.success_rate * (n - 1.0) + 100.0) / n;

        if provider.failure_count > 0 {
            info!(provider = %name, "provider recovered, resetting failure count");
            provider.failure_count = 0;
            provider.last_error = None;
        }
    }

    /// Record a failed call and fail over: returns a replacement
    /// provider drawn from the remaining healthy weighted pool.
    ///
    /// Transient failures count toward auto-suspension; auth failures
    /// disable the provider immediately since retrying cannot succeed.
    pub fn report_failure(
        &mut self,
        rng: &mut impl Rng,
        name: &ProviderName,
        error: &ProviderError,
        now: Duration,
    ) -> Result<ProviderName, RouterError> {
        let max_failures = self.config.max_failures;
        let suspend_duration = self.config.suspend_duration;

        if let Some(provider) = self.providers.get_mut(name) {
            provider.failure_count += 1;
            provider.last_failure = Some(now);
            provider.last_error = Some(error.to_string());

            let n = provider.total_requests.max(1) as f64;
            provider.success_rate = (provider.success_rate * (n - 1.0)) / n;

            warn!(
                provider = %name,
                failures = provider.failure_count,
                max = max_failures,
                %error,
                "provider call failed"
            );

            if provider.failure_count >= max_failures {
                provider.suspended = true;
                provider.suspended_until = Some(now + suspend_duration);
                warn!(provider = %name, "provider auto-suspended after repeated failures");
            }
        }

        if error.is_auth() {
            error!(provider = %name, "authentication failure, disabling provider");
            // Provider may have been removed concurrently with the
            // report; a missing entry is not an error here.
            let _ = self.disable(name);
        }

        // Failover: draw from the healthy pool, excluding the failed
        // provider.
        let candidates: Vec<ProviderName> = self
            .healthy_providers(now)
            .into_iter()
            .filter(|candidate| candidate != name)
            .collect();

        if candidates.is_empty() {
            error!("no healthy providers remain after failure");
            return Err(RouterError::AllProvidersFailed);
        }

        let replacement = self.weighted_draw(rng, &candidates)?;
        info!(from = %name, to = %replacement, "failing over");
        self.record_selection(&replacement, now);
        Ok(replacement)
    }

    /// Providers that are enabled and unsuspended, clearing expired
    /// suspensions along the way. A lapsed suspension makes a provider
    /// healthy again even though its failure count only resets on its
    /// next success.
    pub fn healthy_providers(&mut self, now: Duration) -> Vec<ProviderName> {
        self.providers
            .values_mut()
            .filter_map(|provider| {
                provider.clear_expired_suspension(now);
                provider.eligible().then(|| provider.name.clone())
            })
            .collect()
    }

    /// Health snapshot for one provider.
    pub fn stats(&self, name: &ProviderName) -> Option<ProviderStats> {
        self.providers.get(name).map(|provider| ProviderStats {
            name: provider.name.clone(),
            enabled: provider.enabled,
            suspended: provider.suspended,
            weight: provider.weight,
            avg_response_time_ms: provider.avg_response_time_ms,
            success_rate: provider.success_rate,
            failure_count: provider.failure_count,
            total_requests: provider.total_requests,
            last_used: provider.last_used,
        })
    }

    /// Health snapshots for every registered provider.
    pub fn all_stats(&self) -> Vec<ProviderStats> {
        self.providers
            .keys()
            .filter_map(|name| self.stats(name))
            .collect()
    }

    /// Zero every provider's metrics, keeping table membership and
    /// enablement.
    pub fn reset_metrics(&mut self) {
        for provider in self.providers.values_mut() {
            provider.failure_count = 0;
            provider.avg_response_time_ms = 0.0;
            provider.success_rate = 100.0;
            provider.total_requests = 0;
            provider.last_used = None;
        }
        info!("all provider metrics reset");
    }

    /// Direct access to a provider's configuration.
    pub fn provider(&self, name: &ProviderName) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    fn provider_mut(&mut self, name: &ProviderName) -> Result<&mut ProviderConfig, RouterError> {
        self.providers
            .get_mut(name)
            .ok_or_else(|| RouterError::UnknownProvider(name.clone()))
    }

    /// Resolve the active override, consuming one use of a counted
    /// override and clearing expired ones.
    fn check_override(&mut self, now: Duration) -> Option<ProviderName> {
        let name = self.override_provider.clone()?;
        let provider = self.providers.get_mut(&name)?;
        provider.clear_expired_suspension(now);
        if !provider.eligible() {
            return None;
        }

        match provider.routing_override {
            Some(RoutingOverride::Permanent) => {
                debug!(provider = %name, "using permanent-override provider");
                Some(name)
            }
            Some(RoutingOverride::Until(deadline)) if deadline > now => {
                debug!(provider = %name, "using time-override provider");
                Some(name)
            }
            Some(RoutingOverride::Until(_)) => {
                provider.routing_override = None;
                self.override_provider = None;
                None
            }
            Some(RoutingOverride::Remaining(count)) if count > 0 => {
                let remaining = count - 1;
                if remaining == 0 {
                    provider.routing_override = None;
                    self.override_provider = None;
                } else {
                    provider.routing_override = Some(RoutingOverride::Remaining(remaining));
                }
                debug!(provider = %name, remaining, "using count-override provider");
                Some(name)
            }
            Some(RoutingOverride::Remaining(_)) | None => {
                self.override_provider = None;
                None
            }
        }
    }

    /// Eligible candidates after clearing expired suspensions and
    /// applying the cost preference filter.
    fn eligible_providers(&mut self, now: Duration, options: &SelectOptions) -> Vec<ProviderName> {
        let mut candidates: Vec<ProviderName> = self
            .providers
            .values_mut()
            .filter_map(|provider| {
                provider.clear_expired_suspension(now);
                provider.eligible().then(|| provider.name.clone())
            })
            .collect();

        if options.prefer_cost {
            let free: Vec<ProviderName> = candidates
                .iter()
                .filter(|name| {
                    self.providers
                        .get(*name)
                        .is_some_and(|p| p.cost_tier == CostTier::Free)
                })
                .cloned()
                .collect();
            if !free.is_empty() {
                candidates = free;
            }
        }

        candidates
    }

    /// Flatten candidates into a pool where each appears `weight`
    /// times, then draw uniformly.
    fn weighted_draw(
        &self,
        rng: &mut impl Rng,
        candidates: &[ProviderName],
    ) -> Result<ProviderName, RouterError> {
        let mut pool: Vec<&ProviderName> = Vec::new();
        for name in candidates {
            if let Some(provider) = self.providers.get(name) {
                for _ in 0..provider.weight {
                    pool.push(name);
                }
            }
        }

        if pool.is_empty() {
            return Err(RouterError::NoProvidersAvailable);
        }

        let index = rng.gen_range(0..pool.len());
        Ok(pool[index].clone())
    }

    /// Bookkeeping common to every selection path.
    fn record_selection(&mut self, name: &ProviderName, now: Duration) {
        if let Some(provider) = self.providers.get_mut(name) {
            provider.last_used = Some(now);
            provider.total_requests += 1;
            if let Some(quota) = provider.remaining_quota.as_mut() {
                *quota = quota.saturating_sub(1);
            }
        }
    }
}
