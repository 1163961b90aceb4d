//! Router-backed RPC client.
//!
//! The canonical producer-side call path: select a provider, make the
//! call through the transport, report the outcome, and fail over on
//! errors until the call succeeds or the router runs out of healthy
//! providers.

use crate::traits::ProviderTransport;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use ward_routing::{ProviderRouter, RouterError, SelectOptions};

/// An RPC client that routes every call through a [`ProviderRouter`].
///
/// Owns the router and the RNG driving weighted selection, so one
/// client instance is the single scorer for its provider pool.
pub struct RoutedClient<R: Rng> {
    router: ProviderRouter,
    transport: Arc<dyn ProviderTransport>,
    rng: R,
    started: Instant,
}

impl<R: Rng> RoutedClient<R> {
    pub fn new(router: ProviderRouter, transport: Arc<dyn ProviderTransport>, rng: R) -> Self {
        Self {
            router,
            transport,
            rng,
            started: Instant::now(),
        }
    }

    /// Make an RPC call, failing over across the provider pool.
    ///
    /// Each failed attempt is scored against the provider that served
    /// it; the loop is bounded because every failure moves some
    /// provider toward suspension. The terminal
    /// [`RouterError::AllProvidersFailed`] propagates as a hard error:
    /// there is no further fallback.
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        options: &SelectOptions,
    ) -> Result<Value, RouterError> {
        let now = self.started.elapsed();
        let mut provider = self.router.select(&mut self.rng, options, now)?;

        loop {
            debug!(%provider, method, "dispatching rpc call");
            let attempt_started = Instant::now();
            let outcome = self
                .transport
                .call(provider.clone(), method.to_string(), params.clone())
                .await;
            let now = self.started.elapsed();

            match outcome {
                Ok(value) => {
                    self.router
                        .report_success(&provider, attempt_started.elapsed(), now);
                    return Ok(value);
                }
                Err(err) => {
                    warn!(%provider, method, %err, "provider call failed, failing over");
                    provider = self
                        .router
                        .report_failure(&mut self.rng, &provider, &err, now)?;
                }
            }
        }
    }

    /// The router, for health inspection and manual overrides.
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut ProviderRouter {
        &mut self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BoxFuture;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use ward_routing::{CostTier, ProviderConfig, ProviderError, RouterConfig};
    use ward_types::ProviderName;

    /// Transport that replays a scripted sequence of outcomes and
    /// records which provider served each call.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<Value, ProviderError>>>,
        calls: Mutex<Vec<ProviderName>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<Value, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ProviderName> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProviderTransport for ScriptedTransport {
        fn call(
            &self,
            provider: ProviderName,
            _method: String,
            _params: Value,
        ) -> BoxFuture<Result<Value, ProviderError>> {
            self.calls.lock().unwrap().push(provider);
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Timeout(std::time::Duration::from_secs(10))));
            Box::pin(async move { outcome })
        }
    }

    fn two_provider_router() -> ProviderRouter {
        let mut router = ProviderRouter::new(RouterConfig::default());
        router.add_provider(ProviderConfig::new(ProviderName::new("alpha"), 7, CostTier::Free));
        router.add_provider(ProviderConfig::new(ProviderName::new("beta"), 5, CostTier::Free));
        router
    }

    #[tokio::test]
    async fn test_call_fails_over_to_second_provider() {
        let transport = ScriptedTransport::new(vec![
            Err(ProviderError::Transport("connection reset".into())),
            Ok(json!({"blockNumber": "0x10"})),
        ]);
        let mut client = RoutedClient::new(
            two_provider_router(),
            transport.clone(),
            ChaCha8Rng::seed_from_u64(7),
        );

        let value = client
            .call("eth_blockNumber", json!([]), &SelectOptions::default())
            .await
            .unwrap();
        assert_eq!(value, json!({"blockNumber": "0x10"}));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1], "failover must pick a different provider");

        // The failed attempt was scored, the successful one too.
        let failed = client.router().provider(&calls[0]).unwrap();
        assert_eq!(failed.failure_count, 1);
        let served = client.router().provider(&calls[1]).unwrap();
        assert_eq!(served.failure_count, 0);
        assert_eq!(served.total_requests, 1);
    }

    #[tokio::test]
    async fn test_exhausting_all_providers_is_a_hard_error() {
        // Every call fails; the pool alternates between the two
        // providers until both hit the suspension threshold.
        let transport = ScriptedTransport::new(Vec::new());
        let mut client = RoutedClient::new(
            two_provider_router(),
            transport.clone(),
            ChaCha8Rng::seed_from_u64(7),
        );

        let err = client
            .call("eth_blockNumber", json!([]), &SelectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::AllProvidersFailed);

        // 3 failures each before the pool is exhausted.
        assert_eq!(transport.calls().len(), 6);
    }
}
