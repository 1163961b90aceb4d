//! Router configuration.

use std::time::Duration;

/// Configuration for provider routing and health tracking.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Consecutive failures before a provider is auto-suspended.
    pub max_failures: u32,

    /// How long an auto-suspension lasts.
    pub suspend_duration: Duration,

    /// Minimum weight assignable through `set_weight`. A provider can
    /// still be registered with weight 0 to keep it out of rotation
    /// until an operator raises it.
    pub min_weight: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            suspend_duration: Duration::from_secs(5 * 60),
            min_weight: 1,
        }
    }
}

impl RouterConfig {
    /// Config with a custom suspension window.
    pub fn with_suspend_duration(suspend_duration: Duration) -> Self {
        Self {
            suspend_duration,
            ..Default::default()
        }
    }
}
