use crate::config::BackoffConfig;
use std::time::Duration;

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug, Clone)]
pub struct ItemBackoff {
    config: BackoffConfig,
}

impl ItemBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt after `failures` previous failures
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(31));
        self.config
            .base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.config.max_delay))
            .unwrap_or(self.config.max_delay)
    }
}
