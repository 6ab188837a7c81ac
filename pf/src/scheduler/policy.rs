//! Step execution policy: timeout, retry budget, backoff and cancel grace

use rand::Rng;
use std::time::Duration;

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPolicy {
    /// Per-attempt timeout (agents may override it in the registry)
    pub step_timeout: Duration,
    /// Attempts per agent; a fallback agent gets its own budget
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Time a cancelled agent gets before it is abandoned
    pub cancel_grace: Duration,
}

impl StepPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            step_timeout: Duration::from_millis(config.step_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            cancel_grace: Duration::from_millis(config.cancel_grace_ms),
        }
    }

    /// Capped exponential delay before retry number `retry` (1-based)
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// `backoff_ceiling` plus up to 25% random jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        let jitter_ms = (ceiling.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        ceiling + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
