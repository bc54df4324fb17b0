//! Engine configuration.

use std::time::Duration;

use crate::chunk::PartLimits;

/// Retry policy for transient part-transfer failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per part before the session is parked in `Error`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculates the backoff delay after a failed attempt (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Tuning knobs for the upload engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Workers per session. Small on purpose; the global cap does the real
    /// throttling.
    pub session_concurrency: usize,
    /// Hard ceiling on in-flight part transfers across all sessions.
    pub global_max_concurrent: usize,
    /// Part size planning bounds.
    pub limits: PartLimits,
    /// Per-part retry policy.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_concurrency: 2,
            global_max_concurrent: 4,
            limits: PartLimits::default(),
            retry: RetryConfig::default(),
        }
    }
}
