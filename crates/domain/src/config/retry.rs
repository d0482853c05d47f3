use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry Wrapper backoff parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential backoff parameters for the model-call Retry Wrapper (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first failure before giving up.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "d_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds.
    #[serde(default = "d_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Symmetric jitter fraction applied to the clamped delay (0.0-1.0).
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            initial_backoff_ms: d_initial_backoff_ms(),
            max_backoff_ms: d_max_backoff_ms(),
            jitter: d_jitter(),
        }
    }
}

impl RetryConfig {
    /// `min(initial * 2^(attempt-1), max)`, `attempt` is 1-based.
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let scaled = self.initial_backoff_ms.saturating_mul(1u64 << exp);
        std::time::Duration::from_millis(scaled.min(self.max_backoff_ms))
    }
}

fn d_max_retries() -> u32 {
    3
}
fn d_initial_backoff_ms() -> u64 {
    500
}
fn d_max_backoff_ms() -> u64 {
    30_000
}
fn d_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_clamps() {
        let cfg = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            jitter: 0.0,
        };
        assert_eq!(cfg.backoff_for_attempt(1).as_millis(), 100);
        assert_eq!(cfg.backoff_for_attempt(2).as_millis(), 200);
        assert_eq!(cfg.backoff_for_attempt(3).as_millis(), 400);
        assert_eq!(cfg.backoff_for_attempt(5).as_millis(), 1000); // clamped
    }
}
