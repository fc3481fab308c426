//! Linear backoff between connection attempts

use std::time::Duration;

/// Linear backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay added per failed attempt
    pub step: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Delay calculator: the n-th delay is `min(n * step, max_delay)`.
///
/// Growth is deliberately linear with a cap, not exponential.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl LinearBackoff {
    /// Create a new linear backoff with default configuration
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait after the next failed attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.config
            .step
            .saturating_mul(self.attempt)
            .min(self.config.max_delay)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_grows_by_step() {
        let mut backoff = LinearBackoff::new();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_linear_backoff_caps_at_max() {
        let mut backoff = LinearBackoff::new();

        for _ in 0..9 {
            backoff.next_delay();
        }

        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_backoff_custom_step() {
        let config = BackoffConfig {
            step: Duration::from_millis(250),
            max_delay: Duration::from_millis(600),
        };
        let mut backoff = LinearBackoff::with_config(config);

        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(600));
    }

    #[test]
    fn test_linear_backoff_reset() {
        let mut backoff = LinearBackoff::new();

        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
