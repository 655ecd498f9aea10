use std::time::Duration;

/// Exponential reconnect backoff. A zero base retries immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn immediate() -> Self {
        Self::new(0, 0)
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let calculated = self.base_delay_ms.saturating_mul(1_u64 << shift);
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(250, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_delay() {
        let policy = RetryPolicy::new(250, 8_000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
    }

    #[test]
    fn scales_exponentially() {
        let policy = RetryPolicy::new(100, 10_000);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn caps_delay_at_max() {
        let policy = RetryPolicy::new(1_000, 4_000);
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(4_000));
    }

    #[test]
    fn immediate_never_waits() {
        let policy = RetryPolicy::immediate();
        for attempt in 1..=10 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::ZERO);
        }
    }
}
