use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff for transient vendor failures.
///
/// One policy applies uniformly across all external calls: up to
/// `max_retries` attempts, delay doubling from `base_delay` and capped at
/// `max_delay`, with up to 25% random jitter subtracted so synchronized
/// clients fan out.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_range = exp.as_millis() as u64 / 4;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };
        Some(exp - Duration::from_millis(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_retries() {
        let policy = BackoffPolicy::default();
        assert!(policy.delay_for(0).is_some());
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
    }

    #[test]
    fn delays_grow_and_stay_capped() {
        let policy = BackoffPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        for attempt in 0..10 {
            let delay = policy.delay_for(attempt).unwrap();
            assert!(delay <= Duration::from_secs(2));
            // Jitter subtracts at most a quarter.
            let floor = Duration::from_millis(500)
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(Duration::from_secs(2));
            assert!(delay >= floor - floor / 4);
        }
    }
}
