use std::time::Duration;

use rand::Rng;

const DEFAULT_ATTEMPTS: usize = 6;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);
const JITTER_RATIO: f64 = 0.2;

/// Bounded-attempts, bounded-delay retry configuration for
/// [`crate::Agent::send`].
///
/// An attempts count of zero means the default of 6. Without a `max_delay`
/// the exponential backoff grows uncapped. By default every execution
/// failure retries, wrapper validation failures included;
/// `retry_validation_errors(false)` restores the earlier behavior where a
/// semantic rejection is terminal.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    attempts: usize,
    base_backoff: Duration,
    max_delay: Option<Duration>,
    retry_validation_errors: bool,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_delay: None,
            retry_validation_errors: true,
        }
    }

    /// Total attempts, first try included. Zero selects the default.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        self
    }

    /// Upper bound on the delay between attempts.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn retry_validation_errors(mut self, retry: bool) -> Self {
        self.retry_validation_errors = retry;
        self
    }

    pub(crate) fn effective_attempts(&self) -> usize {
        if self.attempts == 0 {
            DEFAULT_ATTEMPTS
        } else {
            self.attempts
        }
    }

    pub(crate) fn retries_validation_errors(&self) -> bool {
        self.retry_validation_errors
    }

    /// Delay before the retry following attempt `attempt` (1-based):
    /// exponential doubling from the base, jittered, clamped to `max_delay`
    /// when one is set.
    pub(crate) fn backoff_for_retry(&self, attempt: usize) -> Duration {
        let capped_exponent = attempt.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let mut delay_ms = base_ms.saturating_mul(multiplier);
        if let Some(max_delay) = self.max_delay {
            delay_ms = delay_ms.min(max_delay.as_millis());
        }
        let delay_ms = delay_ms.min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * JITTER_RATIO).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let mut sampled_ms = rng.random_range(low..=high);
        if let Some(max_delay) = self.max_delay {
            sampled_ms = sampled_ms.min(max_delay.as_millis().min(u64::MAX as u128) as u64);
        }
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn zero_attempts_selects_the_default() {
        assert_eq!(RetryPolicy::new().attempts(0).effective_attempts(), 6);
        assert_eq!(RetryPolicy::new().attempts(2).effective_attempts(), 2);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new().base_backoff(Duration::from_millis(100));
        for attempt in 1..=4 {
            let expected_ms = 100_u64 << (attempt - 1);
            let backoff = policy.backoff_for_retry(attempt).as_millis() as u64;
            let span = (expected_ms as f64 * 0.2).round() as u64;
            assert!(
                backoff >= expected_ms - span && backoff <= expected_ms + span,
                "attempt {attempt}: {backoff}ms outside [{:?}, {:?}]",
                expected_ms - span,
                expected_ms + span
            );
        }
    }

    #[test]
    fn jittered_backoff_never_exceeds_max_delay() {
        let policy = RetryPolicy::new()
            .base_backoff(Duration::from_millis(100))
            .max_delay(Duration::from_millis(120));

        for _ in 0..256 {
            assert!(policy.backoff_for_retry(5) <= Duration::from_millis(120));
        }
    }
}
