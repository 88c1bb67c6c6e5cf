use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use holdfast_engine::{BsonCodec, Codec};
use rand::Rng;

/// Backoff applied when a write transaction loses an optimistic conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Pause before retry number `attempt` (0-based): the base delay doubled
    /// per attempt, capped, plus up to half of that again at random.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let half = u64::try_from(delay.as_micros() / 2).unwrap_or(u64::MAX);
        if half == 0 {
            return delay;
        }
        delay + Duration::from_micros(rand::thread_rng().gen_range(0..=half))
    }
}

/// Per-database configuration.
#[derive(Clone)]
pub struct DatabaseOptions {
    /// Encodes entities, keys and index values for this database.
    pub codec: Arc<dyn Codec>,
    pub retry: RetryPolicy,
    /// Records or index entries fetched per cursor page.
    pub batch_size: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            codec: Arc::new(BsonCodec),
            retry: RetryPolicy::default(),
            batch_size: 100,
        }
    }
}

impl DatabaseOptions {
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("codec", &self.codec.name())
            .field("retry", &self.retry)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = DatabaseOptions::default();
        assert_eq!(options.codec.name(), "bson");
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.retry.max_attempts, 10);
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        for attempt in 0..20 {
            let expected = (Duration::from_millis(1) * 2u32.pow(attempt.min(10))).min(Duration::from_millis(100));
            let delay = policy.delay(attempt);
            assert!(delay >= expected, "attempt {attempt}: {delay:?} < {expected:?}");
            assert!(delay <= expected + expected / 2, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn zero_delay_has_no_jitter() {
        let policy = RetryPolicy::default().with_base_delay(Duration::ZERO);
        assert_eq!(policy.delay(3), Duration::ZERO);
    }
}
