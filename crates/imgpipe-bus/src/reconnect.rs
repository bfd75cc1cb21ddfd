use std::time::Duration;

/// Bounded exponential reconnect schedule for a bus subscriber.
///
/// Retry `n` (zero based) waits `base * 2^n`; after `max_retries` failed
/// retries in a row the subscriber gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Delay before retry number `retry`, or `None` once the budget is spent
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay(3), None);
    }

    proptest! {
        #[test]
        fn prop_delay_doubles(base_ms in 1u64..5_000, retry in 0u32..8) {
            let policy = ReconnectPolicy::new(Duration::from_millis(base_ms), 9);
            let this = policy.delay(retry).unwrap();
            let next = policy.delay(retry + 1).unwrap();
            prop_assert_eq!(next, this * 2);
        }
    }
}
