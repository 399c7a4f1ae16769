// Reconnect scheduling policy: capped exponential backoff, then a slow fallback cadence

use crate::settings::StreamSettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Normal backoff step
    Backoff(Duration),
    /// Backoff exhausted after an earlier successful session; retry after the
    /// long interval and start the backoff sequence over
    Fallback(Duration),
    /// Backoff exhausted and nothing ever connected
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay to randomize by, 0 disables jitter
    pub jitter: f64,
    pub max_attempts: u32,
    pub fallback_interval: Duration,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            multiplier: settings.reconnect_multiplier,
            max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
            jitter: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
            fallback_interval: Duration::from_millis(settings.fallback_retry_interval_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * multiplier^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = attempt.min(i32::MAX as u32) as i32;
        let mut ms = (base_ms * self.multiplier.powi(exp)).min(max_ms);

        if self.jitter > 0.0 {
            let spread = ms * self.jitter;
            ms = (ms + rand::thread_rng().gen_range(-spread..=spread)).clamp(base_ms, max_ms);
        }
        Duration::from_millis(ms as u64)
    }

    pub fn decide(&self, attempt: u32, ever_connected: bool) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Backoff(self.delay_for(attempt))
        } else if ever_connected {
            RetryDecision::Fallback(self.fallback_interval)
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
        // 1000 * 1.5^9 = 38443 is over the cap
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
        assert_eq!(policy.delay_for(500), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<Duration> = (0..20).map(|n| policy.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
    }

    #[test]
    fn test_decide_after_exhaustion() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.decide(3, false),
            RetryDecision::Backoff(policy.delay_for(3))
        );
        assert_eq!(
            policy.decide(10, true),
            RetryDecision::Fallback(Duration::from_secs(120))
        );
        assert_eq!(policy.decide(10, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            jitter: 0.5,
            ..ReconnectPolicy::default()
        };
        for attempt in 0..12 {
            let d = policy.delay_for(attempt);
            assert!(d >= policy.base_delay && d <= policy.max_delay);
        }
    }
}
