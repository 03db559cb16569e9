/// Circuit breaker for host texture hooks
///
/// After `failure_threshold` reported failures the texture overrides are
/// switched off for `open_for`, then switched back on automatically.
use crate::config::BreakerConfig;
use crate::metrics;
use crate::resolution::Clock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { remaining: Duration },
}

pub struct HookCircuitBreaker {
    failure_threshold: u32,
    open_for: Duration,
    failures: AtomicU32,
    open_until_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl HookCircuitBreaker {
    pub fn new(config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_for: Duration::from_secs(config.open_secs),
            failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
            clock,
        }
    }

    pub fn state(&self) -> BreakerState {
        let now = self.clock.now_ms();
        let until = self.open_until_ms.load(Ordering::Acquire);
        if now < until {
            BreakerState::Open {
                remaining: Duration::from_millis(until - now),
            }
        } else {
            BreakerState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), BreakerState::Open { .. })
    }

    /// Count a hook failure, opening the breaker once the threshold is hit
    pub fn record_failure(&self, hook: &str, detail: &str) {
        metrics::record_hook_failure(hook);

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < self.failure_threshold {
            return;
        }

        self.failures.store(0, Ordering::Release);
        let until = self.clock.now_ms() + self.open_for.as_millis() as u64;
        self.open_until_ms.store(until, Ordering::Release);
        metrics::BREAKER_TRIPS_TOTAL.inc();

        warn!(
            "[NH-HOOK-CB] Texture overrides disabled for {}s after repeated hook failures (last hook={}): {}",
            self.open_for.as_secs(),
            hook,
            detail
        );
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.open_until_ms.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::ManualClock;

    fn breaker(clock: Arc<ManualClock>) -> HookCircuitBreaker {
        HookCircuitBreaker::new(
            &BreakerConfig {
                failure_threshold: 5,
                open_secs: 60,
            },
            clock,
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = Arc::new(ManualClock::new(10_000));
        let breaker = breaker(clock.clone());

        for _ in 0..4 {
            breaker.record_failure("skin", "boom");
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure("skin", "boom");
        assert_eq!(
            breaker.state(),
            BreakerState::Open {
                remaining: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_closes_after_open_window() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            breaker.record_failure("cape", "boom");
        }
        assert!(breaker.is_open());

        clock.advance(Duration::from_secs(59));
        assert!(breaker.is_open());
        clock.advance(Duration::from_secs(1));
        assert!(!breaker.is_open());

        // Counter restarted when the breaker tripped
        for _ in 0..4 {
            breaker.record_failure("cape", "boom");
        }
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_reset_closes_immediately() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock);
        for _ in 0..5 {
            breaker.record_failure("skin", "boom");
        }
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
