/// Per-source fetch state and cooldown policy
use crate::error::{FailureKind, FetchError};
use crate::resolution::ResolvedTexture;
use std::time::Duration;

/// A cached value younger than this is served without refreshing
pub const FRESH_TTL: Duration = Duration::from_secs(10 * 60);
/// Shortest cooldown after a failed fetch
pub const COOLDOWN_MIN: Duration = Duration::from_secs(30);
/// Longest cooldown after a failed fetch
pub const COOLDOWN_MAX: Duration = Duration::from_secs(10 * 60);
/// Repeats of the same failure inside this window are counted, not logged
pub const LOG_SUPPRESS_WINDOW: Duration = Duration::from_secs(45);

const COOLDOWN_MAX_SHIFT: u32 = 5;

/// Cooldown before the next fetch after `consecutive_failures` failures
pub fn cooldown_for(consecutive_failures: u32, error: &FetchError) -> Duration {
    let shift = consecutive_failures.saturating_sub(1).min(COOLDOWN_MAX_SHIFT);
    let base = clamp(COOLDOWN_MIN * (1u32 << shift));

    match error {
        FetchError::NotFound(_) => COOLDOWN_MAX,
        FetchError::RateLimited { retry_after } => {
            base.max(clamp(retry_after.unwrap_or(COOLDOWN_MIN)))
        }
        _ => base,
    }
}

fn clamp(duration: Duration) -> Duration {
    duration.clamp(COOLDOWN_MIN, COOLDOWN_MAX)
}

/// Decision on whether a failure gets its own log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Log it, reporting how many identical lines were swallowed before it
    Emit { suppressed: u32 },
    Suppress,
}

#[derive(Debug, Default)]
pub struct LogThrottle {
    last_signature: Option<String>,
    last_logged_ms: u64,
    suppressed: u32,
}

impl LogThrottle {
    pub fn on_failure(&mut self, signature: &str, now_ms: u64) -> LogDecision {
        let window = LOG_SUPPRESS_WINDOW.as_millis() as u64;
        if self.last_signature.as_deref() == Some(signature)
            && now_ms.saturating_sub(self.last_logged_ms) < window
        {
            self.suppressed += 1;
            return LogDecision::Suppress;
        }

        let suppressed = std::mem::take(&mut self.suppressed);
        self.last_signature = Some(signature.to_string());
        self.last_logged_ms = now_ms;
        LogDecision::Emit { suppressed }
    }

    /// Reset on recovery, returning the count still unreported
    pub fn on_success(&mut self) -> u32 {
        let suppressed = self.suppressed;
        *self = Self::default();
        suppressed
    }
}

/// Outcome of folding a finished fetch into the state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Updated {
        /// Set if this success ended a failure streak
        recovered_after: Option<u32>,
        suppressed: u32,
    },
    Failed {
        cooldown: Duration,
        consecutive_failures: u32,
        log: LogDecision,
    },
}

/// Everything the service tracks for one source username
#[derive(Debug, Default)]
pub struct SourceState {
    pub last_good: Option<ResolvedTexture>,
    pub last_success_ms: u64,
    pub next_retry_ms: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<FailureKind>,
    pub in_flight: bool,
    /// The loader's on-disk cache was already consulted
    pub disk_checked: bool,
    pub log: LogThrottle,
}

impl SourceState {
    /// Has a value younger than [`FRESH_TTL`]
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.last_good.is_some()
            && now_ms.saturating_sub(self.last_success_ms) < FRESH_TTL.as_millis() as u64
    }

    /// Not cooling down and nothing running
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.in_flight && now_ms >= self.next_retry_ms
    }

    /// Claim the in-flight slot if a fetch should start now
    pub fn try_begin_fetch(&mut self, now_ms: u64) -> bool {
        if self.is_fresh(now_ms) || !self.is_due(now_ms) {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Claim the in-flight slot regardless of freshness or cooldown
    pub fn force_begin_fetch(&mut self) -> bool {
        self.next_retry_ms = 0;
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn record_success(&mut self, texture: ResolvedTexture, now_ms: u64) -> FetchOutcome {
        let recovered_after = (self.consecutive_failures > 0).then_some(self.consecutive_failures);

        self.last_good = Some(texture);
        self.last_success_ms = now_ms;
        self.next_retry_ms = 0;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.in_flight = false;

        FetchOutcome::Updated {
            recovered_after,
            suppressed: self.log.on_success(),
        }
    }

    pub fn record_failure(&mut self, error: &FetchError, now_ms: u64) -> FetchOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let cooldown = cooldown_for(self.consecutive_failures, error);

        self.next_retry_ms = now_ms + cooldown.as_millis() as u64;
        self.last_error = Some(error.kind());
        self.in_flight = false;

        FetchOutcome::Failed {
            cooldown,
            consecutive_failures: self.consecutive_failures,
            log: self.log.on_failure(&error.signature(), now_ms),
        }
    }

    /// When the current rate-limit cooldown ends, if one is active
    pub fn rate_limited_until(&self, now_ms: u64) -> Option<u64> {
        (self.last_error == Some(FailureKind::RateLimit) && self.next_retry_ms > now_ms)
            .then_some(self.next_retry_ms)
    }

    /// Serving a cached value because the latest fetch failed
    /// Adopt a texture cached by a previous run, once per source
    ///
    /// Only fills an empty slot and leaves the success time alone, so the
    /// seeded value is served but still counts as stale.
    pub fn seed_cached(&mut self, texture: Option<ResolvedTexture>) -> bool {
        self.disk_checked = true;
        match texture {
            Some(texture) if self.last_good.is_none() => {
                self.last_good = Some(texture);
                true
            }
            _ => false,
        }
    }

    pub fn is_using_last_good(&self) -> bool {
        self.last_good.is_some() && self.last_error.is_some()
    }

    /// Forget everything except an in-flight claim
    pub fn reset(&mut self) {
        let in_flight = self.in_flight;
        *self = Self::default();
        self.in_flight = in_flight;
    }
}
