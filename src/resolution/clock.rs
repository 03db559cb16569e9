/// Time sources, interruptible waits and backoff jitter
use crate::error::FetchError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Millisecond wall clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Waits between retry attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Returns `FetchError::Interrupted` if the wait was cut short
    async fn sleep(&self, duration: Duration) -> Result<(), FetchError>;
}

/// Tokio timer sleeper that can be interrupted on shutdown
#[derive(Debug, Clone, Default)]
pub struct TokioSleeper {
    interrupt: Arc<Notify>,
}

impl TokioSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every pending wait with `Interrupted`
    pub fn interrupt(&self) {
        self.interrupt.notify_waiters();
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.interrupt.notified() => Err(FetchError::Interrupted),
        }
    }
}

/// Sleeper that returns at once
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl Sleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Random extra delay added to each backoff step
pub trait Jitter: Send + Sync {
    /// Value in `0..=bound_ms`
    fn jitter_ms(&self, bound_ms: u64) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn jitter_ms(&self, bound_ms: u64) -> u64 {
        rand::thread_rng().gen_range(0..=bound_ms)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn jitter_ms(&self, _bound_ms: u64) -> u64 {
        0
    }
}
