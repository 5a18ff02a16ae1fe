//! Request pacing shared by all concurrent workers.
//!
//! Concurrency bounds how many calls are in flight; this bounds how often a
//! new one may start. Anthropic's lower tiers allow 50 requests per minute,
//! so starts are spaced `60 / rpm` seconds apart.

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Minimum-interval limiter: at most one request start per `interval`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing `per_minute` request starts per minute (min 1).
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            interval: Duration::from_secs(60) / per_minute.max(1),
            next_slot: Mutex::new(None),
        }
    }

    /// Spacing between two request starts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next free slot.
    ///
    /// Slots are handed out in the order callers reach the lock, so waiting
    /// tasks queue up instead of racing.
    pub async fn wait(&self) {
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(slot + self.interval);
        drop(next);
        sleep_until(slot).await;
    }
}
