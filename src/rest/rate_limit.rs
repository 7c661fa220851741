//! Request-weight budget per exchange minute
//!
//! Binance meters REST usage in weight per UTC minute and reports the
//! current usage in the `X-MBX-USED-WEIGHT-1M` header. The limiter tracks the
//! same window locally and makes callers wait for the next minute once the
//! budget is spent.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;

use crate::symbol::Segment;

const WINDOW_MS: i64 = 60_000;

#[derive(Debug)]
pub struct RateLimiter {
    segment: Segment,
    budget: u32,
    used: AtomicU32,
    /// Minute index the `used` counter belongs to
    window: AtomicI64,
}

impl RateLimiter {
    pub fn new(segment: Segment, budget: u32) -> Self {
        Self {
            segment,
            budget: budget.max(1),
            used: AtomicU32::new(0),
            window: AtomicI64::new(0),
        }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    /// Reserve `weight` in the window containing `now_ms`, or return how long
    /// to wait for the next window.
    pub fn try_acquire_at(&self, weight: u32, now_ms: i64) -> Result<(), Duration> {
        let weight = weight.min(self.budget);
        self.roll(now_ms);

        let mut used = self.used.load(Ordering::Acquire);
        loop {
            if used.saturating_add(weight) > self.budget {
                let wait_ms = WINDOW_MS - now_ms.rem_euclid(WINDOW_MS);
                return Err(Duration::from_millis(wait_ms as u64));
            }
            match self
                .used
                .compare_exchange_weak(used, used + weight, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => used = actual,
            }
        }
    }

    /// Wait until `weight` fits into the budget, then reserve it.
    pub async fn acquire(&self, weight: u32) {
        loop {
            match self.try_acquire_at(weight, chrono::Utc::now().timestamp_millis()) {
                Ok(()) => return,
                Err(wait) => {
                    info!(
                        segment = %self.segment,
                        used = self.used(),
                        budget = self.budget,
                        wait_ms = wait.as_millis() as u64,
                        "Request weight exhausted, waiting for next window"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Adopt the exchange-reported usage when it is ahead of the local count.
    pub fn observe_used_weight(&self, used: u32, now_ms: i64) {
        self.roll(now_ms);
        self.used.fetch_max(used, Ordering::AcqRel);
    }

    fn roll(&self, now_ms: i64) {
        let minute = now_ms.div_euclid(WINDOW_MS);
        let current = self.window.load(Ordering::Acquire);
        if minute > current
            && self
                .window
                .compare_exchange(current, minute, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.used.store(0, Ordering::Release);
        }
    }
}
