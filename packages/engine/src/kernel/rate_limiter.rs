//! Rate Limiter (§4.2): per-credential sliding-window admission control.
//!
//! A keyed, in-process sliding window of event timestamps. `governor`'s
//! token-bucket algorithm doesn't naturally expose the "remaining" and
//! "retry-after" figures §4.2 requires, so this hand-rolls the window
//! instead, keyed by credential id in a `DashMap` for lock-free concurrent
//! access across request-handling tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: Option<u64>,
}

const WINDOW: Duration = Duration::from_secs(60);
const EXPIRE_AFTER: Duration = Duration::from_secs(70);

struct Window {
    events: Vec<(Instant, u64)>,
    last_touched: Instant,
}

/// Per-credential sliding-window limiter.
///
/// If constructed without a backing store URL (§6.5), every check admits and
/// logs a warning — the limiter is best-effort, not a security control.
pub struct RateLimiter {
    windows: DashMap<Uuid, Window>,
    tiebreaker: AtomicU64,
    fail_open: bool,
}

impl RateLimiter {
    /// `store_configured` mirrors whether `RATE_LIMITER_STORE_URL` is set;
    /// when false the limiter fails open per §4.2.
    pub fn new(store_configured: bool) -> Self {
        Self {
            windows: DashMap::new(),
            tiebreaker: AtomicU64::new(0),
            fail_open: !store_configured,
        }
    }

    /// check(keyId, rpm) -> {allowed, remaining, retryAfterSeconds?} (§4.2).
    pub fn check(&self, key_id: Uuid, rpm: u32) -> RateLimitOutcome {
        if self.fail_open {
            tracing::warn!(credential_id = %key_id, "rate limiter store unconfigured, admitting request");
            return RateLimitOutcome {
                allowed: true,
                remaining: rpm,
                retry_after_secs: None,
            };
        }

        let now = Instant::now();
        let tiebreak = self.tiebreaker.fetch_add(1, Ordering::Relaxed);

        let mut window = self
            .windows
            .entry(key_id)
            .or_insert_with(|| Window {
                events: Vec::new(),
                last_touched: now,
            });

        window.events.retain(|(ts, _)| now.duration_since(*ts) <= WINDOW);
        window.events.push((now, tiebreak));
        window.last_touched = now;

        let count = window.events.len() as u32;
        if count > rpm {
            let oldest = window.events.first().map(|(ts, _)| *ts).unwrap_or(now);
            let retry_after = WINDOW
                .checked_sub(now.duration_since(oldest))
                .map(|d| d.as_secs_f64().ceil() as u64)
                .unwrap_or(1)
                .max(1);
            RateLimitOutcome {
                allowed: false,
                remaining: 0,
                retry_after_secs: Some(retry_after),
            }
        } else {
            RateLimitOutcome {
                allowed: true,
                remaining: rpm - count,
                retry_after_secs: None,
            }
        }
    }

    /// reset(keyId): clears the window (admin use, §4.2).
    pub fn reset(&self, key_id: Uuid) {
        self.windows.remove(&key_id);
    }

    /// Evict windows untouched for roughly 70s, keeping memory bounded.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.last_touched) < EXPIRE_AFTER);
    }
}
