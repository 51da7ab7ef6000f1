use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use time::{Duration, OffsetDateTime};

const WINDOW_SECONDS: i64 = 60;

/// Outcome of a rate limit check. Rejection is a first-class result with a
/// retry hint, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject { retry_after: u64 },
}

/// Per-key sliding window over the trailing 60 seconds.
///
/// Each key holds the instants of its accepted requests; stale instants are
/// pruned lazily on every check. Rejected requests never consume a slot.
/// Process-local by design: instances do not share state.
pub struct SlidingWindowLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<OffsetDateTime>>>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        SlidingWindowLimiter {
            window: Duration::seconds(WINDOW_SECONDS),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Prune, count and (on allow) record the request as one atomic step.
    ///
    /// `retry_after` is the number of whole seconds until the oldest
    /// retained request slides out of the window; a `limit` of zero always
    /// rejects with the full window length. `now` is only passed by tests.
    pub fn check(&self, client_key: &str, limit: u32, now: Option<OffsetDateTime>) -> Decision {
        let now = now.unwrap_or_else(OffsetDateTime::now_utc);

        let mut windows = self.lock_windows();
        let timestamps = windows.entry(client_key.to_owned()).or_default();

        while let Some(&oldest) = timestamps.front() {
            if now - oldest >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < limit as usize {
            timestamps.push_back(now);
            return Decision::Allow;
        }

        let retry_after = match timestamps.front() {
            Some(&oldest) => {
                let remaining = self.window - (now - oldest);
                (remaining.as_seconds_f64().ceil() as u64).max(1)
            }
            // limit == 0: nothing will ever slide out
            None => self.window.whole_seconds() as u64,
        };

        Decision::Reject { retry_after }
    }

    /// Prune stale instants and drop empty windows. Memory hygiene only.
    pub fn sweep(&self, now: Option<OffsetDateTime>) {
        let now = now.unwrap_or_else(OffsetDateTime::now_utc);
        let mut windows = self.lock_windows();

        for timestamps in windows.values_mut() {
            while let Some(&oldest) = timestamps.front() {
                if now - oldest >= self.window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
        }
        windows.retain(|_, timestamps| !timestamps.is_empty());
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock_windows().len()
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, VecDeque<OffsetDateTime>>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn first_request_is_allowed() {
        let limiter = SlidingWindowLimiter::new();

        assert_eq!(limiter.check("key", 1, None), Decision::Allow);
    }

    #[test]
    fn rejects_over_limit_within_window() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);

        for i in 0..3 {
            assert_eq!(
                limiter.check("key", 3, Some(t0 + Duration::seconds(i))),
                Decision::Allow
            );
        }

        assert_eq!(
            limiter.check("key", 3, Some(t0 + Duration::seconds(3))),
            Decision::Reject { retry_after: 57 }
        );
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);

        assert_eq!(limiter.check("key", 1, Some(t0)), Decision::Allow);
        assert!(matches!(
            limiter.check("key", 1, Some(t0 + Duration::seconds(30))),
            Decision::Reject { .. }
        ));

        // 61s after the first request the window has slid past it.
        assert_eq!(
            limiter.check("key", 1, Some(t0 + Duration::seconds(61))),
            Decision::Allow
        );
    }

    #[test]
    fn rejected_requests_do_not_consume_slots() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);
        let limit = 3;

        // A burst of 2N requests: N allowed, N rejected.
        for i in 0..6 {
            let decision = limiter.check("key", limit, Some(t0 + Duration::seconds(i)));
            if i < 3 {
                assert_eq!(decision, Decision::Allow);
            } else {
                assert!(matches!(decision, Decision::Reject { .. }));
            }
        }

        // Once the window slides past the accepted burst, exactly N more
        // fit; the rejected calls must not have occupied slots.
        let later = t0 + Duration::seconds(65);
        for i in 0..3 {
            assert_eq!(
                limiter.check("key", limit, Some(later + Duration::seconds(i))),
                Decision::Allow
            );
        }
        assert!(matches!(
            limiter.check("key", limit, Some(later + Duration::seconds(3))),
            Decision::Reject { .. }
        ));
    }

    #[test]
    fn zero_limit_always_rejects() {
        let limiter = SlidingWindowLimiter::new();

        assert_eq!(
            limiter.check("key", 0, None),
            Decision::Reject { retry_after: 60 }
        );
        assert_eq!(
            limiter.check("key", 0, None),
            Decision::Reject { retry_after: 60 }
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);

        assert_eq!(limiter.check("a", 1, Some(t0)), Decision::Allow);
        assert_eq!(limiter.check("b", 1, Some(t0)), Decision::Allow);
        assert!(matches!(
            limiter.check("a", 1, Some(t0 + Duration::seconds(1))),
            Decision::Reject { .. }
        ));
    }

    #[test]
    fn retry_after_counts_down_to_oldest_slot() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);

        assert_eq!(limiter.check("key", 1, Some(t0)), Decision::Allow);

        assert_eq!(
            limiter.check("key", 1, Some(t0 + Duration::seconds(59))),
            Decision::Reject { retry_after: 1 }
        );
    }

    #[test]
    fn sweep_drops_stale_windows() {
        let limiter = SlidingWindowLimiter::new();
        let t0 = datetime!(2025-11-11 12:00:00 UTC);

        limiter.check("a", 10, Some(t0));
        limiter.check("b", 10, Some(t0 + Duration::seconds(50)));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.sweep(Some(t0 + Duration::seconds(61)));

        assert_eq!(limiter.tracked_keys(), 1);
    }
}
