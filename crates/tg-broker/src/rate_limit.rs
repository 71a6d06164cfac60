//! Sliding-window rate limiting for subscriptions

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Per-key sliding window of admission timestamps
///
/// Expired timestamps are pruned lazily whenever a key is queried. Keys
/// whose whole window has expired are swept from [`admit`](Self::admit) at
/// most once per window, so one-off keys do not accumulate.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    last_sweep: Mutex<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }
}

impl RateLimiter {
    /// Create an empty limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event for `key` now
    pub fn record(&self, key: &str) {
        self.record_at(key, Instant::now());
    }

    /// Record an event for `key` at a specific instant
    pub fn record_at(&self, key: &str, at: Instant) {
        let mut events = self.windows.entry(key.to_string()).or_default();
        let idx = events.partition_point(|t| *t <= at);
        events.insert(idx, at);
    }

    /// Number of events for `key` within the trailing window
    pub fn count_within(&self, key: &str, window: Duration) -> usize {
        let now = Instant::now();
        let count = match self.windows.get_mut(key) {
            Some(mut events) => {
                prune(&mut events, now, window);
                events.len()
            }
            None => return 0,
        };

        if count == 0 {
            self.windows.remove_if(key, |_, events| events.is_empty());
        }
        count
    }

    /// Admit and record an event unless `key` is at its limit
    ///
    /// Check and record happen under the key's shard lock, so concurrent
    /// callers cannot both take the last slot.
    pub fn admit(&self, key: &str, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        // Must run before the entry below is locked
        self.sweep_expired(now, window);

        let mut events = self.windows.entry(key.to_string()).or_default();
        prune(&mut events, now, window);

        if events.len() < limit {
            events.push_back(now);
            return true;
        }

        let empty = events.is_empty();
        drop(events);
        if empty {
            self.windows.remove_if(key, |_, events| events.is_empty());
        }
        false
    }

    /// Drop every key with no event inside `window`, once per window
    fn sweep_expired(&self, now: Instant, window: Duration) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < window {
                return;
            }
            *last = now;
        }

        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        let before = self.windows.len();
        self.windows
            .retain(|_, events| events.back().is_some_and(|t| *t >= cutoff));

        let swept = before.saturating_sub(self.windows.len());
        if swept > 0 {
            tracing::debug!("Rate limiter dropped {} expired key(s)", swept);
        }
    }

    /// Forget all tracked keys
    pub fn reset(&self) {
        self.windows.clear();
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while events.front().is_some_and(|t| *t < cutoff) {
        events.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_count_unknown_key() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.count_within("nobody", MINUTE), 0);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_record_and_count() {
        let limiter = RateLimiter::new();
        limiter.record("a");
        limiter.record("a");
        limiter.record("b");

        assert_eq!(limiter.count_within("a", MINUTE), 2);
        assert_eq!(limiter.count_within("b", MINUTE), 1);
    }

    #[test]
    fn test_old_events_expire() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let Some(old) = now.checked_sub(Duration::from_secs(120)) else {
            // Monotonic clock too young to go back two minutes
            return;
        };

        limiter.record_at("a", old);
        limiter.record_at("a", now);
        assert_eq!(limiter.count_within("a", MINUTE), 1);
    }

    #[test]
    fn test_fully_expired_key_is_dropped() {
        let limiter = RateLimiter::new();
        let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            return;
        };

        limiter.record_at("a", old);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.count_within("a", MINUTE), 0);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_admit_records_after_check() {
        let limiter = RateLimiter::new();

        assert!(limiter.admit("a", 2, MINUTE));
        assert_eq!(limiter.count_within("a", MINUTE), 1);
        assert!(limiter.admit("a", 2, MINUTE));
        assert!(!limiter.admit("a", 2, MINUTE));

        // Rejections are not recorded
        assert_eq!(limiter.count_within("a", MINUTE), 2);

        // Other keys are independent
        assert!(limiter.admit("b", 2, MINUTE));
    }

    #[test]
    fn test_zero_limit_rejects() {
        let limiter = RateLimiter::new();
        assert!(!limiter.admit("a", 0, MINUTE));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_expired_keys_swept_by_admit() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(50);

        for i in 0..1000 {
            assert!(limiter.admit(&format!("conn-{}", i), 1, window));
        }

        std::thread::sleep(Duration::from_millis(200));
        assert!(limiter.admit("conn-new", 1, window));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_sweep_keeps_live_keys() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(300);

        assert!(limiter.admit("old", 1, window));
        std::thread::sleep(Duration::from_millis(350));
        assert!(limiter.admit("fresh", 1, window));
        assert!(limiter.admit("other", 1, window));

        // "old" expired and was swept; the live keys keep their events
        assert_eq!(limiter.tracked_keys(), 2);
        assert!(!limiter.admit("fresh", 1, window));
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new();
        assert!(limiter.admit("a", 1, MINUTE));
        assert!(!limiter.admit("a", 1, MINUTE));

        limiter.reset();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.admit("a", 1, MINUTE));
    }

    #[test]
    fn test_concurrent_admit_never_overshoots() {
        let limiter = Arc::new(RateLimiter::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.admit("shared", 5, MINUTE))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(limiter.count_within("shared", MINUTE), 5);
    }
}
