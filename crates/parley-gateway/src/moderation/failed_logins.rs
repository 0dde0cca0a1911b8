//! Failed-login streaks on a rolling 10-minute window.
//!
//! A streak resets when its first attempt ages past the window; the
//! auto-ban decision at the threshold lives in [`super::ModerationLedger`].

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

const WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct Streak {
    count: u32,
    first_attempt: SystemTime,
    last_attempt: SystemTime,
}

/// Per-device failed-login counters.
#[derive(Debug, Default)]
pub struct FailedLoginTracker {
    streaks: HashMap<String, Streak>,
}

impl FailedLoginTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the streak count including it.
    pub fn record(&mut self, device_id: &str, now: SystemTime) -> u32 {
        let streak = self
            .streaks
            .entry(device_id.to_string())
            .and_modify(|s| {
                // Stale streak: start over from this attempt.
                if now.duration_since(s.first_attempt).map_or(true, |age| age >= WINDOW) {
                    s.count = 0;
                    s.first_attempt = now;
                }
                s.count += 1;
                s.last_attempt = now;
            })
            .or_insert(Streak {
                count: 1,
                first_attempt: now,
                last_attempt: now,
            });
        streak.count
    }

    /// Forget a device's streak (successful login or post-ban reset).
    pub fn clear(&mut self, device_id: &str) {
        self.streaks.remove(device_id);
    }

    /// Drop streaks whose last attempt aged out of the window.
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let before = self.streaks.len();
        self.streaks.retain(|_, s| {
            now.duration_since(s.last_attempt)
                .map_or(true, |age| age < WINDOW)
        });
        before - self.streaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    #[test]
    fn counts_within_window() {
        let mut tracker = FailedLoginTracker::new();
        for i in 1..=5u32 {
            let count = tracker.record("device-1", t0() + Duration::from_secs(i as u64));
            assert_eq!(count, i);
        }
    }

    #[test]
    fn stale_streak_restarts() {
        let mut tracker = FailedLoginTracker::new();
        for i in 0..9u64 {
            tracker.record("device-1", t0() + Duration::from_secs(i));
        }
        // Eleven minutes later the old streak no longer counts.
        let count = tracker.record("device-1", t0() + Duration::from_secs(11 * 60));
        assert_eq!(count, 1);
    }

    #[test]
    fn clear_resets() {
        let mut tracker = FailedLoginTracker::new();
        tracker.record("device-1", t0());
        tracker.clear("device-1");
        assert_eq!(tracker.record("device-1", t0()), 1);
    }

    #[test]
    fn sweep_drops_idle_streaks() {
        let mut tracker = FailedLoginTracker::new();
        tracker.record("device-1", t0());
        tracker.record("device-2", t0() + Duration::from_secs(9 * 60));
        assert_eq!(tracker.sweep(t0() + Duration::from_secs(10 * 60)), 1);
    }
}
