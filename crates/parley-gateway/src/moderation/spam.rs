//! Sliding-window spam detection keyed by device id.
//!
//! Each device keeps a deque of (timestamp, content fingerprint) trimmed to
//! the tracking window on every check, so cost is bounded by the window, not
//! message volume. Verdicts never mutate the ban ledger; the caller applies
//! them.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, SystemTime};

/// Spam thresholds. The duplicate-content sample size and the hard-excess
/// bypass are tunable rather than fixed invariants.
#[derive(Debug, Clone)]
pub struct SpamConfig {
    /// Messages per window above which the sender is over limit.
    pub spam_limit: u32,
    /// Messages per window above which a warning is issued.
    pub warning_threshold: u32,
    /// Sliding window duration.
    pub window: Duration,
    /// Auto-ban duration applied on a ban verdict, in minutes.
    pub ban_minutes: u64,
    /// How many recent messages the duplicate check inspects.
    pub duplicate_sample: usize,
    /// Max distinct contents in the sample for it to count as repetition.
    pub duplicate_distinct_max: usize,
    /// Messages past the limit that force a ban even without repetition.
    pub hard_excess: u32,
    /// Minimum gap between warnings per device.
    pub warning_cooldown: Duration,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            spam_limit: 10,
            warning_threshold: 8,
            window: Duration::from_secs(60),
            ban_minutes: 60,
            duplicate_sample: 5,
            duplicate_distinct_max: 2,
            hard_excess: 5,
            warning_cooldown: Duration::from_secs(30),
        }
    }
}

/// Outcome of a spam check for one message.
#[derive(Debug, Clone)]
pub struct SpamVerdict {
    /// Window size including the message just checked.
    pub message_count: u32,
    /// Messages left before the limit, `max(0, limit - count)`.
    pub remaining: u32,
    /// The sender exceeded the limit; the message should be rejected.
    pub over_limit: bool,
    /// Repetitive or far over limit; the device should be banned.
    pub should_ban: bool,
    /// Approaching the limit; warn the sender.
    pub should_warn: bool,
}

#[derive(Debug, Default)]
struct DeviceWindow {
    /// (timestamp, content fingerprint), oldest first.
    events: VecDeque<(SystemTime, u64)>,
    warnings: u32,
    last_warning: Option<SystemTime>,
}

/// Per-device sliding windows for one gateway.
#[derive(Debug)]
pub struct SpamTracker {
    windows: HashMap<String, DeviceWindow>,
    config: SpamConfig,
}

impl SpamTracker {
    pub fn new(config: SpamConfig) -> Self {
        Self {
            windows: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SpamConfig {
        &self.config
    }

    /// Record a message and compute the verdict for its sender.
    pub fn check(&mut self, device_id: &str, content: &str, now: SystemTime) -> SpamVerdict {
        let cfg = &self.config;
        let window = self.windows.entry(device_id.to_string()).or_default();

        let cutoff = now - cfg.window;
        while window
            .events
            .front()
            .is_some_and(|(t, _)| *t <= cutoff)
        {
            window.events.pop_front();
        }

        window.events.push_back((now, fingerprint(content)));
        let message_count = window.events.len() as u32;

        let mut verdict = SpamVerdict {
            message_count,
            remaining: cfg.spam_limit.saturating_sub(message_count),
            over_limit: message_count > cfg.spam_limit,
            should_ban: false,
            should_warn: false,
        };

        if verdict.over_limit {
            let sample: Vec<u64> = window
                .events
                .iter()
                .rev()
                .take(cfg.duplicate_sample)
                .map(|(_, fp)| *fp)
                .collect();
            let distinct: HashSet<u64> = sample.iter().copied().collect();
            let repeating = sample.len() >= cfg.duplicate_sample.min(4)
                && distinct.len() <= cfg.duplicate_distinct_max;

            if repeating || message_count >= cfg.spam_limit + cfg.hard_excess {
                verdict.should_ban = true;
            }
        } else if message_count > cfg.warning_threshold {
            let cooled_down = window
                .last_warning
                .map_or(true, |last| now.duration_since(last).map_or(false, |gap| gap > cfg.warning_cooldown));
            if cooled_down {
                verdict.should_warn = true;
                window.warnings += 1;
                window.last_warning = Some(now);
            }
        }

        verdict
    }

    /// Drop a device's window entirely (e.g. after a ban).
    pub fn reset(&mut self, device_id: &str) {
        self.windows.remove(device_id);
    }

    /// Drop windows with no events inside the tracking window, returning
    /// the number removed.
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let cutoff = now - self.config.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.events.back().is_some_and(|(t, _)| *t > cutoff));
        before - self.windows.len()
    }

    pub fn tracked_devices(&self) -> usize {
        self.windows.len()
    }
}

/// Fingerprint of normalized content: first 100 chars, trimmed and
/// lowercased, hashed down to 8 bytes.
fn fingerprint(content: &str) -> u64 {
    let normalized: String = content
        .trim()
        .to_lowercase()
        .chars()
        .take(100)
        .collect();
    let digest = Sha256::digest(normalized.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn at(secs_in: u64) -> SystemTime {
        t0() + Duration::from_secs(secs_in)
    }

    #[test]
    fn repeated_content_past_limit_bans() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        let mut banned = false;
        for i in 0..11u64 {
            let verdict = tracker.check("device-1", "buy cheap gold", at(i));
            if verdict.should_ban {
                assert_eq!(verdict.message_count, 11);
                banned = true;
            }
        }
        assert!(banned, "11 near-duplicate messages in the window must ban");
    }

    #[test]
    fn distinct_content_past_limit_flags_without_ban() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        let mut last = None;
        for i in 0..11u64 {
            last = Some(tracker.check("device-1", &format!("message number {i}"), at(i)));
        }
        let verdict = last.unwrap();
        assert!(verdict.over_limit);
        assert!(!verdict.should_ban, "distinct content must not force a ban");
        assert_eq!(verdict.remaining, 0);
    }

    #[test]
    fn hard_excess_bans_even_distinct_content() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        let mut last = None;
        for i in 0..15u64 {
            last = Some(tracker.check("device-1", &format!("message number {i}"), at(i)));
        }
        assert!(last.unwrap().should_ban, "limit+5 messages must ban regardless of content");
    }

    #[test]
    fn single_warning_below_limit() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        let mut warnings = 0;
        for i in 0..9u64 {
            let verdict = tracker.check("device-1", &format!("hello {i}"), at(i));
            assert!(!verdict.over_limit);
            assert!(!verdict.should_ban);
            if verdict.should_warn {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1, "exactly one warning within the cooldown");
    }

    #[test]
    fn warning_repeats_after_cooldown() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        for i in 0..9u64 {
            tracker.check("device-1", "hi", at(i));
        }
        // 31 seconds later, still over the threshold within the window.
        let verdict = tracker.check("device-1", "hi again", at(40));
        assert!(verdict.should_warn);
    }

    #[test]
    fn window_slides() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        for i in 0..10u64 {
            tracker.check("device-1", "x", at(i));
        }
        // 61 seconds after the burst, the window is empty again.
        let verdict = tracker.check("device-1", "x", at(70));
        assert_eq!(verdict.message_count, 1);
        assert!(!verdict.over_limit);
    }

    #[test]
    fn normalization_treats_case_and_padding_as_duplicates() {
        assert_eq!(fingerprint("Hello World"), fingerprint("  hello world  "));
        assert_ne!(fingerprint("hello"), fingerprint("goodbye"));
    }

    #[test]
    fn sweep_drops_idle_devices() {
        let mut tracker = SpamTracker::new(SpamConfig::default());
        tracker.check("device-1", "x", at(0));
        tracker.check("device-2", "x", at(100));
        assert_eq!(tracker.sweep(at(100)), 1);
        assert_eq!(tracker.tracked_devices(), 1);
    }
}
