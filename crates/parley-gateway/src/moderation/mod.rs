//! Moderation ledger: device bans, spam detection, failed-login tracking.
//!
//! All state is process-local and keyed by device id. A single ledger per
//! gateway serializes mutation behind one mutex in the server.

pub mod bans;
pub mod failed_logins;
pub mod spam;

pub use bans::{Ban, BanLedger, BanStatus};
pub use failed_logins::FailedLoginTracker;
pub use spam::{SpamConfig, SpamTracker, SpamVerdict};

use std::time::SystemTime;
use tracing::{debug, info};

/// Failed logins within the rolling window that trigger an auto-ban.
const FAILED_LOGIN_LIMIT: u32 = 10;
/// Auto-ban duration for failed-login abuse, in minutes.
const FAILED_LOGIN_BAN_MINUTES: u64 = 60;

/// Combined moderation state for one gateway.
pub struct ModerationLedger {
    pub bans: BanLedger,
    pub spam: SpamTracker,
    pub failed_logins: FailedLoginTracker,
}

impl ModerationLedger {
    pub fn new(spam_config: SpamConfig) -> Self {
        Self {
            bans: BanLedger::new(),
            spam: SpamTracker::new(spam_config),
            failed_logins: FailedLoginTracker::new(),
        }
    }

    /// Record a failed login attempt. At the threshold the device is banned
    /// and the streak cleared; the new ban is returned so the caller can
    /// report it to the directory.
    pub fn track_failed_login(&mut self, device_id: &str, now: SystemTime) -> Option<Ban> {
        let attempts = self.failed_logins.record(device_id, now);
        if attempts >= FAILED_LOGIN_LIMIT {
            self.failed_logins.clear(device_id);
            let ban = self.bans.ban(
                device_id,
                "too many failed logins",
                FAILED_LOGIN_BAN_MINUTES,
                "system",
                now,
            );
            info!(device = %parley_core::short_device(device_id), "device banned for failed logins");
            return Some(ban);
        }
        None
    }

    /// Purge expired bans and stale counters to bound memory.
    pub fn sweep(&mut self, now: SystemTime) {
        let bans = self.bans.sweep(now);
        let spam = self.spam.sweep(now);
        let logins = self.failed_logins.sweep(now);
        if bans + spam + logins > 0 {
            debug!(bans, spam, logins, "moderation sweep removed entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn failed_logins_ban_at_threshold() {
        let mut ledger = ModerationLedger::new(SpamConfig::default());
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

        for i in 0..9 {
            let t = start + Duration::from_secs(i * 30);
            assert!(ledger.track_failed_login("device-1", t).is_none());
            assert!(ledger.bans.status("device-1", t).is_none());
        }
        let tenth = start + Duration::from_secs(9 * 30);
        let ban = ledger.track_failed_login("device-1", tenth).expect("ban");
        assert_eq!(ban.duration_minutes, 60);
        assert!(ledger.bans.status("device-1", tenth).is_some());
    }

    #[test]
    fn slow_failures_never_ban() {
        let mut ledger = ModerationLedger::new(SpamConfig::default());
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

        // One failure every 11 minutes: each ages the previous streak out.
        for i in 0..20 {
            let t = start + Duration::from_secs(i * 11 * 60);
            assert!(ledger.track_failed_login("device-1", t).is_none());
        }
    }
}
