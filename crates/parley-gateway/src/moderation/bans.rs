//! Device ban ledger with lazy expiry.
//!
//! Bans store an absolute `expires_at`; every read compares against the
//! caller-supplied clock and evicts stale entries before answering, so the
//! visible state always matches real time without a timer per ban.

use parley_core::generate_id;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::info;

/// An active ban for one device.
#[derive(Debug, Clone)]
pub struct Ban {
    pub id: String,
    pub device_id: String,
    pub reason: String,
    pub banned_at: SystemTime,
    pub expires_at: SystemTime,
    pub duration_minutes: u64,
    pub banned_by: String,
}

/// Answer returned to auth/moderation callers for a banned device.
#[derive(Debug, Clone)]
pub struct BanStatus {
    pub reason: String,
    pub expires_at: SystemTime,
    pub remaining: Duration,
}

/// Per-device ban table. One per gateway.
#[derive(Debug, Default)]
pub struct BanLedger {
    bans: HashMap<String, Ban>,
}

impl BanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban a device, overwriting any prior ban for it.
    pub fn ban(
        &mut self,
        device_id: &str,
        reason: &str,
        duration_minutes: u64,
        banned_by: &str,
        now: SystemTime,
    ) -> Ban {
        let ban = Ban {
            id: generate_id(),
            device_id: device_id.to_string(),
            reason: reason.to_string(),
            banned_at: now,
            expires_at: now + Duration::from_secs(duration_minutes * 60),
            duration_minutes,
            banned_by: banned_by.to_string(),
        };
        info!(
            device = %parley_core::short_device(device_id),
            reason,
            duration_minutes,
            "device banned"
        );
        self.bans.insert(device_id.to_string(), ban.clone());
        ban
    }

    /// Remove a ban. Idempotent; returns whether a ban was present.
    pub fn unban(&mut self, device_id: &str) -> bool {
        self.bans.remove(device_id).is_some()
    }

    /// Remove every ban, returning the count.
    pub fn mass_unban(&mut self) -> usize {
        let count = self.bans.len();
        self.bans.clear();
        if count > 0 {
            info!(count, "all bans lifted");
        }
        count
    }

    /// Ban status for a device. A ban is active strictly before its
    /// `expires_at`; an expired entry is evicted before answering.
    pub fn status(&mut self, device_id: &str, now: SystemTime) -> Option<BanStatus> {
        let ban = self.bans.get(device_id)?;
        match ban.expires_at.duration_since(now) {
            Ok(remaining) if !remaining.is_zero() => Some(BanStatus {
                reason: ban.reason.clone(),
                expires_at: ban.expires_at,
                remaining,
            }),
            _ => {
                self.bans.remove(device_id);
                None
            }
        }
    }

    /// Snapshot of active bans (expired entries excluded but not evicted).
    pub fn list(&self, now: SystemTime) -> Vec<Ban> {
        self.bans
            .values()
            .filter(|b| b.expires_at > now)
            .cloned()
            .collect()
    }

    /// Drop every expired ban, returning the count removed.
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let before = self.bans.len();
        self.bans.retain(|_, ban| ban.expires_at > now);
        before - self.bans.len()
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    #[test]
    fn ban_and_status() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 60, "system", t0());

        let status = ledger.status("device-1", t0()).expect("banned");
        assert_eq!(status.reason, "spam");
        assert_eq!(status.remaining, Duration::from_secs(3600));
        assert!(ledger.status("device-2", t0()).is_none());
    }

    #[test]
    fn expiry_boundary() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 60, "system", t0());

        // Strictly before expiry: banned.
        assert!(ledger
            .status("device-1", t0() + Duration::from_secs(3599))
            .is_some());
        // Exactly at expiry: not banned, entry lazily evicted.
        assert!(ledger
            .status("device-1", t0() + Duration::from_secs(3600))
            .is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn rebanning_overwrites() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 10, "system", t0());
        ledger.ban("device-1", "abuse", 60, "operator", t0());

        let status = ledger.status("device-1", t0()).unwrap();
        assert_eq!(status.reason, "abuse");
        assert_eq!(status.remaining, Duration::from_secs(3600));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn unban_is_idempotent() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 60, "system", t0());
        assert!(ledger.unban("device-1"));
        assert!(!ledger.unban("device-1"));
        assert!(ledger.status("device-1", t0()).is_none());
    }

    #[test]
    fn mass_unban_clears_everything() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 60, "system", t0());
        ledger.ban("device-2", "abuse", 60, "system", t0());
        assert_eq!(ledger.mass_unban(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut ledger = BanLedger::new();
        ledger.ban("device-1", "spam", 1, "system", t0());
        ledger.ban("device-2", "spam", 60, "system", t0());

        let removed = ledger.sweep(t0() + Duration::from_secs(120));
        assert_eq!(removed, 1);
        assert_eq!(ledger.len(), 1);
    }
}
