//! Sliding-window rate limits shared across requests.
//!
//! All three ledgers are process-scoped services guarded by a mutex and
//! reset on restart; nothing here persists.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use marvin_core::types::PermissionLevel;

/// Image generations allowed per rolling hour across ALL non-staff users.
const MAX_IMAGES_PER_HOUR: usize = 3;
const IMAGE_WINDOW: Duration = Duration::from_secs(3600);

/// Videos allowed per rolling day in the shared (non-owner) pool.
const MAX_VIDEOS_PER_DAY: usize = 4;
const VIDEO_WINDOW: Duration = Duration::from_secs(86_400);

/// Deep-mode requests allowed per user per rolling day.
const MAX_DEEP_PER_DAY: usize = 3;
const DEEP_WINDOW: Duration = Duration::from_secs(86_400);

fn prune(stamps: &mut Vec<Instant>, window: Duration, now: Instant) {
    stamps.retain(|ts| now.duration_since(*ts) < window);
}

fn format_reset(oldest: Instant, window: Duration, now: Instant) -> String {
    let elapsed = now.duration_since(oldest);
    let remaining = window.saturating_sub(elapsed);
    let hours = remaining.as_secs() / 3600;
    let minutes = (remaining.as_secs() % 3600) / 60;
    format!("{hours}h {minutes}m")
}

/// Global hourly cap on the image tools. Owner/admin bypass entirely and
/// their generations do not consume the shared pool.
#[derive(Default)]
pub struct ImageQuota {
    stamps: Mutex<Vec<Instant>>,
}

impl ImageQuota {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked BEFORE the tool runs; the timestamp is recorded only after
    /// a successful generation.
    pub fn check(&self, level: PermissionLevel) -> Result<(), String> {
        if level.is_staff() {
            return Ok(());
        }
        let mut stamps = self.stamps.lock().unwrap();
        let now = Instant::now();
        prune(&mut stamps, IMAGE_WINDOW, now);
        if stamps.len() >= MAX_IMAGES_PER_HOUR {
            return Err(
                "Rate limit reached! Image generation is capped at 3 per hour. Try again later."
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn record(&self) {
        self.stamps.lock().unwrap().push(Instant::now());
    }

    pub fn remaining(&self) -> usize {
        let mut stamps = self.stamps.lock().unwrap();
        let now = Instant::now();
        prune(&mut stamps, IMAGE_WINDOW, now);
        MAX_IMAGES_PER_HOUR.saturating_sub(stamps.len())
    }
}

/// Shared daily video pool. Only the owner bypasses; owner generations do
/// not count against the pool.
#[derive(Default)]
pub struct VideoQuota {
    stamps: Mutex<Vec<Instant>>,
}

impl VideoQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, level: PermissionLevel) -> Result<(), String> {
        if level.is_owner() {
            return Ok(());
        }
        let mut stamps = self.stamps.lock().unwrap();
        let now = Instant::now();
        prune(&mut stamps, VIDEO_WINDOW, now);
        if stamps.len() >= MAX_VIDEOS_PER_DAY {
            let reset = format_reset(stamps[0], VIDEO_WINDOW, now);
            return Err(format!(
                "All {MAX_VIDEOS_PER_DAY} of {MAX_VIDEOS_PER_DAY} videos used today. Try again in ~{reset}."
            ));
        }
        Ok(())
    }

    /// Call after a successful generation by a non-owner.
    pub fn record(&self, level: PermissionLevel) {
        if level.is_owner() {
            return;
        }
        self.stamps.lock().unwrap().push(Instant::now());
    }
}

/// Per-user deep-mode ledger. Staff bypass; usage is recorded only after a
/// successful completion so failed runs do not consume quota.
#[derive(Default)]
pub struct DeepModeLedger {
    usage: Mutex<HashMap<String, Vec<Instant>>>,
}

impl DeepModeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, nick: &str, level: PermissionLevel) -> Result<(), String> {
        if level.is_staff() {
            return Ok(());
        }
        let mut usage = self.usage.lock().unwrap();
        let stamps = usage.entry(nick.to_lowercase()).or_default();
        let now = Instant::now();
        prune(stamps, DEEP_WINDOW, now);
        if stamps.len() >= MAX_DEEP_PER_DAY {
            let oldest = *stamps.iter().min().unwrap();
            let reset = format_reset(oldest, DEEP_WINDOW, now);
            return Err(format!(
                "Deep mode limit reached ({MAX_DEEP_PER_DAY}/day). Resets in {reset}."
            ));
        }
        Ok(())
    }

    pub fn record(&self, nick: &str, level: PermissionLevel) {
        if level.is_staff() {
            return;
        }
        self.usage
            .lock()
            .unwrap()
            .entry(nick.to_lowercase())
            .or_default()
            .push(Instant::now());
    }

    /// Fresh timestamps for a user inside the current window (tests and
    /// the usage-stats view).
    pub fn count(&self, nick: &str) -> usize {
        let mut usage = self.usage.lock().unwrap();
        let Some(stamps) = usage.get_mut(&nick.to_lowercase()) else {
            return 0;
        };
        prune(stamps, DEEP_WINDOW, Instant::now());
        stamps.len()
    }
}

/// All process-wide quotas bundled for handle passing.
#[derive(Default)]
pub struct Quotas {
    pub image: ImageQuota,
    pub video: VideoQuota,
    pub deep: DeepModeLedger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_quota_is_shared_across_users() {
        let quota = ImageQuota::new();
        for _ in 0..3 {
            quota.check(PermissionLevel::Normal).unwrap();
            quota.record();
        }
        // Fourth call by ANY non-staff user is denied.
        let err = quota.check(PermissionLevel::Normal).unwrap_err();
        assert!(err.contains("Rate limit reached"));
        assert_eq!(quota.remaining(), 0);
    }

    #[test]
    fn staff_bypass_image_quota_even_when_exhausted() {
        let quota = ImageQuota::new();
        for _ in 0..5 {
            quota.record();
        }
        assert!(quota.check(PermissionLevel::Admin).is_ok());
        assert!(quota.check(PermissionLevel::Owner).is_ok());
        assert!(quota.check(PermissionLevel::Normal).is_err());
    }

    #[test]
    fn deep_ledger_is_per_user_and_staff_exempt() {
        let ledger = DeepModeLedger::new();
        for _ in 0..3 {
            ledger.check("alice", PermissionLevel::Normal).unwrap();
            ledger.record("alice", PermissionLevel::Normal);
        }
        let err = ledger.check("Alice", PermissionLevel::Normal).unwrap_err();
        assert!(err.contains("Deep mode limit reached"));
        assert!(err.contains("Resets in"));

        // A different user is unaffected; staff never consume quota.
        ledger.check("bob", PermissionLevel::Normal).unwrap();
        ledger.record("admin", PermissionLevel::Admin);
        assert_eq!(ledger.count("admin"), 0);
    }

    #[test]
    fn video_pool_counts_admins_but_not_owner() {
        let quota = VideoQuota::new();
        for _ in 0..4 {
            quota.check(PermissionLevel::Admin).unwrap();
            quota.record(PermissionLevel::Admin);
        }
        assert!(quota.check(PermissionLevel::Admin).is_err());
        assert!(quota.check(PermissionLevel::Owner).is_ok());
        quota.record(PermissionLevel::Owner); // no-op
        assert!(quota.check(PermissionLevel::Normal).is_err());
    }
}
