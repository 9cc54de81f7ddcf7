//! Shared helpers used across netops crates.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Default name of the mainline branch.
pub const DEFAULT_TRUNK: &str = "main";

/// Lower bound for every repository sync period.
pub const MIN_SYNC_PERIOD: Duration = Duration::from_secs(10);

/// Lower-case hex SHA-256 of `bytes`.
///
/// This is the checksum carried by rollout device configs and by
/// `Device.status.checksum`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Clamp a configured sync period to [`MIN_SYNC_PERIOD`].
pub fn clamp_sync_period(period: Duration) -> Duration {
    period.max(MIN_SYNC_PERIOD)
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Nanoseconds since the Unix epoch, as used in gNMI timestamps.
pub fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum(b"a: 1\n").len(), 64);
    }

    #[test]
    fn sync_period_is_clamped() {
        assert_eq!(clamp_sync_period(Duration::from_secs(1)), MIN_SYNC_PERIOD);
        assert_eq!(
            clamp_sync_period(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
