//! NTP timestamps (RFC 5905 §6) as carried in RTCP sender reports.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Seconds                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Fraction                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Seconds count from 1900-01-01; the fraction is in units of 2^-32 s.

use crate::clock::Clock;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_EPOCH_OFFSET_SECS: i64 = 2_208_988_800;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// 64-bit fixed-point NTP timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTime(pub u64);

impl NtpTime {
    /// Convert wall-clock nanoseconds since the Unix epoch.
    pub fn from_unix_nanos(unix_nanos: i64) -> Self {
        let secs = unix_nanos.div_euclid(NANOS_PER_SEC) + NTP_EPOCH_OFFSET_SECS;
        let nanos = unix_nanos.rem_euclid(NANOS_PER_SEC) as u64;
        let frac = (nanos << 32) / NANOS_PER_SEC as u64;
        NtpTime(((secs as u64) << 32) | frac)
    }

    /// Current time of `clock` as an NTP timestamp.
    pub fn now(clock: &dyn Clock) -> Self {
        Self::from_unix_nanos(clock.now_unix_nanos())
    }

    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// Wall-clock nanoseconds since the Unix epoch, rounded to the nearest
    /// nanosecond.
    pub fn unix_nanos(self) -> i64 {
        let secs = self.seconds() as i64 - NTP_EPOCH_OFFSET_SECS;
        let nanos = ((self.fraction() as u64 * NANOS_PER_SEC as u64) + (1 << 31)) >> 32;
        secs * NANOS_PER_SEC + nanos as i64
    }

    /// Signed nanoseconds from `earlier` to `self`.
    pub fn nanos_since(self, earlier: NtpTime) -> i64 {
        self.unix_nanos() - earlier.unix_nanos()
    }
}
