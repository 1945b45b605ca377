use std::time::Duration;

/// Maximum sequence number skip before a jump is treated as a stream reset.
pub const DEFAULT_MAX_SN_DROPOUT: u16 = 3000;

/// Synchronizer tuning shared by every track of a session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// A corrected sequence number further than this from the previous one
    /// in both directions is a discontinuity, not loss.
    pub max_sn_dropout: u16,
    /// How far a sender report's elapsed media time may stray from elapsed
    /// wall-clock time before the report is ignored.
    pub sender_report_tolerance: Duration,
    /// Fallback audio cadence before one is learned (50 => 20 ms frames).
    pub audio_frames_per_second: u32,
    /// Fallback video cadence before one is learned.
    pub video_frames_per_second: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_sn_dropout: DEFAULT_MAX_SN_DROPOUT,
            sender_report_tolerance: Duration::from_secs(1),
            audio_frames_per_second: 50,
            video_frames_per_second: 24,
        }
    }
}
