//! Session-level synchronization of multiple tracks.
//!
//! A session owns one [`TrackSynchronizer`] per track and a [`SessionClock`]
//! holding the session start time shared by all of them.
//!
//! ## Session lifecycle
//!
//! ```text
//! add_track          -> track registered (unanchored)
//! first packet       -> track anchored; the first track sets the session start
//! sender reports     -> collected until every track has reported, then the
//!                       tracks are aligned on the earliest NTP start; later
//!                       reports correct per-track drift
//! end()              -> every track gets a max PTS; packets past it end the
//!                       stream
//! ```

pub mod track;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::media::TrackInfo;
use crate::media::rtcp::SenderReport;
use crate::ntp::NtpTime;
pub use track::{InsertedFrame, Presentation, TrackSynchronizer};

/// Wall clock plus the session start time shared by every track.
///
/// The start time is set once: the first caller of
/// [`get_or_set_started_at`](Self::get_or_set_started_at) wins and every
/// later caller, from any track, observes that value.
#[derive(Debug)]
pub struct SessionClock {
    clock: Arc<dyn Clock>,
    started_at: Mutex<Option<i64>>,
}

impl SessionClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            started_at: Mutex::new(None),
        }
    }

    /// Current wall-clock time, unix nanoseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_unix_nanos()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Establish the session start time if unset, and return it.
    pub fn get_or_set_started_at(&self, candidate: i64) -> i64 {
        let mut started_at = self.started_at.lock();
        match *started_at {
            Some(established) => established,
            None => {
                tracing::debug!(started_at = candidate, "session started");
                *started_at = Some(candidate);
                candidate
            }
        }
    }

    pub fn started_at(&self) -> Option<i64> {
        *self.started_at.lock()
    }
}

/// Coordinates the tracks of one session.
///
/// Cloning is not supported; share it behind an `Arc` between the packet
/// receive paths and the RTCP handler.
#[derive(Debug)]
pub struct Synchronizer {
    session: Arc<SessionClock>,
    config: SyncConfig,
    inner: Mutex<SessionState>,
}

#[derive(Debug, Default)]
struct SessionState {
    tracks: HashMap<u32, Arc<TrackSynchronizer>>,
    /// Plausible sender reports held back until every track has reported once.
    pending_reports: HashMap<u32, SenderReport>,
    ntp_start: Option<NtpTime>,
    ended_at: Option<i64>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a synchronizer reading wall-clock time from `clock`.
    pub fn with_clock(config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            session: Arc::new(SessionClock::new(clock)),
            config,
            inner: Mutex::new(SessionState::default()),
        }
    }

    pub fn session(&self) -> &Arc<SessionClock> {
        &self.session
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a track. Registering an SSRC twice returns the existing track.
    pub fn add_track(&self, info: TrackInfo) -> Arc<TrackSynchronizer> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.tracks.get(&info.ssrc) {
            return existing.clone();
        }

        let track = Arc::new(TrackSynchronizer::new(
            self.session.clone(),
            &info,
            &self.config,
        ));
        inner.tracks.insert(info.ssrc, track.clone());
        tracing::debug!(
            track_id = %info.id,
            total_tracks = inner.tracks.len(),
            "track registered"
        );
        track
    }

    pub fn track(&self, ssrc: u32) -> Option<Arc<TrackSynchronizer>> {
        self.inner.lock().tracks.get(&ssrc).cloned()
    }

    pub fn remove_track(&self, ssrc: u32) -> Option<Arc<TrackSynchronizer>> {
        let mut inner = self.inner.lock();
        inner.pending_reports.remove(&ssrc);
        let removed = inner.tracks.remove(&ssrc);
        if let Some(track) = &removed {
            tracing::debug!(
                track_id = %track.track_id(),
                total_tracks = inner.tracks.len(),
                "track removed"
            );
        }
        removed
    }

    /// Session start time (unix nanoseconds), once the first track anchored.
    pub fn started_at(&self) -> Option<i64> {
        self.session.started_at()
    }

    /// NTP time corresponding to PTS zero, once tracks have been aligned.
    pub fn ntp_start(&self) -> Option<NtpTime> {
        self.inner.lock().ntp_start
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lock().ended_at.is_some()
    }

    /// Handle an RTCP sender report for one of the session's tracks.
    pub fn on_sender_report(&self, report: SenderReport) {
        let mut inner = self.inner.lock();
        if inner.ended_at.is_some() {
            return;
        }

        let Some(track) = inner.tracks.get(&report.ssrc).cloned() else {
            tracing::debug!(
                ssrc = format_args!("{:#010X}", report.ssrc),
                "sender report for unknown track"
            );
            return;
        };
        if !track.is_initialized() {
            tracing::trace!(track_id = %track.track_id(), "sender report before first packet");
            return;
        }

        let (pts, in_delta) = track.sender_report_pts_nanos(&report);
        if !in_delta {
            tracing::warn!(
                track_id = %track.track_id(),
                pts,
                "implausible sender report ignored"
            );
            return;
        }

        match inner.ntp_start {
            Some(ntp_start) => track.on_sender_report_nanos(&report, pts, ntp_start),
            None => {
                inner.pending_reports.insert(report.ssrc, report);
                if inner.pending_reports.len() == inner.tracks.len() {
                    Self::synchronize_tracks(&mut inner);
                }
            }
        }
    }

    /// Align every track on the earliest NTP start estimated from the
    /// collected sender reports.
    fn synchronize_tracks(inner: &mut SessionState) {
        let mut estimates = Vec::with_capacity(inner.pending_reports.len());
        for (ssrc, report) in inner.pending_reports.drain() {
            let Some(track) = inner.tracks.get(&ssrc) else {
                continue;
            };
            let (pts, _) = track.sender_report_pts_nanos(&report);
            estimates.push((track.clone(), report.ntp_time.unix_nanos() - pts));
        }

        let Some(earliest) = estimates.iter().map(|(_, start)| *start).min() else {
            return;
        };
        inner.ntp_start = Some(NtpTime::from_unix_nanos(earliest));

        for (track, start) in estimates {
            let diff = start - earliest;
            if diff != 0 {
                track.shift_pts_offset(diff);
            }
        }
        tracing::debug!(ntp_start = earliest, "tracks synchronized");
    }

    /// End the session: every track stops at a common maximum PTS.
    ///
    /// Returns that maximum, or `None` if no track ever started.
    pub fn end(&self) -> Option<Duration> {
        let now = self.session.now();
        let mut inner = self.inner.lock();

        let max_offset = inner
            .tracks
            .values()
            .map(|t| t.pts_offset())
            .max()
            .unwrap_or(0)
            .max(0);
        let ended_at = now + max_offset;
        inner.ended_at = Some(ended_at);

        let started_at = self.session.started_at()?;
        let max_pts = Duration::from_nanos((ended_at - started_at).max(0) as u64);
        for track in inner.tracks.values() {
            track.set_max_pts(max_pts);
        }
        tracing::debug!(?max_pts, tracks = inner.tracks.len(), "session ended");
        Some(max_pts)
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::media::rtp::RtpHeader;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn make_sync() -> (Arc<ManualClock>, Synchronizer) {
        let clock = Arc::new(ManualClock::new(T0));
        let sync = Synchronizer::with_clock(SyncConfig::default(), clock.clone());
        (clock, sync)
    }

    #[test]
    fn first_writer_wins() {
        let session = SessionClock::new(Arc::new(ManualClock::new(0)));
        assert_eq!(session.started_at(), None);
        assert_eq!(session.get_or_set_started_at(10), 10);
        assert_eq!(session.get_or_set_started_at(20), 10);
        assert_eq!(session.started_at(), Some(10));
    }

    #[test]
    fn concurrent_start_is_shared() {
        let session = Arc::new(SessionClock::new(Arc::new(ManualClock::new(0))));
        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let session = session.clone();
                std::thread::spawn(move || session.get_or_set_started_at(i))
            })
            .collect();
        let seen: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = session.started_at().unwrap();
        assert!(seen.iter().all(|v| *v == first));
    }

    #[test]
    fn add_track_is_idempotent_per_ssrc() {
        let (_, sync) = make_sync();
        let a = sync.add_track(TrackInfo::audio("a", 1));
        let b = sync.add_track(TrackInfo::audio("a-again", 1));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(sync.track(1).is_some());
        assert!(sync.remove_track(1).is_some());
        assert!(sync.track(1).is_none());
    }

    #[test]
    fn reports_wait_for_every_track() {
        let (clock, sync) = make_sync();
        let audio = sync.add_track(TrackInfo::audio("a", 1));
        let _video = sync.add_track(TrackInfo::video("v", 2));
        audio.get_pts(&RtpHeader::new(1, 0, 1)).unwrap();
        clock.advance(Duration::from_secs(1));

        sync.on_sender_report(SenderReport::new(1, NtpTime::now(clock.as_ref()), 48_000));
        assert_eq!(sync.ntp_start(), None);
    }

    #[test]
    fn unknown_ssrc_ignored() {
        let (_, sync) = make_sync();
        sync.on_sender_report(SenderReport::new(9, NtpTime(0), 0));
        assert_eq!(sync.ntp_start(), None);
    }

    #[test]
    fn end_without_tracks() {
        let (_, sync) = make_sync();
        assert_eq!(sync.end(), None);
        assert!(sync.is_ended());
    }

    #[test]
    fn end_sets_common_max_pts() {
        let (clock, sync) = make_sync();
        let audio = sync.add_track(TrackInfo::audio("a", 1));
        let video = sync.add_track(TrackInfo::video("v", 2));
        audio.initialize(&RtpHeader::new(1, 0, 1));
        clock.advance(Duration::from_millis(5));
        video.initialize(&RtpHeader::new(1, 0, 2));
        clock.advance(Duration::from_secs(1));

        // session ran 1.005 s; the largest offset (5 ms) is added on top
        let max_pts = sync.end().unwrap();
        assert_eq!(max_pts, Duration::from_millis(1010));
        assert_eq!(audio.max_pts(), Some(max_pts));
        assert_eq!(video.max_pts(), Some(max_pts));
    }
}
