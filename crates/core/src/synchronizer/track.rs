//! Per-track RTP timestamp to presentation timestamp mapping.
//!
//! ## Timeline
//!
//! Every track is anchored to wall-clock time when its first packet arrives.
//! From then on a packet's PTS is
//!
//! ```text
//! pts = (ts - first_ts) * ns_per_rtp_unit + pts_offset
//! ```
//!
//! where `ts` is the packet's RTP timestamp unwrapped into 64 bits and
//! `pts_offset` starts as the distance between this track's anchor and the
//! session's shared start time (so all tracks share one timeline) and is later
//! nudged by sender-report drift corrections.
//!
//! ## Discontinuities
//!
//! A corrected sequence number more than `max_sn_dropout` away from the last
//! one in both directions means the sender restarted its counters. The gap is
//! absorbed into the sequence number offset, the packet is placed one frame
//! after the last one, and `first_ts` is moved so that later packets continue
//! from there.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::SessionClock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::media::rtcp::SenderReport;
use crate::media::rtp::RtpHeader;
use crate::media::{MediaKind, TrackInfo};
use crate::ntp::NtpTime;

/// Span of the 32-bit RTP timestamp space.
const UINT32_SPAN: i64 = 1 << 32;

/// Result of mapping a real packet onto the presentation timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    /// Sequence number after offset correction. Contiguous across restarts
    /// and shifted past any inserted frames.
    pub sequence_number: u16,
    /// RTP timestamp unwrapped into 64 bits. Never decreases.
    pub timestamp: i64,
    /// Presentation time relative to the session start.
    pub pts: Duration,
    /// `false` when the packet was repositioned after a discontinuity (or
    /// duplicates the timestamp of such a packet).
    pub valid: bool,
}

/// Header fields for a synthesized frame.
///
/// The caller builds the filler packet and applies these fields to it,
/// either directly or via [`apply`](Self::apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedFrame {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub pts: Duration,
}

impl InsertedFrame {
    /// Rewrite the header's sequence number and timestamp.
    pub fn apply(&self, header: &mut RtpHeader) {
        header.sequence_number = self.sequence_number;
        header.timestamp = self.timestamp;
    }
}

/// Maps one track's RTP timestamps onto the session's presentation timeline.
///
/// All state sits behind a single lock; every method takes it for the whole
/// call, so a track may be shared between its receive path and the session's
/// RTCP handling.
#[derive(Debug)]
pub struct TrackSynchronizer {
    session: Arc<SessionClock>,
    track_id: String,
    ssrc: u32,
    sender_report_tolerance: i64,
    state: Mutex<TrackState>,
}

#[derive(Debug, Clone)]
struct TrackState {
    max_sn_dropout: u16,
    /// Nanoseconds per RTP unit.
    rtp_duration: f64,
    /// Learned frame duration in RTP units, 0 until observed.
    frame_duration: i64,
    default_frame_duration: i64,

    initialized: bool,
    /// Wall-clock anchor, unix nanoseconds.
    started_at: i64,
    first_ts: i64,
    max_pts: Option<i64>,

    has_last: bool,
    last_sn: u16,
    last_ts: i64,
    last_pts: i64,
    last_valid: bool,
    /// Frames inserted since the last real packet.
    inserted: i64,

    sn_offset: u16,
    pts_offset: i64,

    last_pts_drift: i64,
}

struct Adjusted {
    sequence_number: u16,
    ts: i64,
    pts: i64,
    valid: bool,
    reset: bool,
}

impl TrackSynchronizer {
    pub fn new(session: Arc<SessionClock>, info: &TrackInfo, config: &SyncConfig) -> Self {
        let clock_rate = info.clock_rate.max(1);
        let fps = match info.kind {
            MediaKind::Audio => config.audio_frames_per_second,
            MediaKind::Video => config.video_frames_per_second,
        };
        let default_frame_duration = (clock_rate / fps.max(1)) as i64;

        tracing::debug!(
            track_id = %info.id,
            ssrc = format_args!("{:#010X}", info.ssrc),
            clock_rate,
            kind = ?info.kind,
            default_frame_duration,
            "track synchronizer created"
        );

        Self {
            session,
            track_id: info.id.clone(),
            ssrc: info.ssrc,
            sender_report_tolerance: saturating_nanos(config.sender_report_tolerance),
            state: Mutex::new(TrackState {
                max_sn_dropout: config.max_sn_dropout,
                rtp_duration: 1e9 / clock_rate as f64,
                frame_duration: 0,
                default_frame_duration,
                initialized: false,
                started_at: 0,
                first_ts: 0,
                max_pts: None,
                has_last: false,
                last_sn: 0,
                last_ts: 0,
                last_pts: 0,
                last_valid: false,
                inserted: 0,
                sn_offset: 0,
                pts_offset: 0,
                last_pts_drift: 0,
            }),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Anchor the track to the session timeline using its first packet.
    ///
    /// The first track of a session to initialize establishes the session
    /// start time; later tracks get a `pts_offset` equal to how much later
    /// they started. Only the first call has an effect.
    pub fn initialize(&self, pkt: &RtpHeader) {
        let mut state = self.state.lock();
        if state.initialized {
            tracing::warn!(track_id = %self.track_id, "track already initialized");
            return;
        }
        self.anchor(&mut state, pkt);
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn anchor(&self, state: &mut TrackState, pkt: &RtpHeader) {
        let now = self.session.now();
        let session_start = self.session.get_or_set_started_at(now);

        state.initialized = true;
        state.started_at = now;
        state.first_ts = pkt.timestamp as i64;
        state.last_ts = state.first_ts;
        state.pts_offset = now - session_start;
        state.last_pts = state.pts_offset;

        tracing::debug!(
            track_id = %self.track_id,
            first_ts = pkt.timestamp,
            pts_offset = state.pts_offset,
            "track initialized"
        );
    }

    /// Map a packet onto the presentation timeline.
    ///
    /// Packets must be fed in sequence-number order; gaps, counter restarts
    /// and timestamp wraparound are absorbed. A packet arriving before
    /// [`initialize`](Self::initialize) anchors the track itself.
    ///
    /// Returns [`SyncError::EndOfStream`] once a maximum PTS has been set and
    /// the packet lies beyond it (or is invalid). The track's last-packet
    /// state is not advanced in that case.
    pub fn get_pts(&self, pkt: &RtpHeader) -> Result<Presentation> {
        let mut state = self.state.lock();
        if !state.initialized {
            self.anchor(&mut state, pkt);
        }

        let adjusted = state.adjust(pkt);
        if adjusted.reset {
            tracing::warn!(
                track_id = %self.track_id,
                seq = pkt.sequence_number,
                repaired_seq = adjusted.sequence_number,
                sn_offset = state.sn_offset,
                "sequence discontinuity, track reset"
            );
        }
        state.inserted = 0;

        // learn cadence from consecutive packets of different frames
        if adjusted.valid
            && state.last_valid
            && adjusted.sequence_number == state.last_sn.wrapping_add(1)
            && adjusted.ts != state.last_ts
        {
            state.frame_duration = adjusted.ts - state.last_ts;
        }

        if let Some(max_pts) = state.max_pts {
            if adjusted.pts > max_pts || !adjusted.valid {
                tracing::debug!(
                    track_id = %self.track_id,
                    pts = adjusted.pts,
                    max_pts,
                    "end of stream"
                );
                return Err(SyncError::EndOfStream);
            }
        }

        state.has_last = true;
        state.last_ts = adjusted.ts;
        state.last_sn = adjusted.sequence_number;
        state.last_pts = adjusted.pts;
        state.last_valid = adjusted.valid;

        tracing::trace!(
            track_id = %self.track_id,
            seq = adjusted.sequence_number,
            ts = adjusted.ts,
            pts = adjusted.pts,
            "pts computed"
        );

        Ok(Presentation {
            sequence_number: adjusted.sequence_number,
            timestamp: adjusted.ts,
            pts: to_duration(adjusted.pts),
            valid: adjusted.valid,
        })
    }

    /// Synthesize a frame right after the last real (or inserted) one.
    ///
    /// Later real packets are renumbered to follow the inserted frame.
    pub fn insert_frame(&self, pkt: &RtpHeader) -> InsertedFrame {
        let frame = self.state.lock().commit_insert();
        tracing::trace!(track_id = %self.track_id, seq = pkt.sequence_number, ?frame, "frame inserted");
        frame
    }

    /// Like [`insert_frame`](Self::insert_frame), but only if the synthesized
    /// frame ends no later than `next` starts. Returns `None` and leaves the
    /// track untouched when there is no room.
    pub fn insert_frame_before(&self, pkt: &RtpHeader, next: &RtpHeader) -> Option<InsertedFrame> {
        let mut state = self.state.lock();
        let frame = state.insert_frame_before(next);
        match frame {
            Some(frame) => {
                tracing::trace!(track_id = %self.track_id, seq = pkt.sequence_number, ?frame, "frame inserted");
            }
            None => {
                tracing::trace!(
                    track_id = %self.track_id,
                    next_seq = next.sequence_number,
                    "no room to insert frame"
                );
            }
        }
        frame
    }

    /// Nominal spacing between frames, learned or default.
    pub fn frame_duration(&self) -> Duration {
        let state = self.state.lock();
        to_duration(state.rtp_to_nanos(state.frame_duration_rtp()))
    }

    /// Cap the presentation timeline. Packets beyond it end the stream.
    pub fn set_max_pts(&self, max_pts: Duration) {
        self.state.lock().max_pts = Some(saturating_nanos(max_pts));
    }

    pub fn max_pts(&self) -> Option<Duration> {
        self.state.lock().max_pts.map(to_duration)
    }

    /// Current presentation offset in nanoseconds (may be negative after
    /// drift correction).
    pub fn pts_offset(&self) -> i64 {
        self.state.lock().pts_offset
    }

    /// Last drift folded into the offset by a sender report.
    pub fn last_pts_drift(&self) -> i64 {
        self.state.lock().last_pts_drift
    }

    pub(crate) fn shift_pts_offset(&self, delta: i64) {
        let mut state = self.state.lock();
        state.pts_offset += delta;
        tracing::debug!(track_id = %self.track_id, delta, pts_offset = state.pts_offset, "pts offset shifted");
    }

    /// PTS of a sender report's RTP time, and whether the report's elapsed
    /// media time agrees with elapsed wall-clock time since the track started.
    pub fn sender_report_pts(&self, report: &SenderReport) -> (Duration, bool) {
        let (pts, in_delta) = self.sender_report_pts_nanos(report);
        (to_duration(pts), in_delta)
    }

    pub(crate) fn sender_report_pts_nanos(&self, report: &SenderReport) -> (i64, bool) {
        let state = self.state.lock();

        // a report may describe an instant slightly before the last packet
        let ts = unwrap_at_least(report.rtp_time, state.last_ts - UINT32_SPAN / 2);
        let elapsed = state.elapsed(ts);
        let expected = self.session.now() - state.started_at;

        (
            elapsed + state.pts_offset,
            (elapsed - expected).abs() <= self.sender_report_tolerance,
        )
    }

    /// Fold the difference between the sender's clock and this track's PTS
    /// for the same instant into the presentation offset.
    ///
    /// `pts` is the PTS this track computed for the report (see
    /// [`sender_report_pts`](Self::sender_report_pts)); `ntp_start` is the
    /// session's NTP reference start.
    pub fn on_sender_report(&self, report: &SenderReport, pts: Duration, ntp_start: NtpTime) {
        self.on_sender_report_nanos(report, saturating_nanos(pts), ntp_start);
    }

    pub(crate) fn on_sender_report_nanos(&self, report: &SenderReport, pts: i64, ntp_start: NtpTime) {
        let mut state = self.state.lock();

        let expected = report.ntp_time.nanos_since(ntp_start);
        if pts != expected {
            // TODO: damp or defer massive drifts once thresholds are measured
            let drift = expected - pts;
            state.pts_offset += drift;
            state.last_pts_drift = drift;
            tracing::debug!(
                track_id = %self.track_id,
                pts,
                drift,
                pts_offset = state.pts_offset,
                "pts drift corrected"
            );
        }
    }
}

impl TrackState {
    fn frame_duration_rtp(&self) -> i64 {
        if self.frame_duration != 0 {
            self.frame_duration
        } else {
            self.default_frame_duration
        }
    }

    fn rtp_to_nanos(&self, units: i64) -> i64 {
        (units as f64 * self.rtp_duration).round() as i64
    }

    fn elapsed(&self, ts: i64) -> i64 {
        self.rtp_to_nanos(ts - self.first_ts)
    }

    /// Correct the sequence number, unwrap the timestamp and compute the PTS.
    fn adjust(&mut self, pkt: &RtpHeader) -> Adjusted {
        let sn = pkt.sequence_number.wrapping_add(self.sn_offset);

        if self.has_last
            && sn.wrapping_sub(self.last_sn) > self.max_sn_dropout
            && self.last_sn.wrapping_sub(sn) > self.max_sn_dropout
        {
            // follow any frames inserted since the last real packet
            let repaired = self.last_sn.wrapping_add(self.inserted as u16).wrapping_add(1);
            self.sn_offset = self.sn_offset.wrapping_add(repaired.wrapping_sub(sn));

            // place the packet one frame (plus any inserted) after the last,
            // and move first_ts so later packets follow from there
            let ts_offset = (self.inserted + 1) * self.frame_duration_rtp();
            let ts = unwrap_at_least(pkt.timestamp, self.last_ts);
            self.first_ts += ts - (self.last_ts + ts_offset);

            return Adjusted {
                sequence_number: repaired,
                ts,
                pts: self.last_pts + self.rtp_to_nanos(ts_offset),
                valid: false,
                reset: true,
            };
        }

        let ts = if self.has_last {
            unwrap_at_least(pkt.timestamp, self.last_ts)
        } else {
            pkt.timestamp as i64
        };

        if self.has_last && ts == self.last_ts {
            return Adjusted {
                sequence_number: sn,
                ts,
                pts: self.last_pts,
                valid: self.last_valid,
                reset: false,
            };
        }

        Adjusted {
            sequence_number: sn,
            ts,
            pts: self.elapsed(ts) + self.pts_offset,
            valid: true,
            reset: false,
        }
    }

    /// Insert a frame only if it ends no later than `next` would start.
    ///
    /// Both positions are compared as elapsed RTP time, so a `next` that would
    /// trigger a reset is judged at the place the reset would put it. `next`
    /// is adjusted on a scratch copy; `self` only changes on success.
    fn insert_frame_before(&mut self, next: &RtpHeader) -> Option<InsertedFrame> {
        let frame_duration = self.frame_duration_rtp();
        let end = self.last_ts + (self.inserted + 2) * frame_duration - self.first_ts;

        let mut probe = self.clone();
        probe.inserted += 1;
        probe.sn_offset = probe.sn_offset.wrapping_add(1);
        probe.last_valid = false;
        let next_start = probe.adjust(next).ts - probe.first_ts;

        if end > next_start {
            return None;
        }
        Some(self.commit_insert())
    }

    fn commit_insert(&mut self) -> InsertedFrame {
        self.inserted += 1;
        self.sn_offset = self.sn_offset.wrapping_add(1);
        self.last_valid = false;

        let frame_duration = self.frame_duration_rtp();
        let ts = self.last_ts + self.inserted * frame_duration;
        let pts = self.last_pts + self.rtp_to_nanos(frame_duration * self.inserted);

        InsertedFrame {
            sequence_number: self.last_sn.wrapping_add(self.inserted as u16),
            timestamp: ts as u32,
            pts: to_duration(pts),
        }
    }
}

/// Smallest value congruent to `raw` modulo 2^32 that is `>= floor`.
fn unwrap_at_least(raw: u32, floor: i64) -> i64 {
    let ts = raw as i64;
    if ts >= floor {
        return ts;
    }
    let wraps = (floor - ts + UINT32_SPAN - 1) / UINT32_SPAN;
    ts + wraps * UINT32_SPAN
}

fn saturating_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}
