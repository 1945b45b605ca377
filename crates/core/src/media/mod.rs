//! Track metadata and the wire headers the synchronizer consumes.
//!
//! The synchronizer never touches payloads. It needs three things from the
//! outside world:
//!
//! - **Track registration** ([`TrackInfo`]): clock rate and media kind, as
//!   negotiated by the signaling layer (e.g. SDP `a=rtpmap`).
//! - **RTP fixed headers** ([`rtp::RtpHeader`], RFC 3550 §5.1): 16-bit
//!   sequence number and 32-bit timestamp, both wrapping.
//! - **RTCP sender reports** ([`rtcp::SenderReport`], RFC 3550 §6.4.1):
//!   the sender's NTP wall clock paired with its RTP clock.

pub mod rtcp;
pub mod rtp;

/// Media kind of a track. Only used to choose a fallback frame cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Registration data for one track of a session.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Application-level track identifier (used in logs).
    pub id: String,
    /// RTP synchronization source carried by the track's packets and reports.
    pub ssrc: u32,
    /// RTP clock rate in Hz (e.g. 48000 for Opus, 90000 for video).
    pub clock_rate: u32,
    pub kind: MediaKind,
}

impl TrackInfo {
    pub fn new(id: &str, ssrc: u32, clock_rate: u32, kind: MediaKind) -> Self {
        Self {
            id: id.to_string(),
            ssrc,
            clock_rate,
            kind,
        }
    }

    /// 48 kHz audio track.
    pub fn audio(id: &str, ssrc: u32) -> Self {
        Self::new(id, ssrc, 48_000, MediaKind::Audio)
    }

    /// 90 kHz video track.
    pub fn video(id: &str, ssrc: u32) -> Self {
        Self::new(id, ssrc, 90_000, MediaKind::Video)
    }
}
