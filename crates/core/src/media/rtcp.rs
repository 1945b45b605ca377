use crate::error::{ParseErrorKind, Result, SyncError};
use crate::ntp::NtpTime;

/// RTCP packet type for sender reports (RFC 3550 §12.1).
pub const RTCP_PT_SR: u8 = 200;

/// Length of a sender report without report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

/// RTCP sender report, sender info section only (RFC 3550 §6.4.1).
///
/// ```text
///         0                   1                   2                   3
///         0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// header |V=2|P|    RC   |   PT=SR=200   |             length            |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                         SSRC of sender                        |
///        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// sender |              NTP timestamp, most significant word             |
/// info   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |             NTP timestamp, least significant word             |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                         RTP timestamp                         |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                     sender's packet count                     |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                      sender's octet count                     |
///        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
///
/// The NTP and RTP timestamps describe the same instant in the sender's two
/// clocks, which is what drift reconciliation needs. Report blocks that may
/// follow are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Absolute send time.
    pub ntp_time: NtpTime,
    /// RTP timestamp corresponding to `ntp_time`, same domain as the track's
    /// packet timestamps.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    pub fn new(ssrc: u32, ntp_time: NtpTime, rtp_time: u32) -> Self {
        Self {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count: 0,
            octet_count: 0,
        }
    }

    /// Parse a sender report from the start of an RTCP (compound) packet.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SENDER_REPORT_LEN {
            return Err(SyncError::Parse {
                kind: ParseErrorKind::Truncated {
                    needed: SENDER_REPORT_LEN,
                    got: buf.len(),
                },
            });
        }

        let version = buf[0] >> 6;
        if version != 2 {
            return Err(SyncError::Parse {
                kind: ParseErrorKind::InvalidVersion(version),
            });
        }
        if buf[1] != RTCP_PT_SR {
            return Err(SyncError::Parse {
                kind: ParseErrorKind::UnexpectedPacketType(buf[1]),
            });
        }

        let word = |at: usize| u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let ntp = ((word(8) as u64) << 32) | word(12) as u64;

        Ok(Self {
            ssrc: word(4),
            ntp_time: NtpTime(ntp),
            rtp_time: word(16),
            packet_count: word(20),
            octet_count: word(24),
        })
    }

    /// Serialize with zero report blocks.
    pub fn write(&self) -> [u8; SENDER_REPORT_LEN] {
        let mut buf = [0u8; SENDER_REPORT_LEN];
        buf[0] = 2 << 6;
        buf[1] = RTCP_PT_SR;
        // length in 32-bit words minus one
        buf[2..4].copy_from_slice(&((SENDER_REPORT_LEN / 4 - 1) as u16).to_be_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..16].copy_from_slice(&self.ntp_time.0.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_time.to_be_bytes());
        buf[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        buf
    }
}
