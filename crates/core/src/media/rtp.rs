use crate::error::{ParseErrorKind, Result, SyncError};

/// Length of the RTP fixed header in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// Parsed RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the fields the synchronizer reads are kept. Padding, extension and
/// CSRC list are skipped by [`parse`](Self::parse) and written as zero by
/// [`write`](Self::write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker bit; for most codecs set on the last packet of a frame.
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    /// 16-bit, wrapping.
    pub sequence_number: u16,
    /// 32-bit media clock, wrapping.
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type: 96,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    /// Parse the fixed header from the start of an RTP packet.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(SyncError::Parse {
                kind: ParseErrorKind::Truncated {
                    needed: RTP_HEADER_LEN,
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

        let header = Self {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };
        tracing::trace!(
            seq = header.sequence_number,
            ts = header.timestamp,
            ssrc = format_args!("{:#010X}", header.ssrc),
            "RTP header parsed"
        );
        Ok(header)
    }

    /// Serialize as a 12-byte fixed header (version 2, no CSRCs).
    pub fn write(&self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}
