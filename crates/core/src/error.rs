//! Error types for the synchronizer library.

use std::fmt;

/// Errors that can occur while synchronizing a track.
///
/// Sequence gaps, timestamp wraparound and duplicate timestamps are absorbed
/// by the synchronizer and never surface here. The variants are:
///
/// - **Stream**: [`EndOfStream`](Self::EndOfStream) — the track has passed
///   its maximum presentation time.
/// - **Wire**: [`Parse`](Self::Parse) — a malformed RTP or RTCP header.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The packet lies past the track's maximum PTS (set by
    /// [`Synchronizer::end`](crate::Synchronizer::end)), or was judged
    /// invalid once a maximum was set. The caller should stop feeding packets.
    #[error("end of stream")]
    EndOfStream,

    /// Failed to parse an RTP fixed header or RTCP sender report.
    #[error("packet parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of wire parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Buffer is shorter than the fixed header it should contain.
    Truncated { needed: usize, got: usize },
    /// The 2-bit version field was not 2 (RFC 3550 §5.1).
    InvalidVersion(u8),
    /// RTCP packet type was not a sender report (200).
    UnexpectedPacketType(u8),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, got } => {
                write!(f, "truncated header ({got} bytes, need {needed})")
            }
            Self::InvalidVersion(v) => write!(f, "invalid version {v}"),
            Self::UnexpectedPacketType(pt) => write!(f, "unexpected packet type {pt}"),
        }
    }
}

/// Convenience alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = SyncError::Parse {
            kind: ParseErrorKind::Truncated { needed: 12, got: 4 },
        };
        assert_eq!(
            err.to_string(),
            "packet parse error: truncated header (4 bytes, need 12)"
        );
    }

    #[test]
    fn end_of_stream_display() {
        assert_eq!(SyncError::EndOfStream.to_string(), "end of stream");
    }
}
