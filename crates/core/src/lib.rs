pub mod clock;
pub mod config;
pub mod error;
pub mod media;
pub mod ntp;
pub mod synchronizer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use media::rtcp::SenderReport;
pub use media::rtp::RtpHeader;
pub use media::{MediaKind, TrackInfo};
pub use ntp::NtpTime;
pub use synchronizer::{
    InsertedFrame, Presentation, SessionClock, Synchronizer, TrackSynchronizer,
};
