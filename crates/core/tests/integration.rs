//! Integration tests: a two-track session driven through the public API.
//!
//! A manual clock stands in for wall-clock time so anchoring, sender-report
//! plausibility and end-of-stream bounds are deterministic.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mediasync::{
    ManualClock, NtpTime, RtpHeader, SenderReport, SyncConfig, SyncError, Synchronizer, TrackInfo,
};

const T0: i64 = 1_700_000_000_000_000_000;
const AUDIO_SSRC: u32 = 0x1111_1111;
const VIDEO_SSRC: u32 = 0x2222_2222;

/// Sender wall clock at the moment both first packets were sent.
const SENDER_START: i64 = T0 - 40_000_000;

const A0: u32 = 1_000;
const V0: u32 = 50_000;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn ntp_at(offset: Duration) -> NtpTime {
    NtpTime::from_unix_nanos(SENDER_START + offset.as_nanos() as i64)
}

fn session() -> (Arc<ManualClock>, Synchronizer) {
    let clock = Arc::new(ManualClock::new(T0));
    let sync = Synchronizer::with_clock(SyncConfig::default(), clock.clone());
    (clock, sync)
}

#[test]
fn tracks_share_session_start() {
    let (clock, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));
    let video = sync.add_track(TrackInfo::video("video", VIDEO_SSRC));

    audio.initialize(&RtpHeader::new(1, A0, AUDIO_SSRC));
    clock.advance(ms(5));
    video.initialize(&RtpHeader::new(1, V0, VIDEO_SSRC));

    assert_eq!(sync.started_at(), Some(T0));
    let a = audio.get_pts(&RtpHeader::new(1, A0, AUDIO_SSRC)).unwrap();
    let v = video.get_pts(&RtpHeader::new(1, V0, VIDEO_SSRC)).unwrap();
    assert_eq!(v.pts - a.pts, ms(5));
}

#[test]
fn sender_reports_align_then_correct_drift() {
    let (clock, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));
    let video = sync.add_track(TrackInfo::video("video", VIDEO_SSRC));

    // both first packets left the sender together; video arrived 5 ms later
    audio.get_pts(&RtpHeader::new(1, A0, AUDIO_SSRC)).unwrap();
    clock.advance(ms(5));
    video.get_pts(&RtpHeader::new(1, V0, VIDEO_SSRC)).unwrap();
    assert_eq!(video.pts_offset(), 5_000_000);

    clock.advance(ms(995));
    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(1000)), A0 + 48_000));
    assert_eq!(sync.ntp_start(), None);
    sync.on_sender_report(SenderReport::new(VIDEO_SSRC, ntp_at(ms(1000)), V0 + 90_000));

    // audio's estimated start was 5 ms later than video's, so it moves up
    assert_eq!(sync.ntp_start(), Some(NtpTime::from_unix_nanos(SENDER_START - 5_000_000)));
    assert_eq!(audio.pts_offset(), 5_000_000);
    assert_eq!(video.pts_offset(), 5_000_000);

    let a = audio.get_pts(&RtpHeader::new(2, A0 + 96_000, AUDIO_SSRC)).unwrap();
    let v = video.get_pts(&RtpHeader::new(2, V0 + 180_000, VIDEO_SSRC)).unwrap();
    assert_eq!(a.pts, ms(2005));
    assert_eq!(v.pts, ms(2005));

    // sender clock says audio is 2 ms behind where we put it
    clock.advance(ms(2000));
    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(3002)), A0 + 3 * 48_000));
    assert_eq!(audio.pts_offset(), 7_000_000);
    assert_eq!(audio.last_pts_drift(), 2_000_000);

    let a = audio.get_pts(&RtpHeader::new(3, A0 + 4 * 48_000, AUDIO_SSRC)).unwrap();
    assert_eq!(a.pts, ms(4007));
}

#[test]
fn implausible_sender_report_is_ignored() {
    let (clock, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));
    audio.get_pts(&RtpHeader::new(1, A0, AUDIO_SSRC)).unwrap();
    clock.advance(ms(1000));
    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(1000)), A0 + 48_000));
    assert!(sync.ntp_start().is_some());

    // RTP time claims 10 s have passed, wall clock says 2 s
    clock.advance(ms(1000));
    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(9000)), A0 + 10 * 48_000));
    assert_eq!(audio.pts_offset(), 0);
}

#[test]
fn implausible_first_report_does_not_skew_alignment() {
    let (clock, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));
    let video = sync.add_track(TrackInfo::video("video", VIDEO_SSRC));

    audio.get_pts(&RtpHeader::new(1, A0, AUDIO_SSRC)).unwrap();
    clock.advance(ms(5));
    video.get_pts(&RtpHeader::new(1, V0, VIDEO_SSRC)).unwrap();
    clock.advance(ms(995));

    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(1000)), A0 + 48_000));
    // video RTP time claims 30 s after 1 s of wall clock
    sync.on_sender_report(SenderReport::new(VIDEO_SSRC, ntp_at(ms(1000)), V0 + 30 * 90_000));
    assert_eq!(sync.ntp_start(), None);
    assert_eq!(audio.pts_offset(), 0);
    assert_eq!(video.pts_offset(), 5_000_000);

    sync.on_sender_report(SenderReport::new(VIDEO_SSRC, ntp_at(ms(1000)), V0 + 90_000));
    assert_eq!(sync.ntp_start(), Some(NtpTime::from_unix_nanos(SENDER_START - 5_000_000)));
    assert_eq!(audio.pts_offset(), 5_000_000);
    assert_eq!(video.pts_offset(), 5_000_000);

    let a = audio.get_pts(&RtpHeader::new(2, A0 + 96_000, AUDIO_SSRC)).unwrap();
    assert_eq!(a.pts, ms(2005));
}

#[test]
fn session_end_cuts_off_tracks() {
    let (clock, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));

    for i in 0..50u16 {
        audio
            .get_pts(&RtpHeader::new(i, A0 + i as u32 * 960, AUDIO_SSRC))
            .unwrap();
        clock.advance(ms(20));
    }

    let max_pts = sync.end().unwrap();
    assert_eq!(max_pts, ms(1000));

    // packet 50 sits exactly on the bound, 51 is past it
    let p = audio.get_pts(&RtpHeader::new(50, A0 + 50 * 960, AUDIO_SSRC)).unwrap();
    assert_eq!(p.pts, ms(1000));
    let err = audio
        .get_pts(&RtpHeader::new(51, A0 + 51 * 960, AUDIO_SSRC))
        .unwrap_err();
    assert!(matches!(err, SyncError::EndOfStream));

    // reports after the end are dropped
    sync.on_sender_report(SenderReport::new(AUDIO_SSRC, ntp_at(ms(1000)), A0 + 48_000));
    assert_eq!(sync.ntp_start(), None);
}

#[test]
fn filler_frames_cover_muted_audio() {
    let (_, sync) = session();
    let audio = sync.add_track(TrackInfo::audio("audio", AUDIO_SSRC));
    audio.get_pts(&RtpHeader::new(1, A0, AUDIO_SSRC)).unwrap();
    audio.get_pts(&RtpHeader::new(2, A0 + 960, AUDIO_SSRC)).unwrap();

    // sender muted for 100 ms without consuming sequence numbers
    let next = RtpHeader::new(3, A0 + 6 * 960, AUDIO_SSRC);
    let mut fillers = Vec::new();
    let mut filler = RtpHeader::new(0, 0, AUDIO_SSRC);
    while let Some(frame) = audio.insert_frame_before(&filler, &next) {
        frame.apply(&mut filler);
        fillers.push(filler);
    }

    assert_eq!(fillers.len(), 4);
    let seqs: Vec<u16> = fillers.iter().map(|f| f.sequence_number).collect();
    assert_eq!(seqs, vec![3, 4, 5, 6]);
    assert_eq!(fillers[3].timestamp, A0 + 5 * 960);

    let p = audio.get_pts(&next).unwrap();
    assert_eq!(p.sequence_number, 7);
    assert_eq!(p.pts, ms(120));
}

#[test]
fn tracks_run_on_independent_threads() {
    let sync = Arc::new(Synchronizer::default());
    let infos = [
        (TrackInfo::audio("audio", AUDIO_SSRC), 960u32),
        (TrackInfo::video("video", VIDEO_SSRC), 3000u32),
    ];

    let handles: Vec<_> = infos
        .into_iter()
        .map(|(info, step)| {
            let track = sync.add_track(info);
            thread::spawn(move || {
                let ssrc = track.ssrc();
                // start just below the wrap point
                let mut ts = u32::MAX - 10 * step;
                let mut last = Duration::ZERO;
                for sn in 0..500u16 {
                    let p = track.get_pts(&RtpHeader::new(sn, ts, ssrc)).unwrap();
                    assert!(p.pts >= last);
                    last = p.pts;
                    ts = ts.wrapping_add(step);
                }
                last
            })
        })
        .collect();

    for h in handles {
        let last = h.join().unwrap();
        assert!(last > Duration::from_secs(9));
    }
    assert!(sync.started_at().is_some());
}
