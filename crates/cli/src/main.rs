use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mediasync::{
    ManualClock, NtpTime, RtpHeader, SenderReport, SyncConfig, SyncError, Synchronizer, TrackInfo,
    TrackSynchronizer,
};
use rand::Rng;
use tracing_subscriber::EnvFilter;

const SIM_START_UNIX_NANOS: i64 = 1_700_000_000_000_000_000;

#[derive(Parser)]
#[command(
    name = "mediasync-sim",
    about = "Feed a simulated lossy audio/video RTP session through the synchronizer"
)]
struct Args {
    /// Session length in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Probability that any packet is lost in transit
    #[arg(long, default_value_t = 0.01)]
    loss: f64,

    /// Mute the audio sender for 100 ms every N seconds (0 = never)
    #[arg(long, default_value_t = 3)]
    mute_every: u64,

    /// Restart the video sender's counters after N seconds (0 = never)
    #[arg(long, default_value_t = 5)]
    restart_after: u64,

    /// How fast the video sender's RTP clock runs, in parts per million
    #[arg(long, default_value_t = 500.0, value_parser = parse_drift_ppm, allow_negative_numbers = true)]
    drift_ppm: f64,

    /// RTCP sender report interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    report_interval_ms: u64,

    /// Maximum sequence number skip before a jump counts as a restart
    #[arg(long, default_value_t = mediasync::config::DEFAULT_MAX_SN_DROPOUT)]
    max_dropout: u16,
}

/// Largest drift accepted in either direction.
const MAX_DRIFT_PPM: f64 = 500_000.0;

fn parse_drift_ppm(s: &str) -> Result<f64, String> {
    let ppm: f64 = s.trim().parse().map_err(|e| format!("invalid drift '{s}': {e}"))?;
    if ppm.is_finite() && ppm.abs() <= MAX_DRIFT_PPM {
        Ok(ppm)
    } else {
        Err(format!("drift must be within ±{MAX_DRIFT_PPM} ppm, got {s}"))
    }
}

/// Sending side of one simulated track.
struct Sender {
    ssrc: u32,
    /// RTP units per frame.
    step: u32,
    /// Wall-clock nanoseconds between frames.
    interval: i64,
    sn: u16,
    ts: u32,
    next_at: i64,
    next_report_at: i64,
}

/// Receiving side of one simulated track.
struct Receiver {
    track: Arc<TrackSynchronizer>,
    /// Raw (sequence number, timestamp) of the last delivered packet.
    last_raw: Option<(u16, u32)>,
    last_pts: Duration,
    delivered: u64,
    lost: u64,
    fillers: u64,
    resets: u64,
    regressions: u64,
    ended: bool,
}

impl Receiver {
    fn new(track: Arc<TrackSynchronizer>) -> Self {
        Self {
            track,
            last_raw: None,
            last_pts: Duration::ZERO,
            delivered: 0,
            lost: 0,
            fillers: 0,
            resets: 0,
            regressions: 0,
            ended: false,
        }
    }

    fn receive(&mut self, pkt: RtpHeader, fill_gaps: bool, frame_units: u32) {
        if self.ended {
            return;
        }

        // a timestamp jump without a sequence gap means the sender paused
        if let Some((last_sn, last_ts)) = self.last_raw {
            if fill_gaps
                && pkt.sequence_number == last_sn.wrapping_add(1)
                && pkt.timestamp.wrapping_sub(last_ts) > frame_units
            {
                let mut filler = RtpHeader::new(0, 0, pkt.ssrc);
                while let Some(frame) = self.track.insert_frame_before(&filler, &pkt) {
                    frame.apply(&mut filler);
                    self.fillers += 1;
                    tracing::debug!(
                        track_id = %self.track.track_id(),
                        seq = filler.sequence_number,
                        pts = ?frame.pts,
                        "filler frame"
                    );
                }
            }
        }

        match self.track.get_pts(&pkt) {
            Ok(p) => {
                if !p.valid {
                    self.resets += 1;
                }
                if p.pts < self.last_pts {
                    self.regressions += 1;
                }
                self.last_pts = p.pts;
                self.last_raw = Some((pkt.sequence_number, pkt.timestamp));
                self.delivered += 1;
                tracing::trace!(
                    track_id = %self.track.track_id(),
                    seq = p.sequence_number,
                    pts = ?p.pts,
                    "packet"
                );
            }
            Err(SyncError::EndOfStream) => {
                tracing::info!(track_id = %self.track.track_id(), "end of stream");
                self.ended = true;
            }
            Err(e) => tracing::error!(error = %e, "unexpected synchronizer error"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut rng = rand::rng();
    let loss = args.loss.clamp(0.0, 1.0);

    let clock = Arc::new(ManualClock::new(SIM_START_UNIX_NANOS));
    let config = SyncConfig {
        max_sn_dropout: args.max_dropout,
        ..SyncConfig::default()
    };
    let sync = Synchronizer::with_clock(config, clock.clone());

    let audio_info = TrackInfo::audio("audio", rng.random());
    let video_info = TrackInfo::video("video", rng.random());

    let report_interval = Duration::from_millis(args.report_interval_ms.max(1)).as_nanos() as i64;
    let mut senders = [
        Sender {
            ssrc: audio_info.ssrc,
            step: 960,
            interval: 20_000_000,
            sn: rng.random(),
            // start close to the wrap point so it happens during the run
            ts: u32::MAX - 48_000,
            next_at: SIM_START_UNIX_NANOS,
            next_report_at: SIM_START_UNIX_NANOS + report_interval,
        },
        Sender {
            ssrc: video_info.ssrc,
            step: 3000,
            interval: (33_333_333.0 / (1.0 + args.drift_ppm / 1e6)) as i64,
            sn: rng.random(),
            ts: rng.random(),
            // video arrives a little after audio
            next_at: SIM_START_UNIX_NANOS + 7_000_000,
            next_report_at: SIM_START_UNIX_NANOS + report_interval,
        },
    ];
    let mut receivers = [
        Receiver::new(sync.add_track(audio_info)),
        Receiver::new(sync.add_track(video_info)),
    ];

    let end_at = SIM_START_UNIX_NANOS + Duration::from_secs(args.duration).as_nanos() as i64;
    let mute_every = Duration::from_secs(args.mute_every).as_nanos() as i64;
    let restart_at = SIM_START_UNIX_NANOS + Duration::from_secs(args.restart_after).as_nanos() as i64;
    let mut next_mute_at = SIM_START_UNIX_NANOS + mute_every;
    let mut restarted = args.restart_after == 0;

    loop {
        let idx = if senders[0].next_at <= senders[1].next_at { 0 } else { 1 };
        let now = senders[idx].next_at;
        if now >= end_at {
            break;
        }
        clock.set(now);

        let is_audio = idx == 0;
        let sender = &mut senders[idx];

        if is_audio && mute_every > 0 && now >= next_mute_at {
            // muted: timestamps keep running, nothing is sent
            sender.ts = sender.ts.wrapping_add(5 * sender.step);
            sender.next_at += 5 * sender.interval;
            next_mute_at += mute_every;
            tracing::debug!("audio sender muted");
            continue;
        }
        if !is_audio && !restarted && now >= restart_at {
            sender.sn = sender.sn.wrapping_add(20_000);
            sender.ts = rng.random();
            restarted = true;
            tracing::info!("video sender restarted");
        }

        let pkt = RtpHeader::new(sender.sn, sender.ts, sender.ssrc);
        if rng.random_bool(loss) {
            receivers[idx].lost += 1;
        } else {
            receivers[idx].receive(pkt, is_audio, sender.step);
        }

        if now >= sender.next_report_at {
            sync.on_sender_report(SenderReport::new(
                sender.ssrc,
                NtpTime::now(clock.as_ref()),
                sender.ts,
            ));
            sender.next_report_at += report_interval;
        }

        sender.sn = sender.sn.wrapping_add(1);
        sender.ts = sender.ts.wrapping_add(sender.step);
        sender.next_at += sender.interval;
    }

    clock.set(end_at);
    let max_pts = sync.end();
    tracing::info!(?max_pts, "session ended");

    // anything sent after the end must be rejected
    for (receiver, sender) in receivers.iter_mut().zip(senders.iter()) {
        let late = RtpHeader::new(sender.sn, sender.ts.wrapping_add(100 * sender.step), sender.ssrc);
        receiver.receive(late, false, sender.step);
    }

    for r in &receivers {
        println!(
            "{:<6} delivered={} lost={} fillers={} resets={} regressions={} frame={:?} pts_offset={}ns drift={}ns last_pts={:?} ended={}",
            r.track.track_id(),
            r.delivered,
            r.lost,
            r.fillers,
            r.resets,
            r.regressions,
            r.track.frame_duration(),
            r.track.pts_offset(),
            r.track.last_pts_drift(),
            r.last_pts,
            r.ended,
        );
    }
}
