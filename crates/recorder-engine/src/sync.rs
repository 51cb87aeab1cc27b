//! Audio/video synchronizer.
//!
//! Turns timestamped audio chunks and video frames into one ordered
//! timeline. Audio is laid out contiguously on a sample clock: underruns
//! become silence and overlaps are trimmed. Video timestamps never go
//! backwards, and the last frame is repeated while video lags the
//! reference clock. Events leave the synchronizer only once every enabled
//! stream has caught up to them (or they are older than the latency
//! bound), so the released timeline is non-decreasing.

use std::time::Duration;

use recorder_audio::{duration_to_frames, frames_to_duration, CHANNELS};
use recorder_capture::VideoFrame;
use recorder_encoder::TimelineEvent;
use recorder_ipc::EngineConfig;
use tracing::trace;

/// Whole sample frames needed to advance from `from` to at least `to`.
fn frames_until(from: Duration, to: Duration) -> u64 {
    let nanos = to.saturating_sub(from).as_nanos() * recorder_audio::SAMPLE_RATE as u128;
    nanos.div_ceil(1_000_000_000) as u64
}

/// Stream layout and timing bounds.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub fps: u32,
    pub audio: bool,
    pub video: bool,

    /// How far the released timeline may trail the session clock.
    pub max_latency: Duration,

    /// Audio timing error absorbed without silence or trimming.
    pub drift_tolerance: Duration,
}

impl SyncConfig {
    /// Build from the engine tunables.
    pub fn new(config: &EngineConfig, fps: u32, audio: bool, video: bool) -> Self {
        Self {
            fps,
            audio,
            video,
            max_latency: Duration::from_millis(config.max_latency_ms),
            drift_tolerance: Duration::from_millis(config.drift_tolerance_ms),
        }
    }
}

/// Counters kept by the synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_in: u64,
    pub frames_held: u64,
    pub frames_clamped: u64,
    pub audio_chunks: u64,
    pub audio_dropped: u64,
    pub trimmed_frames: u64,
    pub silence_frames: u64,
}

/// Orders audio and video units onto the session timeline.
#[derive(Debug)]
pub struct Synchronizer {
    config: SyncConfig,
    interval: Duration,
    audio_frames: u64,
    video_clock: Option<Duration>,
    last_frame: Option<VideoFrame>,
    released: Duration,
    pending: Vec<TimelineEvent>,
    stats: SyncStats,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(1) / config.fps.max(1),
            config,
            audio_frames: 0,
            video_clock: None,
            last_frame: None,
            released: Duration::ZERO,
            pending: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// End of the audio laid out so far.
    pub fn audio_clock(&self) -> Duration {
        frames_to_duration(self.audio_frames as usize)
    }

    /// Timestamp of the latest video event.
    pub fn video_clock(&self) -> Option<Duration> {
        self.video_clock
    }

    /// Everything up to this point has been released.
    pub fn released(&self) -> Duration {
        self.released
    }

    fn insert(&mut self, event: TimelineEvent) {
        let pts = event.pts();
        let at = self.pending.partition_point(|e| e.pts() <= pts);
        self.pending.insert(at, event);
    }

    fn insert_silence(&mut self, frames: u64) {
        if frames == 0 {
            return;
        }
        trace!(frames, at = ?self.audio_clock(), "Inserting silence");
        let event = TimelineEvent::Audio {
            pts: self.audio_clock(),
            samples: vec![0.0; frames as usize * CHANNELS as usize],
        };
        self.insert(event);
        self.audio_frames += frames;
        self.stats.silence_frames += frames;
    }

    /// Place an audio chunk captured at session time `pts`.
    pub fn push_audio(&mut self, pts: Duration, mut samples: Vec<f32>) {
        if !self.config.audio {
            return;
        }
        self.stats.audio_chunks += 1;

        let channels = CHANNELS as usize;
        let clock = self.audio_clock();
        let tolerance = self.config.drift_tolerance;

        if pts > clock + tolerance {
            self.insert_silence(duration_to_frames(pts - clock) as u64);
        } else if pts + tolerance < clock {
            let overlap = duration_to_frames(clock - pts);
            if overlap >= samples.len() / channels {
                trace!(?pts, ?clock, "Audio chunk entirely late, dropped");
                self.stats.audio_dropped += 1;
                return;
            }
            samples.drain(..overlap * channels);
            self.stats.trimmed_frames += overlap as u64;
        }

        let frames = (samples.len() / channels) as u64;
        if frames == 0 {
            return;
        }
        samples.truncate(frames as usize * channels);
        let event = TimelineEvent::Audio {
            pts: self.audio_clock(),
            samples,
        };
        self.insert(event);
        self.audio_frames += frames;
    }

    /// Place a video frame captured at session time `pts`.
    pub fn push_video(&mut self, pts: Duration, frame: VideoFrame) {
        if !self.config.video {
            return;
        }
        self.stats.frames_in += 1;

        let floor = self.video_clock.unwrap_or_default().max(self.released);
        let pts = if pts < floor {
            self.stats.frames_clamped += 1;
            floor
        } else {
            pts
        };

        self.insert(TimelineEvent::Video {
            pts,
            frame: frame.clone(),
            held: false,
        });
        self.video_clock = Some(pts);
        self.last_frame = Some(frame);
    }

    /// Repeat the last frame until video is within one interval of `reference`.
    fn hold_until(&mut self, reference: Duration) {
        let (Some(frame), Some(mut clock)) = (self.last_frame.clone(), self.video_clock) else {
            return;
        };
        while clock + self.interval < reference {
            clock += self.interval;
            self.insert(TimelineEvent::Video {
                pts: clock,
                frame: frame.clone(),
                held: true,
            });
            self.stats.frames_held += 1;
        }
        self.video_clock = Some(clock);
    }

    fn release_through(&mut self, watermark: Duration) -> Vec<TimelineEvent> {
        self.released = self.released.max(watermark);
        let released = self.released;
        let count = self.pending.partition_point(|e| e.pts() <= released);
        self.pending.drain(..count).collect()
    }

    /// Release the events that are settled at session time `now`.
    pub fn drain(&mut self, now: Duration) -> Vec<TimelineEvent> {
        let floor = now.saturating_sub(self.config.max_latency);

        if self.config.audio && floor > self.audio_clock() {
            self.insert_silence(frames_until(self.audio_clock(), floor));
        }

        if self.config.video {
            let reference = if self.config.audio {
                self.audio_clock()
            } else {
                now
            };
            self.hold_until(reference.min(floor));
        }

        let mut watermark = None::<Duration>;
        if self.config.audio {
            watermark = Some(self.audio_clock());
        }
        if self.config.video {
            let video = self.video_clock.unwrap_or_default();
            watermark = Some(watermark.map_or(video, |w| w.min(video)));
        }
        let watermark = watermark.unwrap_or(now).max(floor);

        self.release_through(watermark)
    }

    /// Extend the streams to `end` and release everything.
    pub fn flush(&mut self, end: Duration) -> Vec<TimelineEvent> {
        if self.config.audio && end > self.audio_clock() {
            self.insert_silence(frames_until(self.audio_clock(), end));
        }
        if self.config.video {
            self.hold_until(end);
        }
        self.released = self.released.max(end);
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use recorder_ipc::PixelFormat;
    use std::time::Instant;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn config(audio: bool, video: bool) -> SyncConfig {
        SyncConfig {
            fps: 10,
            audio,
            video,
            max_latency: ms(100),
            drift_tolerance: ms(5),
        }
    }

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame {
            data: Bytes::from_static(&[0; 6]),
            width: 2,
            height: 2,
            format: PixelFormat::Nv12,
            captured_at: Instant::now(),
            sequence,
        }
    }

    fn chunk(frames: usize) -> Vec<f32> {
        vec![0.5; frames * CHANNELS as usize]
    }

    fn audio_layout(events: &[TimelineEvent]) -> Vec<(u64, usize, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                TimelineEvent::Audio { pts, samples } => Some((
                    pts.as_millis() as u64,
                    samples.len() / CHANNELS as usize,
                    samples.iter().all(|s| *s == 0.0),
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn underrun_inserts_silence() {
        let mut sync = Synchronizer::new(config(true, false));
        sync.push_audio(ms(0), chunk(480));
        sync.push_audio(ms(50), chunk(480));
        let events = sync.flush(ms(60));
        assert_eq!(
            audio_layout(&events),
            vec![(0, 480, false), (10, 1920, true), (50, 480, false)]
        );
        assert_eq!(sync.stats().silence_frames, 1920);
    }

    #[test]
    fn small_jitter_is_absorbed() {
        let mut sync = Synchronizer::new(config(true, false));
        sync.push_audio(ms(0), chunk(480));
        sync.push_audio(ms(13), chunk(480));
        sync.push_audio(ms(18), chunk(480));
        let events = sync.flush(ms(30));
        assert_eq!(
            audio_layout(&events),
            vec![(0, 480, false), (10, 480, false), (20, 480, false)]
        );
    }

    #[test]
    fn overlap_is_trimmed_and_stale_chunks_dropped() {
        let mut sync = Synchronizer::new(config(true, false));
        sync.push_audio(ms(0), chunk(4800));
        sync.push_audio(ms(90), chunk(960));
        sync.push_audio(ms(20), chunk(480));
        let events = sync.flush(ms(110));
        assert_eq!(audio_layout(&events), vec![(0, 4800, false), (100, 480, false)]);
        assert_eq!(sync.stats().trimmed_frames, 480);
        assert_eq!(sync.stats().audio_dropped, 1);
    }

    #[test]
    fn missing_audio_is_filled_after_max_latency() {
        let mut sync = Synchronizer::new(config(true, false));
        let events = sync.drain(ms(1000));
        assert_eq!(audio_layout(&events), vec![(0, 43_200, true)]);
        assert_eq!(sync.audio_clock(), ms(900));
    }

    #[test]
    fn lagging_video_holds_last_frame() {
        let mut sync = Synchronizer::new(config(false, true));
        sync.push_video(ms(0), frame(1));
        let events = sync.drain(ms(500));
        let layout: Vec<_> = events
            .iter()
            .map(|e| match e {
                TimelineEvent::Video { pts, frame, held } => {
                    (pts.as_millis() as u64, frame.sequence, *held)
                }
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            layout,
            vec![(0, 1, false), (100, 1, true), (200, 1, true), (300, 1, true)]
        );
        assert_eq!(sync.stats().frames_held, 3);
    }

    #[test]
    fn released_timeline_is_ordered_and_late_video_clamped() {
        let mut sync = Synchronizer::new(config(true, true));
        let mut out = Vec::new();
        for i in 0..20u64 {
            sync.push_audio(ms(i * 10), chunk(480));
            if i % 4 == 0 {
                sync.push_video(ms(i * 10 + 3), frame(i));
            }
            out.extend(sync.drain(ms(i * 10 + 10)));
        }
        let released = sync.released();
        sync.push_video(released.saturating_sub(ms(50)), frame(99));
        out.extend(sync.flush(ms(250)));

        assert!(out.windows(2).all(|w| w[0].pts() <= w[1].pts()));
        assert_eq!(sync.stats().frames_clamped, 1);
        let late = out
            .iter()
            .find_map(|e| match e {
                TimelineEvent::Video { pts, frame, .. } if frame.sequence == 99 => Some(*pts),
                _ => None,
            })
            .unwrap();
        assert!(late >= released);
    }

    #[test]
    fn identical_input_gives_identical_timeline() {
        let run = || {
            let mut sync = Synchronizer::new(config(true, true));
            let mut pts = Vec::new();
            for i in 0..30u64 {
                sync.push_audio(ms(i * 10 + (i % 3)), chunk(480));
                if i % 3 == 0 {
                    sync.push_video(ms(i * 10), frame(i));
                }
                pts.extend(sync.drain(ms(i * 10 + 40)).iter().map(|e| (e.pts(), e.is_video())));
            }
            pts.extend(sync.flush(ms(320)).iter().map(|e| (e.pts(), e.is_video())));
            pts
        };
        assert_eq!(run(), run());
    }
}
