//! Timeline to AVI muxer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use recorder_ipc::{VideoCodec, CHANNELS, SAMPLE_RATE};
use tracing::{debug, info, instrument, trace, warn};

use crate::avi::{AudioTrack, AviWriter, VideoTrack};
use crate::cadence::{CadenceSlot, FrameCadence};
use crate::error::EncoderError;
use crate::pcm::PcmEncoder;
use crate::timeline::TimelineEvent;
use crate::{create_video_encoder, AudioEncoder, EncoderResult, VideoEncoder};

/// Media time between header checkpoints.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// Gaps shorter than this are not padded with silence.
const AUDIO_GAP_TOLERANCE: Duration = Duration::from_millis(1);

/// Output settings for a [`Muxer`].
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Quality level, 0 - 100.
    pub qb: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Output file.
    pub output: PathBuf,

    /// Video dimensions, or `None` for an audio-only file.
    pub video: Option<(u32, u32)>,

    /// Whether an audio track is written.
    pub audio: bool,

    pub codec: VideoCodec,

    /// Override of the container size limit.
    pub size_limit: Option<u64>,
}

/// Counters reported by the muxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Video slots written, including held ones.
    pub video_frames: u64,

    /// Slots that repeat an earlier frame.
    pub held_frames: u64,

    /// Frames discarded by the cadence.
    pub dropped_frames: u64,

    /// Audio sample frames written.
    pub audio_frames: u64,

    /// Sample frames of silence inserted by the muxer.
    pub silence_frames: u64,

    pub bytes_written: u64,
}

fn validate_output(path: &Path) -> EncoderResult<()> {
    let invalid = |reason: &str| EncoderError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    if path.is_dir() {
        return Err(invalid("path is a directory"));
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(invalid("parent directory does not exist"))
        }
        _ => Ok(()),
    }
}

fn frames_for(duration: Duration) -> u64 {
    (duration.as_nanos() * SAMPLE_RATE as u128 / 1_000_000_000) as u64
}

fn duration_for(frames: u64) -> Duration {
    Duration::from_nanos((frames as u128 * 1_000_000_000 / SAMPLE_RATE as u128) as u64)
}

/// Encodes the session timeline into an AVI file.
///
/// Video passes through a [`FrameCadence`] so the track has exactly one
/// frame per `1/fps` slot. Audio is written contiguously; gaps between
/// audio events are filled with silence. Headers are checkpointed once per
/// second of media and the file is finalized on [`finalize`] or drop.
///
/// [`finalize`]: Muxer::finalize
pub struct Muxer {
    config: MuxerConfig,
    writer: AviWriter,
    video_encoder: Option<Box<dyn VideoEncoder>>,
    audio_encoder: Option<PcmEncoder>,
    cadence: FrameCadence,
    media_time: Duration,
    last_checkpoint: Duration,
    stats: MuxStats,
    finalized: bool,
}

impl Muxer {
    /// Validate the output path, create the encoders and write the headers.
    #[instrument(name = "muxer_configure", skip(config), fields(output = %config.output.display()))]
    pub fn configure(config: MuxerConfig) -> EncoderResult<Self> {
        validate_output(&config.output)?;
        if config.video.is_none() && !config.audio {
            return Err(EncoderError::InvalidInput("no streams configured".into()));
        }

        let video_encoder = config
            .video
            .map(|(w, h)| create_video_encoder(config.codec, w, h, config.fps, config.qb))
            .transpose()?;

        let video_track = match (&video_encoder, config.video) {
            (Some(encoder), Some((width, height))) => Some(VideoTrack {
                width,
                height,
                fps: config.fps,
                fourcc: encoder.fourcc(),
            }),
            _ => None,
        };
        let audio_track = config.audio.then_some(AudioTrack {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bits_per_sample: 16,
        });

        let mut writer = AviWriter::create(&config.output, video_track, audio_track)?;
        if let Some(limit) = config.size_limit {
            writer = writer.with_size_limit(limit);
        }

        info!(
            qb = config.qb,
            fps = config.fps,
            video = ?config.video,
            audio = config.audio,
            encoder = video_encoder.as_ref().map(|e| e.name()).unwrap_or("none"),
            "Muxer configured"
        );

        Ok(Self {
            cadence: FrameCadence::new(config.fps),
            audio_encoder: config.audio.then(|| PcmEncoder::new(CHANNELS)),
            config,
            writer,
            video_encoder,
            media_time: Duration::ZERO,
            last_checkpoint: Duration::ZERO,
            stats: MuxStats::default(),
            finalized: false,
        })
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.config.output
    }

    /// Counters so far.
    pub fn stats(&self) -> MuxStats {
        MuxStats {
            dropped_frames: self.cadence.dropped(),
            bytes_written: self.writer.bytes_written(),
            ..self.stats
        }
    }

    /// Media time covered by the audio track.
    fn audio_end(&self) -> Duration {
        duration_for(self.stats.audio_frames)
    }

    /// Write one timeline event.
    pub fn push(&mut self, event: TimelineEvent) -> EncoderResult<()> {
        if self.finalized {
            return Err(EncoderError::Finalized);
        }

        let pts = event.pts();
        match event {
            TimelineEvent::Video { pts, frame, .. } => {
                if self.video_encoder.is_none() {
                    trace!("Video event without a video track ignored");
                    return Ok(());
                }
                for slot in self.cadence.place(pts, frame) {
                    self.write_slot(slot)?;
                }
            }
            TimelineEvent::Audio { pts, samples } => {
                if self.audio_encoder.is_none() {
                    return Ok(());
                }
                let end = self.audio_end();
                if pts > end + AUDIO_GAP_TOLERANCE {
                    self.write_silence(pts - end)?;
                }
                self.write_samples(&samples)?;
            }
        }

        self.media_time = self.media_time.max(pts);
        if self.media_time >= self.last_checkpoint + CHECKPOINT_INTERVAL {
            self.writer.checkpoint()?;
            self.last_checkpoint = self.media_time;
        }
        Ok(())
    }

    fn write_slot(&mut self, slot: CadenceSlot) -> EncoderResult<()> {
        let Some(encoder) = self.video_encoder.as_mut() else {
            return Ok(());
        };
        match encoder.encode(&slot.frame)? {
            Some(packet) => self.writer.write_video(&packet.data, packet.is_keyframe)?,
            None => self.writer.write_video(&[], false)?,
        }
        self.stats.video_frames += 1;
        if slot.held {
            self.stats.held_frames += 1;
        }
        Ok(())
    }

    fn write_samples(&mut self, samples: &[f32]) -> EncoderResult<()> {
        let Some(encoder) = self.audio_encoder.as_mut() else {
            return Ok(());
        };
        let whole = samples.len() - samples.len() % CHANNELS as usize;
        if whole == 0 {
            return Ok(());
        }
        let data = encoder.encode(&samples[..whole])?;
        self.writer.write_audio(&data)?;
        self.stats.audio_frames += (whole / CHANNELS as usize) as u64;
        Ok(())
    }

    fn write_silence(&mut self, gap: Duration) -> EncoderResult<()> {
        let mut remaining = frames_for(gap);
        trace!(frames = remaining, "Padding audio with silence");
        let chunk = (SAMPLE_RATE / 10) as u64;
        while remaining > 0 {
            let frames = remaining.min(chunk);
            let silence = vec![0.0f32; frames as usize * CHANNELS as usize];
            self.write_samples(&silence)?;
            self.stats.silence_frames += frames;
            remaining -= frames;
        }
        Ok(())
    }

    /// Extend both tracks to `end`, write the index and close the file.
    #[instrument(name = "muxer_finalize", skip(self), fields(output = %self.config.output.display()))]
    pub fn finalize(&mut self, end: Duration) -> EncoderResult<MuxStats> {
        if self.finalized {
            return Ok(self.stats());
        }
        self.finalized = true;

        if let Err(e) = self.pad_to(end) {
            // The index still fits: the writer reserves room for it.
            warn!(error = %e, "Could not extend tracks to the session end");
        }

        let bytes = self.writer.finalize()?;
        let stats = self.stats();
        info!(
            bytes,
            video_frames = stats.video_frames,
            held = stats.held_frames,
            dropped = stats.dropped_frames,
            audio_frames = stats.audio_frames,
            "Muxer finalized"
        );
        Ok(stats)
    }

    fn pad_to(&mut self, end: Duration) -> EncoderResult<()> {
        if self.video_encoder.is_some() {
            for slot in self.cadence.finish(end) {
                self.write_slot(slot)?;
            }
        }
        if self.audio_encoder.is_some() {
            let audio_end = self.audio_end();
            if end > audio_end + AUDIO_GAP_TOLERANCE {
                self.write_silence(end - audio_end)?;
            }
        }
        Ok(())
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if !self.finalized {
            debug!("Muxer dropped before finalize");
            if let Err(e) = self.finalize(self.media_time) {
                warn!(error = %e, "Finalize on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::probe::{probe, StreamKind};
    use bytes::Bytes;
    use recorder_capture::VideoFrame;
    use recorder_ipc::PixelFormat;
    use std::time::Instant;

    fn config(dir: &Path, video: bool, audio: bool) -> MuxerConfig {
        MuxerConfig {
            qb: 50,
            fps: 10,
            output: dir.join("out.avi"),
            video: video.then_some((16, 16)),
            audio,
            codec: VideoCodec::Mjpeg,
            size_limit: None,
        }
    }

    fn video(ms: u64, sequence: u64) -> TimelineEvent {
        TimelineEvent::Video {
            pts: Duration::from_millis(ms),
            frame: VideoFrame {
                data: Bytes::from(vec![128u8; 16 * 16 * 3 / 2]),
                width: 16,
                height: 16,
                format: PixelFormat::Nv12,
                captured_at: Instant::now(),
                sequence,
            },
            held: false,
        }
    }

    fn audio(ms: u64, frames: usize) -> TimelineEvent {
        TimelineEvent::Audio {
            pts: Duration::from_millis(ms),
            samples: vec![0.25; frames * 2],
        }
    }

    #[test]
    fn rejects_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), true, true);
        cfg.output = dir.path().join("missing").join("out.avi");
        assert!(matches!(
            Muxer::configure(cfg),
            Err(EncoderError::InvalidPath { .. })
        ));

        let mut cfg = config(dir.path(), true, true);
        cfg.output = PathBuf::new();
        assert!(Muxer::configure(cfg).is_err());
    }

    #[test]
    fn video_track_covers_session_end() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), true, true);
        let path = cfg.output.clone();
        let mut muxer = Muxer::configure(cfg).unwrap();

        for i in 0..10u64 {
            muxer.push(audio(i * 100, 4800)).unwrap();
            muxer.push(video(i * 100, i)).unwrap();
            // Second frame in the same slot is dropped.
            muxer.push(video(i * 100 + 30, 100 + i)).unwrap();
        }
        let stats = muxer.finalize(Duration::from_millis(1500)).unwrap();
        assert_eq!(stats.video_frames, 15);
        assert_eq!(stats.held_frames, 5);
        assert_eq!(stats.dropped_frames, 10);
        assert_eq!(stats.audio_frames, 72_000);

        let summary = probe(&path).unwrap();
        let video = summary.stream(StreamKind::Video).unwrap();
        assert_eq!(video.duration, Duration::from_millis(1500));
        let audio = summary.stream(StreamKind::Audio).unwrap();
        assert_eq!(audio.duration, Duration::from_millis(1500));
        assert_eq!(audio.sample_rate, SAMPLE_RATE);
        assert_eq!(audio.channels, CHANNELS);
    }

    #[test]
    fn audio_gaps_are_filled_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Muxer::configure(config(dir.path(), false, true)).unwrap();
        muxer.push(audio(0, 480)).unwrap();
        muxer.push(audio(50, 480)).unwrap();
        let stats = muxer.finalize(Duration::from_millis(60)).unwrap();
        assert_eq!(stats.silence_frames, 1920);
        assert_eq!(stats.audio_frames, 2880);
    }

    #[test]
    fn push_after_finalize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Muxer::configure(config(dir.path(), true, false)).unwrap();
        muxer.finalize(Duration::ZERO).unwrap();
        assert!(matches!(
            muxer.push(video(0, 0)),
            Err(EncoderError::Finalized)
        ));
    }

    #[test]
    fn drop_leaves_an_indexed_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), true, true);
        let path = cfg.output.clone();
        {
            let mut muxer = Muxer::configure(cfg).unwrap();
            muxer.push(video(0, 0)).unwrap();
            muxer.push(audio(0, 4800)).unwrap();
        }
        let summary = probe(&path).unwrap();
        assert!(summary.has_index);
        assert_eq!(summary.stream(StreamKind::Video).unwrap().chunks, 1);
    }

    #[test]
    fn container_full_surfaces_and_file_stays_valid() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), false, true);
        cfg.size_limit = Some(4096);
        let path = cfg.output.clone();
        let mut muxer = Muxer::configure(cfg).unwrap();

        let result = (0..10).try_for_each(|i| muxer.push(audio(i * 10, 480)));
        assert!(matches!(result, Err(EncoderError::ContainerFull(_))));
        muxer.finalize(Duration::from_millis(100)).unwrap();
        assert!(probe(&path).unwrap().has_index);
    }
}
