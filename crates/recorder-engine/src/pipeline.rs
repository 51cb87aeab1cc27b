//! Capture-to-file pipeline thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{never, select, Receiver};
use recorder_audio::AudioChunk;
use recorder_capture::VideoFrame;
use recorder_encoder::{MuxStats, Muxer};
use recorder_ipc::{RecorderEvent, StopReason};
use tracing::{error, info, instrument, trace};

use crate::error::RecorderError;
use crate::session::SessionShared;
use crate::sync::{SyncStats, Synchronizer};
use crate::RecorderResult;

/// Longest the loop waits for input before advancing the timeline.
const TICK: Duration = Duration::from_millis(10);

/// Capture streams feeding the pipeline.
pub(crate) struct PipelineInputs {
    pub audio: Option<Receiver<AudioChunk>>,
    pub video: Option<Receiver<VideoFrame>>,
}

/// What the pipeline thread reports when it ends.
#[derive(Debug)]
pub(crate) struct PipelineOutcome {
    pub sync: SyncStats,
    pub mux: MuxStats,
    pub failure: Option<StopReason>,
}

/// Owns the synchronizer and muxer on a dedicated thread.
///
/// The thread is the single writer of the output file. While the session
/// clock is paused it keeps draining the capture streams, discarding what
/// arrives so a lost device is still noticed, and holds the timeline. On
/// exit it flushes the timeline up to the frozen session time and
/// finalizes the file.
pub(crate) struct Pipeline {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<PipelineOutcome>>,
}

impl Pipeline {
    #[instrument(name = "pipeline_start", skip_all)]
    pub fn start(
        shared: Arc<SessionShared>,
        inputs: PipelineInputs,
        sync: Synchronizer,
        muxer: Muxer,
        duration_interval: Duration,
    ) -> RecorderResult<Self> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let worker = PipelineWorker {
            shared,
            inputs,
            sync,
            muxer,
            duration_interval,
            should_stop: Arc::clone(&should_stop),
        };
        let handle = thread::Builder::new()
            .name("recorder-pipeline".into())
            .spawn(move || worker.run())
            .map_err(|e| RecorderError::Internal(format!("pipeline thread: {e}")))?;

        Ok(Self {
            should_stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and collect its outcome.
    pub fn stop(&mut self) -> Option<PipelineOutcome> {
        self.should_stop.store(true, Ordering::SeqCst);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("Pipeline thread panicked");
                None
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct PipelineWorker {
    shared: Arc<SessionShared>,
    inputs: PipelineInputs,
    sync: Synchronizer,
    muxer: Muxer,
    duration_interval: Duration,
    should_stop: Arc<AtomicBool>,
}

impl PipelineWorker {
    fn run(mut self) -> PipelineOutcome {
        info!(output = %self.muxer.path().display(), "Pipeline running");

        let audio_rx = self.inputs.audio.take().unwrap_or_else(never);
        let video_rx = self.inputs.video.take().unwrap_or_else(never);
        let mut last_report = Instant::now();
        let mut failure = None;

        while !self.should_stop.load(Ordering::SeqCst) {
            select! {
                recv(audio_rx) -> msg => match msg {
                    Ok(chunk) => self.on_audio(chunk),
                    Err(_) => {
                        failure = Some(StopReason::DeviceLost { message: "audio stream ended".into() });
                        break;
                    }
                },
                recv(video_rx) -> msg => match msg {
                    Ok(frame) => self.on_video(frame),
                    Err(_) => {
                        failure = Some(StopReason::DeviceLost { message: "video stream ended".into() });
                        break;
                    }
                },
                default(TICK) => {}
            }

            if !self.shared.is_running() {
                last_report = Instant::now();
                continue;
            }

            let now = self.shared.elapsed();
            if let Err(reason) = self.advance(now) {
                failure = Some(reason);
                break;
            }

            let reached_ms = now.as_millis() as u64;
            self.shared.waiters.advance(reached_ms);
            if last_report.elapsed() >= self.duration_interval {
                last_report += self.duration_interval;
                self.shared.events.emit(RecorderEvent::Duration(reached_ms));
                self.shared
                    .metrics
                    .update_stages(self.sync.stats(), self.muxer.stats());
            }
        }

        if let Some(reason) = &failure {
            error!(reason = %reason.message(), "Pipeline failed");
            self.shared.fail(reason.clone());
        }

        let end = self.shared.elapsed();
        let mux = self.finish(end, failure.is_some());
        self.shared.metrics.update_stages(self.sync.stats(), mux);
        info!(
            end_ms = end.as_millis() as u64,
            frames = mux.video_frames,
            bytes = mux.bytes_written,
            "Pipeline finished"
        );

        PipelineOutcome {
            sync: self.sync.stats(),
            mux,
            failure,
        }
    }

    fn on_audio(&mut self, chunk: AudioChunk) {
        match self.shared.session_time(chunk.captured_at) {
            Some(pts) => {
                self.shared.metrics.record_audio();
                self.sync.push_audio(pts, chunk.samples);
            }
            None => {
                trace!(sequence = chunk.sequence, "Audio captured while paused, discarded");
                self.shared.metrics.record_audio_discarded();
            }
        }
    }

    fn on_video(&mut self, frame: VideoFrame) {
        self.shared.metrics.record_frame();
        match self.shared.session_time(frame.captured_at) {
            Some(pts) => self.sync.push_video(pts, frame),
            None => {
                trace!(sequence = frame.sequence, "Frame captured while paused, discarded");
                self.shared.metrics.record_frame_discarded();
            }
        }
    }

    fn advance(&mut self, now: Duration) -> Result<(), StopReason> {
        for event in self.sync.drain(now) {
            self.muxer.push(event).map_err(|e| StopReason::EncoderError {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Flush the timeline and finalize the file.
    fn finish(&mut self, end: Duration, failed: bool) -> MuxStats {
        if !failed {
            for event in self.sync.flush(end) {
                if let Err(e) = self.muxer.push(event) {
                    error!(error = %e, "Write failed while flushing");
                    break;
                }
            }
        }
        match self.muxer.finalize(end) {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Finalize failed");
                self.muxer.stats()
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncConfig;
    use recorder_encoder::{probe, MuxerConfig};
    use recorder_ipc::VideoCodec;

    #[test]
    fn timeline_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("pipeline.avi");
        let shared = Arc::new(SessionShared::detached());
        shared.begin_recording(Instant::now());

        let (audio_tx, audio_rx) = crossbeam_channel::bounded(64);
        let muxer = Muxer::configure(MuxerConfig {
            qb: 50,
            fps: 10,
            output: output.clone(),
            video: None,
            audio: true,
            codec: VideoCodec::Mjpeg,
            size_limit: None,
        })
        .unwrap();
        let sync = Synchronizer::new(SyncConfig {
            fps: 10,
            audio: true,
            video: false,
            max_latency: Duration::from_millis(50),
            drift_tolerance: Duration::from_millis(5),
        });

        let mut pipeline = Pipeline::start(
            Arc::clone(&shared),
            PipelineInputs {
                audio: Some(audio_rx),
                video: None,
            },
            sync,
            muxer,
            Duration::from_secs(1),
        )
        .unwrap();

        let start = Instant::now();
        for sequence in 0..10 {
            audio_tx
                .send(AudioChunk {
                    samples: vec![0.1; 960],
                    captured_at: start + Duration::from_millis(sequence * 10),
                    sequence,
                    role: recorder_ipc::AudioRole::Mic,
                })
                .unwrap();
        }
        thread::sleep(Duration::from_millis(150));
        shared.freeze(Instant::now());

        let outcome = pipeline.stop().unwrap();
        assert!(outcome.failure.is_none());
        assert!(outcome.mux.audio_frames >= 4800);
        assert!(probe(&output).unwrap().has_index);
    }

    #[test]
    fn lost_stream_is_noticed_while_paused() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("paused.avi");
        let shared = Arc::new(SessionShared::detached());
        shared.begin_recording(Instant::now());
        shared.transition_to(recorder_ipc::RecorderState::Recording);
        assert!(shared.pause_recording(Instant::now()));

        let (audio_tx, audio_rx) = crossbeam_channel::bounded(64);
        let muxer = Muxer::configure(MuxerConfig {
            qb: 50,
            fps: 10,
            output: output.clone(),
            video: None,
            audio: true,
            codec: VideoCodec::Mjpeg,
            size_limit: None,
        })
        .unwrap();
        let sync = Synchronizer::new(SyncConfig {
            fps: 10,
            audio: true,
            video: false,
            max_latency: Duration::from_millis(50),
            drift_tolerance: Duration::from_millis(5),
        });
        let mut pipeline = Pipeline::start(
            Arc::clone(&shared),
            PipelineInputs {
                audio: Some(audio_rx),
                video: None,
            },
            sync,
            muxer,
            Duration::from_secs(1),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        audio_tx
            .send(AudioChunk {
                samples: vec![0.1; 960],
                captured_at: Instant::now(),
                sequence: 0,
                role: recorder_ipc::AudioRole::Mic,
            })
            .unwrap();
        drop(audio_tx);

        let deadline = Instant::now() + Duration::from_secs(1);
        while shared.state().is_paused() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            shared.state(),
            recorder_ipc::RecorderState::Error {
                code: recorder_ipc::ErrorCode::DeviceUnavailable
            }
        );

        let outcome = pipeline.stop().unwrap();
        assert!(matches!(outcome.failure, Some(StopReason::DeviceLost { .. })));
        assert_eq!(shared.metrics.snapshot().audio_chunks_dropped, 1);
    }
}
