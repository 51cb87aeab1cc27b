//! Recording session lifecycle.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use recorder_audio::{AudioCapture, AudioChunk};
use recorder_capture::{PreviewTap, VideoFrame, VideoSource};
use recorder_encoder::{EncoderError, Muxer, MuxerConfig};
use recorder_ipc::{
    AudioRole, Device, DeviceKind, DeviceSelection, EngineConfig, ErrorCode, RecorderEvent,
    RecorderSettings, RecorderState, RecordingStats, StartupPhase, StopReason, FPS_RANGE,
    QUALITY_RANGE,
};
use tracing::{debug, info, instrument, warn};

use crate::clock::SessionClock;
use crate::dispatch::{CallbackRegistry, EventSink, PreviewForwarder};
use crate::error::RecorderError;
use crate::guard::SessionLease;
use crate::metrics::SessionMetrics;
use crate::pipeline::{Pipeline, PipelineInputs};
use crate::platform::Platform;
use crate::sync::{SyncConfig, Synchronizer};
use crate::wait::WaitQueue;
use crate::RecorderResult;

/// Preview frames buffered ahead of the preview callback.
const PREVIEW_QUEUE: usize = 2;

/// State shared between the controller and the pipeline thread.
pub(crate) struct SessionShared {
    state: RwLock<RecorderState>,
    clock: Mutex<SessionClock>,
    pub waiters: WaitQueue,
    pub events: EventSink,
    pub metrics: SessionMetrics,
}

impl SessionShared {
    pub fn new(events: EventSink) -> Self {
        Self {
            state: RwLock::new(RecorderState::Uninitialized),
            clock: Mutex::new(SessionClock::new()),
            waiters: WaitQueue::new(),
            events,
            metrics: SessionMetrics::new(),
        }
    }

    /// Shared state whose events go nowhere.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (sender, _) = recorder_ipc::event_channel();
        Self::new(EventSink::new(sender))
    }

    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    pub(crate) fn transition_to(&self, new_state: RecorderState) {
        let previous = std::mem::replace(&mut *self.state.write(), new_state);
        debug!(
            previous = previous.name(),
            current = new_state.name(),
            "State transition"
        );
    }

    pub fn is_running(&self) -> bool {
        self.clock.lock().is_running()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.lock().elapsed(Instant::now())
    }

    pub fn session_time(&self, instant: Instant) -> Option<Duration> {
        self.clock.lock().to_session(instant)
    }

    /// Start the clock and accept waits for a new recording.
    pub fn begin_recording(&self, now: Instant) {
        self.metrics.reset();
        self.clock.lock().start(now);
        self.waiters.open();
    }

    /// Stop the clock for good.
    pub fn freeze(&self, now: Instant) {
        self.clock.lock().pause(now);
    }

    /// Freeze the clock and enter `Paused` if still recording.
    ///
    /// The state lock is held across the clock change so a concurrent
    /// failure cannot be overwritten.
    pub fn pause_recording(&self, now: Instant) -> bool {
        let mut state = self.state.write();
        if !state.is_recording() {
            return false;
        }
        self.clock.lock().pause(now);
        *state = RecorderState::Paused;
        debug!(previous = "recording", current = "paused", "State transition");
        true
    }

    /// Continue the clock and enter `Recording` if still paused.
    pub fn resume_recording(&self, now: Instant) -> bool {
        let mut state = self.state.write();
        if !state.is_paused() {
            return false;
        }
        self.clock.lock().resume(now);
        *state = RecorderState::Recording;
        debug!(previous = "paused", current = "recording", "State transition");
        true
    }

    /// Move an active session to the error state.
    ///
    /// Returns false when the session was not active or the reason is not a
    /// failure; only the first failure is reported to the host.
    pub fn fail(&self, reason: StopReason) -> bool {
        let Some(code) = reason.error_code() else {
            return false;
        };
        {
            let mut state = self.state.write();
            if !state.is_active() {
                return false;
            }
            *state = RecorderState::Error { code };
            self.clock.lock().pause(Instant::now());
        }
        warn!(code = code.as_i32(), reason = %reason.message(), "Session failed");
        self.waiters.close();
        self.events.emit(RecorderEvent::Error(code));
        true
    }
}

/// Everything opened by `start`, torn down in reverse phase order.
#[derive(Default)]
struct Resources {
    phase: Option<StartupPhase>,
    audio: Option<AudioCapture>,
    audio_rx: Option<Receiver<AudioChunk>>,
    video: Option<Box<dyn VideoSource>>,
    video_rx: Option<Receiver<VideoFrame>>,
    preview: Option<PreviewForwarder>,
    muxer: Option<Muxer>,
    pipeline: Option<Pipeline>,
}

impl Resources {
    /// Undo every phase up to the current one, newest first.
    #[instrument(name = "rollback_resources", skip_all)]
    fn rollback(&mut self, shared: &SessionShared) {
        let Some(mut phase) = self.phase.take() else {
            return;
        };
        loop {
            debug!(phase = phase.name(), "Rolling back phase");
            match phase {
                StartupPhase::StartPipeline => {
                    shared.freeze(Instant::now());
                    if let Some(mut pipeline) = self.pipeline.take() {
                        let _ = pipeline.stop();
                    }
                    shared.waiters.close();
                }
                StartupPhase::OpenMuxer => {
                    // Only present when the pipeline never took ownership.
                    if let Some(muxer) = self.muxer.take() {
                        let path = muxer.path().to_path_buf();
                        drop(muxer);
                        if let Err(e) = std::fs::remove_file(&path) {
                            debug!(path = %path.display(), error = %e, "Could not remove unused output");
                        }
                    }
                }
                StartupPhase::OpenVideo => {
                    self.video_rx = None;
                    if let Some(mut video) = self.video.take() {
                        if let Err(e) = video.stop() {
                            warn!(error = %e, "Failed to stop video source");
                        }
                    }
                    if let Some(mut preview) = self.preview.take() {
                        preview.stop();
                    }
                }
                StartupPhase::OpenAudio => {
                    self.audio_rx = None;
                    if let Some(mut audio) = self.audio.take() {
                        if let Err(e) = audio.stop() {
                            warn!(error = %e, "Failed to stop audio capture");
                        }
                    }
                }
            }
            match phase.previous() {
                Some(previous) => phase = previous,
                None => break,
            }
        }
    }
}

struct Session {
    settings: RecorderSettings,
    speaker: Option<Device>,
    mic: Option<Device>,
    camera: Option<Device>,
    resources: Resources,
    _lease: SessionLease,
}

impl From<StopReason> for RecorderError {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::DeviceLost { message } => Self::DeviceUnavailable(message),
            StopReason::EncoderError { message } => Self::Encode(EncoderError::Encoding(message)),
            other => Self::Internal(other.message()),
        }
    }
}

fn validate_output(output: &Path) -> RecorderResult<()> {
    let invalid = |reason: &str| {
        RecorderError::InvalidOutputPath(format!("{}: {reason}", output.display()))
    };
    if output.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    if output.is_dir() {
        return Err(invalid("is a directory"));
    }
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(invalid("parent directory does not exist"))
        }
        _ => Ok(()),
    }
}

/// Owns the single recording session and drives its lifecycle.
///
/// ```text
/// Uninitialized/Released --init--> Initialized --start--> Recording <--> Paused
///                                                              |
///                                      Stopped <----stop-------+
/// any state --release--> Released        async failure --> Error
/// ```
///
/// Lifecycle calls are serialized; `wait` only reads shared state so it
/// never blocks them.
pub struct SessionController {
    platform: Arc<dyn Platform>,
    config: EngineConfig,
    registry: Arc<CallbackRegistry>,
    shared: Arc<SessionShared>,
    session: Mutex<Option<Session>>,
}

impl SessionController {
    pub fn new(
        platform: Arc<dyn Platform>,
        config: EngineConfig,
        registry: Arc<CallbackRegistry>,
        events: EventSink,
    ) -> Self {
        Self {
            platform,
            config,
            registry,
            shared: Arc::new(SessionShared::new(events)),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state()
    }

    /// Accumulated recording time, excluding pauses.
    pub fn duration(&self) -> Duration {
        self.shared.elapsed()
    }

    /// Counters of the current or last recording.
    pub fn stats(&self) -> RecordingStats {
        self.shared.metrics.snapshot()
    }

    /// Settings of the initialized session.
    pub fn settings(&self) -> Option<RecorderSettings> {
        self.session.lock().as_ref().map(|s| s.settings.clone())
    }

    /// Devices resolved at init: speaker, mic, camera.
    pub fn selected_devices(&self) -> Option<[Option<Device>; 3]> {
        self.session
            .lock()
            .as_ref()
            .map(|s| [s.speaker.clone(), s.mic.clone(), s.camera.clone()])
    }

    /// Enumerate devices of `kind`.
    pub fn devices(&self, kind: DeviceKind) -> RecorderResult<Vec<Device>> {
        self.platform.list_devices(kind)
    }

    fn invalid_state(&self, operation: &'static str) -> RecorderError {
        RecorderError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    /// Initialize with host-style arguments. The default video device is
    /// recorded when one exists.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &self,
        qb: u32,
        fps: u32,
        output: &str,
        speaker_name: &str,
        speaker_id: &str,
        mic_name: &str,
        mic_id: &str,
    ) -> RecorderResult<()> {
        self.init_with_settings(RecorderSettings {
            qb,
            fps,
            output: output.into(),
            speaker: DeviceSelection::new(speaker_name, speaker_id),
            mic: DeviceSelection::new(mic_name, mic_id),
            camera: None,
        })
    }

    fn resolve(
        &self,
        kind: DeviceKind,
        selection: &DeviceSelection,
        code: ErrorCode,
    ) -> RecorderResult<Option<Device>> {
        if selection.is_empty() {
            return Ok(None);
        }
        let devices = self.platform.list_devices(kind)?;
        match devices.into_iter().find(|d| selection.matches(d)) {
            Some(device) => Ok(Some(device)),
            None => Err(RecorderError::DeviceNotFound {
                kind: kind.name(),
                code,
                selection: if selection.id.is_empty() {
                    selection.name.clone()
                } else {
                    selection.id.clone()
                },
            }),
        }
    }

    fn resolve_camera(&self, selection: &Option<DeviceSelection>) -> RecorderResult<Option<Device>> {
        match selection {
            Some(selection) => self.resolve(DeviceKind::Camera, selection, ErrorCode::CameraNotFound),
            None => match self.platform.list_devices(DeviceKind::Camera) {
                Ok(devices) => {
                    let default = devices.iter().position(|d| d.is_default).unwrap_or(0);
                    Ok(devices.into_iter().nth(default))
                }
                Err(e) => {
                    warn!(error = %e, "Camera enumeration failed, recording audio only");
                    Ok(None)
                }
            },
        }
    }

    /// Validate settings, resolve devices and take the session lease.
    ///
    /// Nothing changes when this fails.
    #[instrument(name = "session_init", skip(self, settings), fields(qb = settings.qb, fps = settings.fps))]
    pub fn init_with_settings(&self, settings: RecorderSettings) -> RecorderResult<()> {
        let mut guard = self.session.lock();
        if !self.state().can_init() || guard.is_some() {
            return Err(self.invalid_state("init"));
        }

        if !QUALITY_RANGE.contains(&settings.qb) {
            return Err(RecorderError::InvalidQuality(settings.qb));
        }
        if !FPS_RANGE.contains(&settings.fps) {
            return Err(RecorderError::InvalidFrameRate(settings.fps));
        }
        validate_output(&settings.output)?;

        let speaker = self.resolve(DeviceKind::Speaker, &settings.speaker, ErrorCode::SpeakerNotFound)?;
        let mic = self.resolve(DeviceKind::Mic, &settings.mic, ErrorCode::MicNotFound)?;
        let camera = self.resolve_camera(&settings.camera)?;
        if speaker.is_none() && mic.is_none() && camera.is_none() {
            return Err(RecorderError::NoCaptureSource);
        }

        let lease = SessionLease::acquire()?;

        info!(
            output = %settings.output.display(),
            speaker = speaker.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            mic = mic.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            camera = camera.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            platform = self.platform.name(),
            "Session initialized"
        );

        *guard = Some(Session {
            settings,
            speaker,
            mic,
            camera,
            resources: Resources::default(),
            _lease: lease,
        });
        self.shared.transition_to(RecorderState::Initialized);
        Ok(())
    }

    /// Open the sources and the output, then start recording.
    #[instrument(name = "session_start", skip(self))]
    pub fn start(&self) -> RecorderResult<()> {
        let mut guard = self.session.lock();
        if self.state() != RecorderState::Initialized {
            return Err(self.invalid_state("start"));
        }
        let Some(session) = guard.as_mut() else {
            return Err(self.invalid_state("start"));
        };

        let mut phase = StartupPhase::OpenAudio;
        loop {
            session.resources.phase = Some(phase);
            if let Err(e) = self.start_phase(session, phase) {
                warn!(phase = phase.name(), error = %e, "Start failed, rolling back");
                session.resources.rollback(&self.shared);
                return Err(e);
            }
            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        info!("Recording started");
        Ok(())
    }

    fn start_phase(&self, session: &mut Session, phase: StartupPhase) -> RecorderResult<()> {
        debug!(phase = phase.name(), "Starting phase");
        let queue = self.config.queue();
        let resources = &mut session.resources;

        match phase {
            StartupPhase::OpenAudio => {
                let mut endpoints = Vec::new();
                if let Some(speaker) = &session.speaker {
                    endpoints.push(self.platform.open_audio(&speaker.id, AudioRole::Speaker)?);
                }
                if let Some(mic) = &session.mic {
                    endpoints.push(self.platform.open_audio(&mic.id, AudioRole::Mic)?);
                }
                if !endpoints.is_empty() {
                    let mut capture = AudioCapture::new(endpoints, self.config.mix_policy)?;
                    resources.audio_rx = Some(capture.start(queue)?);
                    resources.audio = Some(capture);
                }
            }
            StartupPhase::OpenVideo => {
                if let Some(camera) = &session.camera {
                    let mut source = self.platform.open_video(&camera.id)?;
                    let tap = if self.config.preview {
                        let (tap, frames) = PreviewTap::new(PREVIEW_QUEUE);
                        resources.preview =
                            Some(PreviewForwarder::start(frames, Arc::clone(&self.registry))?);
                        Some(tap)
                    } else {
                        None
                    };
                    resources.video_rx = Some(source.start(queue, tap)?);
                    resources.video = Some(source);
                }
            }
            StartupPhase::OpenMuxer => {
                let muxer = Muxer::configure(MuxerConfig {
                    qb: session.settings.qb,
                    fps: session.settings.fps,
                    output: session.settings.output.clone(),
                    video: resources.video.as_ref().map(|v| v.dimensions()),
                    audio: resources.audio.is_some(),
                    codec: self.config.video_codec,
                    size_limit: self.config.max_output_bytes,
                })?;
                resources.muxer = Some(muxer);
            }
            StartupPhase::StartPipeline => {
                let muxer = resources
                    .muxer
                    .take()
                    .ok_or_else(|| RecorderError::Internal("muxer not configured".into()))?;
                let sync = Synchronizer::new(SyncConfig::new(
                    &self.config,
                    session.settings.fps,
                    resources.audio.is_some(),
                    resources.video.is_some(),
                ));
                let inputs = PipelineInputs {
                    audio: resources.audio_rx.take(),
                    video: resources.video_rx.take(),
                };
                // The pipeline may fail as soon as it runs, so the session
                // must already be active for that failure to land.
                self.shared.begin_recording(Instant::now());
                self.shared.transition_to(RecorderState::Recording);
                match Pipeline::start(
                    Arc::clone(&self.shared),
                    inputs,
                    sync,
                    muxer,
                    Duration::from_millis(self.config.duration_interval_ms.max(1)),
                ) {
                    Ok(pipeline) => resources.pipeline = Some(pipeline),
                    Err(e) => {
                        self.shared.transition_to(RecorderState::Initialized);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Freeze the clock and stop consuming capture data.
    #[instrument(name = "session_pause", skip(self))]
    pub fn pause(&self) -> RecorderResult<()> {
        let _guard = self.session.lock();
        if !self.shared.pause_recording(Instant::now()) {
            return Err(self.invalid_state("pause"));
        }
        info!(duration_ms = self.duration().as_millis() as u64, "Recording paused");
        Ok(())
    }

    /// Continue recording after a pause.
    #[instrument(name = "session_resume", skip(self))]
    pub fn resume(&self) -> RecorderResult<()> {
        let _guard = self.session.lock();
        if !self.shared.resume_recording(Instant::now()) {
            return Err(self.invalid_state("resume"));
        }
        info!("Recording resumed");
        Ok(())
    }

    /// Finalize the output and close the sources.
    #[instrument(name = "session_stop", skip(self))]
    pub fn stop(&self) -> RecorderResult<()> {
        let mut guard = self.session.lock();
        if !self.state().is_active() {
            return Err(self.invalid_state("stop"));
        }
        let Some(session) = guard.as_mut() else {
            return Err(self.invalid_state("stop"));
        };

        self.shared.freeze(Instant::now());
        let outcome = session
            .resources
            .pipeline
            .take()
            .and_then(|mut pipeline| pipeline.stop());
        session.resources.rollback(&self.shared);
        self.shared.waiters.close();

        if let Some(reason) = outcome.and_then(|o| o.failure) {
            return Err(reason.into());
        }

        let duration_ms = self.duration().as_millis() as u64;
        self.shared.transition_to(RecorderState::Stopped);
        self.shared.events.emit(RecorderEvent::Duration(duration_ms));
        info!(duration_ms, stats = ?self.stats(), "Recording stopped");
        Ok(())
    }

    /// Block until the recording reaches `timestamp_ms` of session time.
    ///
    /// Returns at once when no recording is active or the time has passed,
    /// and early when the session stops, is released or fails.
    pub fn wait(&self, timestamp_ms: u64) -> u64 {
        if !self.state().is_active() {
            return self.duration().as_millis() as u64;
        }
        self.shared.waiters.wait(timestamp_ms)
    }

    /// Tear everything down and forget the host callbacks. Idempotent.
    #[instrument(name = "session_release", skip(self))]
    pub fn release(&self) {
        let mut guard = self.session.lock();
        if let Some(mut session) = guard.take() {
            self.shared.freeze(Instant::now());
            if let Some(mut pipeline) = session.resources.pipeline.take() {
                let _ = pipeline.stop();
            }
            session.resources.rollback(&self.shared);
        }
        self.shared.waiters.close();
        self.registry.clear();
        if self.state() != RecorderState::Released {
            self.shared.transition_to(RecorderState::Released);
            info!("Session released");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_output(&dir.path().join("a.avi")).is_ok());
        assert!(validate_output(Path::new("relative.avi")).is_ok());
        assert!(validate_output(Path::new("")).is_err());
        assert!(validate_output(dir.path()).is_err());
        assert!(validate_output(&dir.path().join("nope").join("a.avi")).is_err());
    }

    #[test]
    fn failure_is_reported_once() {
        let shared = SessionShared::detached();
        shared.transition_to(RecorderState::Recording);
        let lost = || StopReason::DeviceLost {
            message: "mic".into(),
        };
        assert!(shared.fail(lost()));
        assert!(!shared.fail(lost()));
        assert_eq!(
            shared.state(),
            RecorderState::Error {
                code: ErrorCode::DeviceUnavailable
            }
        );
        assert!(!shared.fail(StopReason::UserRequested));
    }

    #[test]
    fn pause_and_resume_keep_a_failure() {
        let shared = SessionShared::detached();
        shared.begin_recording(Instant::now());
        shared.transition_to(RecorderState::Recording);
        assert!(shared.pause_recording(Instant::now()));
        assert!(!shared.pause_recording(Instant::now()));

        assert!(shared.fail(StopReason::DeviceLost {
            message: "camera".into()
        }));
        assert!(!shared.resume_recording(Instant::now()));
        assert!(!shared.pause_recording(Instant::now()));
        assert!(!shared.is_running());
        assert_eq!(
            shared.state(),
            RecorderState::Error {
                code: ErrorCode::DeviceUnavailable
            }
        );
    }

    #[test]
    fn concurrent_failure_is_never_overwritten() {
        for _ in 0..50 {
            let shared = Arc::new(SessionShared::detached());
            shared.begin_recording(Instant::now());
            shared.transition_to(RecorderState::Recording);

            let toggler = {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        shared.pause_recording(Instant::now());
                        shared.resume_recording(Instant::now());
                    }
                })
            };
            assert!(shared.fail(StopReason::EncoderError {
                message: "disk".into()
            }));
            toggler.join().unwrap();

            assert_eq!(
                shared.state(),
                RecorderState::Error {
                    code: ErrorCode::EncodeFailed
                }
            );
            assert!(!shared.is_running());
        }
    }
}
