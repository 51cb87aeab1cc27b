//! Host-facing recorder.

use std::sync::Arc;
use std::time::Duration;

use recorder_ipc::{Device, DeviceKind, EngineConfig, RecorderEvent, RecorderState, RecordingStats};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::{CallbackRegistry, EventDispatcher, EventSink, PreviewImage};
use crate::error::RecorderError;
use crate::platform::{default_platform, Platform};
use crate::session::SessionController;
use crate::watcher::DeviceWatcher;
use crate::RecorderResult;

/// The recorder as seen by a host application.
///
/// Lifecycle calls never fail loudly: `init` returns a numeric code,
/// calls made in an incompatible state are logged and ignored, and
/// failures during `start` are reported through the error callback.
pub struct Recorder {
    controller: SessionController,
    platform: Arc<dyn Platform>,
    registry: Arc<CallbackRegistry>,
    sink: EventSink,
    watcher: Option<DeviceWatcher>,
    dispatcher: EventDispatcher,
}

impl Recorder {
    /// A recorder on the platform's native devices with default tunables.
    pub fn new() -> RecorderResult<Self> {
        Self::with_platform(default_platform(), EngineConfig::default())
    }

    /// A recorder on `platform`.
    ///
    /// Starts the callback dispatcher and the device watcher; the watcher
    /// runs for the lifetime of the recorder, independent of sessions.
    #[instrument(name = "recorder_new", skip_all, fields(platform = platform.name()))]
    pub fn with_platform(platform: Arc<dyn Platform>, config: EngineConfig) -> RecorderResult<Self> {
        let registry = Arc::new(CallbackRegistry::new());
        let dispatcher = EventDispatcher::start(Arc::clone(&registry))?;
        let sink = dispatcher.sink();

        let watcher = match DeviceWatcher::start(
            Arc::clone(&platform),
            sink.clone(),
            Duration::from_millis(config.watcher_poll_interval_ms.max(1)),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Device watcher unavailable");
                None
            }
        };

        let controller =
            SessionController::new(Arc::clone(&platform), config, Arc::clone(&registry), sink.clone());

        info!("Recorder ready");
        Ok(Self {
            controller,
            platform,
            registry,
            sink,
            watcher,
            dispatcher,
        })
    }

    /// The underlying controller, for callers that want typed errors.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    fn list(&self, kind: DeviceKind) -> Vec<Device> {
        match self.platform.list_devices(kind) {
            Ok(devices) => devices,
            Err(e) => {
                warn!(kind = kind.name(), error = %e, "Enumeration failed");
                Vec::new()
            }
        }
    }

    /// Speakers available for loopback capture.
    pub fn get_speakers(&self) -> Vec<Device> {
        self.list(DeviceKind::Speaker)
    }

    pub fn get_mics(&self) -> Vec<Device> {
        self.list(DeviceKind::Mic)
    }

    pub fn get_cameras(&self) -> Vec<Device> {
        self.list(DeviceKind::Camera)
    }

    pub fn set_duration_callback(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        self.registry.set_duration(Arc::new(callback));
    }

    pub fn set_device_change_callback(
        &self,
        callback: impl Fn(DeviceKind) + Send + Sync + 'static,
    ) {
        self.registry.set_device_change(Arc::new(callback));
    }

    pub fn set_error_callback(&self, callback: impl Fn(i32) + Send + Sync + 'static) {
        self.registry.set_error(Arc::new(callback));
    }

    /// Register the preview consumer. The image borrows the frame and is
    /// only valid during the call.
    pub fn set_preview_image_callback(
        &self,
        callback: impl for<'a> Fn(&PreviewImage<'a>) + Send + Sync + 'static,
    ) {
        self.registry.set_preview(Arc::new(callback));
    }

    /// Configure a session. Returns 0 on success or an error code; a
    /// failure leaves the recorder unchanged.
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
    ) -> i32 {
        match self
            .controller
            .init(qb, fps, output, speaker_name, speaker_id, mic_name, mic_id)
        {
            Ok(()) => 0,
            Err(e) => {
                warn!(error = %e, "Init rejected");
                e.code().as_i32()
            }
        }
    }

    /// Log and drop a lifecycle failure. Failures other than a wrong state
    /// go to the error callback.
    fn report(&self, operation: &'static str, result: RecorderResult<()>) {
        match result {
            Ok(()) => {}
            Err(e @ RecorderError::InvalidState { .. }) => {
                debug!(operation, error = %e, "Ignored");
            }
            Err(e) => {
                warn!(operation, error = %e, "Lifecycle call failed");
                self.sink.emit(RecorderEvent::Error(e.code()));
            }
        }
    }

    pub fn start(&self) {
        self.report("start", self.controller.start());
    }

    pub fn stop(&self) {
        self.report("stop", self.controller.stop());
    }

    pub fn pause(&self) {
        self.report("pause", self.controller.pause());
    }

    pub fn resume(&self) {
        self.report("resume", self.controller.resume());
    }

    /// Block until the recording reaches `timestamp_ms`; see
    /// [`SessionController::wait`].
    pub fn wait(&self, timestamp_ms: u64) -> u64 {
        self.controller.wait(timestamp_ms)
    }

    /// End the session and forget every callback.
    pub fn release(&self) {
        self.controller.release();
    }

    pub fn state(&self) -> RecorderState {
        self.controller.state()
    }

    pub fn duration(&self) -> Duration {
        self.controller.duration()
    }

    pub fn stats(&self) -> RecordingStats {
        self.controller.stats()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.controller.release();
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.dispatcher.stop();
        debug!("Recorder dropped");
    }
}
