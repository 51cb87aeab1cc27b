//! Host callback registry and the threads that invoke it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use recorder_capture::VideoFrame;
use recorder_ipc::{event_channel, DeviceKind, RecorderEvent};
use tracing::{debug, instrument, trace, warn};

use crate::error::RecorderError;
use crate::RecorderResult;

/// How long a critical event may wait for room in the event queue.
const CRITICAL_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval of the dispatcher threads for the stop flag.
const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// A borrowed preview frame handed to the preview callback.
///
/// The data is only valid for the duration of the call; copy it to keep it.
#[derive(Debug, Clone, Copy)]
pub struct PreviewImage<'a> {
    pub data: &'a [u8],
    pub size: usize,
    pub width: u32,
    pub height: u32,

    /// Pixel format code: 0 = NV12, 1 = BGRA.
    pub format: u32,
}

impl<'a> PreviewImage<'a> {
    pub fn from_frame(frame: &'a VideoFrame) -> Self {
        Self {
            data: &frame.data,
            size: frame.data.len(),
            width: frame.width,
            height: frame.height,
            format: frame.format.code(),
        }
    }
}

pub type DurationCallback = Arc<dyn Fn(u64) + Send + Sync>;
pub type DeviceChangeCallback = Arc<dyn Fn(DeviceKind) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(i32) + Send + Sync>;
pub type PreviewCallback = Arc<dyn for<'a> Fn(&PreviewImage<'a>) + Send + Sync>;

/// Callbacks registered by the host.
///
/// Callbacks are cloned out under the read lock and invoked after it is
/// released, so a callback may re-register callbacks without deadlocking.
#[derive(Default)]
pub struct CallbackRegistry {
    duration: RwLock<Option<DurationCallback>>,
    device_change: RwLock<Option<DeviceChangeCallback>>,
    error: RwLock<Option<ErrorCallback>>,
    preview: RwLock<Option<PreviewCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&self, callback: DurationCallback) {
        *self.duration.write() = Some(callback);
    }

    pub fn set_device_change(&self, callback: DeviceChangeCallback) {
        *self.device_change.write() = Some(callback);
    }

    pub fn set_error(&self, callback: ErrorCallback) {
        *self.error.write() = Some(callback);
    }

    pub fn set_preview(&self, callback: PreviewCallback) {
        *self.preview.write() = Some(callback);
    }

    /// Forget every callback.
    pub fn clear(&self) {
        *self.duration.write() = None;
        *self.device_change.write() = None;
        *self.error.write() = None;
        *self.preview.write() = None;
    }

    /// Whether a preview callback is registered.
    pub fn has_preview(&self) -> bool {
        self.preview.read().is_some()
    }

    /// Invoke the callback matching `event`, if registered.
    pub fn deliver(&self, event: RecorderEvent) {
        match event {
            RecorderEvent::Duration(ms) => {
                let callback = self.duration.read().clone();
                if let Some(callback) = callback {
                    callback(ms);
                }
            }
            RecorderEvent::DeviceChanged(kind) => {
                let callback = self.device_change.read().clone();
                if let Some(callback) = callback {
                    callback(kind);
                }
            }
            RecorderEvent::Error(code) => {
                let callback = self.error.read().clone();
                if let Some(callback) = callback {
                    callback(code.as_i32());
                }
            }
        }
    }

    /// Invoke the preview callback with a borrowed frame.
    pub fn deliver_preview(&self, frame: &VideoFrame) {
        let callback = self.preview.read().clone();
        if let Some(callback) = callback {
            callback(&PreviewImage::from_frame(frame));
        }
    }
}

/// Cloneable sending side of the event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<RecorderEvent>,
}

impl EventSink {
    pub(crate) fn new(sender: Sender<RecorderEvent>) -> Self {
        Self { sender }
    }

    /// Queue an event for the dispatcher.
    ///
    /// Duration ticks are dropped when the queue is full; device changes
    /// and errors wait briefly for room.
    pub fn emit(&self, event: RecorderEvent) {
        if event.is_critical() {
            if let Err(e) = self.sender.send_timeout(event, CRITICAL_SEND_TIMEOUT) {
                warn!(?event, error = %e, "Failed to queue event");
            }
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(?event, "Event queue full, tick dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Thread that drains the event queue into the host callbacks.
pub struct EventDispatcher {
    sink: EventSink,
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawn the dispatcher thread.
    #[instrument(name = "event_dispatcher_start", skip(registry))]
    pub fn start(registry: Arc<CallbackRegistry>) -> RecorderResult<Self> {
        let (sender, receiver) = event_channel();
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&should_stop);

        let handle = thread::Builder::new()
            .name("recorder-dispatch".into())
            .spawn(move || dispatch_loop(receiver, registry, stop))
            .map_err(|e| RecorderError::Internal(format!("dispatcher thread: {e}")))?;

        Ok(Self {
            sink: EventSink { sender },
            should_stop,
            handle: Some(handle),
        })
    }

    /// A handle for producing events.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Deliver what is queued, then stop the thread.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(
    receiver: Receiver<RecorderEvent>,
    registry: Arc<CallbackRegistry>,
    should_stop: Arc<AtomicBool>,
) {
    debug!("Event dispatcher running");
    loop {
        match receiver.recv_timeout(DISPATCH_POLL) {
            Ok(event) => {
                trace!(?event, "Dispatching event");
                registry.deliver(event);
            }
            Err(RecvTimeoutError::Timeout) => {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Event dispatcher stopped");
}

/// Thread forwarding preview frames to the preview callback.
pub struct PreviewForwarder {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PreviewForwarder {
    /// Spawn a forwarder for frames arriving on `frames`.
    ///
    /// The thread ends when the source drops its preview tap or on
    /// [`stop`](PreviewForwarder::stop).
    pub fn start(
        frames: Receiver<VideoFrame>,
        registry: Arc<CallbackRegistry>,
    ) -> RecorderResult<Self> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&should_stop);
        let handle = thread::Builder::new()
            .name("recorder-preview".into())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match frames.recv_timeout(DISPATCH_POLL) {
                        Ok(frame) => registry.deliver_preview(&frame),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("Preview forwarder exiting");
            })
            .map_err(|e| RecorderError::Internal(format!("preview thread: {e}")))?;

        Ok(Self {
            should_stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PreviewForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}
