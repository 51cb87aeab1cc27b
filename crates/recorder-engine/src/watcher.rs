//! Background device-change monitor.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use recorder_ipc::{DeviceKind, RecorderEvent};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::EventSink;
use crate::error::RecorderError;
use crate::platform::Platform;
use crate::RecorderResult;

/// Ids and default flags of one device kind.
type Snapshot = BTreeSet<(String, bool)>;

fn snapshot(platform: &dyn Platform, kind: DeviceKind) -> Option<Snapshot> {
    match platform.list_devices(kind) {
        Ok(devices) => Some(devices.into_iter().map(|d| (d.id, d.is_default)).collect()),
        Err(e) => {
            warn!(kind = kind.name(), error = %e, "Device poll failed");
            None
        }
    }
}

/// Polls the platform and reports device set changes.
///
/// One `DeviceChanged` event is raised per kind whose set of ids or default
/// flags differs from the previous poll. The watcher runs independently of
/// any recording session.
pub struct DeviceWatcher {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Take a baseline snapshot and start polling every `interval`.
    #[instrument(name = "device_watcher_start", skip(platform, sink))]
    pub fn start(
        platform: Arc<dyn Platform>,
        sink: EventSink,
        interval: Duration,
    ) -> RecorderResult<Self> {
        let mut previous: Vec<(DeviceKind, Option<Snapshot>)> = DeviceKind::ALL
            .iter()
            .map(|&kind| (kind, snapshot(platform.as_ref(), kind)))
            .collect();
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("recorder-watcher".into())
            .spawn(move || {
                debug!(platform = platform.name(), "Device watcher running");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    for (kind, last) in previous.iter_mut() {
                        let Some(current) = snapshot(platform.as_ref(), *kind) else {
                            continue;
                        };
                        let changed = last.as_ref().is_some_and(|l| *l != current);
                        if changed {
                            info!(kind = kind.name(), "Device set changed");
                            sink.emit(RecorderEvent::DeviceChanged(*kind));
                        }
                        *last = Some(current);
                    }
                }
                debug!("Device watcher stopped");
            })
            .map_err(|e| RecorderError::Internal(format!("watcher thread: {e}")))?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop polling and join the thread.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
