//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{const_mutex, Mutex, MutexGuard};
use recorder_engine::{EngineConfig, Recorder, VirtualPlatform};
use tempfile::TempDir;

/// The session lease is process-wide, so tests that open sessions take
/// turns.
static SERIAL: Mutex<()> = const_mutex(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Tunables tightened so tests see callbacks and device changes quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        duration_interval_ms: 100,
        watcher_poll_interval_ms: 20,
        max_latency_ms: 60,
        ..EngineConfig::default()
    }
}

pub struct Fixture {
    pub platform: Arc<VirtualPlatform>,
    pub recorder: Recorder,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let platform = Arc::new(VirtualPlatform::with_default_devices());
        let recorder = Recorder::with_platform(platform.clone(), fast_config()).unwrap();
        Self {
            platform,
            recorder,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Init with the default speaker and microphone.
    pub fn init(&self, qb: u32, fps: u32, name: &str) -> i32 {
        let output = self.output(name);
        self.recorder.init(
            qb,
            fps,
            output.to_str().unwrap(),
            "",
            "virtual:speaker",
            "",
            "virtual:mic",
        )
    }
}

/// Absolute difference of two durations.
pub fn distance(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}
