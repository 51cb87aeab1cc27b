//! Session controller and host boundary for the recorder.
//!
//! This crate ties device enumeration, capture, mixing, synchronization and
//! muxing together behind a single recording session. Rust callers drive a
//! [`SessionController`]; hosts use the [`Recorder`] façade, which reports
//! failures as numeric codes and delivers events through callbacks.

mod clock;
mod dispatch;
mod error;
mod guard;
mod metrics;
mod pipeline;
mod platform;
mod recorder;
mod session;
mod sync;
mod wait;
mod watcher;

pub use clock::SessionClock;
pub use dispatch::{
    CallbackRegistry, DeviceChangeCallback, DurationCallback, ErrorCallback, EventDispatcher,
    EventSink, PreviewCallback, PreviewImage,
};
pub use error::RecorderError;
pub use guard::SessionLease;
pub use metrics::SessionMetrics;
#[cfg(windows)]
pub use platform::WindowsPlatform;
pub use platform::{default_platform, Platform, VirtualKind, VirtualPlatform};
pub use recorder::Recorder;
pub use session::SessionController;
pub use sync::{SyncConfig, SyncStats, Synchronizer};
pub use wait::WaitQueue;
pub use watcher::DeviceWatcher;

pub use recorder_ipc::{
    Device, DeviceKind, DeviceSelection, EngineConfig, ErrorCode, RecorderSettings,
    RecorderState, RecordingStats,
};

/// Result type for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;
