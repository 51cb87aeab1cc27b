//! Typed host<->engine types for the recorder.
//!
//! This crate defines the device, state, error-code and event types shared
//! between the capture crates, the engine and the host boundary.

mod backpressure;
mod events;
mod state;
mod types;

pub use backpressure::{offer, Offer, QueueConfig};
pub use events::RecorderEvent;
pub use state::{ErrorCode, RecorderState, StartupPhase, StopReason};
pub use types::{
    AudioRole, BackpressurePolicy, Device, DeviceKind, DeviceSelection, EngineConfig, MixPolicy,
    PixelFormat, RecorderSettings, RecordingStats, VideoCodec, CHANNELS, FPS_RANGE, QUALITY_RANGE,
    SAMPLE_RATE,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (Engine → host dispatcher).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<RecorderEvent>, Receiver<RecorderEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
