//! Audio capture and mixing.
//!
//! Endpoints deliver interleaved 48 kHz stereo `f32` chunks over bounded
//! channels. [`AudioCapture`] combines the speaker loopback and microphone
//! endpoints of a session into a single stream of 10 ms chunks.
//!
//! On Windows the endpoints are backed by WASAPI; [`ToneEndpoint`] is an
//! in-process endpoint available on every platform.

mod endpoint;
mod error;
mod mixer;
mod tone;
#[cfg(windows)]
mod wasapi;

pub use endpoint::{AudioChunk, AudioEndpoint};
pub use error::AudioError;
pub use mixer::{AudioCapture, MixBuffer};
pub use tone::ToneEndpoint;
#[cfg(windows)]
pub use wasapi::{enumerate_audio_devices, find_device_by_id, WasapiEndpoint};

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

pub use recorder_ipc::{CHANNELS, SAMPLE_RATE};

/// Frames per mixed chunk (10ms at 48kHz).
pub const SAMPLES_PER_CHUNK: usize = 480;

/// Duration of `frames` sample frames at [`SAMPLE_RATE`].
pub fn frames_to_duration(frames: usize) -> std::time::Duration {
    std::time::Duration::from_nanos(frames as u64 * 1_000_000_000 / SAMPLE_RATE as u64)
}

/// Number of whole sample frames covering `duration`.
pub fn duration_to_frames(duration: std::time::Duration) -> usize {
    (duration.as_nanos() * SAMPLE_RATE as u128 / 1_000_000_000) as usize
}
