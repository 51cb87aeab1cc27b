//! Common types shared by the engine and the host boundary.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Accepted quality levels (0 = lowest, 100 = highest).
pub const QUALITY_RANGE: RangeInclusive<u32> = 0..=100;

/// Accepted target frame rates.
pub const FPS_RANGE: RangeInclusive<u32> = 10..=30;

/// Sample rate of mixed audio and of the output's audio track.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channels of mixed audio and of the output's audio track.
pub const CHANNELS: u16 = 2;

/// Kind of capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Video input (camera or display).
    Camera,

    /// Output device, captured through loopback.
    Speaker,

    /// Input device.
    Mic,
}

impl DeviceKind {
    /// All kinds, in device-change code order.
    pub const ALL: [DeviceKind; 3] = [Self::Camera, Self::Speaker, Self::Mic];

    /// Code reported to the device-change callback (video 0, speaker 1, mic 2).
    pub fn change_code(self) -> u32 {
        match self {
            Self::Camera => 0,
            Self::Speaker => 1,
            Self::Mic => 2,
        }
    }

    /// Returns the display name for this kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Speaker => "speaker",
            Self::Mic => "mic",
        }
    }
}

/// An enumerated capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque identifier, stable across enumerations.
    pub id: String,

    /// Display name for the UI.
    pub name: String,

    /// Whether this is the OS default device for its kind.
    pub is_default: bool,

    /// Kind of device.
    pub kind: DeviceKind,
}

/// Role of an audio endpoint within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioRole {
    /// System audio captured from an output device.
    Speaker,

    /// Microphone input.
    Mic,
}

impl AudioRole {
    /// The device kind backing this role.
    pub fn kind(self) -> DeviceKind {
        match self {
            Self::Speaker => DeviceKind::Speaker,
            Self::Mic => DeviceKind::Mic,
        }
    }
}

/// How speaker and microphone are combined when both are selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixPolicy {
    /// Sample-wise sum, clipped to [-1.0, 1.0].
    #[default]
    Sum,

    /// Pass the given role through; the other fills in while it underruns.
    Priority(AudioRole),
}

/// What a producer does when its bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued unit to make room.
    #[default]
    DropOldest,

    /// Discard the unit that could not be queued.
    DropNewest,

    /// Wait for room, giving up when the producer is stopped.
    Block,
}

/// Video codec used by the muxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// Motion JPEG; `qb` maps to the JPEG quality.
    #[default]
    Mjpeg,

    /// H.264 through x264; `qb` maps to the bitrate.
    H264,
}

/// Pixel layout of raw frames and preview images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y plane followed by interleaved UV plane.
    Nv12,

    /// 8-bit BGRA.
    Bgra,
}

impl PixelFormat {
    /// Code reported as the preview image `type`.
    pub fn code(self) -> u32 {
        match self {
            Self::Nv12 => 0,
            Self::Bgra => 1,
        }
    }

    /// Expected buffer size for the given dimensions.
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Nv12 => pixels + pixels / 2,
            Self::Bgra => pixels * 4,
        }
    }
}

/// A device chosen by the host, by id or by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelection {
    /// Display name (used when `id` is empty).
    pub name: String,

    /// Device identifier.
    pub id: String,
}

impl DeviceSelection {
    /// Create a selection from a name and an id.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Select a device by id only.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new(String::new(), id)
    }

    /// True when neither a name nor an id was given.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.id.is_empty()
    }

    /// Returns true if the device matches this selection.
    pub fn matches(&self, device: &Device) -> bool {
        if !self.id.is_empty() {
            device.id == self.id
        } else {
            !self.name.is_empty() && device.name == self.name
        }
    }
}

/// Parameters of a recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Quality level (0 - 100).
    pub qb: u32,

    /// Target frame rate (10 - 30).
    pub fps: u32,

    /// Output file path.
    pub output: PathBuf,

    /// Speaker to capture through loopback.
    pub speaker: DeviceSelection,

    /// Microphone to capture.
    pub mic: DeviceSelection,

    /// Video device; `None` picks the default video device if any.
    pub camera: Option<DeviceSelection>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            qb: 60,
            fps: 20,
            output: PathBuf::from("recording.avi"),
            speaker: DeviceSelection::default(),
            mic: DeviceSelection::default(),
            camera: None,
        }
    }
}

/// Tunables of the capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rule for combining speaker and microphone.
    pub mix_policy: MixPolicy,

    /// Producer behavior when a capture queue is full.
    pub backpressure: BackpressurePolicy,

    /// Capacity of each capture queue, in units.
    pub capture_queue_capacity: usize,

    /// Interval between duration callbacks while recording.
    pub duration_interval_ms: u64,

    /// Interval between device list polls.
    pub watcher_poll_interval_ms: u64,

    /// How far the timeline may lag the session clock before gaps are filled.
    pub max_latency_ms: u64,

    /// Audio timing error tolerated before silence or trimming is applied.
    pub drift_tolerance_ms: u64,

    /// Codec for the video track.
    pub video_codec: VideoCodec,

    /// Forward frames to the preview callback.
    pub preview: bool,

    /// Largest output file allowed; writing past it fails the session.
    pub max_output_bytes: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mix_policy: MixPolicy::Sum,
            backpressure: BackpressurePolicy::DropOldest,
            capture_queue_capacity: 32,
            duration_interval_ms: 1000,
            watcher_poll_interval_ms: 500,
            max_latency_ms: 200,
            drift_tolerance_ms: 20,
            video_codec: VideoCodec::Mjpeg,
            preview: true,
            max_output_bytes: None,
        }
    }
}

impl EngineConfig {
    /// Queue shape applied to every capture channel.
    pub fn queue(&self) -> crate::QueueConfig {
        crate::QueueConfig {
            capacity: self.capture_queue_capacity,
            policy: self.backpressure,
        }
    }
}

/// Counters collected over a recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Video frames received from the source.
    pub frames_captured: u64,

    /// Frames duplicated to fill timing gaps.
    pub frames_held: u64,

    /// Frames discarded (paused, late or over the target rate).
    pub frames_dropped: u64,

    /// Audio chunks received from the mixer.
    pub audio_chunks: u64,

    /// Audio chunks discarded (paused or entirely late).
    pub audio_chunks_dropped: u64,

    /// Silence inserted to cover audio underruns, in milliseconds.
    pub silence_inserted_ms: u64,

    /// Video frames written to the container.
    pub frames_written: u64,

    /// Bytes written to the container.
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: &str) -> Device {
        Device {
            id: id.into(),
            name: name.into(),
            is_default: false,
            kind: DeviceKind::Mic,
        }
    }

    #[test]
    fn selection_prefers_id_over_name() {
        let selection = DeviceSelection::new("Headset", "mic-2");
        assert!(selection.matches(&device("mic-2", "Other")));
        assert!(!selection.matches(&device("mic-1", "Headset")));
    }

    #[test]
    fn selection_falls_back_to_name() {
        let selection = DeviceSelection::new("Headset", "");
        assert!(selection.matches(&device("mic-1", "Headset")));
        assert!(!DeviceSelection::default().matches(&device("", "")));
    }

    #[test]
    fn change_codes_match_host_contract() {
        assert_eq!(DeviceKind::Camera.change_code(), 0);
        assert_eq!(DeviceKind::Speaker.change_code(), 1);
        assert_eq!(DeviceKind::Mic.change_code(), 2);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "backpressure": "Block", "preview": false }"#).unwrap();
        assert_eq!(config.backpressure, BackpressurePolicy::Block);
        assert!(!config.preview);
        assert_eq!(config.duration_interval_ms, 1000);
        assert_eq!(config.mix_policy, MixPolicy::Sum);
        assert_eq!(config.max_output_bytes, None);

        let limited: EngineConfig =
            serde_json::from_str(r#"{ "max_output_bytes": 65536 }"#).unwrap();
        assert_eq!(limited.max_output_bytes, Some(65536));
    }

    #[test]
    fn nv12_buffer_size() {
        assert_eq!(PixelFormat::Nv12.buffer_size(4, 2), 12);
        assert_eq!(PixelFormat::Bgra.buffer_size(4, 2), 32);
    }
}
