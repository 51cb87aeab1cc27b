//! Session state machine types.

use serde::{Deserialize, Serialize};

/// Numeric status codes crossing the host boundary.
///
/// `Init` returns one of these synchronously; asynchronous failures are
/// delivered through the error callback with the same numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    InvalidQuality = 1,
    InvalidFrameRate = 2,
    InvalidOutputPath = 3,
    SpeakerNotFound = 4,
    MicNotFound = 5,
    CameraNotFound = 6,
    NoCaptureSource = 7,
    SessionBusy = 8,
    InvalidState = 9,
    EnumerationFailed = 10,
    DeviceUnavailable = 11,
    EncodeFailed = 12,
    Internal = 13,
}

impl ErrorCode {
    /// The raw code handed to the host.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns true for the success code.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Short description for logs.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidQuality => "quality out of range",
            Self::InvalidFrameRate => "frame rate out of range",
            Self::InvalidOutputPath => "invalid output path",
            Self::SpeakerNotFound => "speaker not found",
            Self::MicNotFound => "microphone not found",
            Self::CameraNotFound => "camera not found",
            Self::NoCaptureSource => "no capture source selected",
            Self::SessionBusy => "another session is active",
            Self::InvalidState => "operation not valid in current state",
            Self::EnumerationFailed => "device enumeration failed",
            Self::DeviceUnavailable => "device unavailable",
            Self::EncodeFailed => "encoding failed",
            Self::Internal => "internal error",
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

/// The lifecycle state of the recording session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    /// No session has been initialized yet.
    #[default]
    Uninitialized,

    /// Parameters validated and devices resolved; nothing is open.
    Initialized,

    /// Capturing and encoding.
    Recording,

    /// Capture consumption suspended; the duration clock is frozen.
    Paused,

    /// Output finalized and sources closed.
    Stopped,

    /// All resources released.
    Released,

    /// An unrecoverable failure occurred; `Release` is required.
    Error {
        /// Code reported through the error callback.
        code: ErrorCode,
    },
}

impl RecorderState {
    /// Returns true if a new session may be initialized from this state.
    pub fn can_init(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Released)
    }

    /// Returns true while capture is running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }

    /// Returns true if the session is recording.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Returns true if the session is paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true if the session is in the error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initialized => "Initialized",
            Self::Recording => "Recording",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Released => "Released",
            Self::Error { .. } => "Error",
        }
    }
}

/// Startup phases for a recording, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Opening the speaker/microphone endpoints.
    OpenAudio,

    /// Opening the video source.
    OpenVideo,

    /// Creating the output file and encoders.
    OpenMuxer,

    /// Spawning the capture pipeline.
    StartPipeline,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OpenAudio => Some(Self::OpenVideo),
            Self::OpenVideo => Some(Self::OpenMuxer),
            Self::OpenMuxer => Some(Self::StartPipeline),
            Self::StartPipeline => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::OpenAudio => None,
            Self::OpenVideo => Some(Self::OpenAudio),
            Self::OpenMuxer => Some(Self::OpenVideo),
            Self::StartPipeline => Some(Self::OpenMuxer),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAudio => "Opening audio",
            Self::OpenVideo => "Opening video",
            Self::OpenMuxer => "Opening output",
            Self::StartPipeline => "Starting pipeline",
        }
    }
}

/// Reason the capture pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Host requested stop.
    UserRequested,

    /// Session is being released.
    Released,

    /// A capture device disappeared.
    DeviceLost { message: String },

    /// The encoder or output file failed.
    EncoderError { message: String },
}

impl StopReason {
    /// The error code this reason reports, if it is a failure.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::UserRequested | Self::Released => None,
            Self::DeviceLost { .. } => Some(ErrorCode::DeviceUnavailable),
            Self::EncoderError { .. } => Some(ErrorCode::EncodeFailed),
        }
    }

    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Recording stopped by host".to_string(),
            Self::Released => "Recording released".to_string(),
            Self::DeviceLost { message } => format!("Device lost: {message}"),
            Self::EncoderError { message } => format!("Encoder error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_walk_forward_and_back() {
        let mut phase = StartupPhase::OpenAudio;
        let mut forward = vec![phase];
        while let Some(next) = phase.next() {
            forward.push(next);
            phase = next;
        }
        assert_eq!(forward.len(), 4);
        assert_eq!(phase, StartupPhase::StartPipeline);

        let mut back = 0;
        while let Some(prev) = phase.previous() {
            phase = prev;
            back += 1;
        }
        assert_eq!(back, 3);
        assert_eq!(phase, StartupPhase::OpenAudio);
    }

    #[test]
    fn init_allowed_only_from_fresh_or_released() {
        assert!(RecorderState::Uninitialized.can_init());
        assert!(RecorderState::Released.can_init());
        assert!(!RecorderState::Stopped.can_init());
        assert!(!RecorderState::Error {
            code: ErrorCode::DeviceUnavailable
        }
        .can_init());
    }

    #[test]
    fn failure_reasons_carry_codes() {
        assert_eq!(StopReason::UserRequested.error_code(), None);
        assert_eq!(
            StopReason::DeviceLost {
                message: "mic".into()
            }
            .error_code(),
            Some(ErrorCode::DeviceUnavailable)
        );
        assert_eq!(ErrorCode::EncodeFailed.as_i32(), 12);
    }
}
