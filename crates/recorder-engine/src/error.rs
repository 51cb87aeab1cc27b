//! Error types for the recorder engine.

use recorder_audio::AudioError;
use recorder_capture::CaptureError;
use recorder_encoder::EncoderError;
use recorder_ipc::{ErrorCode, RecorderState};
use thiserror::Error;

/// Errors surfaced by the session controller and the host boundary.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Quality level outside 0 - 100.
    #[error("Quality {0} is outside 0-100")]
    InvalidQuality(u32),

    /// Frame rate outside 10 - 30.
    #[error("Frame rate {0} is outside 10-30")]
    InvalidFrameRate(u32),

    /// Output path is empty or its directory is missing.
    #[error("Invalid output path: {0}")]
    InvalidOutputPath(String),

    /// A selected device does not resolve.
    #[error("{kind} not found: {selection}")]
    DeviceNotFound {
        kind: &'static str,
        code: ErrorCode,
        selection: String,
    },

    /// Neither audio nor video was selected.
    #[error("No capture source selected")]
    NoCaptureSource,

    /// Another session holds the lease.
    #[error("Another recording session is active")]
    SessionBusy,

    /// Lifecycle call made in the wrong state.
    #[error("{operation} is not valid in state {}", state.name())]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    /// The OS device query failed.
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    /// A device could not be opened or disappeared.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Encoding or writing the output failed.
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncoderError),

    /// Internal failure (thread spawn and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecorderError {
    /// Numeric code reported to the host.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidQuality(_) => ErrorCode::InvalidQuality,
            Self::InvalidFrameRate(_) => ErrorCode::InvalidFrameRate,
            Self::InvalidOutputPath(_) => ErrorCode::InvalidOutputPath,
            Self::DeviceNotFound { code, .. } => *code,
            Self::NoCaptureSource => ErrorCode::NoCaptureSource,
            Self::SessionBusy => ErrorCode::SessionBusy,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Enumeration(_) => ErrorCode::EnumerationFailed,
            Self::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
            Self::Encode(EncoderError::InvalidPath { .. }) => ErrorCode::InvalidOutputPath,
            Self::Encode(_) => ErrorCode::EncodeFailed,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<AudioError> for RecorderError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::EnumerationFailed(message) => Self::Enumeration(message),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<CaptureError> for RecorderError {
    fn from(err: CaptureError) -> Self {
        Self::DeviceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_host_table() {
        assert_eq!(RecorderError::InvalidQuality(150).code().as_i32(), 1);
        assert_eq!(RecorderError::InvalidFrameRate(5).code().as_i32(), 2);
        assert_eq!(RecorderError::SessionBusy.code().as_i32(), 8);
        assert_eq!(
            RecorderError::from(AudioError::DeviceLost("mic".into())).code(),
            ErrorCode::DeviceUnavailable
        );
        assert_eq!(
            RecorderError::from(EncoderError::ContainerFull(0)).code(),
            ErrorCode::EncodeFailed
        );
    }
}
