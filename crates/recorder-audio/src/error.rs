//! Error types for the audio module.

use thiserror::Error;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Audio device not found.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Device lost during capture.
    #[error("Audio device lost: {0}")]
    DeviceLost(String),

    /// Device enumeration failed.
    #[error("Audio device enumeration failed: {0}")]
    EnumerationFailed(String),

    /// Capture already started.
    #[error("Audio capture already started")]
    AlreadyStarted,

    /// No endpoint was given to the capture.
    #[error("No audio endpoint selected")]
    NoEndpoints,
}

#[cfg(windows)]
impl From<windows::core::Error> for AudioError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
