//! Video capture sources.
//!
//! Sources push NV12 frames into a bounded channel and optionally copy each
//! frame into a [`PreviewTap`]. On Windows, attached displays are captured
//! with Windows Graphics Capture; [`TestPatternCamera`] works everywhere.

mod convert;
mod error;
mod frame;
mod pattern;
mod preview;
#[cfg(windows)]
mod wgc;

pub use convert::{bgra_to_nv12, nv12_to_rgb};
pub use error::CaptureError;
pub use frame::VideoFrame;
pub use pattern::TestPatternCamera;
pub use preview::PreviewTap;
#[cfg(windows)]
pub use wgc::monitor::{enumerate_monitors, MonitorInfo};
#[cfg(windows)]
pub use wgc::session::DisplaySource;

use crossbeam_channel::Receiver;
use recorder_ipc::QueueConfig;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Trait for video sources.
pub trait VideoSource: Send {
    /// Start capturing frames, copying each one into `preview` if given.
    fn start(
        &mut self,
        queue: QueueConfig,
        preview: Option<PreviewTap>,
    ) -> CaptureResult<Receiver<VideoFrame>>;

    /// Stop capturing.
    fn stop(&mut self) -> CaptureResult<()>;

    /// Check if capture is active.
    fn is_active(&self) -> bool;

    /// Get the source dimensions.
    fn dimensions(&self) -> (u32, u32);
}
