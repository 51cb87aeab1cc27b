//! Captured frame types.

use std::time::Instant;

use bytes::Bytes;
use recorder_ipc::PixelFormat;

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Pixel data; cloning shares the buffer.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Pixel layout of `data`.
    pub format: PixelFormat,

    /// Monotonic instant the frame was captured.
    pub captured_at: Instant,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl VideoFrame {
    /// Validate that the frame data matches its dimensions and format.
    pub fn is_valid(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }
}
