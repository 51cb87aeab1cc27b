//! Non-blocking copy of captured frames for live preview.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::trace;

use crate::frame::VideoFrame;

/// Sending side of the preview channel.
///
/// Offering a frame never blocks the capture path; when the preview
/// consumer falls behind, frames are skipped.
#[derive(Debug, Clone)]
pub struct PreviewTap {
    sender: Sender<VideoFrame>,
}

impl PreviewTap {
    /// Create a tap and the receiver its frames arrive on.
    pub fn new(capacity: usize) -> (Self, Receiver<VideoFrame>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Offer a frame to the preview consumer.
    pub fn offer(&self, frame: &VideoFrame) {
        match self.sender.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(sequence = frame.sequence, "Preview skipped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use recorder_ipc::PixelFormat;
    use std::time::Instant;

    #[test]
    fn full_preview_skips_frames() {
        let (tap, rx) = PreviewTap::new(1);
        for sequence in 0..3 {
            tap.offer(&VideoFrame {
                data: Bytes::from_static(&[0; 6]),
                width: 2,
                height: 2,
                format: PixelFormat::Nv12,
                captured_at: Instant::now(),
                sequence,
            });
        }
        assert_eq!(rx.try_iter().map(|f| f.sequence).collect::<Vec<_>>(), vec![0]);
    }
}
