//! Units of the synchronized session timeline.

use std::time::Duration;

use recorder_capture::VideoFrame;

/// A timestamped unit on the session timeline.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    /// Interleaved 48 kHz stereo samples starting at `pts`.
    Audio { pts: Duration, samples: Vec<f32> },

    /// A frame presented at `pts`; `held` marks a duplicate of the previous frame.
    Video {
        pts: Duration,
        frame: VideoFrame,
        held: bool,
    },
}

impl TimelineEvent {
    /// Session-relative presentation time.
    pub fn pts(&self) -> Duration {
        match self {
            Self::Audio { pts, .. } | Self::Video { pts, .. } => *pts,
        }
    }

    /// Whether this is a video event.
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }
}
