//! x264 software video encoder.

use bytes::Bytes;
use recorder_capture::VideoFrame;
use tracing::{debug, instrument, trace};

use crate::error::EncoderError;
use crate::{EncodedVideoPacket, EncoderResult, VideoEncoder};

/// Keyframe interval in seconds.
const KEYFRAME_INTERVAL_SECS: u32 = 2;

/// Bitrate for the given quality level, resolution and frame rate.
///
/// Bits per pixel scale linearly from 0.02 (qb 0) to 0.20 (qb 100).
pub(crate) fn bitrate_kbps(width: u32, height: u32, fps: u32, qb: u32) -> u32 {
    let bits_per_pixel = 0.02 + 0.18 * qb.min(100) as f64 / 100.0;
    let bps = width as f64 * height as f64 * fps as f64 * bits_per_pixel;
    ((bps / 1000.0) as u32).max(100)
}

/// x264 software encoder wrapper.
pub struct X264Encoder {
    encoder: x264::Encoder,
    width: u32,
    height: u32,
    frame_count: i64,
}

impl X264Encoder {
    /// Create a new x264 encoder.
    #[instrument(name = "x264_new")]
    pub fn new(width: u32, height: u32, fps: u32, qb: u32) -> EncoderResult<Self> {
        let bitrate = bitrate_kbps(width, height, fps, qb);
        debug!(bitrate_kbps = bitrate, "Initializing x264 encoder");

        // Zero latency keeps one packet per input frame.
        let encoder = x264::Setup::preset(x264::Preset::Veryfast, x264::Tune::None, false, true)
            .fps(fps, 1)
            .bitrate(bitrate as i32)
            .max_keyframe_interval((fps * KEYFRAME_INTERVAL_SECS) as i32)
            .scenecut_threshold(0)
            .high()
            .build(x264::Colorspace::NV12, width as i32, height as i32)
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {e:?}")))?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }
}

impl VideoEncoder for X264Encoder {
    fn encode(&mut self, frame: &VideoFrame) -> EncoderResult<Option<EncodedVideoPacket>> {
        if frame.width != self.width || frame.height != self.height || !frame.is_valid() {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {}x{} NV12, got {}x{} ({} bytes)",
                self.width,
                self.height,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let y_size = (self.width * self.height) as usize;
        let stride = self.width as i32;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            self.width as i32,
            self.height as i32,
            &[
                x264::Plane {
                    data: &frame.data[..y_size],
                    stride,
                },
                x264::Plane {
                    data: &frame.data[y_size..],
                    stride,
                },
            ],
        );

        let (data, picture) = self
            .encoder
            .encode(self.frame_count, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {e:?}")))?;
        self.frame_count += 1;

        if data.len() == 0 {
            trace!(frame = self.frame_count, "Frame buffered by encoder");
            return Ok(None);
        }

        Ok(Some(EncodedVideoPacket {
            data: Bytes::from(data.entirety().to_vec()),
            is_keyframe: picture.keyframe(),
        }))
    }

    fn fourcc(&self) -> [u8; 4] {
        *b"H264"
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

// SAFETY: x264::Encoder uses raw pointers internally but is only accessed
// from the pipeline thread.
unsafe impl Send for X264Encoder {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_grows_with_quality() {
        let low = bitrate_kbps(1280, 720, 30, 0);
        let high = bitrate_kbps(1280, 720, 30, 100);
        assert!(low < high);
        assert_eq!(bitrate_kbps(16, 16, 10, 0), 100);
    }
}
