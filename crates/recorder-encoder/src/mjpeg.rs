//! Motion JPEG video encoder.

use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder};
use recorder_capture::{nv12_to_rgb, VideoFrame};
use recorder_ipc::PixelFormat;
use tracing::{debug, trace};

use crate::error::EncoderError;
use crate::{EncodedVideoPacket, EncoderResult, VideoEncoder};

/// Encodes each frame as a baseline JPEG.
///
/// Re-encoding a held frame is skipped: the last packet is reused while the
/// frame sequence number is unchanged.
pub struct MjpegEncoder {
    width: u16,
    height: u16,
    quality: u8,
    last: Option<(u64, Bytes)>,
}

impl MjpegEncoder {
    /// Create an encoder; `qb` (0 - 100) maps to JPEG quality 1 - 100.
    pub fn new(width: u32, height: u32, qb: u32) -> EncoderResult<Self> {
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(EncoderError::Initialization(format!(
                "{width}x{height} exceeds the JPEG size limit"
            )));
        };
        let quality = quality_for(qb);
        debug!(width, height, quality, "Initializing MJPEG encoder");
        Ok(Self {
            width: w,
            height: h,
            quality,
            last: None,
        })
    }

    /// JPEG quality in use.
    pub fn quality(&self) -> u8 {
        self.quality
    }
}

/// Map the 0 - 100 quality level onto JPEG quality 1 - 100.
pub(crate) fn quality_for(qb: u32) -> u8 {
    (1 + qb.min(100) * 99 / 100) as u8
}

impl VideoEncoder for MjpegEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> EncoderResult<Option<EncodedVideoPacket>> {
        if let Some((sequence, data)) = &self.last {
            if *sequence == frame.sequence {
                trace!(sequence, "Reusing encoded frame");
                return Ok(Some(EncodedVideoPacket {
                    data: data.clone(),
                    is_keyframe: true,
                }));
            }
        }

        if frame.format != PixelFormat::Nv12
            || frame.width != self.width as u32
            || frame.height != self.height as u32
            || !frame.is_valid()
        {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {}x{} NV12, got {}x{} {:?} ({} bytes)",
                self.width,
                self.height,
                frame.width,
                frame.height,
                frame.format,
                frame.data.len()
            )));
        }

        let rgb = nv12_to_rgb(&frame.data, frame.width, frame.height);
        let mut jpeg = Vec::new();
        Encoder::new(&mut jpeg, self.quality)
            .encode(&rgb, self.width, self.height, ColorType::Rgb)
            .map_err(|e| EncoderError::Encoding(format!("JPEG encode failed: {e}")))?;

        let data = Bytes::from(jpeg);
        self.last = Some((frame.sequence, data.clone()));
        Ok(Some(EncodedVideoPacket {
            data,
            is_keyframe: true,
        }))
    }

    fn fourcc(&self) -> [u8; 4] {
        *b"MJPG"
    }

    fn name(&self) -> &'static str {
        "mjpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn gray_frame(sequence: u64) -> VideoFrame {
        VideoFrame {
            data: Bytes::from(vec![128u8; 16 * 8 * 3 / 2]),
            width: 16,
            height: 8,
            format: PixelFormat::Nv12,
            captured_at: Instant::now(),
            sequence,
        }
    }

    #[test]
    fn quality_mapping_covers_range() {
        assert_eq!(quality_for(0), 1);
        assert_eq!(quality_for(50), 50);
        assert_eq!(quality_for(100), 100);
        assert_eq!(quality_for(500), 100);
    }

    #[test]
    fn produces_jpeg_and_reuses_held_frames() {
        let mut encoder = MjpegEncoder::new(16, 8, 60).unwrap();
        let first = encoder.encode(&gray_frame(1)).unwrap().unwrap();
        assert_eq!(&first.data[..2], &[0xFF, 0xD8]);
        assert!(first.is_keyframe);

        let again = encoder.encode(&gray_frame(1)).unwrap().unwrap();
        assert_eq!(first.data.as_ptr(), again.data.as_ptr());
    }

    #[test]
    fn rejects_mismatched_frames() {
        let mut encoder = MjpegEncoder::new(32, 8, 60).unwrap();
        assert!(matches!(
            encoder.encode(&gray_frame(1)),
            Err(EncoderError::InvalidInput(_))
        ));
    }
}
