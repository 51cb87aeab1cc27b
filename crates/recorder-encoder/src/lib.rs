//! Video/audio encoding and AVI muxing.
//!
//! The [`Muxer`] consumes the ordered session timeline, enforces the target
//! frame rate, encodes video (Motion JPEG, or H.264 with the `x264`
//! feature) and 16-bit PCM audio, and writes an interleaved AVI file that
//! stays readable if the process stops mid-recording.

mod avi;
mod cadence;
mod error;
mod mjpeg;
mod muxer;
mod pcm;
mod timeline;
#[cfg(feature = "x264")]
mod x264;

pub use avi::probe::{probe, AviSummary, StreamKind, StreamSummary};
pub use cadence::{CadenceSlot, FrameCadence};
pub use error::EncoderError;
pub use mjpeg::MjpegEncoder;
pub use muxer::{MuxStats, Muxer, MuxerConfig};
pub use pcm::PcmEncoder;
pub use timeline::TimelineEvent;
#[cfg(feature = "x264")]
pub use x264::X264Encoder;

use bytes::Bytes;
use recorder_capture::VideoFrame;
use recorder_ipc::VideoCodec;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// An encoded video packet.
#[derive(Debug, Clone)]
pub struct EncodedVideoPacket {
    /// Compressed frame data.
    pub data: Bytes,

    /// Whether this packet can be decoded on its own.
    pub is_keyframe: bool,
}

/// Trait for video encoders.
pub trait VideoEncoder: Send {
    /// Encode one NV12 frame. `None` means the encoder buffered the frame.
    fn encode(&mut self, frame: &VideoFrame) -> EncoderResult<Option<EncodedVideoPacket>>;

    /// FourCC written as the stream handler and bitmap compression.
    fn fourcc(&self) -> [u8; 4];

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Trait for audio encoders.
pub trait AudioEncoder: Send {
    /// Encode interleaved samples.
    fn encode(&mut self, samples: &[f32]) -> EncoderResult<Bytes>;

    /// Bytes per sample frame of the encoded output.
    fn block_align(&self) -> u16;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Create the video encoder for `codec`.
pub fn create_video_encoder(
    codec: VideoCodec,
    width: u32,
    height: u32,
    fps: u32,
    qb: u32,
) -> EncoderResult<Box<dyn VideoEncoder>> {
    match codec {
        VideoCodec::Mjpeg => Ok(Box::new(MjpegEncoder::new(width, height, qb)?)),
        #[cfg(feature = "x264")]
        VideoCodec::H264 => Ok(Box::new(X264Encoder::new(width, height, fps, qb)?)),
        #[cfg(not(feature = "x264"))]
        VideoCodec::H264 => {
            let _ = fps;
            Err(EncoderError::NotSupported(
                "H.264 requires the x264 feature".into(),
            ))
        }
    }
}
