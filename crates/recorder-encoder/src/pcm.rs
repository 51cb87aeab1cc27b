//! 16-bit PCM audio encoder.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{AudioEncoder, EncoderResult};

/// Converts float samples to signed 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    channels: u16,
}

impl PcmEncoder {
    /// Create an encoder for interleaved samples with `channels` channels.
    pub fn new(channels: u16) -> Self {
        Self { channels }
    }

    fn f32_to_i16(sample: f32) -> i16 {
        (sample.clamp(-1.0, 1.0) * 32767.0) as i16
    }
}

impl AudioEncoder for PcmEncoder {
    fn encode(&mut self, samples: &[f32]) -> EncoderResult<Bytes> {
        let mut out = BytesMut::with_capacity(samples.len() * 2);
        for &sample in samples {
            out.put_i16_le(Self::f32_to_i16(sample));
        }
        Ok(out.freeze())
    }

    fn block_align(&self) -> u16 {
        self.channels * 2
    }

    fn name(&self) -> &'static str {
        "pcm_s16le"
    }
}
