//! AVI (RIFF) container.
//!
//! Layout written by [`AviWriter`]:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     'avih'                      main header
//!     LIST 'strl' 'strh' 'strf'   one per stream
//!   LIST 'movi'
//!     '00dc' | '01wb' ...         interleaved chunks
//!   'idx1'                        written on finalize
//! ```

pub mod probe;
mod writer;

pub(crate) use writer::{AudioTrack, AviWriter, VideoTrack};

/// `avih` flag: the file carries an `idx1` index.
pub(crate) const AVIF_HASINDEX: u32 = 0x10;

/// `avih` flag: chunks are interleaved.
pub(crate) const AVIF_ISINTERLEAVED: u32 = 0x100;

/// `idx1` flag: the chunk is a keyframe.
pub(crate) const AVIIF_KEYFRAME: u32 = 0x10;

/// Size of the main AVI header.
pub(crate) const AVIH_SIZE: u32 = 56;

/// Size of a stream header.
pub(crate) const STRH_SIZE: u32 = 56;

/// Size of a `BITMAPINFOHEADER`.
pub(crate) const BITMAPINFO_SIZE: u32 = 40;

/// Size of a `WAVEFORMATEX` without extra bytes.
pub(crate) const WAVEFORMAT_SIZE: u32 = 18;

/// Chunk id for stream `index` with a two-letter type suffix.
pub(crate) fn chunk_id(index: usize, suffix: &[u8; 2]) -> [u8; 4] {
    let digits = format!("{:02}", index % 100);
    let digits = digits.as_bytes();
    [digits[0], digits[1], suffix[0], suffix[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_follow_stream_order() {
        assert_eq!(&chunk_id(0, b"dc"), b"00dc");
        assert_eq!(&chunk_id(1, b"wb"), b"01wb");
    }
}
