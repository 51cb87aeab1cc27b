//! Read back an AVI file, tolerating truncation.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::EncoderError;
use crate::EncoderResult;

/// Kind of an AVI stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// What the probe found for one stream.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub kind: StreamKind,

    /// Codec FourCC for video, format tag rendered as text for audio.
    pub codec: String,

    /// Chunks found in the `movi` list.
    pub chunks: u64,

    /// Payload bytes across those chunks.
    pub bytes: u64,

    /// Length recorded in the stream header.
    pub header_length: u32,

    pub width: u32,
    pub height: u32,
    pub channels: u16,
    pub sample_rate: u32,

    /// Playable duration from the chunks present.
    pub duration: Duration,

    scale: u32,
    rate: u32,
    block_align: u16,
}

/// Result of [`probe`].
#[derive(Debug, Clone)]
pub struct AviSummary {
    pub file_size: u64,
    pub streams: Vec<StreamSummary>,

    /// An `idx1` index is present.
    pub has_index: bool,

    /// The file ends in the middle of a chunk.
    pub truncated: bool,
}

impl AviSummary {
    /// First stream of the given kind.
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamSummary> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    /// Duration of the longest stream.
    pub fn duration(&self) -> Duration {
        self.streams
            .iter()
            .map(|s| s.duration)
            .max()
            .unwrap_or_default()
    }
}

fn malformed(message: impl Into<String>) -> EncoderError {
    EncoderError::Malformed(message.into())
}

fn u16_at(buf: &[u8], at: usize) -> EncoderResult<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed(format!("header field at {at} out of range")))
}

fn u32_at(buf: &[u8], at: usize) -> EncoderResult<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(format!("header field at {at} out of range")))
}

fn fourcc_at(buf: &[u8], at: usize) -> EncoderResult<[u8; 4]> {
    buf.get(at..at + 4)
        .map(|b| [b[0], b[1], b[2], b[3]])
        .ok_or_else(|| malformed(format!("fourcc at {at} out of range")))
}

/// Iterate `(id, payload)` subchunks of a buffer, stopping at a short tail.
fn subchunks(buf: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut at = 0usize;
    std::iter::from_fn(move || {
        let id = fourcc_at(buf, at).ok()?;
        let size = u32_at(buf, at + 4).ok()? as usize;
        let start = at + 8;
        let end = start.checked_add(size)?.min(buf.len());
        at = start + size + (size & 1);
        Some((id, &buf[start..end]))
    })
}

fn parse_strl(list: &[u8]) -> EncoderResult<StreamSummary> {
    let mut summary = StreamSummary {
        kind: StreamKind::Other,
        codec: String::new(),
        chunks: 0,
        bytes: 0,
        header_length: 0,
        width: 0,
        height: 0,
        channels: 0,
        sample_rate: 0,
        duration: Duration::ZERO,
        scale: 1,
        rate: 1,
        block_align: 1,
    };

    for (id, body) in subchunks(list) {
        match &id {
            b"strh" => {
                summary.kind = match &fourcc_at(body, 0)? {
                    b"vids" => StreamKind::Video,
                    b"auds" => StreamKind::Audio,
                    _ => StreamKind::Other,
                };
                summary.codec = String::from_utf8_lossy(&fourcc_at(body, 4)?).into_owned();
                summary.scale = u32_at(body, 20)?.max(1);
                summary.rate = u32_at(body, 24)?.max(1);
                summary.header_length = u32_at(body, 32)?;
            }
            b"strf" => match summary.kind {
                StreamKind::Video => {
                    summary.width = u32_at(body, 4)?;
                    summary.height = u32_at(body, 8)?;
                    summary.codec = String::from_utf8_lossy(&fourcc_at(body, 16)?).into_owned();
                }
                StreamKind::Audio => {
                    summary.codec = match u16_at(body, 0)? {
                        1 => "pcm".to_string(),
                        tag => format!("0x{tag:04x}"),
                    };
                    summary.channels = u16_at(body, 2)?;
                    summary.sample_rate = u32_at(body, 4)?;
                    summary.block_align = u16_at(body, 12)?.max(1);
                }
                StreamKind::Other => {}
            },
            _ => {}
        }
    }

    Ok(summary)
}

/// Stream number of a `movi` chunk id like `01wb`.
fn stream_number(id: &[u8; 4]) -> Option<usize> {
    if id[0].is_ascii_digit() && id[1].is_ascii_digit() && id[2].is_ascii_alphabetic() {
        Some(((id[0] - b'0') * 10 + (id[1] - b'0')) as usize)
    } else {
        None
    }
}

fn read_header<R: Read>(reader: &mut R) -> std::io::Result<Option<([u8; 4], u32)>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header) {
        Ok(()) => Ok(Some((
            [header[0], header[1], header[2], header[3]],
            u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse an AVI file and report its streams.
///
/// The `movi` list is walked chunk by chunk up to the end of the file, not
/// just its declared size, so data written after the last header
/// checkpoint is still counted. A final partial chunk marks the file
/// truncated.
#[instrument(name = "avi_probe", skip_all, fields(path = %path.display()))]
pub fn probe(path: &Path) -> EncoderResult<AviSummary> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut riff = [0u8; 12];
    reader
        .read_exact(&mut riff)
        .map_err(|_| malformed("file shorter than a RIFF header"))?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"AVI " {
        return Err(malformed("not a RIFF AVI file"));
    }

    let mut summary = AviSummary {
        file_size,
        streams: Vec::new(),
        has_index: false,
        truncated: false,
    };
    let mut position = 12u64;
    let mut saw_movi = false;

    while let Some((id, size)) = read_header(&mut reader)? {
        let body_start = position + 8;
        let padded = size as u64 + (size as u64 & 1);

        if &id == b"LIST" {
            let mut kind = [0u8; 4];
            reader.read_exact(&mut kind)?;
            match &kind {
                b"hdrl" => {
                    let mut hdrl = vec![0u8; size.saturating_sub(4) as usize];
                    reader
                        .read_exact(&mut hdrl)
                        .map_err(|_| malformed("truncated hdrl list"))?;
                    for (sub, body) in subchunks(&hdrl) {
                        if &sub == b"LIST" && body.get(0..4) == Some(b"strl") {
                            summary.streams.push(parse_strl(&body[4..])?);
                        }
                    }
                    position = body_start + padded;
                }
                b"movi" => {
                    saw_movi = true;
                    position = walk_movi(&mut reader, body_start + 4, file_size, &mut summary)?;
                }
                _ => {
                    position = body_start + padded;
                }
            }
        } else {
            if &id == b"idx1" {
                summary.has_index = true;
            }
            position = body_start + padded;
        }

        if position > file_size {
            summary.truncated = true;
            break;
        }
        reader.seek(SeekFrom::Start(position))?;
    }

    if !saw_movi {
        return Err(malformed("no movi list"));
    }

    for stream in &mut summary.streams {
        let units = match stream.kind {
            StreamKind::Audio => stream.bytes / stream.block_align as u64,
            _ => stream.chunks,
        };
        let nanos = units as u128 * stream.scale as u128 * 1_000_000_000 / stream.rate as u128;
        stream.duration = Duration::from_nanos(nanos as u64);
    }

    debug!(
        streams = summary.streams.len(),
        has_index = summary.has_index,
        truncated = summary.truncated,
        "Probed AVI file"
    );
    Ok(summary)
}

/// Count stream chunks from `start`; returns the offset after the last one.
fn walk_movi(
    reader: &mut BufReader<File>,
    start: u64,
    file_size: u64,
    summary: &mut AviSummary,
) -> EncoderResult<u64> {
    let mut position = start;
    reader.seek(SeekFrom::Start(position))?;

    while let Some((id, size)) = read_header(reader)? {
        if &id == b"LIST" {
            // 'rec ' groups; descend into them.
            reader.seek(SeekFrom::Current(4))?;
            position += 12;
            continue;
        }
        let Some(number) = stream_number(&id) else {
            return Ok(position);
        };

        let end = position + 8 + size as u64;
        if end > file_size {
            summary.truncated = true;
            return Ok(file_size);
        }
        if let Some(stream) = summary.streams.get_mut(number) {
            stream.chunks += 1;
            stream.bytes += size as u64;
        }
        position = end + (size as u64 & 1);
        reader.seek(SeekFrom::Start(position))?;
    }

    if position < file_size {
        summary.truncated = true;
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::{AudioTrack, AviWriter, VideoTrack};

    fn write_sample(path: &Path, finalize: bool) {
        let video = VideoTrack {
            width: 4,
            height: 4,
            fps: 10,
            fourcc: *b"MJPG",
        };
        let audio = AudioTrack {
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: 16,
        };
        let mut writer = AviWriter::create(path, Some(video), Some(audio)).unwrap();
        for _ in 0..10 {
            writer.write_video(&[7; 33], true).unwrap();
            writer.write_audio(&[0; 4800 * 4]).unwrap();
        }
        writer.checkpoint().unwrap();
        if finalize {
            writer.finalize().unwrap();
        }
    }

    #[test]
    fn finalized_file_reports_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.avi");
        write_sample(&path, true);

        let summary = probe(&path).unwrap();
        assert!(summary.has_index);
        assert!(!summary.truncated);
        let video = summary.stream(StreamKind::Video).unwrap();
        assert_eq!(video.chunks, 10);
        assert_eq!(video.header_length, 10);
        assert_eq!(video.codec, "MJPG");
        assert_eq!(video.duration, Duration::from_secs(1));
        let audio = summary.stream(StreamKind::Audio).unwrap();
        assert_eq!(audio.duration, Duration::from_secs(1));
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn truncated_file_still_probes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.avi");
        write_sample(&path, false);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 100]).unwrap();

        let summary = probe(&path).unwrap();
        assert!(!summary.has_index);
        assert!(summary.truncated);
        let audio = summary.stream(StreamKind::Audio).unwrap();
        assert_eq!(audio.chunks, 9);
        assert_eq!(summary.stream(StreamKind::Video).unwrap().chunks, 10);
    }

    #[test]
    fn rejects_non_avi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.avi");
        std::fs::write(&path, b"RIFF\0\0\0\0WAVEfmt ").unwrap();
        assert!(matches!(probe(&path), Err(EncoderError::Malformed(_))));
    }
}
