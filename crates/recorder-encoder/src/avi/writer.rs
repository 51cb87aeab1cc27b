//! Streaming AVI writer with periodic header patching.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use super::{
    chunk_id, AVIF_HASINDEX, AVIF_ISINTERLEAVED, AVIH_SIZE, AVIIF_KEYFRAME, BITMAPINFO_SIZE,
    STRH_SIZE, WAVEFORMAT_SIZE,
};
use crate::error::EncoderError;
use crate::EncoderResult;

/// RIFF sizes are 32-bit; stop well before the limit so the index fits.
const DEFAULT_SIZE_LIMIT: u64 = u32::MAX as u64 - (16 << 20);

/// Video stream parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VideoTrack {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: [u8; 4],
}

/// Audio stream parameters (integer PCM).
#[derive(Debug, Clone, Copy)]
pub(crate) struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioTrack {
    fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

struct IndexEntry {
    id: [u8; 4],
    flags: u32,
    offset: u32,
    size: u32,
}

/// File offsets of header fields rewritten at checkpoints.
#[derive(Debug, Default)]
struct Layout {
    avih_flags: u64,
    avih_total_frames: u64,
    video_length: Option<u64>,
    audio_length: Option<u64>,
    movi_size: u64,
    movi_fourcc: u64,
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Start a LIST and return the offset of its size field.
fn begin_list(buf: &mut Vec<u8>, kind: &[u8; 4]) -> usize {
    buf.extend_from_slice(b"LIST");
    let size_at = buf.len();
    put_u32(buf, 0);
    buf.extend_from_slice(kind);
    size_at
}

fn end_list(buf: &mut [u8], size_at: usize) {
    let size = (buf.len() - size_at - 4) as u32;
    buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
}

fn build_header(video: Option<VideoTrack>, audio: Option<AudioTrack>) -> (Vec<u8>, Layout) {
    let mut layout = Layout::default();
    let mut buf = Vec::with_capacity(512);
    let streams = video.is_some() as u32 + audio.is_some() as u32;
    let fps = video.map(|v| v.fps.max(1)).unwrap_or(1);
    let (width, height) = video.map(|v| (v.width, v.height)).unwrap_or((0, 0));

    buf.extend_from_slice(b"RIFF");
    put_u32(&mut buf, 0);
    buf.extend_from_slice(b"AVI ");

    let hdrl = begin_list(&mut buf, b"hdrl");

    buf.extend_from_slice(b"avih");
    put_u32(&mut buf, AVIH_SIZE);
    put_u32(&mut buf, if video.is_some() { 1_000_000 / fps } else { 0 });
    put_u32(&mut buf, width * height * 3 * fps + 192_000); // max bytes per second
    put_u32(&mut buf, 0); // padding granularity
    layout.avih_flags = buf.len() as u64;
    put_u32(&mut buf, AVIF_ISINTERLEAVED);
    layout.avih_total_frames = buf.len() as u64;
    put_u32(&mut buf, 0);
    put_u32(&mut buf, 0); // initial frames
    put_u32(&mut buf, streams);
    put_u32(&mut buf, width * height * 3);
    put_u32(&mut buf, width);
    put_u32(&mut buf, height);
    buf.extend_from_slice(&[0u8; 16]);

    if let Some(video) = video {
        let strl = begin_list(&mut buf, b"strl");
        buf.extend_from_slice(b"strh");
        put_u32(&mut buf, STRH_SIZE);
        buf.extend_from_slice(b"vids");
        buf.extend_from_slice(&video.fourcc);
        put_u32(&mut buf, 0); // flags
        put_u16(&mut buf, 0); // priority
        put_u16(&mut buf, 0); // language
        put_u32(&mut buf, 0); // initial frames
        put_u32(&mut buf, 1); // scale
        put_u32(&mut buf, video.fps);
        put_u32(&mut buf, 0); // start
        layout.video_length = Some(buf.len() as u64);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, video.width * video.height * 3);
        put_u32(&mut buf, u32::MAX); // default quality
        put_u32(&mut buf, 0); // sample size
        for value in [0, 0, video.width as i16, video.height as i16] {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        buf.extend_from_slice(b"strf");
        put_u32(&mut buf, BITMAPINFO_SIZE);
        put_u32(&mut buf, BITMAPINFO_SIZE);
        put_u32(&mut buf, video.width);
        put_u32(&mut buf, video.height);
        put_u16(&mut buf, 1); // planes
        put_u16(&mut buf, 24); // bit count
        buf.extend_from_slice(&video.fourcc);
        put_u32(&mut buf, video.width * video.height * 3);
        buf.extend_from_slice(&[0u8; 16]);
        end_list(&mut buf, strl);
    }

    if let Some(audio) = audio {
        let block_align = audio.block_align();
        let strl = begin_list(&mut buf, b"strl");
        buf.extend_from_slice(b"strh");
        put_u32(&mut buf, STRH_SIZE);
        buf.extend_from_slice(b"auds");
        put_u32(&mut buf, 0); // handler
        put_u32(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 1); // scale
        put_u32(&mut buf, audio.sample_rate);
        put_u32(&mut buf, 0);
        layout.audio_length = Some(buf.len() as u64);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, audio.sample_rate * block_align as u32 / 10);
        put_u32(&mut buf, u32::MAX);
        put_u32(&mut buf, block_align as u32);
        buf.extend_from_slice(&[0u8; 8]);

        buf.extend_from_slice(b"strf");
        put_u32(&mut buf, WAVEFORMAT_SIZE);
        put_u16(&mut buf, 1); // WAVE_FORMAT_PCM
        put_u16(&mut buf, audio.channels);
        put_u32(&mut buf, audio.sample_rate);
        put_u32(&mut buf, audio.sample_rate * block_align as u32);
        put_u16(&mut buf, block_align);
        put_u16(&mut buf, audio.bits_per_sample);
        put_u16(&mut buf, 0); // cbSize
        end_list(&mut buf, strl);
    }

    end_list(&mut buf, hdrl);

    buf.extend_from_slice(b"LIST");
    layout.movi_size = buf.len() as u64;
    put_u32(&mut buf, 4);
    layout.movi_fourcc = buf.len() as u64;
    buf.extend_from_slice(b"movi");

    (buf, layout)
}

/// Writes an interleaved AVI file chunk by chunk.
///
/// Sizes and counts in the headers are rewritten at every [`checkpoint`],
/// so readers accept the file up to the last checkpoint even if writing
/// stops abruptly. [`finalize`] appends the `idx1` index.
///
/// [`checkpoint`]: AviWriter::checkpoint
/// [`finalize`]: AviWriter::finalize
pub(crate) struct AviWriter {
    file: BufWriter<File>,
    path: PathBuf,
    position: u64,
    layout: Layout,
    index: Vec<IndexEntry>,
    video_id: Option<[u8; 4]>,
    audio_id: Option<[u8; 4]>,
    audio_block_align: u64,
    video_frames: u64,
    audio_frames: u64,
    size_limit: u64,
    finalized: bool,
}

impl AviWriter {
    /// Create the file and write the headers.
    #[instrument(name = "avi_create", skip(video, audio))]
    pub fn create(
        path: &Path,
        video: Option<VideoTrack>,
        audio: Option<AudioTrack>,
    ) -> EncoderResult<Self> {
        let file = File::create(path).map_err(|e| EncoderError::InvalidPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (header, layout) = build_header(video, audio);
        let mut file = BufWriter::new(file);
        file.write_all(&header)?;

        let video_id = video.map(|_| chunk_id(0, b"dc"));
        let audio_id = audio.map(|_| chunk_id(video.is_some() as usize, b"wb"));
        debug!(header_bytes = header.len(), "AVI headers written");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            position: header.len() as u64,
            layout,
            index: Vec::new(),
            video_id,
            audio_id,
            audio_block_align: audio.map(|a| a.block_align() as u64).unwrap_or(1),
            video_frames: 0,
            audio_frames: 0,
            size_limit: DEFAULT_SIZE_LIMIT,
            finalized: false,
        })
    }

    /// Lower the size at which writes fail with `ContainerFull`.
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = limit.min(DEFAULT_SIZE_LIMIT);
        self
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a video frame chunk. Empty data marks a dropped frame.
    pub fn write_video(&mut self, data: &[u8], keyframe: bool) -> EncoderResult<()> {
        let id = self
            .video_id
            .ok_or_else(|| EncoderError::InvalidInput("no video stream".into()))?;
        let flags = if keyframe { AVIIF_KEYFRAME } else { 0 };
        self.write_chunk(id, data, flags)?;
        self.video_frames += 1;
        Ok(())
    }

    /// Append an audio chunk of whole sample frames.
    pub fn write_audio(&mut self, data: &[u8]) -> EncoderResult<()> {
        let id = self
            .audio_id
            .ok_or_else(|| EncoderError::InvalidInput("no audio stream".into()))?;
        self.write_chunk(id, data, AVIIF_KEYFRAME)?;
        self.audio_frames += data.len() as u64 / self.audio_block_align;
        Ok(())
    }

    fn write_chunk(&mut self, id: [u8; 4], data: &[u8], flags: u32) -> EncoderResult<()> {
        if self.finalized {
            return Err(EncoderError::Finalized);
        }

        let padded = data.len() as u64 + (data.len() as u64 & 1);
        let index_bytes = (self.index.len() as u64 + 1) * 16 + 8;
        if self.position + 8 + padded + index_bytes > self.size_limit {
            return Err(EncoderError::ContainerFull(self.position));
        }

        self.index.push(IndexEntry {
            id,
            flags,
            offset: (self.position - self.layout.movi_fourcc) as u32,
            size: data.len() as u32,
        });

        self.file.write_all(&id)?;
        self.file.write_all(&(data.len() as u32).to_le_bytes())?;
        self.file.write_all(data)?;
        if data.len() & 1 == 1 {
            self.file.write_all(&[0])?;
        }
        self.position += 8 + padded;

        trace!(id = %String::from_utf8_lossy(&id), size = data.len(), "Chunk written");
        Ok(())
    }

    fn patch_headers(&mut self, movi_end: u64, flags: u32) -> EncoderResult<()> {
        let mut patches = vec![
            (4, (self.position - 8) as u32),
            (self.layout.avih_flags, flags),
            (self.layout.avih_total_frames, self.video_frames as u32),
            (
                self.layout.movi_size,
                (movi_end - self.layout.movi_size - 4) as u32,
            ),
        ];
        if let Some(at) = self.layout.video_length {
            patches.push((at, self.video_frames as u32));
        }
        if let Some(at) = self.layout.audio_length {
            patches.push((at, self.audio_frames as u32));
        }

        self.file.flush()?;
        let file = self.file.get_mut();
        for (at, value) in patches {
            file.seek(SeekFrom::Start(at))?;
            file.write_all(&value.to_le_bytes())?;
        }
        file.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }

    /// Rewrite sizes and counts so the file is readable as it stands.
    pub fn checkpoint(&mut self) -> EncoderResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.patch_headers(self.position, AVIF_ISINTERLEAVED)?;
        self.file.flush()?;
        trace!(bytes = self.position, "AVI checkpoint");
        Ok(())
    }

    /// Write the index and final headers. Returns the file size.
    #[instrument(name = "avi_finalize", skip(self), fields(path = %self.path.display()))]
    pub fn finalize(&mut self) -> EncoderResult<u64> {
        if self.finalized {
            return Ok(self.position);
        }
        self.finalized = true;

        let movi_end = self.position;
        let mut idx = Vec::with_capacity(8 + self.index.len() * 16);
        idx.extend_from_slice(b"idx1");
        put_u32(&mut idx, (self.index.len() * 16) as u32);
        for entry in &self.index {
            idx.extend_from_slice(&entry.id);
            put_u32(&mut idx, entry.flags);
            put_u32(&mut idx, entry.offset);
            put_u32(&mut idx, entry.size);
        }
        self.file.write_all(&idx)?;
        self.position += idx.len() as u64;

        self.patch_headers(movi_end, AVIF_ISINTERLEAVED | AVIF_HASINDEX)?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        debug!(
            bytes = self.position,
            video_frames = self.video_frames,
            audio_frames = self.audio_frames,
            "AVI finalized"
        );
        Ok(self.position)
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    /// Video chunks written so far.
    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    /// Audio sample frames written so far.
    pub fn audio_frames(&self) -> u64 {
        self.audio_frames
    }
}
