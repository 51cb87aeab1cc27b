//! Recording counters.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use recorder_audio::SAMPLE_RATE;
use recorder_encoder::MuxStats;
use recorder_ipc::RecordingStats;

use crate::sync::SyncStats;

/// Collects counters from the pipeline thread for [`RecordingStats`].
#[derive(Debug, Default)]
pub struct SessionMetrics {
    frames_captured: AtomicU64,
    frames_discarded: AtomicU64,
    audio_chunks: AtomicU64,
    audio_discarded: AtomicU64,
    stages: RwLock<(SyncStats, MuxStats)>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter for a new recording.
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_discarded.store(0, Ordering::Relaxed);
        self.audio_chunks.store(0, Ordering::Relaxed);
        self.audio_discarded.store(0, Ordering::Relaxed);
        *self.stages.write() = Default::default();
    }

    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame captured while paused.
    pub fn record_frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio(&self) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// An audio chunk captured while paused.
    pub fn record_audio_discarded(&self) {
        self.audio_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the latest synchronizer and muxer counters.
    pub fn update_stages(&self, sync: SyncStats, mux: MuxStats) {
        *self.stages.write() = (sync, mux);
    }

    pub fn snapshot(&self) -> RecordingStats {
        let (sync, mux) = *self.stages.read();
        let silence_frames = sync.silence_frames + mux.silence_frames;
        RecordingStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_held: sync.frames_held + mux.held_frames,
            frames_dropped: self.frames_discarded.load(Ordering::Relaxed) + mux.dropped_frames,
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            audio_chunks_dropped: self.audio_discarded.load(Ordering::Relaxed)
                + sync.audio_dropped,
            silence_inserted_ms: silence_frames * 1000 / SAMPLE_RATE as u64,
            frames_written: mux.video_frames,
            bytes_written: mux.bytes_written,
        }
    }
}
