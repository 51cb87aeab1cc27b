//! Audio endpoint abstraction.

use std::time::Instant;

use crossbeam_channel::Receiver;
use recorder_ipc::{AudioRole, QueueConfig};

use crate::{AudioResult, CHANNELS};

/// A chunk of interleaved stereo samples.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved `f32` samples, [`CHANNELS`] per frame.
    pub samples: Vec<f32>,

    /// Capture instant of the first frame.
    pub captured_at: Instant,

    /// Monotonically increasing sequence number.
    pub sequence: u64,

    /// Endpoint role the chunk came from; mixed chunks carry the first input.
    pub role: AudioRole,
}

impl AudioChunk {
    /// Number of sample frames in this chunk.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }
}

/// A speaker-loopback or microphone endpoint.
///
/// `start` spawns the producer thread and returns the receiving end of its
/// bounded queue. A producer whose device disappears exits and drops its
/// sender, so the consumer observes a disconnected channel.
pub trait AudioEndpoint: Send {
    /// Role of this endpoint within the session.
    fn role(&self) -> AudioRole;

    /// Start delivering chunks.
    fn start(&mut self, queue: QueueConfig) -> AudioResult<Receiver<AudioChunk>>;

    /// Stop delivering chunks and join the producer.
    fn stop(&mut self) -> AudioResult<()>;

    /// Whether the producer is running.
    fn is_active(&self) -> bool;
}
