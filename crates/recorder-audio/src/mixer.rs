//! Speaker and microphone mixing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use recorder_ipc::{offer, AudioRole, MixPolicy, Offer, QueueConfig};
use tracing::{debug, info, instrument, trace, warn};

use crate::endpoint::{AudioChunk, AudioEndpoint};
use crate::error::AudioError;
use crate::{frames_to_duration, AudioResult, CHANNELS, SAMPLES_PER_CHUNK, SAMPLE_RATE};

/// How long a ready input waits for a lagging one before it is padded.
pub const MIX_LAG_ALLOWANCE: Duration = Duration::from_millis(40);

/// Pending audio kept per input before the oldest samples are dropped.
const MAX_PENDING_FRAMES: usize = SAMPLE_RATE as usize;

const CHUNK_SAMPLES: usize = SAMPLES_PER_CHUNK * CHANNELS as usize;

struct Lane {
    role: AudioRole,
    pending: VecDeque<f32>,
    head: Option<Instant>,
}

impl Lane {
    fn is_ready(&self) -> bool {
        self.pending.len() >= CHUNK_SAMPLES
    }

    fn push(&mut self, chunk: AudioChunk) {
        if self.pending.is_empty() {
            self.head = Some(chunk.captured_at);
        }
        self.pending.extend(chunk.samples);

        let max = MAX_PENDING_FRAMES * CHANNELS as usize;
        if self.pending.len() > max {
            let overflow = self.pending.len() - max;
            self.pending.drain(..overflow);
            self.advance(overflow);
        }
    }

    /// Take one chunk worth of samples, padding with silence.
    fn take(&mut self) -> Vec<f32> {
        let count = CHUNK_SAMPLES.min(self.pending.len());
        let mut samples: Vec<f32> = self.pending.drain(..count).collect();
        samples.resize(CHUNK_SAMPLES, 0.0);
        self.advance(count);
        samples
    }

    fn advance(&mut self, samples: usize) {
        if self.pending.is_empty() {
            self.head = None;
        } else if let Some(head) = self.head.as_mut() {
            *head += frames_to_duration(samples / CHANNELS as usize);
        }
    }
}

/// Re-chunks endpoint audio into 10 ms blocks and combines the inputs.
///
/// A block is emitted once every input holds a full block, or once the
/// oldest ready audio has waited longer than the lag allowance, in which
/// case lagging inputs are padded with silence. Deterministic given the
/// same pushes and `now` values.
pub struct MixBuffer {
    policy: MixPolicy,
    lanes: Vec<Lane>,
    lag_allowance: Duration,
    sequence: u64,
}

impl MixBuffer {
    /// Create a buffer for the given input roles.
    pub fn new(roles: &[AudioRole], policy: MixPolicy, lag_allowance: Duration) -> Self {
        Self {
            policy,
            lanes: roles
                .iter()
                .map(|&role| Lane {
                    role,
                    pending: VecDeque::new(),
                    head: None,
                })
                .collect(),
            lag_allowance,
            sequence: 0,
        }
    }

    /// Queue a chunk from one of the inputs.
    pub fn push(&mut self, chunk: AudioChunk) {
        match self.lanes.iter_mut().find(|lane| lane.role == chunk.role) {
            Some(lane) => lane.push(chunk),
            None => trace!(role = ?chunk.role, "Chunk from unknown input ignored"),
        }
    }

    /// Emit the next mixed block, if one is due at `now`.
    pub fn pop(&mut self, now: Instant) -> Option<AudioChunk> {
        let lead = self.lanes.iter().position(Lane::is_ready)?;
        let all_ready = self.lanes.iter().all(Lane::is_ready);
        if !all_ready {
            let waited = self.lanes[lead]
                .head
                .map(|head| now.saturating_duration_since(head))
                .unwrap_or_default();
            if waited <= self.lag_allowance {
                return None;
            }
        }

        let captured_at = self.lanes[lead].head.unwrap_or(now);
        let role = self.lanes[lead].role;
        let ready: Vec<bool> = self.lanes.iter().map(Lane::is_ready).collect();
        let blocks: Vec<Vec<f32>> = self.lanes.iter_mut().map(Lane::take).collect();

        let samples = if blocks.len() == 1 {
            blocks.into_iter().next().unwrap_or_default()
        } else {
            match self.policy {
                MixPolicy::Sum => sum_clipped(&blocks),
                MixPolicy::Priority(preferred) => {
                    let choice = self
                        .lanes
                        .iter()
                        .position(|lane| lane.role == preferred)
                        .filter(|&i| ready[i])
                        .unwrap_or(lead);
                    blocks.into_iter().nth(choice).unwrap_or_default()
                }
            }
        };

        let chunk = AudioChunk {
            samples,
            captured_at,
            sequence: self.sequence,
            role,
        };
        self.sequence += 1;
        Some(chunk)
    }
}

fn sum_clipped(blocks: &[Vec<f32>]) -> Vec<f32> {
    let mut mix = vec![0.0f32; CHUNK_SAMPLES];
    for block in blocks {
        for (out, &sample) in mix.iter_mut().zip(block) {
            *out += sample;
        }
    }
    for sample in mix.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
    mix
}

/// The logical audio source of a session.
///
/// Owns the selected endpoints and a mix thread that merges their chunks
/// into one stream.
pub struct AudioCapture {
    endpoints: Vec<Box<dyn AudioEndpoint>>,
    policy: MixPolicy,
    mix_thread: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    is_active: bool,
}

impl AudioCapture {
    /// Create a capture over the given endpoints.
    pub fn new(endpoints: Vec<Box<dyn AudioEndpoint>>, policy: MixPolicy) -> AudioResult<Self> {
        if endpoints.is_empty() {
            return Err(AudioError::NoEndpoints);
        }
        Ok(Self {
            endpoints,
            policy,
            mix_thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: false,
        })
    }

    /// Roles of the endpoints feeding this capture.
    pub fn roles(&self) -> Vec<AudioRole> {
        self.endpoints.iter().map(|e| e.role()).collect()
    }

    /// Start every endpoint and the mix thread.
    #[instrument(name = "audio_capture_start", skip(self, queue))]
    pub fn start(&mut self, queue: QueueConfig) -> AudioResult<Receiver<AudioChunk>> {
        if self.is_active {
            return Err(AudioError::AlreadyStarted);
        }

        info!(roles = ?self.roles(), policy = ?self.policy, "Starting audio capture");

        let mut inputs = Vec::with_capacity(self.endpoints.len());
        for index in 0..self.endpoints.len() {
            match self.endpoints[index].start(queue) {
                Ok(rx) => inputs.push((self.endpoints[index].role(), rx)),
                Err(e) => {
                    for started in self.endpoints.iter_mut().take(index) {
                        let _ = started.stop();
                    }
                    return Err(e);
                }
            }
        }

        let (sender, receiver) = queue.channel();
        self.should_stop.store(false, Ordering::SeqCst);

        let worker = MixWorker {
            buffer: MixBuffer::new(&self.roles(), self.policy, MIX_LAG_ALLOWANCE),
            inputs,
            queue,
            should_stop: Arc::clone(&self.should_stop),
        };
        let evict = receiver.clone();
        let handle = thread::Builder::new()
            .name("audio-mix".into())
            .spawn(move || worker.run(sender, evict));
        match handle {
            Ok(handle) => self.mix_thread = Some(handle),
            Err(e) => {
                for endpoint in self.endpoints.iter_mut() {
                    let _ = endpoint.stop();
                }
                return Err(AudioError::DeviceLost(format!("mix thread: {e}")));
            }
        }

        self.is_active = true;
        Ok(receiver)
    }

    /// Stop the mix thread, then every endpoint.
    #[instrument(name = "audio_capture_stop", skip(self))]
    pub fn stop(&mut self) -> AudioResult<()> {
        if !self.is_active {
            return Ok(());
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.mix_thread.take() {
            let _ = handle.join();
        }

        let mut result = Ok(());
        for endpoint in self.endpoints.iter_mut() {
            if let Err(e) = endpoint.stop() {
                warn!(role = ?endpoint.role(), "Failed to stop audio endpoint: {}", e);
                result = Err(e);
            }
        }
        self.is_active = false;

        info!("Audio capture stopped");
        result
    }

    /// Check if capture is active.
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct MixWorker {
    buffer: MixBuffer,
    inputs: Vec<(AudioRole, Receiver<AudioChunk>)>,
    queue: QueueConfig,
    should_stop: Arc<AtomicBool>,
}

impl MixWorker {
    fn run(mut self, sender: Sender<AudioChunk>, evict: Receiver<AudioChunk>) {
        debug!("Mixer thread started");

        while !self.should_stop.load(Ordering::SeqCst) {
            let mut received = false;
            for (role, rx) in &self.inputs {
                loop {
                    match rx.try_recv() {
                        Ok(chunk) => {
                            self.buffer.push(chunk);
                            received = true;
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            warn!(role = ?role, "Audio endpoint closed, ending mix");
                            return;
                        }
                    }
                }
            }

            while let Some(chunk) = self.buffer.pop(Instant::now()) {
                match offer(&sender, &evict, chunk, self.queue.policy, &self.should_stop) {
                    Offer::Queued => {}
                    Offer::EvictedOldest | Offer::Dropped => {
                        trace!("Mixed audio queue full, chunk dropped");
                    }
                    Offer::Disconnected => return,
                }
            }

            if !received {
                thread::sleep(Duration::from_millis(2));
            }
        }

        debug!("Mixer thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(role: AudioRole, value: f32, frames: usize, at: Instant) -> AudioChunk {
        AudioChunk {
            samples: vec![value; frames * CHANNELS as usize],
            captured_at: at,
            sequence: 0,
            role,
        }
    }

    #[test]
    fn single_input_passes_through() {
        let t0 = Instant::now();
        let mut buffer = MixBuffer::new(&[AudioRole::Mic], MixPolicy::Sum, MIX_LAG_ALLOWANCE);
        buffer.push(chunk(AudioRole::Mic, 0.9, 300, t0));
        assert!(buffer.pop(t0).is_none());

        buffer.push(chunk(AudioRole::Mic, 0.9, 300, t0 + frames_to_duration(300)));
        let out = buffer.pop(t0).unwrap();
        assert_eq!(out.frame_count(), SAMPLES_PER_CHUNK);
        assert_eq!(out.captured_at, t0);
        assert!(out.samples.iter().all(|&s| s == 0.9));
    }

    #[test]
    fn sum_is_clipped() {
        let t0 = Instant::now();
        let roles = [AudioRole::Speaker, AudioRole::Mic];
        let mut buffer = MixBuffer::new(&roles, MixPolicy::Sum, MIX_LAG_ALLOWANCE);
        buffer.push(chunk(AudioRole::Speaker, 0.75, 480, t0));
        assert!(buffer.pop(t0).is_none());
        buffer.push(chunk(AudioRole::Mic, 0.5, 480, t0));
        let out = buffer.pop(t0).unwrap();
        assert!(out.samples.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn lagging_input_is_padded() {
        let t0 = Instant::now();
        let roles = [AudioRole::Speaker, AudioRole::Mic];
        let mut buffer = MixBuffer::new(&roles, MixPolicy::Sum, MIX_LAG_ALLOWANCE);
        buffer.push(chunk(AudioRole::Speaker, 0.25, 480, t0));
        buffer.push(chunk(AudioRole::Mic, 0.5, 100, t0));

        assert!(buffer.pop(t0 + Duration::from_millis(10)).is_none());
        let out = buffer.pop(t0 + Duration::from_millis(60)).unwrap();
        let frame = CHANNELS as usize;
        assert_eq!(out.samples[0], 0.75);
        assert_eq!(out.samples[100 * frame], 0.25);
    }

    #[test]
    fn priority_prefers_role_and_falls_back() {
        let t0 = Instant::now();
        let roles = [AudioRole::Speaker, AudioRole::Mic];
        let policy = MixPolicy::Priority(AudioRole::Mic);
        let mut buffer = MixBuffer::new(&roles, policy, MIX_LAG_ALLOWANCE);

        buffer.push(chunk(AudioRole::Speaker, 0.1, 480, t0));
        buffer.push(chunk(AudioRole::Mic, 0.2, 480, t0));
        assert!(buffer.pop(t0).unwrap().samples.iter().all(|&s| s == 0.2));

        buffer.push(chunk(AudioRole::Speaker, 0.1, 480, t0));
        let late = t0 + Duration::from_millis(100);
        assert!(buffer.pop(late).unwrap().samples.iter().all(|&s| s == 0.1));
    }

    #[test]
    fn head_advances_with_consumed_frames() {
        let t0 = Instant::now();
        let mut buffer = MixBuffer::new(&[AudioRole::Speaker], MixPolicy::Sum, MIX_LAG_ALLOWANCE);
        buffer.push(chunk(AudioRole::Speaker, 0.0, 960, t0));
        let first = buffer.pop(t0).unwrap();
        let second = buffer.pop(t0).unwrap();
        assert_eq!(second.captured_at - first.captured_at, Duration::from_millis(10));
        assert_eq!(second.sequence, 1);
    }

    #[test]
    fn empty_capture_is_rejected() {
        assert!(matches!(
            AudioCapture::new(Vec::new(), MixPolicy::Sum),
            Err(AudioError::NoEndpoints)
        ));
    }
}
