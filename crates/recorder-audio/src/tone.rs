//! In-process tone generator endpoint.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use recorder_ipc::{offer, AudioRole, Offer, QueueConfig};
use tracing::{debug, info, instrument, trace, warn};

use crate::endpoint::{AudioChunk, AudioEndpoint};
use crate::error::AudioError;
use crate::{frames_to_duration, AudioResult, CHANNELS, SAMPLES_PER_CHUNK, SAMPLE_RATE};

/// Endpoint producing a sine tone in real time.
///
/// The `present` flag models the physical device: clearing it makes the
/// producer behave like a WASAPI stream whose device was unplugged.
pub struct ToneEndpoint {
    role: AudioRole,
    frequency: f32,
    amplitude: f32,
    frames_per_chunk: usize,
    present: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    is_active: AtomicBool,
    capture_thread: Option<JoinHandle<()>>,
}

impl ToneEndpoint {
    /// Create a tone endpoint bound to a presence flag.
    pub fn new(role: AudioRole, frequency: f32, present: Arc<AtomicBool>) -> Self {
        Self {
            role,
            frequency,
            amplitude: 0.25,
            frames_per_chunk: SAMPLES_PER_CHUNK,
            present,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: AtomicBool::new(false),
            capture_thread: None,
        }
    }

    /// Set the peak amplitude (0.0 - 1.0).
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Set how many frames each delivered chunk holds.
    pub fn with_frames_per_chunk(mut self, frames: usize) -> Self {
        self.frames_per_chunk = frames.max(1);
        self
    }
}

impl AudioEndpoint for ToneEndpoint {
    fn role(&self) -> AudioRole {
        self.role
    }

    #[instrument(name = "tone_endpoint_start", skip(self, queue), fields(role = ?self.role))]
    fn start(&mut self, queue: QueueConfig) -> AudioResult<Receiver<AudioChunk>> {
        if self.is_active.load(Ordering::SeqCst) {
            return Err(AudioError::AlreadyStarted);
        }
        if !self.present.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceLost(format!("{:?} endpoint", self.role)));
        }

        info!(frequency = self.frequency, "Starting tone endpoint");

        let (sender, receiver) = queue.channel();
        self.should_stop.store(false, Ordering::SeqCst);

        let producer = ToneProducer {
            role: self.role,
            frequency: self.frequency,
            amplitude: self.amplitude,
            frames_per_chunk: self.frames_per_chunk,
            present: Arc::clone(&self.present),
            should_stop: Arc::clone(&self.should_stop),
            queue,
        };
        let evict = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("tone-{:?}", self.role).to_lowercase())
            .spawn(move || producer.run(sender, evict))
            .map_err(|e| AudioError::DeviceLost(e.to_string()))?;

        self.capture_thread = Some(handle);
        self.is_active.store(true, Ordering::SeqCst);
        Ok(receiver)
    }

    #[instrument(name = "tone_endpoint_stop", skip(self), fields(role = ?self.role))]
    fn stop(&mut self) -> AudioResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        self.is_active.store(false, Ordering::SeqCst);

        debug!("Tone endpoint stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

impl Drop for ToneEndpoint {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct ToneProducer {
    role: AudioRole,
    frequency: f32,
    amplitude: f32,
    frames_per_chunk: usize,
    present: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    queue: QueueConfig,
}

impl ToneProducer {
    fn run(self, sender: Sender<AudioChunk>, evict: Receiver<AudioChunk>) {
        let chunk_duration = frames_to_duration(self.frames_per_chunk);
        let start = Instant::now();
        let mut next_chunk_time = start;
        let mut phase = 0.0f32;
        let step = TAU * self.frequency / SAMPLE_RATE as f32;
        let mut sequence = 0u64;

        while !self.should_stop.load(Ordering::SeqCst) {
            if !self.present.load(Ordering::SeqCst) {
                warn!(role = ?self.role, "Tone device removed, ending capture");
                return;
            }

            let now = Instant::now();
            if next_chunk_time > now {
                thread::sleep((next_chunk_time - now).min(Duration::from_millis(5)));
                continue;
            }

            let mut samples = Vec::with_capacity(self.frames_per_chunk * CHANNELS as usize);
            for _ in 0..self.frames_per_chunk {
                let value = phase.sin() * self.amplitude;
                phase = (phase + step) % TAU;
                for _ in 0..CHANNELS {
                    samples.push(value);
                }
            }

            let chunk = AudioChunk {
                samples,
                captured_at: next_chunk_time,
                sequence,
                role: self.role,
            };
            sequence += 1;
            next_chunk_time += chunk_duration;

            match offer(&sender, &evict, chunk, self.queue.policy, &self.should_stop) {
                Offer::Queued => {}
                Offer::EvictedOldest | Offer::Dropped => {
                    trace!(role = ?self.role, "Audio queue full, chunk dropped");
                }
                Offer::Disconnected => break,
            }
        }

        debug!(role = ?self.role, chunks = sequence, "Tone producer exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_timestamped_chunks() {
        let present = Arc::new(AtomicBool::new(true));
        let mut endpoint = ToneEndpoint::new(AudioRole::Mic, 440.0, present);
        let rx = endpoint.start(QueueConfig::default()).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.frame_count(), SAMPLES_PER_CHUNK);
        assert_eq!(second.sequence, first.sequence + 1);
        assert_eq!(
            second.captured_at - first.captured_at,
            frames_to_duration(SAMPLES_PER_CHUNK)
        );

        endpoint.stop().unwrap();
        assert!(!endpoint.is_active());
    }

    #[test]
    fn unplug_disconnects_consumer() {
        let present = Arc::new(AtomicBool::new(true));
        let mut endpoint = ToneEndpoint::new(AudioRole::Speaker, 220.0, Arc::clone(&present));
        let rx = endpoint.start(QueueConfig::default()).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        present.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut disconnected = false;
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(disconnected);
    }

    #[test]
    fn absent_device_fails_to_start() {
        let present = Arc::new(AtomicBool::new(false));
        let mut endpoint = ToneEndpoint::new(AudioRole::Mic, 440.0, present);
        assert!(matches!(
            endpoint.start(QueueConfig::default()),
            Err(AudioError::DeviceLost(_))
        ));
    }
}
