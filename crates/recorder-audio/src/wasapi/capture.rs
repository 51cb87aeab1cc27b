//! Audio capture using WASAPI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use recorder_ipc::{offer, AudioRole, Offer, QueueConfig};
use tracing::{debug, info, instrument, trace, warn};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDevice, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_LOOPBACK,
    AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY, WAVEFORMATEX,
};
use windows::Win32::Media::Multimedia::WAVE_FORMAT_IEEE_FLOAT;
use windows::Win32::System::Com::CLSCTX_ALL;

use super::device::{ensure_com_initialized, find_device_by_id};
use crate::endpoint::{AudioChunk, AudioEndpoint};
use crate::error::AudioError;
use crate::{AudioResult, CHANNELS, SAMPLE_RATE};

/// Capture endpoint for one WASAPI device.
///
/// Speakers are captured through loopback. The shared-mode stream asks the
/// audio engine to convert to 48 kHz stereo float.
pub struct WasapiEndpoint {
    device_id: String,
    role: AudioRole,
    capture_thread: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    is_active: AtomicBool,
}

impl WasapiEndpoint {
    /// Open the endpoint; fails when the id does not resolve to a device.
    pub fn open(device_id: &str, role: AudioRole) -> AudioResult<Self> {
        find_device_by_id(device_id)?;
        Ok(Self {
            device_id: device_id.to_string(),
            role,
            capture_thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: AtomicBool::new(false),
        })
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn role(&self) -> AudioRole {
        self.role
    }

    #[instrument(name = "wasapi_capture_start", skip(self, queue), fields(role = ?self.role))]
    fn start(&mut self, queue: QueueConfig) -> AudioResult<Receiver<AudioChunk>> {
        if self.is_active.load(Ordering::SeqCst) {
            return Err(AudioError::AlreadyStarted);
        }

        info!(device_id = %self.device_id, "Starting audio capture");

        let (sender, receiver) = queue.channel();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        self.should_stop.store(false, Ordering::SeqCst);
        let should_stop = Arc::clone(&self.should_stop);
        let device_id = self.device_id.clone();
        let role = self.role;
        let evict = receiver.clone();

        let handle = thread::Builder::new()
            .name(format!("wasapi-{role:?}").to_lowercase())
            .spawn(move || {
                let stream = CaptureStream {
                    role,
                    queue,
                    should_stop,
                };
                if let Err(e) = stream.run(&device_id, sender, evict, ready_tx) {
                    warn!("Audio capture thread error: {}", e);
                }
            })
            .map_err(|e| AudioError::DeviceLost(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                self.should_stop.store(true, Ordering::SeqCst);
                let _ = handle.join();
                return Err(AudioError::DeviceLost(self.device_id.clone()));
            }
        }

        self.capture_thread = Some(handle);
        self.is_active.store(true, Ordering::SeqCst);
        Ok(receiver)
    }

    #[instrument(name = "wasapi_capture_stop", skip(self), fields(role = ?self.role))]
    fn stop(&mut self) -> AudioResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        self.is_active.store(false, Ordering::SeqCst);

        info!("Audio capture stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

impl Drop for WasapiEndpoint {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct CaptureStream {
    role: AudioRole,
    queue: QueueConfig,
    should_stop: Arc<AtomicBool>,
}

impl CaptureStream {
    fn open_client(&self, device_id: &str) -> AudioResult<(IAudioClient, IAudioCaptureClient)> {
        ensure_com_initialized()?;
        let device: IMMDevice = find_device_by_id(device_id)?;
        let audio_client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };

        let block_align = CHANNELS * std::mem::size_of::<f32>() as u16;
        let format = WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_IEEE_FLOAT as u16,
            nChannels: CHANNELS,
            nSamplesPerSec: SAMPLE_RATE,
            nAvgBytesPerSec: SAMPLE_RATE * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: 32,
            cbSize: 0,
        };

        let mut stream_flags =
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY;
        if self.role == AudioRole::Speaker {
            stream_flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
        }

        unsafe {
            audio_client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                stream_flags,
                10_000_000, // 1 second buffer
                0,
                &format,
                None,
            )?;
        }

        let capture_client: IAudioCaptureClient = unsafe { audio_client.GetService()? };
        unsafe { audio_client.Start()? };
        Ok((audio_client, capture_client))
    }

    fn run(
        self,
        device_id: &str,
        sender: Sender<AudioChunk>,
        evict: Receiver<AudioChunk>,
        ready: Sender<AudioResult<()>>,
    ) -> AudioResult<()> {
        let (audio_client, capture_client) = match self.open_client(device_id) {
            Ok(clients) => {
                let _ = ready.send(Ok(()));
                clients
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };

        debug!("Audio capture started, entering capture loop");
        let mut sequence = 0u64;

        while !self.should_stop.load(Ordering::SeqCst) {
            // Fails with AUDCLNT_E_DEVICE_INVALIDATED once the device is gone.
            let packet_length = match unsafe { capture_client.GetNextPacketSize() } {
                Ok(length) => length,
                Err(e) => {
                    warn!(role = ?self.role, "Audio device lost: {}", e);
                    break;
                }
            };

            if packet_length == 0 {
                thread::sleep(Duration::from_millis(5));
                continue;
            }

            let mut data_ptr = std::ptr::null_mut();
            let mut num_frames = 0u32;
            let mut flags = 0u32;

            if let Err(e) = unsafe {
                capture_client.GetBuffer(&mut data_ptr, &mut num_frames, &mut flags, None, None)
            } {
                warn!(role = ?self.role, "Audio device lost: {}", e);
                break;
            }

            if num_frames > 0 {
                let sample_count = num_frames as usize * CHANNELS as usize;
                let samples = if flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0 {
                    vec![0.0f32; sample_count]
                } else {
                    unsafe { std::slice::from_raw_parts(data_ptr as *const f32, sample_count) }
                        .to_vec()
                };

                let chunk = AudioChunk {
                    samples,
                    captured_at: Instant::now(),
                    sequence,
                    role: self.role,
                };
                sequence += 1;

                match offer(&sender, &evict, chunk, self.queue.policy, &self.should_stop) {
                    Offer::Queued => {}
                    Offer::EvictedOldest | Offer::Dropped => {
                        trace!("Audio channel full, chunk dropped");
                    }
                    Offer::Disconnected => {
                        let _ = unsafe { capture_client.ReleaseBuffer(num_frames) };
                        break;
                    }
                }
            }

            unsafe {
                let _ = capture_client.ReleaseBuffer(num_frames);
            }
        }

        unsafe {
            let _ = audio_client.Stop();
        }

        debug!("Audio capture thread exiting");
        Ok(())
    }
}
