//! In-process camera producing a moving test pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use recorder_ipc::{offer, Offer, PixelFormat, QueueConfig};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::CaptureError;
use crate::frame::VideoFrame;
use crate::preview::PreviewTap;
use crate::{CaptureResult, VideoSource};

/// Camera generating NV12 color bars that scroll one step per frame.
///
/// The `present` flag models the physical device; clearing it ends the
/// producer the way an unplugged camera would.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    frame_rate: u32,
    present: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    is_active: AtomicBool,
    capture_thread: Option<JoinHandle<()>>,
}

impl TestPatternCamera {
    /// Create a camera with the given (even) dimensions.
    pub fn new(width: u32, height: u32, present: Arc<AtomicBool>) -> Self {
        Self {
            width: width & !1,
            height: height & !1,
            frame_rate: 30,
            present,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: AtomicBool::new(false),
            capture_thread: None,
        }
    }

    /// Set the native frame rate of the camera.
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }
}

impl VideoSource for TestPatternCamera {
    #[instrument(name = "pattern_camera_start", skip(self, queue, preview))]
    fn start(
        &mut self,
        queue: QueueConfig,
        preview: Option<PreviewTap>,
    ) -> CaptureResult<Receiver<VideoFrame>> {
        if self.is_active.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        if !self.present.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceLost("test pattern camera".to_string()));
        }

        info!(
            width = self.width,
            height = self.height,
            frame_rate = self.frame_rate,
            "Starting test pattern camera"
        );

        let (sender, receiver) = queue.channel();
        self.should_stop.store(false, Ordering::SeqCst);

        let producer = PatternProducer {
            width: self.width,
            height: self.height,
            interval: Duration::from_secs(1) / self.frame_rate,
            present: Arc::clone(&self.present),
            should_stop: Arc::clone(&self.should_stop),
            queue,
            preview,
        };
        let evict = receiver.clone();
        let handle = thread::Builder::new()
            .name("pattern-camera".into())
            .spawn(move || producer.run(sender, evict))
            .map_err(|e| CaptureError::DeviceLost(e.to_string()))?;

        self.capture_thread = Some(handle);
        self.is_active.store(true, Ordering::SeqCst);
        Ok(receiver)
    }

    #[instrument(name = "pattern_camera_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        self.is_active.store(false, Ordering::SeqCst);

        debug!("Test pattern camera stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Luma and chroma of the eight classic bars.
const BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

fn render_pattern(width: u32, height: u32, offset: u64) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let bar_width = (w / BARS.len()).max(1);
    let bar_at = |x: usize| BARS[((x + offset as usize) / bar_width) % BARS.len()];

    let mut nv12 = vec![0u8; y_size + y_size / 2];
    for y in 0..h {
        for x in 0..w {
            nv12[y * w + x] = bar_at(x).0;
        }
    }
    for y in 0..h / 2 {
        for x in (0..w).step_by(2) {
            let (_, u, v) = bar_at(x);
            let uv = y_size + y * w + x;
            nv12[uv] = u;
            nv12[uv + 1] = v;
        }
    }
    nv12
}

struct PatternProducer {
    width: u32,
    height: u32,
    interval: Duration,
    present: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    queue: QueueConfig,
    preview: Option<PreviewTap>,
}

impl PatternProducer {
    fn run(self, sender: Sender<VideoFrame>, evict: Receiver<VideoFrame>) {
        let mut next_frame_time = Instant::now();
        let mut sequence = 0u64;

        while !self.should_stop.load(Ordering::SeqCst) {
            if !self.present.load(Ordering::SeqCst) {
                warn!("Camera removed, ending capture");
                return;
            }

            let now = Instant::now();
            if next_frame_time > now {
                thread::sleep((next_frame_time - now).min(Duration::from_millis(5)));
                continue;
            }

            let frame = VideoFrame {
                data: Bytes::from(render_pattern(self.width, self.height, sequence * 4)),
                width: self.width,
                height: self.height,
                format: PixelFormat::Nv12,
                captured_at: next_frame_time,
                sequence,
            };
            sequence += 1;
            next_frame_time += self.interval;

            if let Some(preview) = &self.preview {
                preview.offer(&frame);
            }

            match offer(&sender, &evict, frame, self.queue.policy, &self.should_stop) {
                Offer::Queued => {}
                Offer::EvictedOldest | Offer::Dropped => {
                    trace!("Frame queue full, frame dropped");
                }
                Offer::Disconnected => break,
            }
        }

        debug!(frames = sequence, "Pattern producer exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_frames_are_valid_nv12() {
        let present = Arc::new(AtomicBool::new(true));
        let mut camera = TestPatternCamera::new(64, 36, present).with_frame_rate(30);
        let (tap, preview) = PreviewTap::new(4);
        let rx = camera.start(QueueConfig::default(), Some(tap)).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(frame.is_valid());
        assert_eq!((frame.width, frame.height), (64, 36));
        assert_eq!(frame.format, PixelFormat::Nv12);

        let copy = preview.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(copy.sequence, frame.sequence);

        camera.stop().unwrap();
    }

    #[test]
    fn odd_dimensions_are_rounded_down() {
        let camera = TestPatternCamera::new(65, 37, Arc::new(AtomicBool::new(true)));
        assert_eq!(camera.dimensions(), (64, 36));
    }

    #[test]
    fn bars_scroll_between_frames() {
        let first = render_pattern(64, 2, 0);
        let later = render_pattern(64, 2, 4);
        assert_ne!(first, later);
        assert_eq!(first[8], later[4]);
    }
}
