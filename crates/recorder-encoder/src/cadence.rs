//! Frame-rate enforcement for the video track.

use std::time::Duration;

use recorder_capture::VideoFrame;

/// A frame assigned to an output slot.
#[derive(Debug, Clone)]
pub struct CadenceSlot {
    /// Output frame index.
    pub index: u64,

    /// Frame shown in this slot.
    pub frame: VideoFrame,

    /// Whether the frame repeats an earlier one.
    pub held: bool,
}

/// Maps timestamped frames onto fixed `1/fps` output slots.
///
/// A frame at `pts` belongs to slot `floor(pts / interval)`. A frame whose
/// slot is already written is dropped, skipped slots repeat the previous
/// frame, and slots before the first frame show the first frame.
#[derive(Debug)]
pub struct FrameCadence {
    interval: Duration,
    next_slot: u64,
    last: Option<VideoFrame>,
    dropped: u64,
    held: u64,
}

impl FrameCadence {
    /// Create a cadence for `fps` frames per second.
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next_slot: 0,
            last: None,
            dropped: 0,
            held: 0,
        }
    }

    /// Slot duration.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn slot_of(&self, pts: Duration) -> u64 {
        (pts.as_nanos() / self.interval.as_nanos()) as u64
    }

    fn slots_covering(&self, end: Duration) -> u64 {
        let interval = self.interval.as_nanos();
        end.as_nanos().div_ceil(interval) as u64
    }

    /// Place a frame, returning the slots it fills.
    pub fn place(&mut self, pts: Duration, frame: VideoFrame) -> Vec<CadenceSlot> {
        let slot = self.slot_of(pts);
        if slot < self.next_slot {
            self.dropped += 1;
            return Vec::new();
        }

        let filler = self.last.clone().unwrap_or_else(|| frame.clone());
        let mut slots = Vec::with_capacity((slot - self.next_slot + 1) as usize);
        for index in self.next_slot..slot {
            slots.push(CadenceSlot {
                index,
                frame: filler.clone(),
                held: true,
            });
        }
        self.held += slot - self.next_slot;

        slots.push(CadenceSlot {
            index: slot,
            frame: frame.clone(),
            held: false,
        });
        self.next_slot = slot + 1;
        self.last = Some(frame);
        slots
    }

    /// Hold the last frame until the track covers `end`.
    pub fn finish(&mut self, end: Duration) -> Vec<CadenceSlot> {
        let Some(last) = self.last.clone() else {
            return Vec::new();
        };
        let total = self.slots_covering(end);
        let slots: Vec<CadenceSlot> = (self.next_slot..total)
            .map(|index| CadenceSlot {
                index,
                frame: last.clone(),
                held: true,
            })
            .collect();
        self.held += slots.len() as u64;
        self.next_slot = self.next_slot.max(total);
        slots
    }

    /// Number of slots written so far.
    pub fn slots_written(&self) -> u64 {
        self.next_slot
    }

    /// Frames discarded because their slot was already written.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Slots filled with a repeated frame.
    pub fn held(&self) -> u64 {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use recorder_ipc::PixelFormat;
    use std::time::Instant;

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame {
            data: Bytes::from_static(&[0; 6]),
            width: 2,
            height: 2,
            format: PixelFormat::Nv12,
            captured_at: Instant::now(),
            sequence,
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn extra_frames_in_a_slot_are_dropped() {
        let mut cadence = FrameCadence::new(10);
        assert_eq!(cadence.place(ms(0), frame(0)).len(), 1);
        assert!(cadence.place(ms(50), frame(1)).is_empty());
        assert_eq!(cadence.place(ms(100), frame(2))[0].index, 1);
        assert_eq!(cadence.dropped(), 1);
    }

    #[test]
    fn gaps_hold_the_previous_frame() {
        let mut cadence = FrameCadence::new(10);
        cadence.place(ms(0), frame(0));
        let slots = cadence.place(ms(350), frame(1));
        let summary: Vec<_> = slots.iter().map(|s| (s.index, s.frame.sequence, s.held)).collect();
        assert_eq!(summary, vec![(1, 0, true), (2, 0, true), (3, 1, false)]);
        assert_eq!(cadence.held(), 2);
    }

    #[test]
    fn leading_slots_use_the_first_frame() {
        let mut cadence = FrameCadence::new(20);
        let slots = cadence.place(ms(120), frame(7));
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.frame.sequence == 7));
        assert!(slots[0].held && !slots[2].held);
    }

    #[test]
    fn finish_covers_the_session_end() {
        let mut cadence = FrameCadence::new(10);
        cadence.place(ms(0), frame(0));
        let tail = cadence.finish(ms(1050));
        assert_eq!(tail.len(), 10);
        assert_eq!(cadence.slots_written(), 11);
        assert!(cadence.finish(ms(1050)).is_empty());
    }

    #[test]
    fn finish_without_frames_is_empty() {
        let mut cadence = FrameCadence::new(10);
        assert!(cadence.finish(ms(1000)).is_empty());
    }
}
