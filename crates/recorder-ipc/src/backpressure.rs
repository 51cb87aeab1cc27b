//! Bounded-queue producer helper shared by capture threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::types::BackpressurePolicy;

/// Slice a blocked producer waits before re-checking its stop flag.
const BLOCK_SLICE: Duration = Duration::from_millis(20);

/// Shape of a bounded capture queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued units.
    pub capacity: usize,

    /// What the producer does when the queue is full.
    pub policy: BackpressurePolicy,
}

impl QueueConfig {
    /// Create a bounded channel with this capacity.
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        crossbeam_channel::bounded(self.capacity.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            policy: BackpressurePolicy::default(),
        }
    }
}

/// Outcome of offering a unit to a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The unit was queued.
    Queued,

    /// The unit was queued after evicting the oldest one.
    EvictedOldest,

    /// The unit was discarded.
    Dropped,

    /// The consumer is gone.
    Disconnected,
}

/// Queue `item` on `sender`, applying `policy` when the queue is full.
///
/// `receiver` must be a clone of the queue's receiving end; it is only used
/// to evict under [`BackpressurePolicy::DropOldest`]. A blocked producer gives
/// up once `should_stop` is raised.
pub fn offer<T>(
    sender: &Sender<T>,
    receiver: &Receiver<T>,
    item: T,
    policy: BackpressurePolicy,
    should_stop: &AtomicBool,
) -> Offer {
    let item = match sender.try_send(item) {
        Ok(()) => return Offer::Queued,
        Err(TrySendError::Disconnected(_)) => return Offer::Disconnected,
        Err(TrySendError::Full(item)) => item,
    };

    match policy {
        BackpressurePolicy::DropNewest => Offer::Dropped,
        BackpressurePolicy::DropOldest => {
            // The consumer may drain concurrently; either way there is room.
            let _ = receiver.try_recv();
            match sender.try_send(item) {
                Ok(()) => Offer::EvictedOldest,
                Err(TrySendError::Full(_)) => Offer::Dropped,
                Err(TrySendError::Disconnected(_)) => Offer::Disconnected,
            }
        }
        BackpressurePolicy::Block => {
            let mut item = item;
            loop {
                match sender.send_timeout(item, BLOCK_SLICE) {
                    Ok(()) => return Offer::Queued,
                    Err(SendTimeoutError::Disconnected(_)) => return Offer::Disconnected,
                    Err(SendTimeoutError::Timeout(returned)) => {
                        if should_stop.load(Ordering::SeqCst) {
                            return Offer::Dropped;
                        }
                        item = returned;
                    }
                }
            }
        }
    }
}
