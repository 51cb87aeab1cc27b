//! Blocking waits on session time.

use std::collections::BTreeMap;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Default)]
struct WaitState {
    /// Session time reached so far, in milliseconds.
    reached_ms: u64,

    /// Waits return immediately while closed.
    open: bool,

    next_ticket: u64,

    /// Keyed by (target, arrival) so equal targets release first-come first.
    waiters: BTreeMap<(u64, u64), Sender<()>>,
}

/// Callers parked until the session reaches a timestamp.
///
/// Each waiter blocks on its own one-shot channel; [`advance`] wakes them
/// in ascending target order and [`close`] wakes everyone.
///
/// [`advance`]: WaitQueue::advance
/// [`close`]: WaitQueue::close
#[derive(Debug, Default)]
pub struct WaitQueue {
    state: Mutex<WaitState>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept waits for a new recording starting at zero.
    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        state.reached_ms = 0;
    }

    /// Release every waiter and make further waits return immediately.
    pub fn close(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.open = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            trace!(count = waiters.len(), "Releasing all waiters");
        }
        for (_, waker) in waiters {
            let _ = waker.send(());
        }
    }

    /// Record that the session reached `reached_ms` and wake due waiters.
    pub fn advance(&self, reached_ms: u64) {
        let mut state = self.state.lock();
        let reached = state.reached_ms.max(reached_ms);
        state.reached_ms = reached;
        while let Some(entry) = state.waiters.first_entry() {
            if entry.key().0 > reached {
                break;
            }
            let _ = entry.remove().send(());
        }
    }

    /// Block until the session reaches `target_ms` or the queue closes.
    ///
    /// Returns the session time reached when the wait ends.
    pub fn wait(&self, target_ms: u64) -> u64 {
        let receiver = {
            let mut state = self.state.lock();
            if !state.open || state.reached_ms >= target_ms {
                return state.reached_ms;
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (sender, receiver) = bounded(1);
            state.waiters.insert((target_ms, ticket), sender);
            trace!(target_ms, ticket, "Waiter parked");
            receiver
        };
        let _ = receiver.recv();
        self.state.lock().reached_ms
    }

    /// Number of parked waiters.
    pub fn pending(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn park(queue: &Arc<WaitQueue>, target: u64, order: &Arc<Mutex<Vec<u64>>>) -> thread::JoinHandle<()> {
        let queue = Arc::clone(queue);
        let order = Arc::clone(order);
        thread::spawn(move || {
            queue.wait(target);
            order.lock().push(target);
        })
    }

    fn wait_for_pending(queue: &WaitQueue, count: usize) {
        for _ in 0..200 {
            if queue.pending() == count {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("waiters never parked");
    }

    #[test]
    fn closed_queue_does_not_block() {
        let queue = WaitQueue::new();
        assert_eq!(queue.wait(10_000), 0);
    }

    #[test]
    fn reached_target_returns_immediately() {
        let queue = WaitQueue::new();
        queue.open();
        queue.advance(500);
        assert_eq!(queue.wait(200), 500);
    }

    #[test]
    fn advance_wakes_due_waiters_and_never_rewinds() {
        let queue = Arc::new(WaitQueue::new());
        queue.open();
        let order = Arc::new(Mutex::new(Vec::new()));
        let due = park(&queue, 300, &order);
        wait_for_pending(&queue, 1);

        queue.advance(300);
        due.join().unwrap();
        queue.advance(100);
        assert_eq!(queue.wait(250), 300);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn waiters_wake_in_target_order() {
        let queue = Arc::new(WaitQueue::new());
        queue.open();
        let order = Arc::new(Mutex::new(Vec::new()));

        let late = park(&queue, 600, &order);
        let early = park(&queue, 200, &order);
        wait_for_pending(&queue, 2);

        queue.advance(250);
        early.join().unwrap();
        assert_eq!(queue.pending(), 1);
        queue.advance(700);
        late.join().unwrap();
        assert_eq!(*order.lock(), vec![200, 600]);
    }

    #[test]
    fn close_releases_everyone() {
        let queue = Arc::new(WaitQueue::new());
        queue.open();
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = park(&queue, 1_000, &order);
        let b = park(&queue, 2_000, &order);
        wait_for_pending(&queue, 2);

        queue.close();
        a.join().unwrap();
        b.join().unwrap();
        assert_eq!(order.lock().len(), 2);
        assert_eq!(queue.wait(5_000), 0);
    }
}
