//! Process-wide session lease.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::RecorderError;
use crate::RecorderResult;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Proof that the holder owns the only recording session in the process.
///
/// Acquisition fails fast when another lease is alive; dropping the lease
/// frees it.
#[derive(Debug)]
pub struct SessionLease {
    _private: (),
}

impl SessionLease {
    /// Take the lease or fail with `SessionBusy`.
    pub fn acquire() -> RecorderResult<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RecorderError::SessionBusy)?;
        debug!("Session lease acquired");
        Ok(Self { _private: () })
    }

    /// Whether any lease is currently held.
    pub fn is_held() -> bool {
        SESSION_ACTIVE.load(Ordering::Acquire)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
        debug!("Session lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_lease_at_a_time() {
        let lease = SessionLease::acquire().unwrap();
        assert!(SessionLease::is_held());
        assert!(matches!(
            SessionLease::acquire(),
            Err(RecorderError::SessionBusy)
        ));
        drop(lease);
        assert!(!SessionLease::is_held());
        let again = SessionLease::acquire().unwrap();
        drop(again);
    }
}
