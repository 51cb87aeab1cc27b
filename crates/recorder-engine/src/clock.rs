//! Pausable session clock.

use std::time::{Duration, Instant};

/// A stretch of wall time during which the session was running.
#[derive(Debug, Clone, Copy)]
struct Segment {
    begin: Instant,
    end: Option<Instant>,
    offset: Duration,
}

/// Maps wall-clock instants onto session time.
///
/// Session time starts at zero on [`start`] and excludes paused intervals.
/// All methods take the current instant explicitly so the mapping is
/// deterministic under test.
///
/// [`start`]: SessionClock::start
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    segments: Vec<Segment>,
}

impl SessionClock {
    /// Create a clock that has not started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at `now`. Restarting discards earlier history.
    pub fn start(&mut self, now: Instant) {
        self.segments.clear();
        self.segments.push(Segment {
            begin: now,
            end: None,
            offset: Duration::ZERO,
        });
    }

    /// Whether the clock has been started.
    pub fn is_started(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Whether the clock is currently advancing.
    pub fn is_running(&self) -> bool {
        self.segments.last().is_some_and(|s| s.end.is_none())
    }

    /// Freeze the clock. No-op when already paused.
    pub fn pause(&mut self, now: Instant) {
        if let Some(segment) = self.segments.last_mut() {
            if segment.end.is_none() {
                segment.end = Some(now.max(segment.begin));
            }
        }
    }

    /// Continue from where the clock was frozen.
    pub fn resume(&mut self, now: Instant) {
        if self.is_running() || !self.is_started() {
            return;
        }
        let offset = self.elapsed(now);
        self.segments.push(Segment {
            begin: now,
            end: None,
            offset,
        });
    }

    /// Session time at `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.segments.last() {
            None => Duration::ZERO,
            Some(segment) => {
                let until = segment.end.unwrap_or(now).max(segment.begin);
                segment.offset + until.saturating_duration_since(segment.begin)
            }
        }
    }

    /// Session time of a unit captured at `instant`.
    ///
    /// Returns `None` for instants that fall in a paused interval or after
    /// the clock was frozen. Instants before the start map to zero.
    pub fn to_session(&self, instant: Instant) -> Option<Duration> {
        let first = self.segments.first()?;
        if instant < first.begin {
            return Some(Duration::ZERO);
        }
        self.segments
            .iter()
            .rev()
            .find(|s| s.begin <= instant)
            .and_then(|s| match s.end {
                Some(end) if instant >= end => None,
                _ => Some(s.offset + (instant - s.begin)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn paused_interval_is_excluded() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(t0);
        clock.pause(t0 + ms(1000));
        assert_eq!(clock.elapsed(t0 + ms(5000)), ms(1000));

        clock.resume(t0 + ms(3000));
        assert_eq!(clock.elapsed(t0 + ms(3500)), ms(1500));
        assert!(clock.is_running());
    }

    #[test]
    fn units_captured_while_paused_are_rejected() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(t0);
        clock.pause(t0 + ms(100));
        clock.resume(t0 + ms(300));

        assert_eq!(clock.to_session(t0 + ms(50)), Some(ms(50)));
        assert_eq!(clock.to_session(t0 + ms(200)), None);
        assert_eq!(clock.to_session(t0 + ms(350)), Some(ms(150)));
    }

    #[test]
    fn early_units_map_to_zero() {
        let t0 = Instant::now() + ms(10);
        let mut clock = SessionClock::new();
        assert_eq!(clock.to_session(t0), None);
        clock.start(t0);
        assert_eq!(clock.to_session(t0 - ms(5)), Some(Duration::ZERO));
    }

    #[test]
    fn double_pause_keeps_first_freeze() {
        let t0 = Instant::now();
        let mut clock = SessionClock::new();
        clock.start(t0);
        clock.pause(t0 + ms(100));
        clock.pause(t0 + ms(400));
        assert_eq!(clock.elapsed(t0 + ms(900)), ms(100));
    }
}
