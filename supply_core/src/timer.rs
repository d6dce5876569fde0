//! Pausable elapsed-time source.
//!
//! While running, `elapsed()` is `now - start`; while paused it is frozen at
//! the value captured by `pause()`. `unpause()` rebases `start` so elapsed
//! time continues where it left off and adds the finished pause interval to
//! `total_paused()`, which lets callers map run time back to wall time.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use supply_traits::clock::{Clock, MonotonicClock};

pub struct Timer {
    clock: Arc<dyn Clock + Send + Sync>,
    start: Instant,
    paused: bool,
    elapsed_at_pause: Duration,
    pause_start: Option<Instant>,
    total_paused: Duration,
}

impl Timer {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            paused: false,
            elapsed_at_pause: Duration::ZERO,
            pause_start: None,
            total_paused: Duration::ZERO,
        }
    }

    /// Timer on the real monotonic clock.
    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicClock::new()))
    }

    /// Restart from zero, running, with no pause history.
    pub fn reset(&mut self) {
        self.start = self.clock.now();
        self.paused = false;
        self.elapsed_at_pause = Duration::ZERO;
        self.pause_start = None;
        self.total_paused = Duration::ZERO;
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        let now = self.clock.now();
        self.elapsed_at_pause = now.saturating_duration_since(self.start);
        self.pause_start = Some(now);
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        if !self.paused {
            return;
        }
        let now = self.clock.now();
        if let Some(began) = self.pause_start.take() {
            self.total_paused += now.saturating_duration_since(began);
        }
        self.start = now.checked_sub(self.elapsed_at_pause).unwrap_or(now);
        self.paused = false;
    }

    pub fn elapsed(&self) -> Duration {
        if self.paused {
            self.elapsed_at_pause
        } else {
            self.clock.now().saturating_duration_since(self.start)
        }
    }

    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Sum of completed pause intervals since the last reset.
    pub fn total_paused(&self) -> Duration {
        self.total_paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("elapsed", &self.elapsed())
            .field("paused", &self.paused)
            .field("total_paused", &self.total_paused)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supply_traits::clock::test_clock::TestClock;

    fn timer() -> (Timer, TestClock) {
        let clock = TestClock::new();
        (Timer::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn elapsed_tracks_clock_while_running() {
        let (t, clock) = timer();
        clock.advance_ms(250);
        assert_eq!(t.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn pause_freezes_and_unpause_resumes() {
        let (mut t, clock) = timer();
        clock.advance_ms(100);
        t.pause();
        clock.advance_ms(400);
        assert_eq!(t.elapsed(), Duration::from_millis(100));
        t.unpause();
        clock.advance_ms(50);
        assert_eq!(t.elapsed(), Duration::from_millis(150));
        assert_eq!(t.total_paused(), Duration::from_millis(400));
    }

    #[test]
    fn pause_is_idempotent() {
        let (mut t, clock) = timer();
        clock.advance_ms(10);
        t.pause();
        clock.advance_ms(10);
        t.pause();
        clock.advance_ms(10);
        t.unpause();
        t.unpause();
        assert_eq!(t.elapsed(), Duration::from_millis(10));
        assert_eq!(t.total_paused(), Duration::from_millis(20));
    }

    #[test]
    fn open_pause_is_not_counted() {
        let (mut t, clock) = timer();
        t.pause();
        clock.advance_ms(300);
        assert_eq!(t.total_paused(), Duration::ZERO);
        assert!(t.is_paused());
    }

    #[test]
    fn reset_clears_pause_accounting() {
        let (mut t, clock) = timer();
        t.pause();
        clock.advance_ms(300);
        t.unpause();
        t.reset();
        assert_eq!(t.total_paused(), Duration::ZERO);
        assert_eq!(t.elapsed(), Duration::ZERO);
        assert!(!t.is_paused());
    }

    #[test]
    fn elapsed_equals_wall_minus_completed_pauses() {
        let (mut t, clock) = timer();
        let origin = clock.offset();
        for (run, pause) in [(120u64, 30u64), (5, 500), (70, 1)] {
            clock.advance_ms(run);
            t.pause();
            clock.advance_ms(pause);
            t.unpause();
        }
        clock.advance_ms(9);
        let wall = clock.offset() - origin;
        assert_eq!(t.elapsed(), wall - t.total_paused());
        assert_eq!(t.total_paused(), Duration::from_millis(531));
    }
}
