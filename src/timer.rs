use std::time::{Duration, Instant};

/// A timer that rings once a fixed interval has elapsed since it was last
/// reset. Time is passed in explicitly so periodic work can share one clock
/// reading.
#[derive(Clone, Debug)]
pub struct Timer {
    duration: Duration,
    last: Instant,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last: Instant::now(),
        }
    }

    /// Returns whether the interval has elapsed
    pub fn ringing(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.duration
    }

    /// Restarts the interval from `now`
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
