use std::time::Instant;

/// Token/decay rate limiter for the writer. `bytes_written` rises with every
/// byte sent and decays continuously; while it sits above the threshold the
/// writer pauses. The threshold shrinks as the measured RTT grows.
#[derive(Clone, Debug)]
pub struct RateState {
    bytes_written: u32,
    threshold: u32,
    rate_base: u32,
    decay_base: u32,
    last_decay: Instant,
}

impl RateState {
    /// The threshold never drops below room for one full datagram
    const THRESHOLD_FLOOR: u32 = 1024;

    pub fn new(rate_base: u32, decay_base: u32, now: Instant) -> Self {
        Self {
            bytes_written: 0,
            threshold: rate_base,
            rate_base,
            decay_base,
            last_decay: now,
        }
    }

    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether the writer may emit another datagram this tick
    pub fn allow(&self) -> bool {
        self.bytes_written < self.threshold
    }

    pub fn record(&mut self, bytes: usize) {
        self.bytes_written = self.bytes_written.saturating_add(bytes as u32);
    }

    /// Decays the counter by `decay_base` bytes per second of elapsed time
    pub fn decay(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_decay).as_millis() as u64;
        let decayed = (elapsed_ms * self.decay_base as u64 / 1000) as u32;
        if decayed > 0 {
            self.bytes_written = self.bytes_written.saturating_sub(decayed);
            self.last_decay = now;
        }
    }

    /// Recomputes the threshold from fresh round-trip statistics; a larger
    /// RTT lowers the threshold.
    pub fn on_rtt_update(&mut self, srtt_millis: u32) {
        let scaled = (self.rate_base as u64 * 100 / (100 + srtt_millis as u64)) as u32;
        self.threshold = scaled.max(Self::THRESHOLD_FLOOR);
    }
}

#[cfg(test)]
mod rate_tests {
    use super::RateState;
    use std::time::{Duration, Instant};

    #[test]
    fn pauses_above_threshold() {
        let now = Instant::now();
        let mut rate = RateState::new(4096, 1024, now);
        assert!(rate.allow());
        rate.record(4096);
        assert!(!rate.allow());
    }

    #[test]
    fn decay_restores_budget() {
        let now = Instant::now();
        let mut rate = RateState::new(4096, 1024, now);
        rate.record(4096);
        rate.decay(now + Duration::from_secs(4));
        assert_eq!(rate.bytes_written(), 0);
        assert!(rate.allow());
    }

    #[test]
    fn sub_millisecond_elapsed_does_not_lose_time() {
        let now = Instant::now();
        let mut rate = RateState::new(4096, 1024, now);
        rate.record(2048);
        // too little time to decay a whole byte; last_decay must not move
        rate.decay(now + Duration::from_micros(100));
        rate.decay(now + Duration::from_secs(1));
        assert_eq!(rate.bytes_written(), 2048 - 1024);
    }

    #[test]
    fn larger_rtt_lowers_threshold() {
        let now = Instant::now();
        let mut rate = RateState::new(65536, 1024, now);
        rate.on_rtt_update(50);
        let fast = rate.threshold();
        rate.on_rtt_update(400);
        let slow = rate.threshold();
        assert!(slow < fast);
    }

    #[test]
    fn threshold_never_starves_completely() {
        let now = Instant::now();
        let mut rate = RateState::new(65536, 1024, now);
        rate.on_rtt_update(u32::MAX / 2);
        assert!(rate.threshold() >= 1024);
    }
}
