use std::time::Duration;

/// Smoothed round-trip tracker. Samples come from singly-transmitted
/// sequenced packets; the smoothed value drives both the retransmission
/// timeout and the rate limiter's threshold.
#[derive(Clone, Debug)]
pub struct RttTracker {
    srtt_ms: f32,
    has_sample: bool,
    multiplier: f32,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl RttTracker {
    /// Assumed RTT before the first sample arrives
    const INITIAL_RTT_MS: f32 = 250.0;

    pub fn new(multiplier: f32, min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            srtt_ms: Self::INITIAL_RTT_MS,
            has_sample: false,
            multiplier,
            min_timeout,
            max_timeout,
        }
    }

    /// Folds one measured sample into the smoothed value (7/8 old, 1/8 new)
    pub fn record_sample(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f32() * 1000.0;
        if self.has_sample {
            self.srtt_ms = self.srtt_ms * 0.875 + sample_ms * 0.125;
        } else {
            self.srtt_ms = sample_ms;
            self.has_sample = true;
        }
    }

    pub fn smoothed(&self) -> Duration {
        Duration::from_secs_f32(self.srtt_ms / 1000.0)
    }

    pub fn smoothed_millis(&self) -> u32 {
        self.srtt_ms as u32
    }

    /// Current retransmission timeout, bounded by the configured min and max
    pub fn retransmit_timeout(&self) -> Duration {
        let timeout = Duration::from_secs_f32(self.srtt_ms * self.multiplier / 1000.0);
        timeout.clamp(self.min_timeout, self.max_timeout)
    }
}

#[cfg(test)]
mod rtt_tests {
    use super::RttTracker;
    use std::time::Duration;

    fn tracker() -> RttTracker {
        RttTracker::new(3.0, Duration::from_millis(100), Duration::from_secs(5))
    }

    #[test]
    fn first_sample_replaces_initial_guess() {
        let mut rtt = tracker();
        rtt.record_sample(Duration::from_millis(40));
        assert_eq!(rtt.smoothed_millis(), 40);
    }

    #[test]
    fn later_samples_are_smoothed() {
        let mut rtt = tracker();
        rtt.record_sample(Duration::from_millis(40));
        rtt.record_sample(Duration::from_millis(120));
        // 40 * 7/8 + 120 * 1/8 = 50
        assert_eq!(rtt.smoothed_millis(), 50);
    }

    #[test]
    fn timeout_is_clamped() {
        let mut rtt = tracker();
        rtt.record_sample(Duration::from_millis(10));
        assert_eq!(rtt.retransmit_timeout(), Duration::from_millis(100));

        rtt.record_sample(Duration::from_secs(600));
        // smoothing needs several huge samples to saturate
        for _ in 0..20 {
            rtt.record_sample(Duration::from_secs(600));
        }
        assert_eq!(rtt.retransmit_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn timeout_tracks_multiplier() {
        let mut rtt = tracker();
        rtt.record_sample(Duration::from_millis(100));
        assert_eq!(rtt.retransmit_timeout(), Duration::from_millis(300));
    }
}
