use std::time::Duration;

/// Configuration surface consumed by the transport core. Values are threaded
/// into the components that need them at construction; nothing here is read
/// through a global.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Sliding-window span for sequence classification
    pub max_window_size: u16,
    /// Smoothed RTT is multiplied by this to produce the retransmit timeout
    pub retransmit_timeout_multiplier: f32,
    /// Lower bound on the retransmit timeout
    pub retransmit_timeout_min: Duration,
    /// Upper bound on the retransmit timeout
    pub retransmit_timeout_max: Duration,
    /// When true (the reference default), packets individually acknowledged
    /// out of order are still retransmitted on the next pass; when false they
    /// are marked and skipped.
    pub retransmit_acked_packets: bool,
    /// Byte budget base for the rate limiter
    pub rate_base: u32,
    /// Bytes per second by which the rate counter decays
    pub decay_base: u32,
    /// A session with no traffic for this long is torn down
    pub idle_timeout: Duration,
    /// Interval between keep-alives on an otherwise idle session
    pub heartbeat_interval: Duration,
    /// Largest datagram this side is willing to negotiate
    pub max_datagram_size: u32,
    /// Guard on the announced total length of a reassembled message
    pub max_reassembly_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_window_size: 2048,
            retransmit_timeout_multiplier: 3.0,
            retransmit_timeout_min: Duration::from_millis(100),
            retransmit_timeout_max: Duration::from_secs(5),
            retransmit_acked_packets: true,
            rate_base: 65536,
            decay_base: 16384,
            idle_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            max_datagram_size: 512,
            max_reassembly_size: 2 * 1024 * 1024,
        }
    }
}
