use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::{
    connection::{
        error::{EnqueueError, ReceiveError},
        session_state::SessionState,
        stats::StatsSnapshot,
    },
    protocol::packet::ApplicationPacket,
    transport::SendError,
};

/// Capability set shared by every protocol variant of a session. The session
/// manager selects a concrete implementation per connection at handshake
/// time; callers only ever see this interface.
pub trait SessionEndpoint: Send + Sync {
    /// Accepts one logical application message for transmission
    fn enqueue_outbound(&self, opcode: u16, payload: &[u8], reliable: bool)
        -> Result<(), EnqueueError>;

    /// Removes and returns the next decoded application packet, in delivery
    /// order
    fn poll_inbound(&self) -> Option<ApplicationPacket>;

    /// Returns a copy of the next application packet without removing it
    fn peek_inbound(&self) -> Option<ApplicationPacket>;

    /// Feeds one raw datagram into the session
    fn receive(&self, bytes: &[u8], sender_addr: SocketAddr) -> Result<(), ReceiveError>;

    /// Periodic work: retransmission check, rate decay, and the rate-limited
    /// writer pass
    fn tick(&self, now: Instant) -> Result<(), SendError>;

    /// Begins an orderly application-side close
    fn close(&self);

    fn session_state(&self) -> SessionState;

    /// Idle-timeout check; escalates per the lifecycle rules
    fn check_timeout(&self, now: Instant, idle_timeout: Duration);

    fn remote_addr(&self) -> SocketAddr;

    fn stats(&self) -> StatsSnapshot;
}
