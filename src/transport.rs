use std::net::SocketAddr;

/// Error returned when the underlying socket could not send a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError;

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to send datagram")
    }
}

impl std::error::Error for SendError {}

/// Boundary with the socket collaborator. The transport core never performs
/// I/O itself; the writer hands every finished datagram to this trait.
pub trait PacketSender: Send + Sync {
    /// Sends a single finished datagram to the given address
    fn send(&self, payload: &[u8], addr: &SocketAddr) -> Result<(), SendError>;
}
