/// Lifecycle of one transport session.
///
/// `Closed` is terminal; every other state can reach it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Created, handshake not yet completed
    Unestablished,
    /// Handshake done, application traffic flows
    Established,
    /// Application asked to close but unsent/unacknowledged data remains
    Closing,
    /// Disconnect notice sent, waiting for the peer's reply or timeout
    Disconnecting,
    /// Fully torn down
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether application traffic may still be enqueued
    pub fn accepts_outbound(self) -> bool {
        matches!(self, SessionState::Established)
    }
}
