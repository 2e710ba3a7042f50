/// The "acknowledge up through X" watermark pair: the newest in-order
/// sequence delivered to the application, and the newest value actually sent
/// to the peer. The writer emits a cumulative ack whenever the two differ.
#[derive(Clone, Copy, Debug, Default)]
pub struct AckState {
    delivered_through: Option<u16>,
    last_sent: Option<u16>,
}

impl AckState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that everything up through `seq` has been delivered in order
    pub fn observe_delivered(&mut self, seq: u16) {
        self.delivered_through = Some(seq);
    }

    /// Forces the next tick to re-send the current watermark even if it was
    /// already sent (used when a stale duplicate suggests the peer missed it)
    pub fn force_resend(&mut self) {
        if self.delivered_through.is_some() {
            self.last_sent = None;
        }
    }

    /// Takes the watermark if it has advanced past the last value sent
    pub fn take_due(&mut self) -> Option<u16> {
        if self.delivered_through != self.last_sent {
            self.last_sent = self.delivered_through;
            return self.delivered_through;
        }
        None
    }

    pub fn delivered_through(&self) -> Option<u16> {
        self.delivered_through
    }

    pub fn clear(&mut self) {
        self.delivered_through = None;
        self.last_sent = None;
    }
}

#[cfg(test)]
mod ack_state_tests {
    use super::AckState;

    #[test]
    fn nothing_due_initially() {
        let mut acks = AckState::new();
        assert_eq!(acks.take_due(), None);
    }

    #[test]
    fn advance_makes_ack_due_once() {
        let mut acks = AckState::new();
        acks.observe_delivered(4);
        assert_eq!(acks.take_due(), Some(4));
        assert_eq!(acks.take_due(), None);
    }

    #[test]
    fn force_resend_repeats_watermark() {
        let mut acks = AckState::new();
        acks.observe_delivered(4);
        acks.take_due();
        acks.force_resend();
        assert_eq!(acks.take_due(), Some(4));
    }

    #[test]
    fn force_resend_without_delivery_stays_quiet() {
        let mut acks = AckState::new();
        acks.force_resend();
        assert_eq!(acks.take_due(), None);
    }
}
