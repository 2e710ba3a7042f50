use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::{
    protocol::packet::ProtocolPacket,
    sequencer::{SequenceStatus, Sequencer},
};

/// One sent-but-unacknowledged sequenced packet
pub struct SequencedEntry {
    pub packet: ProtocolPacket,
    /// Set by an out-of-order acknowledgment when acked-packet retransmission
    /// is disabled; skipped on the next pass.
    pub acked: bool,
    pub first_sent_at: Option<Instant>,
    pub transmit_count: u32,
}

/// Result of processing a cumulative acknowledgment
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Nothing new was acknowledged
    Stale,
    /// The window advanced; carries an RTT sample when the newest
    /// acknowledged packet had been transmitted exactly once
    Advanced { rtt_sample: Option<Duration> },
    /// The queue ran out before the ack target was reached; counters were
    /// resynchronized to the best available consistent values
    Resynchronized,
}

/// Outbound half of a session: the reliability queue of unacknowledged
/// sequenced packets, the FIFO of unsequenced best-effort packets, and the
/// sequence counters tied to both.
///
/// Invariants (validated defensively, never panicked on):
/// `sequenced_base + pending.len() == next_out_seq` and
/// `next_send_index <= pending.len()`.
pub struct OutboundChannel {
    pending: VecDeque<SequencedEntry>,
    unsequenced: VecDeque<ProtocolPacket>,
    next_out_seq: u16,
    sequenced_base: u16,
    next_send_index: usize,
    sequencer: Sequencer,
    retransmit_acked: bool,
    retransmit_timeout: Duration,
    last_ack_at: Instant,
    retransmit_passes: u64,
}

impl OutboundChannel {
    pub fn new(
        window_size: u16,
        retransmit_acked: bool,
        initial_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            pending: VecDeque::new(),
            unsequenced: VecDeque::new(),
            next_out_seq: 0,
            sequenced_base: 0,
            next_send_index: 0,
            sequencer: Sequencer::new(window_size),
            retransmit_acked,
            retransmit_timeout: initial_timeout,
            last_ack_at: now,
            retransmit_passes: 0,
        }
    }

    pub fn sequenced_base(&self) -> u16 {
        self.sequenced_base
    }

    pub fn next_out_seq(&self) -> u16 {
        self.next_out_seq
    }

    pub fn next_send_index(&self) -> usize {
        self.next_send_index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn retransmit_passes(&self) -> u64 {
        self.retransmit_passes
    }

    /// Checks the queue/counter invariants and repairs them if violated.
    /// A violation is a bug, but a live session degrades gracefully instead
    /// of crashing.
    fn validate(&mut self) {
        let expected = self.sequenced_base.wrapping_add(self.pending.len() as u16);
        if expected != self.next_out_seq {
            error!(
                "Reliability queue inconsistent: base {} + len {} != next_out {}; resynchronizing",
                self.sequenced_base,
                self.pending.len(),
                self.next_out_seq
            );
            self.sequenced_base = self.next_out_seq.wrapping_sub(self.pending.len() as u16);
        }
        if self.next_send_index > self.pending.len() {
            error!(
                "Send cursor {} past queue length {}; clamping",
                self.next_send_index,
                self.pending.len()
            );
            self.next_send_index = self.pending.len();
        }
    }

    /// Assigns the next outbound sequence number to the packet and appends it
    /// to the reliability queue. Returns the assigned sequence.
    pub fn send_sequenced(&mut self, mut packet: ProtocolPacket) -> u16 {
        self.validate();

        if packet.payload.len() < 2 {
            warn!("Sequenced packet built without sequence placeholder; repairing");
            let mut payload = vec![0u8; 2];
            payload.extend_from_slice(&packet.payload);
            packet.payload = payload;
        }
        let seq = self.next_out_seq;
        packet.payload[0..2].copy_from_slice(&seq.to_be_bytes());

        self.pending.push_back(SequencedEntry {
            packet,
            acked: false,
            first_sent_at: None,
            transmit_count: 0,
        });
        self.next_out_seq = self.next_out_seq.wrapping_add(1);

        self.validate();
        seq
    }

    /// Appends a best-effort packet (acks, keep-alives, unreliable data)
    pub fn send_unsequenced(&mut self, packet: ProtocolPacket) {
        self.unsequenced.push_back(packet);
    }

    /// Puts a packet at the head of the best-effort queue so it is the first
    /// thing combined on the next tick
    pub fn send_unsequenced_front(&mut self, packet: ProtocolPacket) {
        self.unsequenced.push_front(packet);
    }

    /// Processes a cumulative acknowledgment for everything up through `seq`
    pub fn on_ack(&mut self, seq: u16, now: Instant) -> AckOutcome {
        self.validate();

        // compare against the newest sequence already fully acknowledged, so
        // equality means "no advance"
        let last_acked = self.sequenced_base.wrapping_sub(1);
        match self.sequencer.classify(last_acked, seq) {
            SequenceStatus::InOrder | SequenceStatus::Past => {
                debug!("Stale acknowledgment for {}; ignoring", seq);
                AckOutcome::Stale
            }
            SequenceStatus::Future => {
                self.last_ack_at = now;
                let mut rtt_sample = None;
                let target = seq.wrapping_add(1);
                while self.sequenced_base != target {
                    let Some(entry) = self.pending.pop_front() else {
                        error!(
                            "Acknowledgment for {} exhausted the reliability queue; resynchronizing",
                            seq
                        );
                        self.sequenced_base = self.next_out_seq;
                        self.next_send_index = 0;
                        return AckOutcome::Resynchronized;
                    };
                    if self.sequenced_base == seq && entry.transmit_count == 1 {
                        rtt_sample = entry
                            .first_sent_at
                            .map(|sent| now.saturating_duration_since(sent));
                    }
                    self.sequenced_base = self.sequenced_base.wrapping_add(1);
                    self.next_send_index = self.next_send_index.saturating_sub(1);
                }
                AckOutcome::Advanced { rtt_sample }
            }
        }
    }

    /// Processes a notice that `seq` was received out of expected order.
    /// Inside the unacknowledged window this restarts the retransmission pass
    /// from the front; outside it is logged and ignored.
    pub fn on_out_of_order_ack(&mut self, seq: u16, now: Instant) {
        self.validate();

        let offset = seq.wrapping_sub(self.sequenced_base) as usize;
        if offset >= self.pending.len() {
            warn!(
                "Out-of-order acknowledgment for {} outside window [{}..{}); ignoring",
                seq,
                self.sequenced_base,
                self.next_out_seq
            );
            return;
        }

        if !self.retransmit_acked {
            if let Some(entry) = self.pending.get_mut(offset) {
                entry.acked = true;
            }
        }
        if self.next_send_index > 0 {
            self.retransmit_passes += 1;
        }
        self.next_send_index = 0;
        self.last_ack_at = now;
    }

    /// If no acknowledgment has arrived within the timeout and unacknowledged
    /// packets remain, restarts the retransmission pass from the front of the
    /// window (never endlessly from partway through).
    pub fn check_retransmit(&mut self, now: Instant) {
        if self.next_send_index == 0 || self.pending.is_empty() {
            return;
        }
        if now.saturating_duration_since(self.last_ack_at) > self.retransmit_timeout {
            debug!(
                "Retransmission timeout; restarting pass over [{}..{})",
                self.sequenced_base, self.next_out_seq
            );
            self.next_send_index = 0;
            self.last_ack_at = now;
            self.retransmit_passes += 1;
        }
    }

    pub fn set_retransmit_timeout(&mut self, timeout: Duration) {
        self.retransmit_timeout = timeout;
    }

    pub fn take_unsequenced(&mut self) -> Option<ProtocolPacket> {
        self.unsequenced.pop_front()
    }

    pub fn peek_unsequenced(&self) -> Option<&ProtocolPacket> {
        self.unsequenced.front()
    }

    fn skip_acked(&mut self) {
        while self.next_send_index < self.pending.len()
            && self.pending[self.next_send_index].acked
        {
            self.next_send_index += 1;
        }
    }

    /// The next sequenced packet due for (re)transmission, if any. Entries
    /// already acknowledged out of order are skipped, not resent.
    pub fn peek_transmittable(&mut self) -> Option<&ProtocolPacket> {
        self.skip_acked();
        self.pending.get(self.next_send_index).map(|e| &e.packet)
    }

    /// Marks the packet under the cursor as transmitted and moves past it
    pub fn advance_transmit_cursor(&mut self, now: Instant) {
        if let Some(entry) = self.pending.get_mut(self.next_send_index) {
            if entry.first_sent_at.is_none() {
                entry.first_sent_at = Some(now);
            }
            entry.transmit_count += 1;
            self.next_send_index += 1;
        }
    }

    /// Unsent or unacknowledged data still outstanding
    pub fn has_unfinished_data(&self) -> bool {
        !self.pending.is_empty() || !self.unsequenced.is_empty()
    }

    /// Anything available for the writer this tick
    pub fn has_transmittable(&mut self) -> bool {
        if !self.unsequenced.is_empty() {
            return true;
        }
        self.skip_acked();
        self.next_send_index < self.pending.len()
    }

    /// Drains both queues element-by-element during teardown
    pub fn clear(&mut self) {
        while self.pending.pop_front().is_some() {}
        while self.unsequenced.pop_front().is_some() {}
        self.next_send_index = 0;
        self.sequenced_base = self.next_out_seq;
    }
}

#[cfg(test)]
mod outbound_tests {
    use super::*;
    use crate::protocol::control_code::ControlCode;
    use std::time::{Duration, Instant};

    fn channel(retransmit_acked: bool) -> (OutboundChannel, Instant) {
        let now = Instant::now();
        let channel = OutboundChannel::new(2048, retransmit_acked, Duration::from_millis(500), now);
        (channel, now)
    }

    fn data_packet(byte: u8) -> ProtocolPacket {
        ProtocolPacket::new(ControlCode::Data, vec![0, 0, byte])
    }

    fn assert_invariant(channel: &OutboundChannel) {
        assert_eq!(
            channel
                .sequenced_base()
                .wrapping_add(channel.pending_len() as u16),
            channel.next_out_seq()
        );
        assert!(channel.next_send_index() <= channel.pending_len());
    }

    #[test]
    fn send_sequenced_assigns_and_serializes_sequence() {
        let (mut outbound, _) = channel(true);
        for expected in 0u16..5 {
            let seq = outbound.send_sequenced(data_packet(expected as u8));
            assert_eq!(seq, expected);
            assert_invariant(&outbound);
        }
        assert_eq!(outbound.next_out_seq(), 5);

        let first = outbound.peek_transmittable().unwrap();
        assert_eq!(first.sequence().unwrap(), 0);
    }

    #[test]
    fn cumulative_ack_frees_prefix() {
        let (mut outbound, now) = channel(true);
        for i in 0..5 {
            outbound.send_sequenced(data_packet(i));
        }
        let outcome = outbound.on_ack(2, now);
        assert!(matches!(outcome, AckOutcome::Advanced { .. }));
        assert_eq!(outbound.sequenced_base(), 3);
        assert_eq!(outbound.pending_len(), 2);
        assert_invariant(&outbound);
    }

    #[test]
    fn repeated_ack_is_idempotent() {
        let (mut outbound, now) = channel(true);
        for i in 0..3 {
            outbound.send_sequenced(data_packet(i));
        }
        assert!(matches!(
            outbound.on_ack(1, now),
            AckOutcome::Advanced { .. }
        ));
        let len_after_first = outbound.pending_len();
        assert_eq!(outbound.on_ack(1, now), AckOutcome::Stale);
        assert_eq!(outbound.pending_len(), len_after_first);
        assert_invariant(&outbound);
    }

    #[test]
    fn ack_past_queue_end_resynchronizes() {
        let (mut outbound, now) = channel(true);
        outbound.send_sequenced(data_packet(0));
        let outcome = outbound.on_ack(10, now);
        assert_eq!(outcome, AckOutcome::Resynchronized);
        assert_eq!(outbound.sequenced_base(), outbound.next_out_seq());
        assert_eq!(outbound.next_send_index(), 0);
        assert_invariant(&outbound);
    }

    #[test]
    fn ack_decrements_send_cursor() {
        let (mut outbound, now) = channel(true);
        for i in 0..4 {
            outbound.send_sequenced(data_packet(i));
        }
        // transmit the first three
        for _ in 0..3 {
            outbound.peek_transmittable().unwrap();
            outbound.advance_transmit_cursor(now);
        }
        assert_eq!(outbound.next_send_index(), 3);
        outbound.on_ack(1, now);
        assert_eq!(outbound.next_send_index(), 1);
        assert_invariant(&outbound);
    }

    #[test]
    fn out_of_order_ack_restarts_pass_from_front() {
        let (mut outbound, now) = channel(true);
        for i in 0..5 {
            outbound.send_sequenced(data_packet(i));
        }
        for _ in 0..5 {
            outbound.peek_transmittable().unwrap();
            outbound.advance_transmit_cursor(now);
        }
        outbound.on_out_of_order_ack(2, now);
        assert_eq!(outbound.next_send_index(), 0);
        // next transmitted packet is seq 0 again
        assert_eq!(
            outbound.peek_transmittable().unwrap().sequence().unwrap(),
            0
        );
    }

    #[test]
    fn marked_entries_are_skipped_when_retransmission_disabled() {
        let (mut outbound, now) = channel(false);
        for i in 0..5 {
            outbound.send_sequenced(data_packet(i));
        }
        for _ in 0..5 {
            outbound.peek_transmittable().unwrap();
            outbound.advance_transmit_cursor(now);
        }
        outbound.on_out_of_order_ack(0, now);
        // seq 0 was marked acknowledged, so the pass restarts at seq 1
        assert_eq!(
            outbound.peek_transmittable().unwrap().sequence().unwrap(),
            1
        );
    }

    #[test]
    fn out_of_window_out_of_order_ack_is_ignored() {
        let (mut outbound, now) = channel(true);
        outbound.send_sequenced(data_packet(0));
        outbound.peek_transmittable().unwrap();
        outbound.advance_transmit_cursor(now);
        outbound.on_out_of_order_ack(40, now);
        assert_eq!(outbound.next_send_index(), 1);
    }

    #[test]
    fn retransmit_timeout_resets_cursor() {
        let (mut outbound, now) = channel(true);
        outbound.send_sequenced(data_packet(0));
        outbound.peek_transmittable().unwrap();
        outbound.advance_transmit_cursor(now);
        assert_eq!(outbound.next_send_index(), 1);

        // before the timeout nothing happens
        outbound.check_retransmit(now + Duration::from_millis(100));
        assert_eq!(outbound.next_send_index(), 1);

        outbound.check_retransmit(now + Duration::from_millis(600));
        assert_eq!(outbound.next_send_index(), 0);
    }

    #[test]
    fn retransmit_timer_idle_when_cursor_at_front() {
        let (mut outbound, now) = channel(true);
        outbound.send_sequenced(data_packet(0));
        outbound.check_retransmit(now + Duration::from_secs(10));
        assert_eq!(outbound.retransmit_passes(), 0);
    }

    #[test]
    fn rtt_sample_only_for_single_transmission() {
        let (mut outbound, now) = channel(true);
        outbound.send_sequenced(data_packet(0));
        outbound.peek_transmittable().unwrap();
        outbound.advance_transmit_cursor(now);

        let later = now + Duration::from_millis(80);
        match outbound.on_ack(0, later) {
            AckOutcome::Advanced { rtt_sample } => {
                assert_eq!(rtt_sample, Some(Duration::from_millis(80)));
            }
            other => panic!("expected Advanced, got {:?}", other),
        }

        // a retransmitted packet yields no sample
        outbound.send_sequenced(data_packet(1));
        outbound.peek_transmittable().unwrap();
        outbound.advance_transmit_cursor(later);
        outbound.on_out_of_order_ack(1, later);
        outbound.peek_transmittable().unwrap();
        outbound.advance_transmit_cursor(later);
        match outbound.on_ack(1, later + Duration::from_millis(80)) {
            AckOutcome::Advanced { rtt_sample } => assert_eq!(rtt_sample, None),
            other => panic!("expected Advanced, got {:?}", other),
        }
    }

    #[test]
    fn clear_drains_everything() {
        let (mut outbound, _) = channel(true);
        for i in 0..3 {
            outbound.send_sequenced(data_packet(i));
        }
        outbound.send_unsequenced(ProtocolPacket::new(ControlCode::KeepAlive, Vec::new()));
        outbound.clear();
        assert!(!outbound.has_unfinished_data());
        assert_invariant(&outbound);
    }
}
