use std::collections::{HashMap, VecDeque};

use log::warn;

use crate::{
    connection::{
        error::ReceiveError,
        fragmentation::ReassemblyBuffer,
    },
    protocol::{
        control_code::ControlCode,
        packet::{parse_combined, read_app_packet, ApplicationPacket, ProtocolPacket},
        stream_type::StreamType,
    },
    sequencer::{SequenceStatus, Sequencer},
};

/// What the session should do after handing a sequenced packet to the inbound
/// channel.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundDisposition {
    /// One or more packets were delivered in order; the ack watermark now
    /// stands at `up_through`.
    Delivered { up_through: u16 },
    /// The packet is ahead of its predecessors and was buffered; the peer
    /// should be told via an out-of-order acknowledgment for `seq`.
    Buffered { seq: u16 },
    /// Duplicate or superseded; acknowledge again but discard.
    Duplicate,
}

/// Inbound half of a session: expected-sequence tracking, the reorder map for
/// out-of-order arrivals, the single reassembly context, and the delivery
/// queue the application polls.
pub struct InboundChannel {
    next_in_seq: u16,
    sequencer: Sequencer,
    reorder: HashMap<u16, ProtocolPacket>,
    reassembly: Option<ReassemblyBuffer>,
    delivery: VecDeque<ApplicationPacket>,
    stream: StreamType,
    reassembly_limit: usize,
}

impl InboundChannel {
    pub fn new(window_size: u16, stream: StreamType, reassembly_limit: usize) -> Self {
        Self {
            next_in_seq: 0,
            sequencer: Sequencer::new(window_size),
            reorder: HashMap::new(),
            reassembly: None,
            delivery: VecDeque::new(),
            stream,
            reassembly_limit,
        }
    }

    pub fn next_in_seq(&self) -> u16 {
        self.next_in_seq
    }

    /// Admits one sequenced packet (Data or Fragment)
    pub fn accept(&mut self, packet: ProtocolPacket) -> Result<InboundDisposition, ReceiveError> {
        let seq = packet.sequence()?;

        match self.sequencer.classify(self.next_in_seq, seq) {
            SequenceStatus::InOrder => {
                self.process_in_order(packet)?;
                self.next_in_seq = self.next_in_seq.wrapping_add(1);

                // drain everything the reorder map was holding for us
                while let Some(buffered) = self.reorder.remove(&self.next_in_seq) {
                    self.process_in_order(buffered)?;
                    self.next_in_seq = self.next_in_seq.wrapping_add(1);
                }

                Ok(InboundDisposition::Delivered {
                    up_through: self.next_in_seq.wrapping_sub(1),
                })
            }
            SequenceStatus::Future => {
                if self.reorder.contains_key(&seq) {
                    return Ok(InboundDisposition::Duplicate);
                }
                self.reorder.insert(seq, packet);
                Ok(InboundDisposition::Buffered { seq })
            }
            SequenceStatus::Past => Ok(InboundDisposition::Duplicate),
        }
    }

    /// Accepts a non-sequenced application packet (RawData)
    pub fn accept_unsequenced(&mut self, payload: &[u8]) {
        match read_app_packet(payload, self.stream) {
            Ok(app) => self.delivery.push_back(app),
            Err(error) => warn!("Dropping malformed unsequenced packet: {}", error),
        }
    }

    fn process_in_order(&mut self, packet: ProtocolPacket) -> Result<(), ReceiveError> {
        let body = &packet.payload[2..];
        match packet.code {
            ControlCode::Data => {
                match read_app_packet(body, self.stream) {
                    Ok(app) => self.delivery.push_back(app),
                    // a single malformed packet is dropped, never fatal
                    Err(error) => warn!("Dropping malformed data packet: {}", error),
                }
                Ok(())
            }
            ControlCode::Fragment => self.process_fragment(body),
            other => {
                warn!("Unexpected sequenced packet {:?}; dropping", other);
                Ok(())
            }
        }
    }

    // The wire cannot mark a fragment as leading or trailing, so a fragment
    // arriving with no open context is read as a lead and held to the lead's
    // validation: length prefix present, announcement under the guard.
    fn process_fragment(&mut self, chunk: &[u8]) -> Result<(), ReceiveError> {
        match self.reassembly.take() {
            None => {
                let buffer = ReassemblyBuffer::open(chunk, self.reassembly_limit)?;
                if buffer.is_complete() {
                    self.finish_reassembly(buffer.take());
                } else {
                    self.reassembly = Some(buffer);
                }
            }
            Some(mut buffer) => {
                buffer.push(chunk)?;
                if buffer.is_complete() {
                    self.finish_reassembly(buffer.take());
                } else {
                    self.reassembly = Some(buffer);
                }
            }
        }
        Ok(())
    }

    /// A reassembled message may itself be a combined packet; otherwise it is
    /// one application packet.
    fn finish_reassembly(&mut self, message: Vec<u8>) {
        let is_combined = message.len() >= 2
            && u16::from_be_bytes([message[0], message[1]]) == ControlCode::Combined.as_u16();

        if is_combined {
            match parse_combined(&message[2..]) {
                Ok(sub_packets) => {
                    for sub in sub_packets {
                        match sub.code {
                            ControlCode::RawData => self.accept_unsequenced(&sub.payload),
                            ControlCode::Data if sub.payload.len() >= 2 => {
                                // inner sequence numbers were consumed by the
                                // fragment chain that carried them
                                self.accept_unsequenced(&sub.payload[2..]);
                            }
                            other => {
                                warn!("Unexpected {:?} inside reassembled buffer; dropping", other)
                            }
                        }
                    }
                }
                Err(error) => warn!("Dropping malformed reassembled buffer: {}", error),
            }
            return;
        }

        match read_app_packet(&message, self.stream) {
            Ok(app) => self.delivery.push_back(app),
            Err(error) => warn!("Dropping malformed reassembled message: {}", error),
        }
    }

    pub fn poll(&mut self) -> Option<ApplicationPacket> {
        self.delivery.pop_front()
    }

    pub fn peek(&self) -> Option<&ApplicationPacket> {
        self.delivery.front()
    }

    /// Drains every held buffer element-by-element during teardown
    pub fn clear(&mut self) {
        for (_, packet) in self.reorder.drain() {
            drop(packet);
        }
        self.reassembly = None;
        while self.delivery.pop_front().is_some() {}
    }
}

#[cfg(test)]
mod inbound_tests {
    use super::*;
    use crate::{connection::error::FragmentError, wire::writer::PacketWriter};

    fn data_packet(seq: u16, opcode: u8, payload: &[u8]) -> ProtocolPacket {
        let mut writer = PacketWriter::new();
        writer.write_u16(seq);
        writer.write_u8(opcode);
        writer.write_bytes(payload);
        ProtocolPacket::new(ControlCode::Data, writer.into_bytes())
    }

    fn channel() -> InboundChannel {
        InboundChannel::new(2048, StreamType::Login, 1 << 20)
    }

    #[test]
    fn in_order_packet_is_delivered() {
        let mut inbound = channel();
        let disposition = inbound.accept(data_packet(0, 0x10, b"hi")).unwrap();
        assert_eq!(disposition, InboundDisposition::Delivered { up_through: 0 });
        let app = inbound.poll().unwrap();
        assert_eq!(app.opcode, 0x10);
        assert_eq!(app.payload, b"hi");
    }

    #[test]
    fn reordered_packets_drain_in_sequence_order() {
        let mut inbound = channel();
        inbound.accept(data_packet(0, 1, b"a")).unwrap();
        inbound.accept(data_packet(1, 1, b"b")).unwrap();
        inbound.accept(data_packet(2, 1, b"c")).unwrap();

        // expecting 3 next; deliver [5,4,6,3]
        assert_eq!(
            inbound.accept(data_packet(5, 1, b"f")).unwrap(),
            InboundDisposition::Buffered { seq: 5 }
        );
        assert_eq!(
            inbound.accept(data_packet(4, 1, b"e")).unwrap(),
            InboundDisposition::Buffered { seq: 4 }
        );
        assert_eq!(
            inbound.accept(data_packet(6, 1, b"g")).unwrap(),
            InboundDisposition::Buffered { seq: 6 }
        );
        assert_eq!(
            inbound.accept(data_packet(3, 1, b"d")).unwrap(),
            InboundDisposition::Delivered { up_through: 6 }
        );

        let delivered: Vec<Vec<u8>> = std::iter::from_fn(|| inbound.poll())
            .map(|app| app.payload)
            .collect();
        assert_eq!(
            delivered,
            vec![
                b"a".to_vec(),
                b"b".to_vec(),
                b"c".to_vec(),
                b"d".to_vec(),
                b"e".to_vec(),
                b"f".to_vec(),
                b"g".to_vec(),
            ]
        );
    }

    #[test]
    fn duplicate_of_buffered_packet_is_reported() {
        let mut inbound = channel();
        inbound.accept(data_packet(2, 1, b"x")).unwrap();
        assert_eq!(
            inbound.accept(data_packet(2, 1, b"x")).unwrap(),
            InboundDisposition::Duplicate
        );
    }

    #[test]
    fn stale_packet_is_a_duplicate() {
        let mut inbound = channel();
        inbound.accept(data_packet(0, 1, b"a")).unwrap();
        assert_eq!(
            inbound.accept(data_packet(0, 1, b"a")).unwrap(),
            InboundDisposition::Duplicate
        );
    }

    #[test]
    fn malformed_data_is_dropped_without_error() {
        let mut inbound = channel();
        // sequence number only, no application opcode
        let packet = ProtocolPacket::new(ControlCode::Data, vec![0, 0]);
        inbound.accept(packet).unwrap();
        assert!(inbound.poll().is_none());
        // sequence still advanced; the slot is consumed
        assert_eq!(inbound.next_in_seq(), 1);
    }

    #[test]
    fn stray_fragment_without_context_is_validated_as_a_lead() {
        let mut inbound = channel();

        // a trailing chunk too short to carry a lead's length prefix
        let mut writer = PacketWriter::new();
        writer.write_u16(0);
        writer.write_u8(0xAB);
        let stray = ProtocolPacket::new(ControlCode::Fragment, writer.into_bytes());
        let result = inbound.accept(stray);
        assert_eq!(
            result,
            Err(FragmentError::ShortLeadFragment { actual: 1 }.into())
        );

        // a trailing chunk whose first four bytes read as a hostile length
        let mut writer = PacketWriter::new();
        writer.write_u16(0);
        writer.write_u32(u32::MAX);
        let stray = ProtocolPacket::new(ControlCode::Fragment, writer.into_bytes());
        let result = inbound.accept(stray);
        assert!(matches!(
            result,
            Err(ReceiveError::Fragment(
                FragmentError::AnnouncedLengthTooLarge { .. }
            ))
        ));
    }

    #[test]
    fn clear_empties_every_queue() {
        let mut inbound = channel();
        inbound.accept(data_packet(0, 1, b"a")).unwrap();
        inbound.accept(data_packet(5, 1, b"z")).unwrap();
        inbound.clear();
        assert!(inbound.poll().is_none());
    }
}
