use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;
use rand::Rng;

use crate::{
    connection::{
        ack_state::AckState,
        connection_config::ConnectionConfig,
        endpoint::SessionEndpoint,
        error::{EnqueueError, ReceiveError},
        fragmentation::{fragment_threshold, split_message},
        inbound::{InboundChannel, InboundDisposition},
        lock,
        outbound::{AckOutcome, OutboundChannel},
        rate::RateState,
        rtt::RttTracker,
        session_state::SessionState,
        stats::{SessionStats, StatsSnapshot},
    },
    protocol::{
        control_code::ControlCode,
        packet::{
            split_combined, sub_packet_frame_len, write_app_packet, write_sub_packet,
            ApplicationPacket, Disconnect, DisconnectReason, ProtocolPacket, SessionRequest,
        },
        stream_type::StreamType,
    },
    timer::Timer,
    transport::{PacketSender, SendError},
    wire::{codec::WireCodec, error::WireError, reader::PacketReader, writer::PacketWriter},
};

/// First body byte of a legacy session-open request; distinguishes it from
/// other single-byte-header packets before any session state exists.
pub const LEGACY_REQUEST_MARKER: u8 = 0xFF;

/// Session-open response body for the legacy variant; it never negotiates
/// compression or obfuscation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LegacyResponse {
    session_id: u32,
    session_key: u32,
    max_length: u32,
}

impl LegacyResponse {
    fn write(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.session_id);
        writer.write_u32(self.session_key);
        writer.write_u32(self.max_length);
    }

    fn read(reader: &mut PacketReader) -> Result<Self, WireError> {
        Ok(Self {
            session_id: reader.read_u32()?,
            session_key: reader.read_u32()?,
            max_length: reader.read_u32()?,
        })
    }
}

/// Serializes a packet with the legacy single-byte bit-field header
fn serialize_legacy(packet: &ProtocolPacket) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + packet.payload.len());
    writer.write_u8(packet.code.to_legacy_byte());
    writer.write_bytes(&packet.payload);
    writer.into_bytes()
}

/// Parses a legacy-framed packet
fn parse_legacy(bytes: &[u8]) -> Result<ProtocolPacket, WireError> {
    let mut reader = PacketReader::new(bytes);
    let code = ControlCode::from_legacy_byte(reader.read_u8()?)?;
    Ok(ProtocolPacket::new(code, reader.read_to_end().to_vec()))
}

struct LegacyLifecycle {
    state: SessionState,
    last_activity: Instant,
    session_id: u32,
    negotiated_max: u32,
    heartbeat: Timer,
}

/// A transport connection speaking the legacy protocol variant: single-byte
/// packet headers and no payload compression or obfuscation. The reliability
/// machinery underneath is shared with the current variant.
pub struct LegacySession {
    remote_addr: SocketAddr,
    stream: StreamType,
    config: ConnectionConfig,
    sender: Arc<dyn PacketSender>,
    lifecycle: Mutex<LegacyLifecycle>,
    outbound: Mutex<OutboundChannel>,
    inbound: Mutex<InboundChannel>,
    acks: Mutex<AckState>,
    rate: Mutex<RateState>,
    rtt: Mutex<RttTracker>,
    codec: Mutex<WireCodec>,
    stats: SessionStats,
}

impl LegacySession {
    pub fn responder(
        remote_addr: SocketAddr,
        stream: StreamType,
        config: ConnectionConfig,
        sender: Arc<dyn PacketSender>,
    ) -> Result<Self, WireError> {
        let now = Instant::now();
        let rtt = RttTracker::new(
            config.retransmit_timeout_multiplier,
            config.retransmit_timeout_min,
            config.retransmit_timeout_max,
        );
        let initial_timeout = rtt.retransmit_timeout();

        Ok(Self {
            remote_addr,
            stream,
            lifecycle: Mutex::new(LegacyLifecycle {
                state: SessionState::Unestablished,
                last_activity: now,
                session_id: 0,
                negotiated_max: config.max_datagram_size,
                heartbeat: Timer::new(config.heartbeat_interval),
            }),
            outbound: Mutex::new(OutboundChannel::new(
                config.max_window_size,
                config.retransmit_acked_packets,
                initial_timeout,
                now,
            )),
            inbound: Mutex::new(InboundChannel::new(
                config.max_window_size,
                stream,
                config.max_reassembly_size,
            )),
            acks: Mutex::new(AckState::new()),
            rate: Mutex::new(RateState::new(config.rate_base, config.decay_base, now)),
            rtt: Mutex::new(rtt),
            codec: Mutex::new(WireCodec::new(1)?),
            stats: SessionStats::new(),
            sender,
            config,
        })
    }

    pub fn session_id(&self) -> u32 {
        lock(&self.lifecycle).session_id
    }

    fn send_disconnect_now(&self, reason: DisconnectReason) {
        let session_id = lock(&self.lifecycle).session_id;
        let mut writer = PacketWriter::new();
        Disconnect { session_id, reason }.write(&mut writer);
        let packet = ProtocolPacket::new(ControlCode::Disconnect, writer.into_bytes());
        let framed = match lock(&self.codec).frame(&serialize_legacy(&packet), false) {
            Ok(framed) => framed,
            Err(error) => {
                warn!("Could not frame legacy disconnect notice: {}", error);
                return;
            }
        };
        if self.sender.send(&framed, &self.remote_addr).is_err() {
            warn!("Could not send legacy disconnect notice to {}", self.remote_addr);
        } else {
            self.stats.record_sent(framed.len());
        }
    }

    fn enter_closed(&self) {
        lock(&self.lifecycle).state = SessionState::Closed;
        lock(&self.outbound).clear();
        lock(&self.inbound).clear();
        lock(&self.acks).clear();
    }

    fn handle_session_request(&self, payload: &[u8], now: Instant) {
        let mut reader = PacketReader::new(payload);
        let marker = match reader.read_u8() {
            Ok(marker) => marker,
            Err(error) => {
                warn!("Dropping malformed legacy session-open request: {}", error);
                return;
            }
        };
        if marker != LEGACY_REQUEST_MARKER {
            warn!(
                "Legacy session-open request without marker (0x{:02X}); dropping",
                marker
            );
            return;
        }
        let request = match SessionRequest::read(&mut reader) {
            Ok(request) => request,
            Err(error) => {
                warn!("Dropping malformed legacy session-open request: {}", error);
                return;
            }
        };

        if lock(&self.lifecycle).state == SessionState::Established {
            warn!(
                "Legacy session-open request on established session {}; disconnecting",
                request.session_id
            );
            self.send_disconnect_now(DisconnectReason::ProtocolViolation);
            self.enter_closed();
            return;
        }

        let negotiated_max = request.max_length.min(self.config.max_datagram_size);
        let session_key: u32 = rand::thread_rng().gen();
        let retransmit_timeout = lock(&self.rtt).retransmit_timeout();
        {
            let mut outbound = lock(&self.outbound);
            *outbound = OutboundChannel::new(
                self.config.max_window_size,
                self.config.retransmit_acked_packets,
                retransmit_timeout,
                now,
            );
        }
        {
            let mut inbound = lock(&self.inbound);
            *inbound = InboundChannel::new(
                self.config.max_window_size,
                self.stream,
                self.config.max_reassembly_size,
            );
        }
        lock(&self.acks).clear();
        // the key only feeds the trailing checksum on this variant
        lock(&self.codec).rekey(session_key, false, false);
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.session_id = request.session_id;
            lifecycle.negotiated_max = negotiated_max;
            lifecycle.state = SessionState::Established;
        }

        let mut writer = PacketWriter::new();
        LegacyResponse {
            session_id: request.session_id,
            session_key,
            max_length: negotiated_max,
        }
        .write(&mut writer);
        let packet = ProtocolPacket::new(ControlCode::SessionResponse, writer.into_bytes());
        let bytes = serialize_legacy(&packet);
        if self.sender.send(&bytes, &self.remote_addr).is_err() {
            warn!(
                "Could not send legacy session-open response to {}",
                self.remote_addr
            );
        } else {
            self.stats.record_sent(bytes.len());
            lock(&self.lifecycle).heartbeat.reset(now);
        }
    }

    fn handle_disconnect(&self) {
        let state = lock(&self.lifecycle).state;
        match state {
            SessionState::Established | SessionState::Closing => {
                self.send_disconnect_now(DisconnectReason::OtherSideTerminated);
                self.enter_closed();
            }
            _ => self.enter_closed(),
        }
    }

    fn handle_sequenced(&self, packet: ProtocolPacket) -> Result<(), ReceiveError> {
        let disposition = lock(&self.inbound).accept(packet)?;
        match disposition {
            InboundDisposition::Delivered { up_through } => {
                lock(&self.acks).observe_delivered(up_through);
            }
            InboundDisposition::Buffered { seq } => {
                let mut writer = PacketWriter::new();
                writer.write_u16(seq);
                lock(&self.outbound).send_unsequenced(ProtocolPacket::new(
                    ControlCode::OutOfOrderAck,
                    writer.into_bytes(),
                ));
            }
            InboundDisposition::Duplicate => {
                self.stats.record_duplicate();
                lock(&self.acks).force_resend();
            }
        }
        Ok(())
    }

    fn handle_ack(&self, payload: &[u8], now: Instant) {
        let seq = match PacketReader::new(payload).read_u16() {
            Ok(seq) => seq,
            Err(error) => {
                warn!("Dropping malformed legacy acknowledgment: {}", error);
                return;
            }
        };
        let outcome = lock(&self.outbound).on_ack(seq, now);
        if let AckOutcome::Advanced {
            rtt_sample: Some(sample),
        } = outcome
        {
            let (timeout, srtt_millis) = {
                let mut rtt = lock(&self.rtt);
                rtt.record_sample(sample);
                (rtt.retransmit_timeout(), rtt.smoothed_millis())
            };
            lock(&self.outbound).set_retransmit_timeout(timeout);
            lock(&self.rate).on_rtt_update(srtt_millis);
        }
    }

    fn handle_out_of_order_ack(&self, payload: &[u8], now: Instant) {
        let seq = match PacketReader::new(payload).read_u16() {
            Ok(seq) => seq,
            Err(error) => {
                warn!(
                    "Dropping malformed legacy out-of-order acknowledgment: {}",
                    error
                );
                return;
            }
        };
        lock(&self.outbound).on_out_of_order_ack(seq, now);
    }

    fn process_packet(
        &self,
        packet: ProtocolPacket,
        now: Instant,
        depth: u8,
    ) -> Result<(), ReceiveError> {
        match packet.code {
            ControlCode::Combined => {
                if depth > 0 {
                    warn!("Nested legacy combined packet; dropping");
                    return Ok(());
                }
                let frames = match split_combined(&packet.payload) {
                    Ok(frames) => frames.iter().map(|f| f.to_vec()).collect::<Vec<_>>(),
                    Err(error) => {
                        warn!("Dropping malformed legacy combined packet: {}", error);
                        return Ok(());
                    }
                };
                for frame in frames {
                    match parse_legacy(&frame) {
                        Ok(sub) => self.process_packet(sub, now, depth + 1)?,
                        Err(error) => warn!("Dropping malformed legacy sub-packet: {}", error),
                    }
                }
                Ok(())
            }
            ControlCode::SessionRequest => {
                self.handle_session_request(&packet.payload, now);
                Ok(())
            }
            ControlCode::SessionResponse => {
                warn!("Unexpected legacy session-open response; dropping");
                Ok(())
            }
            ControlCode::Disconnect => {
                self.handle_disconnect();
                Ok(())
            }
            ControlCode::KeepAlive => Ok(()),
            ControlCode::Data | ControlCode::Fragment => self.handle_sequenced(packet),
            ControlCode::Ack => {
                self.handle_ack(&packet.payload, now);
                Ok(())
            }
            ControlCode::OutOfOrderAck => {
                self.handle_out_of_order_ack(&packet.payload, now);
                Ok(())
            }
            ControlCode::RawData => {
                lock(&self.inbound).accept_unsequenced(&packet.payload);
                Ok(())
            }
        }
    }

    fn collect_datagram(&self, now: Instant, max_len: usize) -> Option<Vec<u8>> {
        let mut outbound = lock(&self.outbound);
        let mut subs: Vec<Vec<u8>> = Vec::new();
        let mut framed_sum = 0usize;

        loop {
            enum Source {
                Unsequenced,
                Sequenced,
            }
            let (serialized, source) = if let Some(packet) = outbound.peek_unsequenced() {
                (serialize_legacy(packet), Source::Unsequenced)
            } else if let Some(packet) = outbound.peek_transmittable() {
                (serialize_legacy(packet), Source::Sequenced)
            } else {
                break;
            };

            if !subs.is_empty() {
                // legacy combined: 1-byte opcode + framed sub-packets + checksum
                let needed = 3 + framed_sum + sub_packet_frame_len(serialized.len());
                if needed > max_len {
                    break;
                }
            }

            framed_sum += sub_packet_frame_len(serialized.len());
            subs.push(serialized);
            match source {
                Source::Unsequenced => {
                    outbound.take_unsequenced();
                }
                Source::Sequenced => outbound.advance_transmit_cursor(now),
            }
        }
        drop(outbound);

        match subs.len() {
            0 => None,
            1 => Some(subs.remove(0)),
            _ => {
                let mut writer = PacketWriter::with_capacity(1 + framed_sum);
                writer.write_u8(ControlCode::Combined.to_legacy_byte());
                for sub in &subs {
                    if let Err(error) = write_sub_packet(&mut writer, sub) {
                        warn!("Dropping oversized legacy sub-packet: {}", error);
                    }
                }
                Some(writer.into_bytes())
            }
        }
    }
}

impl SessionEndpoint for LegacySession {
    fn enqueue_outbound(
        &self,
        opcode: u16,
        payload: &[u8],
        reliable: bool,
    ) -> Result<(), EnqueueError> {
        let (state, negotiated_max) = {
            let lifecycle = lock(&self.lifecycle);
            (lifecycle.state, lifecycle.negotiated_max)
        };
        if !state.accepts_outbound() {
            return Err(EnqueueError::NotEstablished { state });
        }
        let width = self.stream.opcode_width();
        if width == 1 && opcode > u8::MAX as u16 {
            return Err(EnqueueError::OpcodeWidth { opcode, width });
        }

        let mut writer = PacketWriter::new();
        write_app_packet(&mut writer, opcode, payload, self.stream);
        let app_bytes = writer.into_bytes();

        if !reliable {
            lock(&self.outbound)
                .send_unsequenced(ProtocolPacket::new(ControlCode::RawData, app_bytes));
            return Ok(());
        }

        let mut outbound = lock(&self.outbound);
        if app_bytes.len() > fragment_threshold(negotiated_max) {
            for fragment in split_message(&app_bytes, negotiated_max) {
                outbound.send_sequenced(ProtocolPacket::new(ControlCode::Fragment, fragment));
            }
        } else {
            let mut payload = vec![0u8; 2];
            payload.extend_from_slice(&app_bytes);
            outbound.send_sequenced(ProtocolPacket::new(ControlCode::Data, payload));
        }
        Ok(())
    }

    fn poll_inbound(&self) -> Option<ApplicationPacket> {
        lock(&self.inbound).poll()
    }

    fn peek_inbound(&self) -> Option<ApplicationPacket> {
        lock(&self.inbound).peek().cloned()
    }

    fn receive(&self, bytes: &[u8], sender_addr: SocketAddr) -> Result<(), ReceiveError> {
        if sender_addr != self.remote_addr {
            warn!(
                "Datagram from {} on legacy session bound to {}; dropping",
                sender_addr, self.remote_addr
            );
            return Ok(());
        }
        if lock(&self.lifecycle).state == SessionState::Closed {
            return Ok(());
        }
        if bytes.is_empty() {
            warn!("Dropping empty legacy datagram");
            return Ok(());
        }

        let code = match ControlCode::from_legacy_byte(bytes[0]) {
            Ok(code) => code,
            Err(error) => {
                warn!("Dropping legacy datagram: {}", error);
                return Ok(());
            }
        };

        let unframe_result = lock(&self.codec).unframe(bytes, code.is_handshake());
        let unframed = match unframe_result {
            Ok(unframed) => unframed,
            Err(error @ WireError::ChecksumMismatch { .. }) => {
                warn!(
                    "Legacy checksum failure from {}; closing session",
                    self.remote_addr
                );
                self.send_disconnect_now(DisconnectReason::CorruptPacket);
                self.enter_closed();
                return Err(error.into());
            }
            Err(error) => {
                warn!("Dropping undecodable legacy datagram: {}", error);
                return Ok(());
            }
        };

        let packet = match parse_legacy(&unframed) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("Dropping unparsable legacy datagram: {}", error);
                return Ok(());
            }
        };

        let now = Instant::now();
        self.stats.record_received(bytes.len());
        lock(&self.lifecycle).last_activity = now;
        self.process_packet(packet, now, 0)
    }

    fn tick(&self, now: Instant) -> Result<(), SendError> {
        let state = lock(&self.lifecycle).state;
        if state == SessionState::Closed {
            return Ok(());
        }

        lock(&self.outbound).check_retransmit(now);
        lock(&self.rate).decay(now);

        let due_ack = lock(&self.acks).take_due();
        if let Some(seq) = due_ack {
            let mut writer = PacketWriter::new();
            writer.write_u16(seq);
            lock(&self.outbound).send_unsequenced_front(ProtocolPacket::new(
                ControlCode::Ack,
                writer.into_bytes(),
            ));
        }

        if state == SessionState::Established {
            let ringing = lock(&self.lifecycle).heartbeat.ringing(now);
            if ringing && !lock(&self.outbound).has_transmittable() {
                lock(&self.outbound)
                    .send_unsequenced(ProtocolPacket::new(ControlCode::KeepAlive, Vec::new()));
            }
        }

        let max_len = lock(&self.lifecycle).negotiated_max as usize;
        loop {
            if !lock(&self.rate).allow() {
                break;
            }
            let Some(packet_bytes) = self.collect_datagram(now, max_len) else {
                break;
            };
            let framed = match lock(&self.codec).frame(&packet_bytes, false) {
                Ok(framed) => framed,
                Err(error) => {
                    warn!("Could not frame legacy outbound datagram: {}", error);
                    break;
                }
            };
            self.sender.send(&framed, &self.remote_addr)?;
            lock(&self.rate).record(framed.len());
            self.stats.record_sent(framed.len());
            lock(&self.lifecycle).heartbeat.reset(now);
        }

        if state == SessionState::Closing && !lock(&self.outbound).has_unfinished_data() {
            self.send_disconnect_now(DisconnectReason::Application);
            lock(&self.lifecycle).state = SessionState::Disconnecting;
        }

        Ok(())
    }

    fn close(&self) {
        let state = lock(&self.lifecycle).state;
        match state {
            SessionState::Established | SessionState::Unestablished => {
                if lock(&self.outbound).has_unfinished_data() {
                    lock(&self.lifecycle).state = SessionState::Closing;
                } else {
                    self.send_disconnect_now(DisconnectReason::Application);
                    lock(&self.lifecycle).state = SessionState::Disconnecting;
                }
            }
            _ => {}
        }
    }

    fn session_state(&self) -> SessionState {
        lock(&self.lifecycle).state
    }

    fn check_timeout(&self, now: Instant, idle_timeout: Duration) {
        let (state, last_activity) = {
            let lifecycle = lock(&self.lifecycle);
            (lifecycle.state, lifecycle.last_activity)
        };

        if state == SessionState::Closing && !lock(&self.outbound).has_unfinished_data() {
            self.enter_closed();
            return;
        }

        if now.saturating_duration_since(last_activity) > idle_timeout {
            match state {
                SessionState::Closing => {
                    self.send_disconnect_now(DisconnectReason::Timeout);
                    self.enter_closed();
                }
                SessionState::Disconnecting => self.enter_closed(),
                SessionState::Established => {
                    self.send_disconnect_now(DisconnectReason::Timeout);
                    lock(&self.lifecycle).state = SessionState::Disconnecting;
                }
                // a handshake that never completed gets no disconnect notice
                SessionState::Unestablished => self.enter_closed(),
                SessionState::Closed => {}
            }
        }
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn stats(&self) -> StatsSnapshot {
        let retransmit_passes = lock(&self.outbound).retransmit_passes();
        self.stats.snapshot(retransmit_passes)
    }
}

#[cfg(test)]
mod legacy_tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSender {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl PacketSender for RecordingSender {
        fn send(&self, payload: &[u8], _addr: &SocketAddr) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    fn legacy_open_request(session_id: u32, max_length: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(LEGACY_REQUEST_MARKER);
        SessionRequest {
            session_id,
            max_length,
        }
        .write(&mut writer);
        serialize_legacy(&ProtocolPacket::new(
            ControlCode::SessionRequest,
            writer.into_bytes(),
        ))
    }

    fn establish(session: &LegacySession, sender: &RecordingSender) -> LegacyResponse {
        session.receive(&legacy_open_request(7, 512), addr()).unwrap();
        let sent = sender.take();
        let response = parse_legacy(sent.last().unwrap()).unwrap();
        assert_eq!(response.code, ControlCode::SessionResponse);
        LegacyResponse::read(&mut PacketReader::new(&response.payload)).unwrap()
    }

    fn peer_frame(session_key: u32, packet: &ProtocolPacket) -> Vec<u8> {
        let mut codec = WireCodec::new(1).unwrap();
        codec.rekey(session_key, false, false);
        codec.frame(&serialize_legacy(packet), false).unwrap()
    }

    #[test]
    fn legacy_headers_round_trip() {
        let packet = ProtocolPacket::new(ControlCode::Fragment, vec![0, 3, 9, 9]);
        let bytes = serialize_legacy(&packet);
        assert_eq!(bytes[0], 0xC0);
        assert_eq!(parse_legacy(&bytes).unwrap(), packet);
    }

    #[test]
    fn handshake_establishes_without_format_flags() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();

        let response = establish(&session, &sender);
        assert_eq!(session.session_state(), SessionState::Established);
        assert_eq!(response.session_id, 7);
        assert_eq!(response.max_length, 512);
    }

    #[test]
    fn request_without_marker_is_dropped() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();

        let mut writer = PacketWriter::new();
        writer.write_u8(0x00); // wrong marker
        SessionRequest {
            session_id: 7,
            max_length: 512,
        }
        .write(&mut writer);
        let datagram = serialize_legacy(&ProtocolPacket::new(
            ControlCode::SessionRequest,
            writer.into_bytes(),
        ));
        session.receive(&datagram, addr()).unwrap();

        assert_eq!(session.session_state(), SessionState::Unestablished);
        assert!(sender.take().is_empty());
    }

    #[test]
    fn sequenced_data_is_delivered() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();
        let response = establish(&session, &sender);

        let mut writer = PacketWriter::new();
        writer.write_u16(0);
        writer.write_u8(0x05);
        writer.write_bytes(b"legacy");
        let datagram = peer_frame(
            response.session_key,
            &ProtocolPacket::new(ControlCode::Data, writer.into_bytes()),
        );
        session.receive(&datagram, addr()).unwrap();

        let app = session.poll_inbound().unwrap();
        assert_eq!(app.opcode, 0x05);
        assert_eq!(app.payload, b"legacy");
    }

    #[test]
    fn outbound_data_uses_single_byte_headers() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();
        let response = establish(&session, &sender);

        session.enqueue_outbound(0x09, b"ping", true).unwrap();
        session.tick(Instant::now()).unwrap();

        let sent = sender.take();
        assert_eq!(sent.len(), 1);
        let mut codec = WireCodec::new(1).unwrap();
        codec.rekey(response.session_key, false, false);
        let unframed = codec.unframe(&sent[0], false).unwrap();
        let packet = parse_legacy(&unframed).unwrap();
        assert_eq!(packet.code, ControlCode::Data);
        assert_eq!(packet.sequence().unwrap(), 0);
    }

    #[test]
    fn combined_legacy_sub_packets_are_processed() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();
        let response = establish(&session, &sender);

        let mut sub_writer = PacketWriter::new();
        for seq in 0u16..3 {
            let mut writer = PacketWriter::new();
            writer.write_u16(seq);
            writer.write_u8(0x05);
            writer.write_u8(seq as u8);
            let sub = serialize_legacy(&ProtocolPacket::new(
                ControlCode::Data,
                writer.into_bytes(),
            ));
            write_sub_packet(&mut sub_writer, &sub).unwrap();
        }
        let combined = ProtocolPacket::new(ControlCode::Combined, sub_writer.into_bytes());
        session
            .receive(&peer_frame(response.session_key, &combined), addr())
            .unwrap();

        for expected in 0u8..3 {
            let app = session.poll_inbound().unwrap();
            assert_eq!(app.payload, vec![expected]);
        }
    }

    #[test]
    fn checksum_failure_closes_legacy_session() {
        let sender = RecordingSender::new();
        let session = LegacySession::responder(
            addr(),
            StreamType::Login,
            ConnectionConfig::default(),
            sender.clone(),
        )
        .unwrap();
        let response = establish(&session, &sender);

        let mut writer = PacketWriter::new();
        writer.write_u16(0);
        writer.write_u8(0x05);
        let mut datagram = peer_frame(
            response.session_key,
            &ProtocolPacket::new(ControlCode::Data, writer.into_bytes()),
        );
        let last = datagram.len() - 1;
        datagram[last] ^= 0x01;

        let result = session.receive(&datagram, addr());
        assert!(matches!(
            result,
            Err(ReceiveError::Wire(WireError::ChecksumMismatch { .. }))
        ));
        assert_eq!(session.session_state(), SessionState::Closed);
    }
}
