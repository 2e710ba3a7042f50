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
            parse_combined, sub_packet_frame_len, write_app_packet, write_sub_packet,
            ApplicationPacket, Disconnect, DisconnectReason, ProtocolPacket, SessionRequest,
            SessionResponse,
        },
        stream_type::StreamType,
    },
    timer::Timer,
    transport::{PacketSender, SendError},
    wire::{codec::WireCodec, error::WireError, reader::PacketReader, writer::PacketWriter},
};

/// Nested combined packets are not a thing the protocol produces
const MAX_COMBINED_DEPTH: u8 = 1;

/// Lifecycle lock group: state enum, activity clock, and the values
/// negotiated at handshake time.
struct Lifecycle {
    state: SessionState,
    last_activity: Instant,
    session_id: u32,
    negotiated_max: u32,
    heartbeat: Timer,
}

/// One transport connection speaking the current protocol variant.
///
/// Mutable state is partitioned into independently-locked groups; every
/// method acquires at most one group's lock at a time and releases it before
/// touching another, so the inbound path and the periodic path can interleave
/// freely.
pub struct Session {
    remote_addr: SocketAddr,
    stream: StreamType,
    config: ConnectionConfig,
    sender: Arc<dyn PacketSender>,
    lifecycle: Mutex<Lifecycle>,
    outbound: Mutex<OutboundChannel>,
    inbound: Mutex<InboundChannel>,
    acks: Mutex<AckState>,
    rate: Mutex<RateState>,
    rtt: Mutex<RttTracker>,
    codec: Mutex<WireCodec>,
    stats: SessionStats,
}

impl Session {
    /// Creates the responding side of a connection; it completes its
    /// handshake when the peer's session-open request arrives.
    pub fn responder(
        remote_addr: SocketAddr,
        stream: StreamType,
        config: ConnectionConfig,
        sender: Arc<dyn PacketSender>,
    ) -> Result<Self, WireError> {
        Self::new(remote_addr, 0, stream, config, sender)
    }

    /// Creates the initiating side of a connection. Call `connect` to emit
    /// the session-open request.
    pub fn initiator(
        remote_addr: SocketAddr,
        session_id: u32,
        stream: StreamType,
        config: ConnectionConfig,
        sender: Arc<dyn PacketSender>,
    ) -> Result<Self, WireError> {
        Self::new(remote_addr, session_id, stream, config, sender)
    }

    fn new(
        remote_addr: SocketAddr,
        session_id: u32,
        stream: StreamType,
        config: ConnectionConfig,
        sender: Arc<dyn PacketSender>,
    ) -> Result<Self, WireError> {
        let now = Instant::now();
        let initial_timeout =
            RttTracker::new(
                config.retransmit_timeout_multiplier,
                config.retransmit_timeout_min,
                config.retransmit_timeout_max,
            )
            .retransmit_timeout();

        Ok(Self {
            remote_addr,
            stream,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Unestablished,
                last_activity: now,
                session_id,
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
            rtt: Mutex::new(RttTracker::new(
                config.retransmit_timeout_multiplier,
                config.retransmit_timeout_min,
                config.retransmit_timeout_max,
            )),
            codec: Mutex::new(WireCodec::new(2)?),
            stats: SessionStats::new(),
            sender,
            config,
        })
    }

    /// Emits the session-open request (initiator side)
    pub fn connect(&self) -> Result<(), SendError> {
        let (session_id, max_length) = {
            let lifecycle = lock(&self.lifecycle);
            (lifecycle.session_id, self.config.max_datagram_size)
        };
        let mut writer = PacketWriter::new();
        SessionRequest {
            session_id,
            max_length,
        }
        .write(&mut writer);
        let packet = ProtocolPacket::new(ControlCode::SessionRequest, writer.into_bytes());
        self.sender.send(&packet.serialize(), &self.remote_addr)
    }

    pub fn session_id(&self) -> u32 {
        lock(&self.lifecycle).session_id
    }

    pub fn negotiated_max(&self) -> u32 {
        lock(&self.lifecycle).negotiated_max
    }

    fn touch(&self, now: Instant) {
        lock(&self.lifecycle).last_activity = now;
    }

    fn mark_sent(&self, now: Instant) {
        lock(&self.lifecycle).heartbeat.reset(now);
    }

    /// Sends a disconnect notice immediately, bypassing the queues. Used
    /// during teardown when the queues may already be draining.
    fn send_disconnect_now(&self, reason: DisconnectReason) {
        let session_id = lock(&self.lifecycle).session_id;
        let mut writer = PacketWriter::new();
        Disconnect { session_id, reason }.write(&mut writer);
        let packet = ProtocolPacket::new(ControlCode::Disconnect, writer.into_bytes());
        let framed = match lock(&self.codec).frame(&packet.serialize(), false) {
            Ok(framed) => framed,
            Err(error) => {
                warn!("Could not frame disconnect notice: {}", error);
                return;
            }
        };
        if self.sender.send(&framed, &self.remote_addr).is_err() {
            warn!("Could not send disconnect notice to {}", self.remote_addr);
        } else {
            self.stats.record_sent(framed.len());
        }
    }

    /// Terminal transition: every queue is drained element-by-element so no
    /// buffer outlives the session.
    fn enter_closed(&self) {
        lock(&self.lifecycle).state = SessionState::Closed;
        lock(&self.outbound).clear();
        lock(&self.inbound).clear();
        lock(&self.acks).clear();
    }

    fn handle_session_request(&self, payload: &[u8], now: Instant) {
        let request = match SessionRequest::read(&mut PacketReader::new(payload)) {
            Ok(request) => request,
            Err(error) => {
                warn!("Dropping malformed session-open request: {}", error);
                return;
            }
        };

        let state = lock(&self.lifecycle).state;
        if state == SessionState::Established {
            // a second open on a live session is a protocol violation
            warn!(
                "Session-open request on established session {}; disconnecting",
                request.session_id
            );
            self.send_disconnect_now(DisconnectReason::ProtocolViolation);
            self.enter_closed();
            return;
        }

        // (re)establish: all counters and queues restart from zero
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
        lock(&self.codec).rekey(
            session_key,
            self.stream.compressed(),
            self.stream.obfuscated(),
        );
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.session_id = request.session_id;
            lifecycle.negotiated_max = negotiated_max;
            lifecycle.state = SessionState::Established;
        }

        let mut writer = PacketWriter::new();
        SessionResponse {
            session_id: request.session_id,
            session_key,
            compressed: self.stream.compressed(),
            obfuscated: self.stream.obfuscated(),
            max_length: negotiated_max,
        }
        .write(&mut writer);
        let packet = ProtocolPacket::new(ControlCode::SessionResponse, writer.into_bytes());
        let bytes = packet.serialize();
        if self.sender.send(&bytes, &self.remote_addr).is_err() {
            warn!("Could not send session-open response to {}", self.remote_addr);
        } else {
            self.stats.record_sent(bytes.len());
            self.mark_sent(now);
        }
    }

    fn handle_session_response(&self, payload: &[u8]) {
        let response = match SessionResponse::read(&mut PacketReader::new(payload)) {
            Ok(response) => response,
            Err(error) => {
                warn!("Dropping malformed session-open response: {}", error);
                return;
            }
        };

        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != SessionState::Unestablished {
                warn!(
                    "Unexpected session-open response in {:?}; dropping",
                    lifecycle.state
                );
                return;
            }
            lifecycle.session_id = response.session_id;
            lifecycle.negotiated_max = response.max_length.min(self.config.max_datagram_size);
            lifecycle.state = SessionState::Established;
        }
        lock(&self.codec).rekey(response.session_key, response.compressed, response.obfuscated);
    }

    fn handle_disconnect(&self, payload: &[u8]) {
        let notice = match Disconnect::read(&mut PacketReader::new(payload)) {
            Ok(notice) => notice,
            Err(error) => {
                warn!("Dropping malformed disconnect notice: {}", error);
                return;
            }
        };

        let state = lock(&self.lifecycle).state;
        match state {
            // peer-initiated close, or both sides agreed
            SessionState::Established | SessionState::Closing => {
                self.send_disconnect_now(DisconnectReason::OtherSideTerminated);
                self.enter_closed();
            }
            // already expected
            _ => self.enter_closed(),
        }
        let _ = notice.reason;
    }

    fn handle_sequenced(&self, packet: ProtocolPacket) -> Result<(), ReceiveError> {
        let disposition = lock(&self.inbound).accept(packet)?;
        match disposition {
            InboundDisposition::Delivered { up_through } => {
                lock(&self.acks).observe_delivered(up_through);
            }
            InboundDisposition::Buffered { seq } => {
                // tell the sender something arrived out of expected order so
                // it can restart its retransmission pass early
                let mut writer = PacketWriter::new();
                writer.write_u16(seq);
                lock(&self.outbound).send_unsequenced(ProtocolPacket::new(
                    ControlCode::OutOfOrderAck,
                    writer.into_bytes(),
                ));
            }
            InboundDisposition::Duplicate => {
                self.stats.record_duplicate();
                // acknowledge again but discard
                lock(&self.acks).force_resend();
            }
        }
        Ok(())
    }

    fn handle_ack(&self, payload: &[u8], now: Instant) {
        let seq = match PacketReader::new(payload).read_u16() {
            Ok(seq) => seq,
            Err(error) => {
                warn!("Dropping malformed acknowledgment: {}", error);
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
                warn!("Dropping malformed out-of-order acknowledgment: {}", error);
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
                if depth >= MAX_COMBINED_DEPTH {
                    warn!("Nested combined packet; dropping");
                    return Ok(());
                }
                let sub_packets = match parse_combined(&packet.payload) {
                    Ok(sub_packets) => sub_packets,
                    Err(error) => {
                        warn!("Dropping malformed combined packet: {}", error);
                        return Ok(());
                    }
                };
                for sub in sub_packets {
                    self.process_packet(sub, now, depth + 1)?;
                }
                Ok(())
            }
            ControlCode::SessionRequest => {
                self.handle_session_request(&packet.payload, now);
                Ok(())
            }
            ControlCode::SessionResponse => {
                self.handle_session_response(&packet.payload);
                Ok(())
            }
            ControlCode::Disconnect => {
                self.handle_disconnect(&packet.payload);
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

    /// Collects sub-packets from the outbound queues into one
    /// maximal-size buffer. Returns the serialized packet bytes to frame, or
    /// None when there is nothing to send.
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
                (packet.serialize(), Source::Unsequenced)
            } else if let Some(packet) = outbound.peek_transmittable() {
                (packet.serialize(), Source::Sequenced)
            } else {
                break;
            };

            if subs.is_empty() {
                if serialized.len() + 2 > max_len {
                    warn!(
                        "Outbound packet of {} bytes exceeds negotiated size {}; sending anyway",
                        serialized.len(),
                        max_len
                    );
                }
            } else {
                // combining: opcode + every framed sub-packet + checksum must fit
                let needed = 4 + framed_sum + sub_packet_frame_len(serialized.len());
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
                let mut writer = PacketWriter::with_capacity(2 + framed_sum);
                writer.write_u16(ControlCode::Combined.as_u16());
                for sub in &subs {
                    if let Err(error) = write_sub_packet(&mut writer, sub) {
                        warn!("Dropping oversized sub-packet: {}", error);
                    }
                }
                Some(writer.into_bytes())
            }
        }
    }
}

impl SessionEndpoint for Session {
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
            let mut payload = vec![0u8; 2]; // sequence placeholder
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
                "Datagram from {} on session bound to {}; dropping",
                sender_addr, self.remote_addr
            );
            return Ok(());
        }
        if lock(&self.lifecycle).state == SessionState::Closed {
            return Ok(());
        }
        if bytes.len() < 2 {
            warn!("Dropping {}-byte datagram: too short for a header", bytes.len());
            return Ok(());
        }

        let code = match ControlCode::from_u16(u16::from_be_bytes([bytes[0], bytes[1]])) {
            Ok(code) => code,
            Err(error) => {
                warn!("Dropping datagram: {}", error);
                return Ok(());
            }
        };

        // bind before matching so the codec lock is released before any arm
        // that sends a disconnect runs
        let unframe_result = lock(&self.codec).unframe(bytes, code.is_handshake());
        let unframed = match unframe_result {
            Ok(unframed) => unframed,
            Err(error @ WireError::ChecksumMismatch { .. }) => {
                // nothing else in the datagram can be trusted; fatal
                warn!("Checksum failure from {}; closing session", self.remote_addr);
                self.send_disconnect_now(DisconnectReason::CorruptPacket);
                self.enter_closed();
                return Err(error.into());
            }
            Err(error) => {
                warn!("Dropping undecodable datagram: {}", error);
                return Ok(());
            }
        };

        let packet = match ProtocolPacket::parse(&unframed) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("Dropping unparsable datagram: {}", error);
                return Ok(());
            }
        };

        let now = Instant::now();
        self.stats.record_received(bytes.len());
        self.touch(now);
        self.process_packet(packet, now, 0)
    }

    fn tick(&self, now: Instant) -> Result<(), SendError> {
        let state = lock(&self.lifecycle).state;
        if state == SessionState::Closed {
            return Ok(());
        }

        lock(&self.outbound).check_retransmit(now);
        lock(&self.rate).decay(now);

        // a watermark that advanced past the last ack actually sent goes out
        // first, ahead of everything else this tick
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
                    warn!("Could not frame outbound datagram: {}", error);
                    break;
                }
            };
            self.sender.send(&framed, &self.remote_addr)?;
            lock(&self.rate).record(framed.len());
            self.stats.record_sent(framed.len());
            self.mark_sent(now);
        }

        // deferred close: everything flushed and acknowledged
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
            // already on the way down
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
