use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};

use crate::{
    connection::{
        connection_config::ConnectionConfig,
        endpoint::SessionEndpoint,
        error::ReceiveError,
        legacy::{LegacySession, LEGACY_REQUEST_MARKER},
        lock,
        session::Session,
        session_state::SessionState,
    },
    protocol::{control_code::ControlCode, stream_type::StreamType},
    transport::{PacketSender, SendError},
    wire::error::WireError,
};

/// Owns every live session on one socket, keyed by remote address. Unknown
/// senders are admitted only when their first datagram is a well-formed
/// session-open request; the request's shape selects the protocol variant.
pub struct SessionManager {
    config: ConnectionConfig,
    sender: Arc<dyn PacketSender>,
    local_port: u16,
    sessions: Mutex<HashMap<SocketAddr, Arc<dyn SessionEndpoint>>>,
}

impl SessionManager {
    pub fn new(sender: Arc<dyn PacketSender>, local_port: u16, config: ConnectionConfig) -> Self {
        Self {
            config,
            sender,
            local_port,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<dyn SessionEndpoint>> {
        lock(&self.sessions).get(addr).cloned()
    }

    /// Opens an initiator-side session toward `addr` and sends its
    /// session-open request.
    pub fn open(
        &self,
        addr: SocketAddr,
        session_id: u32,
        stream: StreamType,
    ) -> Result<Arc<Session>, SendError> {
        let session = match Session::initiator(
            addr,
            session_id,
            stream,
            self.config.clone(),
            self.sender.clone(),
        ) {
            Ok(session) => Arc::new(session),
            Err(error) => {
                warn!("Could not create session toward {}: {}", addr, error);
                return Err(SendError);
            }
        };
        session.connect()?;
        lock(&self.sessions).insert(addr, session.clone());
        info!("Opened session {} toward {}", session_id, addr);
        Ok(session)
    }

    /// Whether an unknown sender's first datagram is a current-variant
    /// session-open request
    fn is_open_request(bytes: &[u8]) -> bool {
        bytes.len() >= 2
            && u16::from_be_bytes([bytes[0], bytes[1]]) == ControlCode::SessionRequest.as_u16()
    }

    /// Whether it is a legacy-variant session-open request: single-byte
    /// header followed by the marker byte
    fn is_legacy_open_request(bytes: &[u8]) -> bool {
        bytes.len() >= 2
            && bytes[0] == ControlCode::SessionRequest.as_u16() as u8
            && bytes[1] == LEGACY_REQUEST_MARKER
    }

    fn admit(&self, addr: SocketAddr, bytes: &[u8]) -> Option<Arc<dyn SessionEndpoint>> {
        let stream = StreamType::for_port(self.local_port);
        let created: Result<Arc<dyn SessionEndpoint>, WireError> = if Self::is_open_request(bytes) {
            Session::responder(addr, stream, self.config.clone(), self.sender.clone())
                .map(|session| Arc::new(session) as Arc<dyn SessionEndpoint>)
        } else if Self::is_legacy_open_request(bytes) {
            LegacySession::responder(addr, stream, self.config.clone(), self.sender.clone())
                .map(|session| Arc::new(session) as Arc<dyn SessionEndpoint>)
        } else {
            warn!("Datagram from unknown sender {} is not a session-open request; dropping", addr);
            return None;
        };

        match created {
            Ok(session) => {
                info!("Admitting new {:?} session from {}", stream, addr);
                lock(&self.sessions).insert(addr, session.clone());
                Some(session)
            }
            Err(error) => {
                warn!("Could not create session for {}: {}", addr, error);
                None
            }
        }
    }

    /// Routes one received datagram to its session, admitting a new session
    /// when the sender is unknown and the datagram opens one.
    pub fn receive(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), ReceiveError> {
        let existing = lock(&self.sessions).get(&addr).cloned();
        let session = match existing {
            Some(session) => session,
            None => match self.admit(addr, bytes) {
                Some(session) => session,
                None => return Ok(()),
            },
        };
        session.receive(bytes, addr)
    }

    /// Runs periodic work on every session. Send failures are logged per
    /// session; one broken peer never stalls the rest.
    pub fn tick(&self, now: Instant) {
        let sessions: Vec<Arc<dyn SessionEndpoint>> =
            lock(&self.sessions).values().cloned().collect();
        for session in sessions {
            if session.tick(now).is_err() {
                warn!("Send failure toward {}", session.remote_addr());
            }
        }
    }

    /// Applies the idle-timeout rules, then drops every session that has
    /// reached its terminal state.
    pub fn check_timeouts(&self, now: Instant) {
        let sessions: Vec<Arc<dyn SessionEndpoint>> =
            lock(&self.sessions).values().cloned().collect();
        for session in &sessions {
            session.check_timeout(now, self.config.idle_timeout);
        }

        let mut map = lock(&self.sessions);
        map.retain(|addr, session| {
            let keep = session.session_state() != SessionState::Closed;
            if !keep {
                info!("Reaping closed session for {}", addr);
            }
            keep
        });
    }

    /// Begins an orderly close on every session
    pub fn close_all(&self) {
        let sessions: Vec<Arc<dyn SessionEndpoint>> =
            lock(&self.sessions).values().cloned().collect();
        for session in sessions {
            session.close();
        }
    }
}

#[cfg(test)]
mod session_manager_tests {
    use super::*;
    use crate::{
        protocol::packet::{ProtocolPacket, SessionRequest},
        wire::writer::PacketWriter,
    };
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingSender {
        sent: StdMutex<Vec<(Vec<u8>, SocketAddr)>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl PacketSender for RecordingSender {
        fn send(&self, payload: &[u8], addr: &SocketAddr) -> Result<(), SendError> {
            self.sent.lock().unwrap().push((payload.to_vec(), *addr));
            Ok(())
        }
    }

    fn open_request(session_id: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        SessionRequest {
            session_id,
            max_length: 512,
        }
        .write(&mut writer);
        ProtocolPacket::new(ControlCode::SessionRequest, writer.into_bytes()).serialize()
    }

    fn legacy_open_request(session_id: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(ControlCode::SessionRequest.as_u16() as u8);
        writer.write_u8(LEGACY_REQUEST_MARKER);
        SessionRequest {
            session_id,
            max_length: 512,
        }
        .write(&mut writer);
        writer.into_bytes()
    }

    fn manager(sender: Arc<RecordingSender>) -> SessionManager {
        SessionManager::new(sender, 9000, ConnectionConfig::default())
    }

    #[test]
    fn open_request_from_unknown_sender_admits_session() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.1.1.1:5000".parse().unwrap();

        manager.receive(&open_request(11), addr).unwrap();
        assert_eq!(manager.session_count(), 1);
        let session = manager.get(&addr).unwrap();
        assert_eq!(session.session_state(), SessionState::Established);
        // the handshake response went out
        assert_eq!(sender.count(), 1);
    }

    #[test]
    fn legacy_open_request_selects_legacy_variant() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.1.1.2:5000".parse().unwrap();

        manager.receive(&legacy_open_request(12), addr).unwrap();
        assert_eq!(manager.session_count(), 1);
        let session = manager.get(&addr).unwrap();
        assert_eq!(session.session_state(), SessionState::Established);
        // legacy responses carry the single-byte header
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].0[0], ControlCode::SessionResponse.as_u16() as u8);
    }

    #[test]
    fn non_handshake_datagram_from_stranger_is_dropped() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.1.1.3:5000".parse().unwrap();

        let datagram = ProtocolPacket::new(ControlCode::KeepAlive, Vec::new()).serialize();
        manager.receive(&datagram, addr).unwrap();
        assert_eq!(manager.session_count(), 0);
        assert_eq!(sender.count(), 0);
    }

    #[test]
    fn timed_out_sessions_are_reaped() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.1.1.4:5000".parse().unwrap();

        manager.receive(&open_request(13), addr).unwrap();
        assert_eq!(manager.session_count(), 1);

        // first sweep escalates, second closes, third reaps
        let idle = Duration::from_secs(60);
        manager.check_timeouts(Instant::now() + idle);
        manager.check_timeouts(Instant::now() + idle * 2);
        manager.check_timeouts(Instant::now() + idle * 3);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn half_open_sessions_are_reaped() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());

        // bare opcode prefixes with no handshake body: the sessions are
        // admitted but can never leave Unestablished
        for host in 1u8..=50 {
            let addr: SocketAddr = format!("10.3.0.{}:5000", host).parse().unwrap();
            manager
                .receive(
                    &[
                        (ControlCode::SessionRequest.as_u16() >> 8) as u8,
                        ControlCode::SessionRequest.as_u16() as u8,
                    ],
                    addr,
                )
                .unwrap();
        }
        assert_eq!(manager.session_count(), 50);
        for host in 1u8..=50 {
            let addr: SocketAddr = format!("10.3.0.{}:5000", host).parse().unwrap();
            let session = manager.get(&addr).unwrap();
            assert_eq!(session.session_state(), SessionState::Unestablished);
        }

        // one idle sweep closes and reaps every half-open entry
        let idle = Duration::from_secs(60);
        manager.check_timeouts(Instant::now() + idle * 2);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn half_open_legacy_session_is_reaped() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.3.1.1:5000".parse().unwrap();

        manager
            .receive(
                &[
                    ControlCode::SessionRequest.as_u16() as u8,
                    LEGACY_REQUEST_MARKER,
                ],
                addr,
            )
            .unwrap();
        assert_eq!(manager.session_count(), 1);

        let idle = Duration::from_secs(60);
        manager.check_timeouts(Instant::now() + idle * 2);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn open_creates_initiator_and_sends_request() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        let addr: SocketAddr = "10.1.1.5:5000".parse().unwrap();

        let session = manager.open(addr, 77, StreamType::Login).unwrap();
        assert_eq!(session.session_id(), 77);
        assert_eq!(manager.session_count(), 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let packet = ProtocolPacket::parse(&sent[0].0).unwrap();
        assert_eq!(packet.code, ControlCode::SessionRequest);
    }

    #[test]
    fn tick_drives_every_session() {
        let sender = RecordingSender::new();
        let manager = manager(sender.clone());
        for host in 1u8..=3 {
            let addr: SocketAddr = format!("10.2.0.{}:5000", host).parse().unwrap();
            manager.receive(&open_request(host as u32), addr).unwrap();
        }
        assert_eq!(manager.session_count(), 3);

        // nothing queued, so ticking sends nothing but must not fail
        manager.tick(Instant::now());
        assert_eq!(sender.count(), 3); // the three handshake responses only
    }
}
