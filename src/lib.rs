//! # Undertow Net
//! Session-based reliable delivery over UDP for game client/server traffic:
//! ordered streams, fragmentation, retransmission, and packet combining on
//! top of bare datagrams.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod connection;
mod protocol;
mod sequencer;
mod timer;
mod transport;
mod wire;

pub use connection::{
    connection_config::ConnectionConfig,
    endpoint::SessionEndpoint,
    error::{EnqueueError, FragmentError, ReceiveError},
    fragmentation::{fragment_threshold, FRAGMENT_RESERVE},
    legacy::LegacySession,
    session::Session,
    session_manager::SessionManager,
    session_state::SessionState,
    stats::StatsSnapshot,
};
pub use protocol::{
    control_code::ControlCode,
    packet::{
        parse_combined, write_sub_packet, ApplicationPacket, Disconnect, DisconnectReason,
        ProtocolPacket, SessionRequest, SessionResponse,
    },
    stream_type::StreamType,
};
pub use sequencer::{SequenceStatus, Sequencer};
pub use timer::Timer;
pub use transport::{PacketSender, SendError};
pub use wire::{
    codec::WireCodec, error::WireError, reader::PacketReader, writer::PacketWriter,
};
