use thiserror::Error;

use crate::{connection::session_state::SessionState, wire::error::WireError};

/// Errors that can occur during fragment reassembly
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    /// Leading fragment announced a length above the configured guard
    #[error("Announced reassembly length {announced} exceeds limit {limit}")]
    AnnouncedLengthTooLarge { announced: usize, limit: usize },

    /// Could not reserve memory for the reassembly buffer
    #[error("Failed to allocate {bytes}-byte reassembly buffer")]
    AllocationFailed { bytes: usize },

    /// A fragment would write past the announced total length
    #[error("Fragment overflows reassembly buffer: {offset} + {chunk} > announced {announced}")]
    Overflow {
        offset: usize,
        chunk: usize,
        announced: usize,
    },

    /// Leading fragment too short to carry its total-length prefix
    #[error("Leading fragment of {actual} bytes cannot carry a total-length prefix")]
    ShortLeadFragment { actual: usize },
}

/// Errors surfaced by `receive`. Malformed single packets are logged and
/// dropped internally and never reach this type; what does reach it is either
/// fatal to the session (checksum) or a failed reassembly the caller may want
/// to observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Fragment error: {0}")]
    Fragment(#[from] FragmentError),
}

/// Errors returned when the application enqueues an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The session is not in a state that accepts application traffic
    #[error("Session is {state:?}; outbound messages require Established")]
    NotEstablished { state: SessionState },

    /// The opcode does not fit the stream's embedded opcode field
    #[error("Application opcode {opcode:#06x} does not fit a {width}-byte opcode field")]
    OpcodeWidth { opcode: u16, width: usize },
}
