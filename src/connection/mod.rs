use std::sync::{Mutex, MutexGuard};

pub mod ack_state;
pub mod connection_config;
pub mod endpoint;
pub mod error;
pub mod fragmentation;
pub mod inbound;
pub mod legacy;
pub mod outbound;
pub mod rate;
pub mod rtt;
pub mod session;
pub mod session_manager;
pub mod session_state;
pub mod stats;

/// Locks a mutex, recovering the inner value when a previous holder panicked.
/// Each state group validates and repairs its own invariants, so a poisoned
/// guard carries no information worth aborting over.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
