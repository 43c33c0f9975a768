//! Observable connection lifecycle
//!
//! ```text
//!                connect()           subscribe ok
//! Disconnected ───────────► Connecting ───────────► Ready
//!      ▲                        │                     │ unexpected close
//!      │ disconnect()           │ failed              ▼
//!      └────────────────────────┴──────────────── Reconnecting
//! ```
//!
//! The state is derived from the connection's internals on every call; it
//! is a snapshot, not a lock.

use std::fmt;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and nothing scheduled
    Disconnected,
    /// A connect attempt is opening the socket or subscribing
    Connecting,
    /// Subscribed to the ledger stream; requests flow
    Ready,
    /// Lost a ready socket; waiting to retry
    Reconnecting {
        /// Attempts made since the socket dropped
        attempt: u32,
    },
}

impl ConnectionState {
    /// Gauge value reported by [`crate::ClientMetrics`]
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Reconnecting { .. } => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
        }
    }
}
