//! Domain events published by a connection
//!
//! Lifecycle changes, stream messages and node warnings are published on a
//! broadcast bus. Any number of listeners may subscribe; each gets its own
//! receiver and sees every event emitted after it subscribed.
//!
//! Request/response correlation never goes through this bus.
//!
//! # Examples
//!
//! ```rust,no_run
//! use csclink_client::{Connection, ConnectionEvent};
//! use csclink_core::StreamKind;
//!
//! # async fn example() -> csclink_core::Result<()> {
//! let connection = Connection::new("wss://ws01.casinocoin.org:4443");
//! let mut events = connection.subscribe();
//! connection.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Stream { kind: StreamKind::LedgerClosed, message } => {
//!             println!("ledger {}", message["ledger_index"]);
//!         }
//!         ConnectionEvent::Disconnected { code } => println!("lost connection ({})", code),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Slow listeners
//!
//! The bus buffers [`EVENT_CAPACITY`] events per listener. A listener that
//! falls further behind receives `RecvError::Lagged` and skips ahead.

use csclink_core::StreamKind;
use serde_json::Value;
use tokio::sync::broadcast;

/// Events buffered per listener before it starts lagging
pub const EVENT_CAPACITY: usize = 1024;

/// Something that happened on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The ledger subscription succeeded; requests can flow
    Connected,
    /// The socket closed; `code` is the WebSocket close code
    Disconnected {
        /// 1000 after `disconnect()`, the peer's code or 1006 otherwise
        code: u16,
    },
    /// A reconnection attempt is starting
    Reconnecting {
        /// 1-based attempt number since the connection dropped
        attempt: u32,
    },
    /// An error with no request to attach it to
    Error {
        /// `badMessage`, `websocket`, or a token pushed by the node such as `slowDown`
        code: String,
        /// Human-readable explanation
        message: Option<String>,
        /// The offending frame or error payload
        data: Value,
    },
    /// A stream message pushed by the node
    Stream {
        /// Which stream
        kind: StreamKind,
        /// The message as received
        message: Value,
    },
}

impl ConnectionEvent {
    /// Event name: `connected`, `disconnected`, `reconnecting`, `error`,
    /// or the stream type (`ledgerClosed`, `transaction`, `path_find`)
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connected => "connected",
            ConnectionEvent::Disconnected { .. } => "disconnected",
            ConnectionEvent::Reconnecting { .. } => "reconnecting",
            ConnectionEvent::Error { .. } => "error",
            ConnectionEvent::Stream { kind, .. } => kind.as_str(),
        }
    }
}

/// Broadcast bus for [`ConnectionEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Create a bus with [`EVENT_CAPACITY`]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no listeners is fine
    pub fn emit(&self, event: ConnectionEvent) {
        tracing::trace!(event = event.name(), "emitting event");
        let _ = self.tx.send(event);
    }

    /// Start listening
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_every_listener_sees_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.listener_count(), 2);

        bus.emit(ConnectionEvent::Connected);
        assert_eq!(first.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(second.recv().await.unwrap(), ConnectionEvent::Connected);
    }

    #[test]
    fn test_emit_without_listeners() {
        let bus = EventBus::new();
        bus.emit(ConnectionEvent::Disconnected { code: 1000 });
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ConnectionEvent::Connected.name(), "connected");
        assert_eq!(ConnectionEvent::Reconnecting { attempt: 3 }.name(), "reconnecting");
        let stream = ConnectionEvent::Stream {
            kind: StreamKind::Transaction,
            message: json!({}),
        };
        assert_eq!(stream.name(), "transaction");
    }

    #[test]
    fn test_many_listeners() {
        let bus = EventBus::new();
        let receivers: Vec<_> = (0..500).map(|_| bus.subscribe()).collect();
        assert_eq!(bus.listener_count(), receivers.len());
    }
}
