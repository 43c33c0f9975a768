//! Wire types exchanged with a validating node
//!
//! The node speaks plain JSON over WebSocket, one object per frame. There
//! are three shapes of incoming message:
//!
//! 1. **Response**: `{"id": 7, "type": "response", "status": "success", "result": {...}}`
//! 2. **Stream message**: `{"type": "ledgerClosed", "ledger_index": 3401, ...}`
//! 3. **Pushed warning**: `{"error": "slowDown", "error_message": "..."}` with no `type`
//!
//! Outgoing requests are arbitrary command objects with an injected integer
//! `id`; see [`crate::codec::encode_request`].

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Kinds of unsolicited stream messages the node may push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// A ledger closed and was validated (`ledgerClosed`)
    #[serde(rename = "ledgerClosed")]
    LedgerClosed,
    /// A transaction touched a subscribed account or book (`transaction`)
    #[serde(rename = "transaction")]
    Transaction,
    /// Path-finding update (`path_find`)
    #[serde(rename = "path_find")]
    PathFind,
}

impl StreamKind {
    /// Every stream kind, in wire order
    pub const ALL: [StreamKind; 3] = [
        StreamKind::LedgerClosed,
        StreamKind::Transaction,
        StreamKind::PathFind,
    ];

    /// Classify a message `type` field
    pub fn from_type(message_type: &str) -> Option<Self> {
        match message_type {
            "ledgerClosed" => Some(StreamKind::LedgerClosed),
            "transaction" => Some(StreamKind::Transaction),
            "path_find" => Some(StreamKind::PathFind),
            _ => None,
        }
    }

    /// The `type` value used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::LedgerClosed => "ledgerClosed",
            StreamKind::Transaction => "transaction",
            StreamKind::PathFind => "path_find",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger-close information
///
/// Both the `ledgerClosed` stream message and the result of the initial
/// `subscribe` request carry these fields. Only `ledger_index` is required;
/// the fee and reserve fields are absent on some node versions. Amounts are
/// exact decimals; nodes send them as JSON numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerClose {
    /// Sequence number of the ledger that closed
    #[serde(deserialize_with = "ledger_index_from_number_or_string")]
    pub ledger_index: u32,
    /// Hash of the closed ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_hash: Option<String>,
    /// Close time, in seconds since 2000-01-01T00:00:00Z
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_time: Option<i64>,
    /// Complete set of ledgers the node holds, in `RangeSet` wire format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_ledgers: Option<String>,
    /// Base transaction cost in drops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_base: Option<Decimal>,
    /// Fee reference units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_ref: Option<Decimal>,
    /// Account reserve in drops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_base: Option<Decimal>,
    /// Owner reserve increment in drops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_inc: Option<Decimal>,
    /// Number of transactions in the ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_count: Option<u64>,
}

fn ledger_index_from_number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| D::Error::custom(format!("ledger_index out of range: {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| D::Error::custom(format!("ledger_index is not numeric: {:?}", s))),
        other => Err(D::Error::custom(format!(
            "ledger_index must be a number, got {}",
            other
        ))),
    }
}

/// Request that opens the ledger-close stream
///
/// Sent once per socket, right after the WebSocket handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always `"subscribe"`
    pub command: String,
    /// Streams to subscribe to
    pub streams: Vec<String>,
}

impl SubscribeRequest {
    /// `{"command": "subscribe", "streams": ["ledger"]}`
    pub fn ledger() -> Self {
        Self {
            command: "subscribe".to_string(),
            streams: vec!["ledger".to_string()],
        }
    }
}

/// A classified incoming frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Answer to a request, correlated by `id`
    Response {
        /// Correlation id copied from the request
        id: u64,
        /// The full response object
        body: Value,
    },
    /// Unsolicited stream message
    Stream {
        /// Which stream the message belongs to
        kind: StreamKind,
        /// The full message object
        body: Value,
    },
    /// Warning pushed by the node, e.g. rate limiting
    Warning {
        /// Machine-readable error token
        error: String,
        /// Human-readable message, when present
        message: Option<String>,
        /// The full message object
        body: Value,
    },
}
