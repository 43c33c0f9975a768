//! Error types for csclink
//!
//! Every failure a caller can observe is a variant of [`Error`]. The variants
//! follow the lifecycle of a connection to a validating node:
//!
//! - **Configuration**: `Connection` (no server URL, unusable TLS material)
//! - **Transport**: `NotConnected`, `Disconnected`, `WebSocket`
//! - **Request outcome**: `Timeout`, `Casinocoind`, `ResponseFormat`
//! - **Node readiness**: `NotInitialized`, `LedgerVersion`
//! - **Local**: `InvalidRange`, `Serialization`, `Internal`
//!
//! # Propagation
//!
//! Errors raised while establishing a connection are returned from
//! `connect()`. Errors that belong to one in-flight request are returned from
//! that request only. Errors with no request to blame (malformed stream
//! messages, warnings pushed by the node) are never returned here; they are
//! published as events on the connection instead.
//!
//! # Cloning
//!
//! `Error` is `Clone` because a single connect attempt may be awaited by
//! several callers at once, and each of them receives the same outcome.
//!
//! # Examples
//!
//! ```rust
//! use csclink_core::Error;
//!
//! let error = Error::NotConnected(None);
//! assert!(error.is_transient());
//! assert_eq!(error.to_string(), "not connected");
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result type for csclink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for csclink operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The connection is misconfigured
    ///
    /// Raised when `connect()` is called without a server URL, or when the
    /// transport options (certificates, proxy URL) cannot be used. Retrying
    /// without changing the configuration will not help.
    #[error("connection error: {0}")]
    Connection(String),

    /// No socket is available
    ///
    /// Either nothing has been connected yet, or the socket failed before it
    /// ever opened. The optional text carries the underlying transport error.
    #[error("not connected{}", detail(.0))]
    NotConnected(Option<String>),

    /// The socket closed while a request was waiting for its response,
    /// or the frame could not be written.
    #[error("disconnected{}", detail(.0))]
    Disconnected(Option<String>),

    /// No response arrived within the request deadline
    #[error("request timed out")]
    Timeout,

    /// The node sent something that violates the protocol
    #[error("response format error: {0}")]
    ResponseFormat(String),

    /// The node has no validated ledgers yet
    ///
    /// Returned by `connect()` when the ledger subscription reply carries no
    /// ledger index. Wait and reconnect.
    #[error("casinocoind not initialized: {0}")]
    NotInitialized(String),

    /// The node answered with `status: "error"`
    #[error("casinocoind error: {error}{}", detail(.message))]
    Casinocoind {
        /// Machine-readable error token, e.g. `actNotFound`
        error: String,
        /// Human-readable explanation, when the node provided one
        message: Option<String>,
        /// The complete response object
        data: Value,
    },

    /// The request names a ledger newer than the last validated one
    #[error("ledger version error: {0}")]
    LedgerVersion(String),

    /// A range with `start > end` was added to a `RangeSet`
    #[error("invalid range: {start}-{end}")]
    InvalidRange {
        /// Lower bound that was supplied
        start: u32,
        /// Upper bound that was supplied
        end: u32,
    },

    /// A payload could not be encoded or a value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A frame could not be written to a socket that is still open, e.g. a
    /// message over the size limit
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Internal failure, such as a background task that panicked
    #[error("internal error: {0}")]
    Internal(String),
}

fn detail(text: &Option<String>) -> String {
    match text {
        Some(text) if !text.is_empty() => format!(": {}", text),
        _ => String::new(),
    }
}

impl Error {
    /// Whether retrying the same call later can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NotConnected(_)
                | Error::Disconnected(_)
                | Error::Timeout
                | Error::NotInitialized(_)
                | Error::WebSocket(_)
        )
    }

    /// Short name of the error class, used as a metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::NotConnected(_) => "not_connected",
            Error::Disconnected(_) => "disconnected",
            Error::Timeout => "timeout",
            Error::ResponseFormat(_) => "response_format",
            Error::NotInitialized(_) => "not_initialized",
            Error::Casinocoind { .. } => "casinocoind",
            Error::LedgerVersion(_) => "ledger_version",
            Error::InvalidRange { .. } => "invalid_range",
            Error::Serialization(_) => "serialization",
            Error::WebSocket(_) => "websocket",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
