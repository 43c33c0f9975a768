//! Core types for talking to a CasinoCoin validating node
//!
//! This crate holds everything that does not need a socket:
//!
//! - **RangeSet**: the sparse set of ledger versions a node reports as validated
//! - **Codec**: request framing and classification of incoming frames
//! - **Types**: ledger-close and subscription wire types
//! - **Error handling**: the error taxonomy shared by every csclink crate
//! - **Observability**: tracing and OpenTelemetry bootstrap
//!
//! The `csclink-client` crate builds the persistent connection on top of
//! these pieces.
//!
//! # Example
//!
//! ```rust
//! use csclink_core::{codec, InboundMessage, RangeSet, StreamKind};
//!
//! let frame = r#"{"type":"ledgerClosed","ledger_index":120,"validated_ledgers":"100-120"}"#;
//! if let InboundMessage::Stream { kind: StreamKind::LedgerClosed, body } = codec::decode(frame).unwrap() {
//!     let mut available = RangeSet::new();
//!     available.parse_and_add_ranges(body["validated_ledgers"].as_str().unwrap()).unwrap();
//!     assert!(available.contains_range(100, 120));
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod rangeset;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig, FRAME_TARGET};
pub use rangeset::RangeSet;
pub use rust_decimal::Decimal;
pub use types::{InboundMessage, LedgerClose, StreamKind, SubscribeRequest};
