//! csclink - CasinoCoin ledger client over WebSocket
//!
//! This is the convenience crate that re-exports the csclink sub-crates.
//! Depend on it when you want the connection, the wire types and the error
//! taxonomy through a single import.
//!
//! # Architecture
//!
//! - **csclink-core**: range sets, codec, wire types, errors, observability
//! - **csclink-client**: the persistent connection, events, reconnection,
//!   broadcast and ledger helpers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use csclink::{Connection, ConnectionEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::new("wss://ws01.casinocoin.org:4443");
//!     let mut events = connection.subscribe();
//!     connection.connect().await?;
//!
//!     let fee = csclink::client::server_info::get_fee(&connection).await?;
//!     println!("fee: {} CSC", fee);
//!
//!     let account = connection
//!         .request(&json!({"command": "account_info", "account": "cHb9CJAWyB4cj91VRWn96DkukG4bwdtyTh"}), None)
//!         .await?;
//!     println!("{}", account["account_data"]["Balance"]);
//!
//!     if let Ok(ConnectionEvent::Stream { message, .. }) = events.recv().await {
//!         println!("ledger {}", message["ledger_index"]);
//!     }
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub use csclink_client as client;
pub use csclink_core as core;

pub use csclink_client::{
    Broadcast, Connection, ConnectionBuilder, ConnectionEvent, ConnectionOptions, ConnectionState,
    LedgerClient, RestrictedConnection,
};
pub use csclink_core::{Error, RangeSet, Result};
