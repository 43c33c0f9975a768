//! Persistent WebSocket client for CasinoCoin validating nodes
//!
//! This crate keeps one long-lived WebSocket to a `casinocoind` node and
//! layers request correlation, readiness tracking and automatic
//! reconnection on top of it.
//!
//! # Core Features
//!
//! - **Connection**: connect, disconnect, reconnect; concurrent `connect()`
//!   calls share one attempt
//! - **Request-Response**: commands correlated by id, with per-request
//!   deadlines
//! - **Ledger tracking**: latest validated version, available history and
//!   fee parameters, refreshed by the ledger stream
//! - **Events**: lifecycle changes, stream messages and node warnings on a
//!   broadcast bus
//! - **Auto-Reconnection**: tiered schedule after an unexpected close
//! - **Transport options**: TLS client identity and roots, HTTP proxy
//!   tunnelling, Basic authorization
//! - **Broadcast**: several nodes presented as one client
//! - **Observability**: OpenTelemetry traces and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use csclink_client::Connection;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::new("wss://ws01.casinocoin.org:4443");
//!     connection.connect().await?;
//!
//!     let info = connection.request(&json!({"command": "server_info"}), None).await?;
//!     println!("{}", info["info"]["build_version"]);
//!     println!("latest ledger: {}", connection.get_ledger_version().await?);
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # With Options
//!
//! ```rust,no_run
//! use csclink_client::ConnectionBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> csclink_core::Result<()> {
//! let connection = ConnectionBuilder::new("wss://node.internal:51233")
//!     .with_timeout(Duration::from_secs(5))
//!     .with_authorization("wallet:secret")
//!     .with_trace(true)
//!     .with_default_observability()
//!     .service_name("wallet-backend")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod connection;
mod connection_state;
mod events;
mod metrics;
mod options;
mod reconnect;
mod request;
mod transport;

pub mod broadcast;
pub mod ledger;
pub mod server_info;

pub use broadcast::Broadcast;
pub use client::LedgerClient;
pub use client_builder::ConnectionBuilder;
pub use connection::Connection;
pub use connection_state::ConnectionState;
pub use events::{ConnectionEvent, EventBus, EVENT_CAPACITY};
pub use ledger::{LedgerFloor, RestrictedConnection};
pub use metrics::ClientMetrics;
pub use options::{ConnectionOptions, DEFAULT_TIMEOUT};
pub use reconnect::{FixedDelay, ReconnectionStrategy, TieredBackoff};
