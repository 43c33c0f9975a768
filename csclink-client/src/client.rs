//! The client surface shared by single and broadcast connections
//!
//! [`LedgerClient`] is what the facade helpers and [`crate::Broadcast`]
//! program against. A plain [`Connection`] implements it directly.

use crate::{Connection, ConnectionEvent};
use async_trait::async_trait;
use csclink_core::Result;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;

/// A connection-like handle to one or more validating nodes
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open the socket(s) and wait until ready
    async fn connect(&self) -> Result<()>;

    /// Close the socket(s)
    async fn disconnect(&self) -> Result<()>;

    /// Whether requests can be sent right now
    fn is_connected(&self) -> bool;

    /// Send a command and wait for its result
    async fn request(&self, payload: Value, timeout: Option<Duration>) -> Result<Value>;

    /// Latest validated ledger version; waits for readiness
    async fn get_ledger_version(&self) -> Result<u32>;

    /// Listen for events
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Last ledger version seen, without waiting
    fn cached_ledger_version(&self) -> Option<u32>;
}

#[async_trait]
impl LedgerClient for Connection {
    async fn connect(&self) -> Result<()> {
        Connection::connect(self).await
    }

    async fn disconnect(&self) -> Result<()> {
        Connection::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    async fn request(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        Connection::request(self, &payload, timeout).await
    }

    async fn get_ledger_version(&self) -> Result<u32> {
        Connection::get_ledger_version(self).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        Connection::subscribe(self)
    }

    fn cached_ledger_version(&self) -> Option<u32> {
        Connection::cached_ledger_version(self)
    }
}
