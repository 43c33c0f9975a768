//! Ledger-version helpers
//!
//! Small policies built on top of a connection's ledger cache: checking
//! history coverage, comparing against the latest validated ledger, and
//! guarding requests that name a specific ledger.

use crate::client::LedgerClient;
use crate::server_info::csc_from_drops;
use crate::{Connection, ConnectionEvent};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use csclink_core::{Decimal, Error, LedgerClose, Result};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::broadcast;

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z
pub const CASINOCOIN_EPOCH: i64 = 0x386D_4380;

/// Lowest ledger a complete history is expected to start at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerFloor(pub u32);

impl Default for LedgerFloor {
    fn default() -> Self {
        LedgerFloor(10)
    }
}

/// Whether the node holds every ledger from `min` (or the floor) to `max`
/// (or the latest validated ledger)
pub async fn has_complete_ledger_range(
    connection: &Connection,
    min: Option<u32>,
    max: Option<u32>,
    floor: LedgerFloor,
) -> Result<bool> {
    let low = min.filter(|min| *min != 0).unwrap_or(floor.0);
    connection.has_ledger_versions(low, max).await
}

/// Whether `max` is ahead of the latest validated ledger
pub async fn is_pending_ledger_version<C: LedgerClient + ?Sized>(
    client: &C,
    max: Option<u32>,
) -> Result<bool> {
    Ok(client.get_ledger_version().await? < max.unwrap_or(0))
}

/// `version`, or the latest validated ledger when absent
pub async fn ensure_ledger_version<C: LedgerClient + ?Sized>(
    client: &C,
    version: Option<u32>,
) -> Result<u32> {
    match version {
        Some(version) => Ok(version),
        None => client.get_ledger_version().await,
    }
}

/// ISO-8601 UTC timestamp for a ledger close time
///
/// ```rust
/// use csclink_client::ledger::casinocoin_time_to_iso8601;
///
/// assert_eq!(casinocoin_time_to_iso8601(0).unwrap(), "2000-01-01T00:00:00.000Z");
/// ```
pub fn casinocoin_time_to_iso8601(seconds: i64) -> Option<String> {
    DateTime::from_timestamp(seconds.checked_add(CASINOCOIN_EPOCH)?, 0)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Client-friendly projection of a `ledgerClosed` stream message
///
/// Fields absent from the message are absent from the result.
///
/// # Errors
///
/// Returns `Error::ResponseFormat` when the message has no usable
/// `ledger_index` or an amount is not a number.
pub fn format_ledger_close(message: &Value) -> Result<Value> {
    let close: LedgerClose = serde_json::from_value(message.clone())
        .map_err(|e| Error::ResponseFormat(format!("malformed ledgerClosed message: {}", e)))?;

    let mut formatted = Map::new();
    let mut amount = |key: &str, drops: Option<Decimal>| -> Result<()> {
        if let Some(drops) = drops {
            formatted.insert(key.to_string(), Value::String(csc_from_drops(drops)?));
        }
        Ok(())
    };
    amount("baseFeeCSC", close.fee_base)?;
    amount("reserveBaseCSC", close.reserve_base)?;
    amount("reserveIncrementCSC", close.reserve_inc)?;

    if let Some(hash) = close.ledger_hash {
        formatted.insert("ledgerHash".into(), Value::String(hash));
    }
    if let Some(timestamp) = close.ledger_time.and_then(casinocoin_time_to_iso8601) {
        formatted.insert("ledgerTimestamp".into(), Value::String(timestamp));
    }
    formatted.insert("ledgerVersion".into(), Value::from(close.ledger_index));
    if let Some(count) = close.txn_count {
        formatted.insert("transactionCount".into(), Value::from(count));
    }
    if let Some(ranges) = close.validated_ledgers {
        formatted.insert("validatedLedgerVersions".into(), Value::String(ranges));
    }
    Ok(Value::Object(formatted))
}

/// A connection that refuses to query unvalidated ledgers
///
/// Any request carrying a `ledger_index` other than `"validated"` must name
/// a ledger at or below the latest validated version, as a JSON number.
/// Strings such as `"current"`, `"closed"` or `"100"` are refused.
#[derive(Clone, Debug)]
pub struct RestrictedConnection {
    connection: Connection,
}

impl RestrictedConnection {
    /// Wrap `connection`
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The wrapped connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a command after checking its `ledger_index`
    ///
    /// # Errors
    ///
    /// `Error::LedgerVersion` when the index is not a JSON number or is ahead of
    /// the latest validated ledger; otherwise as [`Connection::request`].
    pub async fn request(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        if let Some(index) = payload.get("ledger_index").filter(|index| !index.is_null()) {
            if *index != "validated" {
                let latest = self.connection.get_ledger_version().await?;
                match index.as_u64() {
                    Some(requested) if requested <= u64::from(latest) => {}
                    _ => {
                        return Err(Error::LedgerVersion(format!(
                            "ledger_index {} is not a validated ledger (latest is {})",
                            index, latest
                        )))
                    }
                }
            }
        }
        self.connection.request(&payload, timeout).await
    }
}

#[async_trait]
impl LedgerClient for RestrictedConnection {
    async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    async fn request(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        RestrictedConnection::request(self, payload, timeout).await
    }

    async fn get_ledger_version(&self) -> Result<u32> {
        self.connection.get_ledger_version().await
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    fn cached_ledger_version(&self) -> Option<u32> {
        self.connection.cached_ledger_version()
    }
}
