//! Fan-out over several nodes
//!
//! [`Broadcast`] wraps a list of backends and presents them as one
//! [`LedgerClient`]:
//!
//! - `connect()` / `disconnect()` run on every backend
//! - `is_connected()` holds only when every backend is connected
//! - `request()` goes to every backend; the first to settle wins, whether
//!   it succeeded or failed
//! - synchronous queries answer from the first backend, the primary
//!
//! Events are merged: `ledgerClosed` is re-published only for a ledger
//! strictly newer than any seen so far, so each ledger is reported once no
//! matter how many nodes announce it. `error` events are re-published as is.

use crate::client::LedgerClient;
use crate::{ConnectionEvent, EventBus};
use async_trait::async_trait;
use csclink_core::{Error, Result, StreamKind};
use futures::future::{select_all, try_join_all};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Several backends presented as one
pub struct Broadcast<C> {
    backends: Vec<C>,
    events: EventBus,
    forwarders: Vec<JoinHandle<()>>,
}

impl<C: LedgerClient> Broadcast<C> {
    /// Wrap `backends`; the first one is the primary
    ///
    /// Must be called inside a Tokio runtime; one task per backend forwards
    /// its events.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` when `backends` is empty.
    pub fn new(backends: Vec<C>) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Connection(
                "broadcast needs at least one server".into(),
            ));
        }

        let events = EventBus::new();
        // 0 means no ledger seen yet
        let latest = Arc::new(AtomicU64::new(0));
        let forwarders = backends
            .iter()
            .map(|backend| {
                tokio::spawn(forward_events(
                    backend.subscribe(),
                    events.clone(),
                    latest.clone(),
                ))
            })
            .collect();

        Ok(Self {
            backends,
            events,
            forwarders,
        })
    }

    /// The backend answering synchronous queries
    pub fn primary(&self) -> &C {
        &self.backends[0]
    }

    /// Every backend, primary first
    pub fn backends(&self) -> &[C] {
        &self.backends
    }
}

impl<C> Drop for Broadcast<C> {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

async fn forward_events(
    mut source: broadcast::Receiver<ConnectionEvent>,
    events: EventBus,
    latest: Arc<AtomicU64>,
) {
    loop {
        let event = match source.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "broadcast fell behind a backend");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match &event {
            ConnectionEvent::Stream {
                kind: StreamKind::LedgerClosed,
                message,
            } => {
                let Some(version) = message.get("ledger_index").and_then(ledger_index) else {
                    continue;
                };
                if latest.fetch_max(version, Ordering::SeqCst) < version {
                    events.emit(event);
                }
            }
            ConnectionEvent::Error { .. } => events.emit(event),
            _ => {}
        }
    }
}

fn ledger_index(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl<C: LedgerClient> LedgerClient for Broadcast<C> {
    async fn connect(&self) -> Result<()> {
        try_join_all(self.backends.iter().map(|backend| backend.connect())).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        try_join_all(self.backends.iter().map(|backend| backend.disconnect())).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.backends.iter().all(|backend| backend.is_connected())
    }

    async fn request(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        let requests = self
            .backends
            .iter()
            .map(|backend| backend.request(payload.clone(), timeout));
        let (first, index, _rest) = select_all(requests).await;
        tracing::trace!(backend = index, "broadcast request settled");
        first
    }

    async fn get_ledger_version(&self) -> Result<u32> {
        let (first, _, _rest) =
            select_all(self.backends.iter().map(|backend| backend.get_ledger_version())).await;
        first
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn cached_ledger_version(&self) -> Option<u32> {
        self.primary().cached_ledger_version()
    }
}
