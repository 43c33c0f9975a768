//! Request/response correlation
//!
//! Every request gets the next integer id and a oneshot channel. The
//! message-handling task completes the channel when a response with that id
//! arrives; the caller owns the receiving end through a [`PendingResponse`].
//!
//! # Lifecycle
//!
//! 1. **Register**: allocate the id, store the sender
//! 2. **Send**: the caller frames and writes the request
//! 3. **Settle**: exactly one of response, timeout or socket close wins
//! 4. **Clean up**: dropping the `PendingResponse` removes the entry
//!
//! Because cleanup happens in `Drop`, an entry is removed exactly once no
//! matter which outcome settled the request, including the caller
//! abandoning the future. A response that arrives after cleanup finds no
//! entry and is discarded.

use csclink_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Tracks in-flight requests by correlation id
#[derive(Clone)]
pub(crate) struct RequestTracker {
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: Arc<AtomicU64>,
}

impl RequestTracker {
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate the next id and start waiting for its response
    pub(crate) fn register(&self) -> PendingResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries().insert(id, tx);
        PendingResponse {
            id,
            rx,
            tracker: self.clone(),
        }
    }

    /// Deliver a response body; false when nobody is waiting for `id`
    pub(crate) fn complete(&self, id: u64, body: Value) -> bool {
        match self.entries().remove(&id) {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.entries().len()
    }

    fn remove(&self, id: u64) {
        self.entries().remove(&id);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        // the map is never left half-updated, so a poisoned lock is still usable
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The receiving half of one in-flight request
pub(crate) struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Value>,
    tracker: RequestTracker,
}

impl PendingResponse {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the correlated response body
    pub(crate) async fn response(&mut self) -> Result<Value> {
        (&mut self.rx)
            .await
            .map_err(|_| Error::Disconnected(Some("response channel closed".into())))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}
