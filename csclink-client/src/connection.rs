//! Persistent connection to a validating node
//!
//! [`Connection`] owns one WebSocket at a time and keeps it usable:
//!
//! 1. **Connect**: open the socket, then subscribe to the ledger stream.
//!    The connection is *ready* once that subscription succeeds.
//! 2. **Request**: frame a command with a fresh id, send it once ready and
//!    settle it with exactly one of response, timeout or socket close.
//! 3. **Track**: every `ledgerClosed` message refreshes the cached ledger
//!    version, the set of available ledgers and the fee parameters.
//! 4. **Recover**: when a ready socket drops unexpectedly, reconnect on the
//!    schedule of the configured [`ReconnectionStrategy`].
//!
//! # Cloning
//!
//! `Connection` is cheaply cloneable; all clones share the socket, the
//! ledger cache and the event bus.
//!
//! # Concurrency
//!
//! Concurrent `connect()` calls share a single attempt and see the same
//! outcome. Requests issued while an attempt is in progress wait for
//! readiness before they are written; only the ledger subscription itself
//! is written to a socket that is not ready yet.

use crate::events::{ConnectionEvent, EventBus};
use crate::metrics::ClientMetrics;
use crate::options::ConnectionOptions;
use crate::reconnect::{ReconnectionStrategy, TieredBackoff};
use crate::request::RequestTracker;
use crate::transport::{self, OpenError, WsStream};
use crate::{ConnectionBuilder, ConnectionState};
use csclink_core::{
    codec, Decimal, Error, InboundMessage, LedgerClose, RangeSet, Result, StreamKind,
    SubscribeRequest, FRAME_TARGET,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type ConnectOutcome = Shared<BoxFuture<'static, Result<()>>>;

const NORMAL_CLOSURE: u16 = 1000;
const ABNORMAL_CLOSURE: u16 = 1006;

/// How long `disconnect()` waits for the peer to finish the close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent WebSocket connection to a validating node
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    url: Option<String>,
    options: ConnectionOptions,
    strategy: Box<dyn ReconnectionStrategy>,
    events: EventBus,
    requests: RequestTracker,
    state: Mutex<State>,
    /// Mirrors `State::ready` for waiters
    ready: watch::Sender<bool>,
    /// Bumped every time a socket goes away or an attempt fails to open one
    closes: watch::Sender<u64>,
    metrics: Option<Arc<ClientMetrics>>,
}

#[derive(Default)]
struct State {
    socket: Option<Socket>,
    ready: bool,
    ledger: LedgerCache,
    /// Reconnection attempts since the last ready socket
    retry: u32,
    retry_task: Option<JoinHandle<()>>,
    connecting: Option<ConnectAttempt>,
    next_socket: u64,
    next_attempt: u64,
}

struct Socket {
    id: u64,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    closing: Option<Teardown>,
    reader: AbortHandle,
}

/// Who asked for a socket to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// `disconnect()`; reported as a normal closure
    User,
    /// Failed ledger subscription; not reported
    Internal,
}

struct ConnectAttempt {
    id: u64,
    abort: AbortHandle,
    outcome: ConnectOutcome,
}

#[derive(Default)]
struct LedgerCache {
    version: Option<u32>,
    available: RangeSet,
    fee_base: Option<Decimal>,
    fee_ref: Option<Decimal>,
}

impl LedgerCache {
    fn apply(&mut self, close: &LedgerClose) {
        self.version = Some(close.ledger_index);
        match &close.validated_ledgers {
            Some(ranges) => {
                self.available.reset();
                if let Err(e) = self.available.parse_and_add_ranges(ranges) {
                    tracing::warn!(error = %e, ranges = %ranges, "ignoring malformed validated_ledgers");
                }
            }
            None => {
                if let Err(e) = self.available.add_value(close.ledger_index) {
                    tracing::warn!(error = %e, "cannot record ledger version");
                }
            }
        }
        if close.fee_base.is_some() {
            self.fee_base = close.fee_base;
        }
        if close.fee_ref.is_some() {
            self.fee_ref = close.fee_ref;
        }
    }
}

/// Which readiness a frame needs before it may be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Wait for the ledger subscription to succeed
    Ready,
    /// Write as soon as the socket is open
    Open,
}

/// Outcome of one socket within a connect attempt
enum Attempt {
    /// The socket closed before the connection became ready
    Retry(String),
    Fail(Error),
}

enum CloseStep {
    Nothing,
    Wait(u64),
    Close(u64, Arc<tokio::sync::Mutex<WsSink>>),
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = state.socket.take() {
            socket.reader.abort();
        }
        if let Some(task) = state.retry_task.take() {
            task.abort();
        }
        if let Some(attempt) = state.connecting.take() {
            attempt.abort.abort();
        }
    }
}

impl Connection {
    /// A connection to `url` with default options; nothing is opened yet
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_options(Some(url.into()), ConnectionOptions::default())
    }

    /// A connection with explicit options
    ///
    /// `None` or an empty URL creates a connection whose `connect()` fails
    /// with `Error::Connection`.
    pub fn with_options(url: Option<String>, options: ConnectionOptions) -> Self {
        Self::from_parts(url, options, Box::new(TieredBackoff::default()), None)
    }

    /// Start configuring a connection
    pub fn builder(url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(url)
    }

    pub(crate) fn from_parts(
        url: Option<String>,
        options: ConnectionOptions,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        let (closes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                url: url.filter(|url| !url.is_empty()),
                options,
                strategy,
                events: EventBus::new(),
                requests: RequestTracker::new(),
                state: Mutex::new(State::default()),
                ready,
                closes,
                metrics,
            }),
        }
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// The server URL, if one was given
    pub fn url(&self) -> Option<&str> {
        self.inner.url.as_deref()
    }

    /// The options this connection was created with
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Listen for [`ConnectionEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// True only when a socket is open and the ledger subscription succeeded
    pub fn is_connected(&self) -> bool {
        let state = self.inner.lock_state();
        state.ready && state.socket.as_ref().is_some_and(|s| s.closing.is_none())
    }

    /// Snapshot of the lifecycle state
    pub fn state(&self) -> ConnectionState {
        let state = self.inner.lock_state();
        let open = state.socket.as_ref().is_some_and(|s| s.closing.is_none());
        if open && state.ready {
            ConnectionState::Ready
        } else if open || state.connecting.is_some() {
            if state.retry > 0 {
                ConnectionState::Reconnecting { attempt: state.retry }
            } else {
                ConnectionState::Connecting
            }
        } else if state.retry_task.as_ref().is_some_and(|t| !t.is_finished()) {
            ConnectionState::Reconnecting { attempt: state.retry }
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Number of requests waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.pending_count()
    }

    /// Last ledger version seen, without waiting for readiness
    pub fn cached_ledger_version(&self) -> Option<u32> {
        self.inner.lock_state().ledger.version
    }

    /// Open the socket and subscribe to the ledger stream
    ///
    /// Returns immediately when already ready, and joins the attempt in
    /// progress when there is one. Cancels any pending automatic
    /// reconnection.
    ///
    /// # Errors
    ///
    /// - `Error::Connection` when no URL was given or the options are unusable
    /// - `Error::NotConnected` when the socket failed before it opened
    /// - `Error::NotInitialized` when the node has no validated ledger yet
    #[tracing::instrument(skip(self), fields(url = ?self.inner.url))]
    pub async fn connect(&self) -> Result<()> {
        if let Some(task) = self.inner.lock_state().retry_task.take() {
            task.abort();
        }
        self.connect_inner().await
    }

    async fn connect_inner(&self) -> Result<()> {
        let url = self.inner.url.clone().ok_or_else(|| {
            Error::Connection("cannot connect because no server was specified".into())
        })?;

        loop {
            let mut closes = self.inner.closes.subscribe();
            let outcome = {
                let mut state = self.inner.lock_state();
                let open = state.socket.as_ref().map(|socket| socket.closing.is_none());
                let joined = state.connecting.as_ref().map(|attempt| attempt.outcome.clone());
                match (joined, open) {
                    (Some(outcome), _) => Some(outcome),
                    (None, Some(true)) if state.ready => return Ok(()),
                    (None, None) => Some(self.start_attempt(&mut state, url.clone())),
                    // closing, start over once it is gone
                    (None, Some(_)) => None,
                }
            };

            match outcome {
                Some(outcome) => return outcome.await,
                None => {
                    let mut ready = self.inner.ready.subscribe();
                    tokio::select! {
                        _ = closes.changed() => {}
                        _ = ready.wait_for(|ready| *ready) => {}
                    }
                }
            }
        }
    }

    fn start_attempt(&self, state: &mut State, url: String) -> ConnectOutcome {
        state.next_attempt += 1;
        let id = state.next_attempt;

        let connection = self.clone();
        let task = tokio::spawn(async move { connection.run_attempt(id, url).await });
        let abort = task.abort_handle();
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(Error::NotConnected(Some(
                    "connection attempt cancelled".into(),
                ))),
                Err(e) => Err(Error::Internal(format!("connection task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.connecting = Some(ConnectAttempt {
            id,
            abort,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_attempt(self, id: u64, url: String) -> Result<()> {
        self.report_state();
        let result = self.establish(&url).await;
        {
            let mut state = self.inner.lock_state();
            if state.connecting.as_ref().map(|attempt| attempt.id) == Some(id) {
                state.connecting = None;
            }
        }
        match &result {
            Ok(()) => tracing::info!(url = %url, "connected"),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "connect attempt failed");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_error(e.kind());
                }
            }
        }
        self.report_state();
        result
    }

    async fn establish(&self, url: &str) -> Result<()> {
        let mut early_closes = 0;
        loop {
            match self.open_and_subscribe(url).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(reason)) => {
                    early_closes += 1;
                    let delay = self
                        .inner
                        .strategy
                        .next_delay(early_closes)
                        .ok_or_else(|| Error::NotConnected(Some(reason.clone())))?;
                    tracing::debug!(attempt = early_closes, ?delay, %reason, "socket closed before ready, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn open_and_subscribe(&self, url: &str) -> std::result::Result<(), Attempt> {
        let ws = match transport::open(url, &self.inner.options).await {
            Ok(ws) => ws,
            Err(err) => {
                self.signal_close();
                return Err(match err {
                    OpenError::Config(msg) => Attempt::Fail(Error::Connection(msg)),
                    OpenError::ClosedBeforeOpen(msg) => Attempt::Retry(msg),
                    OpenError::Failed(msg) => Attempt::Fail(Error::NotConnected(Some(msg))),
                });
            }
        };

        let socket_id = self.install(ws);
        tracing::debug!(socket = socket_id, "websocket open, subscribing to ledger stream");

        let subscribe = serde_json::to_value(SubscribeRequest::ledger())
            .map_err(|e| Attempt::Fail(e.into()))?;
        let close = match self.exchange(&subscribe, None, Gate::Open).await {
            Ok(result) => ledger_close_from_subscribe(result),
            Err(Error::Disconnected(reason)) => {
                return Err(Attempt::Retry(
                    reason.unwrap_or_else(|| "socket closed during subscribe".into()),
                ))
            }
            Err(e) => Err(e),
        };
        let close = match close {
            Ok(close) => close,
            Err(e) => {
                self.close_socket(Some(socket_id), Teardown::Internal).await;
                return Err(Attempt::Fail(e));
            }
        };

        let reconnected = {
            let mut state = self.inner.lock_state();
            if state.socket.as_ref().map(|socket| socket.id) != Some(socket_id) {
                return Err(Attempt::Retry("socket closed before ready".into()));
            }
            state.ledger.apply(&close);
            state.ready = true;
            std::mem::take(&mut state.retry) > 0
        };
        self.inner.ready.send_replace(true);

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_ledger_version(close.ledger_index);
            if reconnected {
                metrics.record_reconnection_success();
            }
        }
        self.inner.events.emit(ConnectionEvent::Connected);
        Ok(())
    }

    fn install(&self, ws: WsStream) -> u64 {
        let (sink, source) = ws.split();
        let mut state = self.inner.lock_state();
        state.next_socket += 1;
        let id = state.next_socket;
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.inner), id, source));
        let socket = Socket {
            id,
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            closing: None,
            reader: reader.abort_handle(),
        };
        if let Some(previous) = state.socket.replace(socket) {
            previous.reader.abort();
        }
        id
    }

    /// Close the socket
    ///
    /// Cancels pending reconnection and any attempt in progress, then sends
    /// a close frame and waits for the socket to go away. Calling it again,
    /// or without a socket, is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let aborted_attempt = {
            let mut state = self.inner.lock_state();
            if let Some(task) = state.retry_task.take() {
                task.abort();
            }
            state.retry = 0;
            match state.connecting.take() {
                Some(attempt) => {
                    attempt.abort.abort();
                    true
                }
                None => false,
            }
        };
        if aborted_attempt {
            self.signal_close();
        }
        self.close_socket(None, Teardown::User).await;
        self.report_state();
        Ok(())
    }

    /// `disconnect()` followed by `connect()`
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await?;
        self.connect().await
    }

    async fn close_socket(&self, expected: Option<u64>, reason: Teardown) {
        let mut closes = self.inner.closes.subscribe();
        let step = {
            let mut state = self.inner.lock_state();
            match state.socket.as_mut() {
                Some(socket) if expected.map_or(true, |id| id == socket.id) => {
                    if socket.closing.is_some() {
                        CloseStep::Wait(socket.id)
                    } else {
                        socket.closing = Some(reason);
                        CloseStep::Close(socket.id, socket.sink.clone())
                    }
                }
                _ => CloseStep::Nothing,
            }
        };

        let socket_id = match step {
            CloseStep::Nothing => return,
            CloseStep::Wait(id) => id,
            CloseStep::Close(id, sink) => {
                if let Err(e) = sink.lock().await.close().await {
                    tracing::debug!(socket = id, error = %e, "close frame not sent");
                }
                id
            }
        };

        let gone = async {
            while self.has_socket(socket_id) {
                if closes.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, gone).await.is_err() {
            tracing::warn!(socket = socket_id, "peer did not finish the close handshake");
            self.force_close(socket_id);
        }
    }

    fn has_socket(&self, socket_id: u64) -> bool {
        self.inner
            .lock_state()
            .socket
            .as_ref()
            .is_some_and(|socket| socket.id == socket_id)
    }

    fn force_close(&self, socket_id: u64) {
        let found = {
            let state = self.inner.lock_state();
            match state.socket.as_ref().filter(|socket| socket.id == socket_id) {
                Some(socket) => {
                    socket.reader.abort();
                    true
                }
                None => false,
            }
        };
        if found {
            self.on_socket_closed(socket_id, None);
        }
    }

    fn on_socket_closed(&self, socket_id: u64, code: Option<u16>) {
        let (teardown, was_ready) = {
            let mut state = self.inner.lock_state();
            if state.socket.as_ref().map(|socket| socket.id) != Some(socket_id) {
                return;
            }
            let teardown = state.socket.take().and_then(|socket| socket.closing);
            (teardown, std::mem::replace(&mut state.ready, false))
        };
        self.inner.ready.send_replace(false);
        tracing::info!(socket = socket_id, code = ?code, "websocket closed");

        match teardown {
            Some(Teardown::User) => self.inner.events.emit(ConnectionEvent::Disconnected {
                code: code.unwrap_or(NORMAL_CLOSURE),
            }),
            Some(Teardown::Internal) => {}
            None if was_ready => {
                self.inner.events.emit(ConnectionEvent::Disconnected {
                    code: code.unwrap_or(ABNORMAL_CLOSURE),
                });
                self.schedule_reconnect();
            }
            // a connect attempt owns this socket and retries on its own
            None => {}
        }

        self.signal_close();
        self.report_state();
    }

    fn schedule_reconnect(&self) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let (attempt, delay) = {
                    let Some(connection) = Connection::upgrade(&weak) else {
                        return;
                    };
                    let attempt = {
                        let mut state = connection.inner.lock_state();
                        state.retry += 1;
                        state.retry
                    };
                    (attempt, connection.inner.strategy.next_delay(attempt))
                };
                let Some(delay) = delay else {
                    tracing::warn!(attempt, "giving up on reconnection");
                    return;
                };
                tokio::time::sleep(delay).await;

                let Some(connection) = Connection::upgrade(&weak) else {
                    return;
                };
                tracing::info!(attempt, "reconnecting");
                connection.inner.events.emit(ConnectionEvent::Reconnecting { attempt });
                if let Some(metrics) = &connection.inner.metrics {
                    metrics.record_reconnection_attempt();
                }
                match connection.connect_inner().await {
                    Ok(()) => return,
                    Err(e) => tracing::warn!(attempt, error = %e, "reconnection attempt failed"),
                }
            }
        });

        if let Some(previous) = self.inner.lock_state().retry_task.replace(task) {
            previous.abort();
        }
    }

    fn signal_close(&self) {
        self.inner.closes.send_modify(|count| *count = count.wrapping_add(1));
    }

    fn report_state(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.update_connection_state(self.state().as_gauge());
        }
    }

    /// A socket exists or is being opened
    fn has_transport(&self) -> bool {
        let state = self.inner.lock_state();
        state.socket.as_ref().is_some_and(|s| s.closing.is_none()) || state.connecting.is_some()
    }

    /// A socket exists, is being opened, or will be reopened
    fn expects_transport(&self) -> bool {
        self.has_transport()
            || self
                .inner
                .lock_state()
                .retry_task
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Send a command and wait for its result
    ///
    /// The payload must serialize to a JSON object; `null` top-level fields
    /// are dropped and an `id` is added. The request is written once the
    /// connection is ready and must be answered within `timeout` (the
    /// connection's default when `None`).
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` when there is no socket and no attempt in progress
    /// - `Error::Disconnected` when the socket closes before the response
    /// - `Error::Timeout` when the deadline passes first
    /// - `Error::Casinocoind` when the node answers with `status: "error"`
    /// - `Error::ResponseFormat` for any other status
    #[tracing::instrument(skip(self, payload), fields(command = tracing::field::Empty))]
    pub async fn request<P: Serialize + ?Sized>(
        &self,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let started = Instant::now();
        let payload = serde_json::to_value(payload)?;
        let command = payload
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::Span::current().record("command", command.as_str());

        let result = self.exchange(&payload, timeout, Gate::Ready).await;

        if let Err(e) = &result {
            tracing::debug!(error = %e, "request failed");
        }
        if let Some(metrics) = &self.inner.metrics {
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.kind(),
            };
            metrics.record_request(&command, outcome, started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                metrics.record_error(e.kind());
            }
        }
        result
    }

    async fn exchange(&self, payload: &Value, timeout: Option<Duration>, gate: Gate) -> Result<Value> {
        let mut closes = self.inner.closes.subscribe();
        if !self.has_transport() {
            return Err(Error::NotConnected(None));
        }

        let mut pending = self.inner.requests.register();
        let text = codec::encode_request(payload, pending.id())?;

        let deliver = async {
            if gate == Gate::Ready {
                let mut ready = self.inner.ready.subscribe();
                let _ = ready.wait_for(|ready| *ready).await;
            }
            self.send_text(text).await
        };
        tokio::select! {
            sent = deliver => sent?,
            _ = closes.changed() => return Err(Error::Disconnected(None)),
        }

        let deadline = timeout.unwrap_or_else(|| self.inner.options.request_timeout());
        let body = tokio::select! {
            biased;
            body = pending.response() => body?,
            _ = closes.changed() => return Err(Error::Disconnected(None)),
            _ = tokio::time::sleep(deadline) => return Err(Error::Timeout),
        };
        codec::into_result(body)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let sink = self
            .inner
            .lock_state()
            .socket
            .as_ref()
            .filter(|socket| socket.closing.is_none())
            .map(|socket| socket.sink.clone())
            .ok_or_else(|| Error::Disconnected(Some("socket is not open".into())))?;

        if self.inner.options.trace {
            tracing::info!(target: FRAME_TARGET, direction = "send", frame = %text);
        }
        let mut sink = sink.lock().await;
        let sent = sink.send(Message::Text(text)).await;
        sent.map_err(send_failure)
    }

    async fn when_ready(&self) -> Result<()> {
        let mut ready = self.inner.ready.subscribe();
        let mut closes = self.inner.closes.subscribe();
        loop {
            if *ready.borrow_and_update() {
                return Ok(());
            }
            if !self.expects_transport() {
                return Err(Error::NotConnected(None));
            }
            tokio::select! {
                _ = ready.changed() => {}
                _ = closes.changed() => {}
            }
        }
    }

    /// Latest validated ledger version; waits for readiness
    pub async fn get_ledger_version(&self) -> Result<u32> {
        self.when_ready().await?;
        self.inner
            .lock_state()
            .ledger
            .version
            .ok_or_else(|| Error::NotInitialized("no ledger version received".into()))
    }

    /// Whether the node holds every ledger in `[low, high]`
    ///
    /// `high` defaults to the latest validated version. Waits for readiness.
    pub async fn has_ledger_versions(&self, low: u32, high: Option<u32>) -> Result<bool> {
        self.when_ready().await?;
        let state = self.inner.lock_state();
        let Some(high) = high.or(state.ledger.version) else {
            return Ok(false);
        };
        if low > high {
            return Err(Error::InvalidRange { start: low, end: high });
        }
        Ok(state.ledger.available.contains_range(low, high))
    }

    /// Whether the node holds `version`; waits for readiness
    pub async fn has_ledger_version(&self, version: u32) -> Result<bool> {
        self.has_ledger_versions(version, Some(version)).await
    }

    /// Base transaction cost in drops from the latest ledger close that
    /// reported one; `None` when the node never did. Waits for readiness.
    pub async fn get_fee_base(&self) -> Result<Option<Decimal>> {
        self.when_ready().await?;
        Ok(self.inner.lock_state().ledger.fee_base)
    }

    /// Fee reference units, like [`Connection::get_fee_base`]
    pub async fn get_fee_ref(&self) -> Result<Option<Decimal>> {
        self.when_ready().await?;
        Ok(self.inner.lock_state().ledger.fee_ref)
    }

    fn on_frame(&self, text: &str) {
        if self.inner.options.trace {
            tracing::info!(target: FRAME_TARGET, direction = "receive", frame = %text);
        }

        match codec::decode(text) {
            Ok(InboundMessage::Response { id, body }) => {
                if !self.inner.requests.complete(id, body) {
                    tracing::debug!(id, "discarding response with no pending request");
                }
            }
            Ok(InboundMessage::Stream { kind, body }) => {
                if kind == StreamKind::LedgerClosed {
                    if let Err(e) = self.on_ledger_closed(&body) {
                        self.bad_message(text, &e);
                        return;
                    }
                }
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_stream_message(kind.as_str());
                }
                self.inner.events.emit(ConnectionEvent::Stream { kind, message: body });
            }
            Ok(InboundMessage::Warning { error, message, body }) => {
                tracing::warn!(code = %error, message = ?message, "node reported an error");
                self.inner.events.emit(ConnectionEvent::Error {
                    code: error,
                    message,
                    data: body,
                });
            }
            Err(e) => self.bad_message(text, &e),
        }
    }

    fn on_ledger_closed(&self, body: &Value) -> Result<()> {
        let close: LedgerClose = serde_json::from_value(body.clone())
            .map_err(|e| Error::ResponseFormat(format!("malformed ledgerClosed message: {}", e)))?;
        self.inner.lock_state().ledger.apply(&close);
        tracing::debug!(ledger_index = close.ledger_index, "ledger closed");
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_ledger_version(close.ledger_index);
        }
        Ok(())
    }

    fn bad_message(&self, text: &str, error: &Error) {
        tracing::warn!(error = %error, "unrecognized frame");
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_bad_message();
        }
        self.inner.events.emit(ConnectionEvent::Error {
            code: "badMessage".into(),
            message: Some(error.to_string()),
            data: Value::String(text.to_string()),
        });
    }

    fn on_transport_error(&self, error: &tokio_tungstenite::tungstenite::Error) {
        tracing::warn!(error = %error, "websocket error");
        if self.is_connected() {
            self.inner.events.emit(ConnectionEvent::Error {
                code: "websocket".into(),
                message: Some(error.to_string()),
                data: Value::Null,
            });
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

/// A write that failed because the socket went away is a disconnect;
/// anything else is a transport error on a live socket
fn send_failure(error: WsError) -> Error {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) => {
            Error::Disconnected(Some(error.to_string()))
        }
        other => Error::WebSocket(other.to_string()),
    }
}

fn ledger_close_from_subscribe(result: Value) -> Result<LedgerClose> {
    let initialized = match result.get("ledger_index") {
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n > 0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    };
    if !initialized {
        return Err(Error::NotInitialized(
            "ledger subscription returned no ledger index".into(),
        ));
    }
    serde_json::from_value(result)
        .map_err(|e| Error::ResponseFormat(format!("malformed subscribe result: {}", e)))
}

async fn read_loop(inner: Weak<Inner>, socket_id: u64, mut source: WsSource) {
    let mut close_code = None;
    while let Some(frame) = source.next().await {
        let Some(connection) = Connection::upgrade(&inner) else {
            return;
        };
        match frame {
            Ok(Message::Text(text)) => connection.on_frame(&text),
            Ok(Message::Binary(bytes)) => connection.on_frame(&String::from_utf8_lossy(&bytes)),
            Ok(Message::Close(frame)) => {
                close_code = frame.map(|frame| u16::from(frame.code));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connection.on_transport_error(&e);
                break;
            }
        }
    }
    if let Some(connection) = Connection::upgrade(&inner) {
        connection.on_socket_closed(socket_id, close_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_result_requires_ledger_index() {
        assert!(matches!(
            ledger_close_from_subscribe(json!({})),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            ledger_close_from_subscribe(json!({"ledger_index": 0})),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            ledger_close_from_subscribe(Value::Null),
            Err(Error::NotInitialized(_))
        ));

        let close = ledger_close_from_subscribe(json!({
            "ledger_index": 8819951,
            "validated_ledgers": "8819000-8819951",
            "fee_base": 10,
            "fee_ref": 10
        }))
        .unwrap();
        assert_eq!(close.ledger_index, 8819951);
    }

    #[test]
    fn test_send_failure_classification() {
        use std::io;
        use tokio_tungstenite::tungstenite::error::CapacityError;

        assert!(matches!(send_failure(WsError::ConnectionClosed), Error::Disconnected(Some(_))));
        assert!(matches!(send_failure(WsError::AlreadyClosed), Error::Disconnected(Some(_))));
        assert!(matches!(
            send_failure(WsError::Io(io::Error::from(io::ErrorKind::BrokenPipe))),
            Error::Disconnected(Some(_))
        ));

        let oversized = send_failure(WsError::Capacity(CapacityError::MessageTooLong {
            size: 32 << 20,
            max_size: 16 << 20,
        }));
        assert!(matches!(oversized, Error::WebSocket(_)));
        assert_eq!(oversized.kind(), "websocket");
        assert!(oversized.is_transient());
    }

    #[test]
    fn test_ledger_cache_apply() {
        let mut cache = LedgerCache::default();
        cache.apply(&LedgerClose {
            ledger_index: 10,
            ledger_hash: None,
            ledger_time: None,
            validated_ledgers: Some("1-5,8-10".into()),
            fee_base: Some(Decimal::TEN),
            fee_ref: Some(Decimal::TEN),
            reserve_base: None,
            reserve_inc: None,
            txn_count: None,
        });
        assert_eq!(cache.version, Some(10));
        assert!(cache.available.contains_range(8, 10));
        assert!(!cache.available.contains_value(6));
        assert_eq!(cache.fee_base, Some(Decimal::TEN));

        // without validated_ledgers the new version is added to what is known
        cache.apply(&LedgerClose {
            ledger_index: 11,
            ledger_hash: None,
            ledger_time: None,
            validated_ledgers: None,
            fee_base: None,
            fee_ref: None,
            reserve_base: None,
            reserve_inc: None,
            txn_count: None,
        });
        assert_eq!(cache.version, Some(11));
        assert!(cache.available.contains_range(8, 11));
        assert_eq!(cache.fee_base, Some(Decimal::TEN));
    }

    #[tokio::test]
    async fn test_connect_without_url() {
        let connection = Connection::with_options(None, ConnectionOptions::default());
        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_url_is_no_url() {
        let connection = Connection::new("");
        assert!(connection.url().is_none());
        assert!(matches!(connection.connect().await, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_request_without_socket() {
        let connection = Connection::new("ws://127.0.0.1:1");
        let err = connection
            .request(&json!({"command": "server_info"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(None)));
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_socket() {
        let connection = Connection::new("ws://127.0.0.1:1");
        connection.disconnect().await.unwrap();
        connection.disconnect().await.unwrap();
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_ledger_queries_fail_when_idle() {
        let connection = Connection::new("ws://127.0.0.1:1");
        assert!(matches!(
            connection.get_ledger_version().await,
            Err(Error::NotConnected(_))
        ));
        assert!(connection.cached_ledger_version().is_none());
    }
}
