//! Common test utilities for csclink-client integration tests
//!
//! [`MockNode`] is a lightweight stand-in for a validating node: it accepts
//! WebSocket connections, answers requests through a handler, records every
//! frame it receives and can push frames or drop connections on demand.

#![allow(dead_code)]

use csclink_client::ConnectionEvent;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Ledger the mock node reports as validated after subscribe
pub const LEDGER: u32 = 100;

type Handler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// A failure the node inflicts on the first connection it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Drop the TCP stream before the WebSocket handshake
    DropBeforeHandshake,
    /// Drop the socket once the ledger subscription arrives, without replying
    DropOnSubscribe,
}

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Close(u16),
    Drop,
}

/// Mock validating node
pub struct MockNode {
    addr: SocketAddr,
    control: broadcast::Sender<Control>,
    frames: mpsc::UnboundedReceiver<Value>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockNode {
    /// A node that accepts the ledger subscription and answers `ping`
    pub async fn start() -> Self {
        Self::with_handler(default_reply).await
    }

    /// A node answering with `handler`; `None` means no answer
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(handler), None).await
    }

    /// A default node that inflicts `fault` on its first connection only
    pub async fn faulty(fault: Fault) -> Self {
        Self::spawn(Arc::new(default_reply), Some(fault)).await
    }

    async fn spawn(handler: Handler, fault: Option<Fault>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let control = control.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let first = connections.fetch_add(1, Ordering::SeqCst) == 0;
                    let fault = fault.filter(|_| first);
                    if fault == Some(Fault::DropBeforeHandshake) {
                        drop(stream);
                        continue;
                    }
                    tokio::spawn(serve(
                        stream,
                        handler.clone(),
                        frame_tx.clone(),
                        control.subscribe(),
                        fault == Some(Fault::DropOnSubscribe),
                    ));
                }
            })
        };

        Self {
            addr,
            control,
            frames,
            connections,
            accept_task,
        }
    }

    /// WebSocket URL of this node
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next frame received from any client, or `None` after `wait`
    pub async fn next_frame_within(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.frames.recv()).await.ok().flatten()
    }

    /// Next frame received from any client
    pub async fn next_frame(&mut self) -> Value {
        self.next_frame_within(Duration::from_secs(5))
            .await
            .expect("no frame received")
    }

    /// Next frame whose `command` is `command`
    pub async fn next_command(&mut self, command: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["command"] == command {
                return frame;
            }
        }
    }

    /// Send a frame to every open connection
    pub fn push(&self, frame: Value) {
        let _ = self.control.send(Control::Push(frame.to_string()));
    }

    /// Send raw text to every open connection
    pub fn push_raw(&self, text: &str) {
        let _ = self.control.send(Control::Push(text.to_string()));
    }

    /// Close every connection with a close frame carrying `code`
    pub fn close_all(&self, code: u16) {
        let _ = self.control.send(Control::Close(code));
    }

    /// Drop every connection without a close handshake
    pub fn drop_all(&self) {
        let _ = self.control.send(Control::Drop);
    }

    /// Stop accepting and drop every connection
    pub async fn shutdown(self) {
        self.accept_task.abort();
        self.drop_all();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve(
    stream: TcpStream,
    handler: Handler,
    frames: mpsc::UnboundedSender<Value>,
    mut control: broadcast::Receiver<Control>,
    drop_on_subscribe: bool,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    let _ = frames.send(request.clone());
                    if drop_on_subscribe && request["command"] == "subscribe" {
                        return;
                    }
                    if let Some(reply) = handler(&request) {
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                // keep reading so the close reply gets flushed
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            command = control.recv() => match command {
                Ok(Control::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                }
                Ok(Control::Drop) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Subscribe succeeds; `ping` gets an empty result; everything else is ignored
pub fn default_reply(request: &Value) -> Option<Value> {
    match request["command"].as_str() {
        Some("subscribe") => Some(subscribed(request)),
        Some("ping") => Some(success(request, json!({}))),
        _ => None,
    }
}

/// Successful subscribe reply at [`LEDGER`]
pub fn subscribed(request: &Value) -> Value {
    success(
        request,
        json!({
            "fee_base": 10,
            "fee_ref": 10,
            "ledger_hash": "7C3D1A",
            "ledger_index": LEDGER,
            "ledger_time": 630000000,
            "reserve_base": 2000000000,
            "reserve_inc": 500000000,
            "validated_ledgers": format!("90-{}", LEDGER)
        }),
    )
}

/// `status: "success"` response to `request`
pub fn success(request: &Value, result: Value) -> Value {
    json!({
        "id": request["id"],
        "type": "response",
        "status": "success",
        "result": result
    })
}

/// `status: "error"` response to `request`
pub fn failure(request: &Value, error: &str, message: &str) -> Value {
    json!({
        "id": request["id"],
        "type": "response",
        "status": "error",
        "error": error,
        "error_message": message,
        "request": request
    })
}

/// `ledgerClosed` stream message
pub fn ledger_closed(index: u32, validated: Option<&str>) -> Value {
    let mut message = json!({
        "type": "ledgerClosed",
        "fee_base": 12,
        "fee_ref": 10,
        "ledger_hash": "9E4F",
        "ledger_index": index,
        "ledger_time": 630000010,
        "reserve_base": 2000000000,
        "reserve_inc": 500000000,
        "txn_count": 2
    });
    if let Some(validated) = validated {
        message["validated_ledgers"] = json!(validated);
    }
    message
}

/// Next event, failing the test after five seconds
pub async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Next lifecycle event, skipping stream and error events
pub async fn next_lifecycle_event(
    events: &mut broadcast::Receiver<ConnectionEvent>,
) -> ConnectionEvent {
    loop {
        match next_event(events).await {
            ConnectionEvent::Stream { .. } | ConnectionEvent::Error { .. } => continue,
            event => return event,
        }
    }
}

/// Whether any event matching `predicate` arrives within `wait`
pub async fn sees_event_within<P>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    wait: Duration,
    predicate: P,
) -> bool
where
    P: Fn(&ConnectionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        if predicate(&event) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_node_creation() {
        let node = MockNode::start().await;
        assert!(node.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(node.connections(), 0);
        node.shutdown().await;
    }

    #[test]
    fn test_failure_format() {
        let reply = failure(&json!({"id": 3, "command": "account_info"}), "actNotFound", "Account not found.");
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error"], "actNotFound");
    }
}
