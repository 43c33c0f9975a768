//! Stream, warning and multi-node integration tests

mod common;

use common::{default_reply, ledger_closed, next_event, sees_event_within, success, MockNode, LEDGER};
use csclink_client::{Broadcast, Connection, ConnectionEvent, LedgerClient, RestrictedConnection};
use csclink_core::{Error, StreamKind};
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;

/// Next event that is not a lifecycle change
async fn next_message(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    loop {
        match next_event(events).await {
            ConnectionEvent::Connected
            | ConnectionEvent::Disconnected { .. }
            | ConnectionEvent::Reconnecting { .. } => continue,
            event => return event,
        }
    }
}

#[tokio::test]
async fn test_ledger_closed_updates_cache() {
    let node = MockNode::start().await;
    let connection = Connection::new(node.url());
    let mut events = connection.subscribe();
    connection.connect().await.unwrap();

    node.push(ledger_closed(101, Some("90-101")));
    match next_message(&mut events).await {
        ConnectionEvent::Stream { kind, message } => {
            assert_eq!(kind, StreamKind::LedgerClosed);
            assert_eq!(message["ledger_index"], 101);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert_eq!(connection.get_ledger_version().await.unwrap(), 101);
    assert!(connection.has_ledger_versions(90, None).await.unwrap());
    assert_eq!(connection.get_fee_base().await.unwrap(), Some(dec!(12)));
    assert_eq!(connection.get_fee_ref().await.unwrap(), Some(dec!(10)));

    // without validated_ledgers the new ledger extends what is known
    node.push(ledger_closed(102, None));
    next_message(&mut events).await;
    assert_eq!(connection.cached_ledger_version(), Some(102));
    assert!(connection.has_ledger_versions(90, Some(102)).await.unwrap());

    // a gap in the reported history
    node.push(ledger_closed(103, Some("90-95,97-103")));
    next_message(&mut events).await;
    assert!(!connection.has_ledger_versions(90, None).await.unwrap());
    assert!(connection.has_ledger_versions(97, None).await.unwrap());

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_transaction_stream() {
    let node = MockNode::start().await;
    let connection = Connection::new(node.url());
    let mut events = connection.subscribe();
    connection.connect().await.unwrap();

    node.push(json!({
        "type": "transaction",
        "validated": true,
        "transaction": {"TransactionType": "Payment"}
    }));
    match next_message(&mut events).await {
        ConnectionEvent::Stream { kind, message } => {
            assert_eq!(kind, StreamKind::Transaction);
            assert_eq!(message["transaction"]["TransactionType"], "Payment");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(connection.cached_ledger_version(), Some(LEDGER));

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_pushed_warning_becomes_error_event() {
    let node = MockNode::start().await;
    let connection = Connection::new(node.url());
    let mut events = connection.subscribe();
    connection.connect().await.unwrap();

    node.push(json!({
        "error": "slowDown",
        "error_message": "You are placing too much load on the server."
    }));
    match next_message(&mut events).await {
        ConnectionEvent::Error { code, message, data } => {
            assert_eq!(code, "slowDown");
            assert_eq!(
                message.as_deref(),
                Some("You are placing too much load on the server.")
            );
            assert_eq!(data["error"], "slowDown");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(connection.is_connected());

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_bad_messages() {
    let node = MockNode::start().await;
    let connection = Connection::new(node.url());
    let mut events = connection.subscribe();
    connection.connect().await.unwrap();

    for raw in [
        "this is not json",
        r#"{"type":"validationReceived"}"#,
        r#"{"type":"response","status":"success"}"#,
        r#"{"type":"ledgerClosed","ledger_index":"soon"}"#,
    ] {
        node.push_raw(raw);
        match next_message(&mut events).await {
            ConnectionEvent::Error { code, data, .. } => {
                assert_eq!(code, "badMessage");
                assert_eq!(data, json!(raw));
            }
            other => panic!("unexpected event for {}: {:?}", raw, other),
        }
    }

    // the malformed ledgerClosed did not touch the cache
    assert_eq!(connection.cached_ledger_version(), Some(LEDGER));
    assert!(connection.is_connected());

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_unknown_response_id_is_ignored() {
    let node = MockNode::start().await;
    let connection = Connection::new(node.url());
    let mut events = connection.subscribe();
    connection.connect().await.unwrap();

    node.push(json!({"id": 9999, "type": "response", "status": "success", "result": {}}));
    let reported = sees_event_within(&mut events, Duration::from_millis(200), |event| {
        matches!(event, ConnectionEvent::Error { .. })
    })
    .await;
    assert!(!reported);

    let result = connection.request(&json!({"command": "ping"}), None).await.unwrap();
    assert_eq!(result, json!({}));

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_restricted_connection() {
    let node = MockNode::with_handler(|request| match request["command"].as_str() {
        Some("ledger") => Some(success(request, json!({"ledger_index": request["ledger_index"]}))),
        _ => default_reply(request),
    })
    .await;
    let connection = Connection::new(node.url());
    connection.connect().await.unwrap();
    let restricted = RestrictedConnection::new(connection.clone());

    let err = restricted
        .request(json!({"command": "ledger", "ledger_index": 150}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LedgerVersion(_)));

    let err = restricted
        .request(json!({"command": "ledger", "ledger_index": "current"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LedgerVersion(_)));

    let result = restricted
        .request(json!({"command": "ledger", "ledger_index": "validated"}), None)
        .await
        .unwrap();
    assert_eq!(result["ledger_index"], "validated");

    let result = restricted
        .request(json!({"command": "ledger", "ledger_index": 99}), None)
        .await
        .unwrap();
    assert_eq!(result["ledger_index"], 99);

    // only JSON numbers name a ledger; numeric strings are refused
    let err = restricted
        .request(json!({"command": "ledger", "ledger_index": "100"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LedgerVersion(_)));

    connection.disconnect().await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_request_and_dedup() {
    let first = MockNode::start().await;
    let second = MockNode::start().await;
    let broadcast = Broadcast::new(vec![
        Connection::new(first.url()),
        Connection::new(second.url()),
    ])
    .unwrap();
    let mut events = broadcast.subscribe();

    broadcast.connect().await.unwrap();
    assert!(broadcast.is_connected());
    assert_eq!(broadcast.get_ledger_version().await.unwrap(), LEDGER);

    let result = broadcast.request(json!({"command": "ping"}), None).await.unwrap();
    assert_eq!(result, json!({}));

    first.push(ledger_closed(101, None));
    second.push(ledger_closed(101, None));
    match next_event(&mut events).await {
        ConnectionEvent::Stream { message, .. } => assert_eq!(message["ledger_index"], 101),
        other => panic!("unexpected event: {:?}", other),
    }
    let duplicate = sees_event_within(&mut events, Duration::from_millis(200), |event| {
        matches!(event, ConnectionEvent::Stream { .. })
    })
    .await;
    assert!(!duplicate);

    second.push(ledger_closed(102, None));
    match next_event(&mut events).await {
        ConnectionEvent::Stream { message, .. } => assert_eq!(message["ledger_index"], 102),
        other => panic!("unexpected event: {:?}", other),
    }

    // lifecycle events stay with the backends
    broadcast.disconnect().await.unwrap();
    assert!(!broadcast.is_connected());
    let lifecycle = sees_event_within(&mut events, Duration::from_millis(200), |event| {
        matches!(event, ConnectionEvent::Disconnected { .. })
    })
    .await;
    assert!(!lifecycle);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_needs_a_backend() {
    let result = Broadcast::<Connection>::new(Vec::new());
    assert!(matches!(result, Err(Error::Connection(_))));
}
