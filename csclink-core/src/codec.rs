//! Framing of outgoing requests and classification of incoming frames
//!
//! # Outgoing
//!
//! A request is any serializable value that encodes to a JSON object. The
//! codec injects the correlation `id` and drops top-level keys whose value
//! is `null`, so optional fields modelled as `Option::None` never reach the
//! node.
//!
//! # Incoming
//!
//! [`decode`] turns a text frame into an [`InboundMessage`]. Anything it
//! cannot classify is reported as `Error::ResponseFormat`; the connection
//! publishes those as `badMessage` events instead of failing a request.
//!
//! # Examples
//!
//! ```rust
//! use csclink_core::{codec, InboundMessage};
//! use serde_json::json;
//!
//! let text = codec::encode_request(&json!({"command": "server_info"}), 3).unwrap();
//! assert_eq!(text, r#"{"command":"server_info","id":3}"#);
//!
//! let msg = codec::decode(r#"{"id":3,"type":"response","status":"success","result":{}}"#).unwrap();
//! assert!(matches!(msg, InboundMessage::Response { id: 3, .. }));
//! ```

use crate::error::{Error, Result};
use crate::types::{InboundMessage, StreamKind};
use serde::Serialize;
use serde_json::Value;

/// Encode a request payload with its correlation id
///
/// # Errors
///
/// Returns `Error::Serialization` if the payload does not serialize, or
/// serializes to something other than a JSON object.
pub fn encode_request<P: Serialize + ?Sized>(payload: &P, id: u64) -> Result<String> {
    let mut object = match serde_json::to_value(payload)? {
        Value::Object(object) => object,
        other => {
            return Err(Error::Serialization(format!(
                "request payload must be a JSON object, got {}",
                type_name(&other)
            )))
        }
    };
    object.retain(|_, value| !value.is_null());
    object.insert("id".to_string(), Value::from(id));
    Ok(serde_json::to_string(&object)?)
}

/// Classify an incoming text frame
///
/// # Errors
///
/// Returns `Error::ResponseFormat` when the frame is not JSON, when a
/// response lacks a non-negative integer `id`, or when the message type is
/// not recognized.
pub fn decode(text: &str) -> Result<InboundMessage> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| Error::ResponseFormat(format!("invalid JSON: {}", e)))?;

    let message_type = body.get("type").and_then(Value::as_str);
    match message_type {
        Some("response") => {
            let id = body
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::ResponseFormat("valid id not found in response".into()))?;
            Ok(InboundMessage::Response { id, body })
        }
        Some(other) => match StreamKind::from_type(other) {
            Some(kind) => Ok(InboundMessage::Stream { kind, body }),
            None => Err(unrecognized(other)),
        },
        None if body.get("type").is_none() && is_truthy(body.get("error")) => {
            let error = match &body["error"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let message = body
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(InboundMessage::Warning {
                error,
                message,
                body,
            })
        }
        None => Err(unrecognized(
            &body.get("type").map(Value::to_string).unwrap_or_else(|| "undefined".into()),
        )),
    }
}

/// Settle a correlated response body into its result
///
/// - `status: "success"` yields `result` (or `null` when absent)
/// - `status: "error"` yields `Error::Casinocoind`
/// - any other status yields `Error::ResponseFormat`
pub fn into_result(mut body: Value) -> Result<Value> {
    match body.get("status").and_then(Value::as_str) {
        Some("success") => Ok(body
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null)),
        Some("error") => {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = body
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string);
            Err(Error::Casinocoind {
                error,
                message,
                data: body,
            })
        }
        _ => {
            let status = body
                .get("status")
                .map(Value::to_string)
                .unwrap_or_else(|| "undefined".to_string());
            Err(Error::ResponseFormat(format!("unrecognized status: {}", status)))
        }
    }
}

fn unrecognized(message_type: &str) -> Error {
    Error::ResponseFormat(format!("unrecognized message type: {}", message_type))
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(true, |n| n != 0.0),
        Some(_) => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
