//! OpenTelemetry instruments for a connection
//!
//! Instruments are created only when the connection is built with
//! observability enabled, and are exported through whichever meter provider
//! `csclink_core::init_observability` installed. Without a provider they are
//! no-ops.
//!
//! | Instrument | Kind | Attributes |
//! |---|---|---|
//! | `csclink.client.connection.state` | gauge | |
//! | `csclink.client.requests` | counter | `command`, `outcome` |
//! | `csclink.client.request.duration` | histogram (s) | `command`, `outcome` |
//! | `csclink.client.errors` | counter | `kind` |
//! | `csclink.client.reconnects` | counter | `result` |
//! | `csclink.client.stream.messages` | counter | `type` |
//! | `csclink.client.bad_messages` | counter | |
//! | `csclink.client.ledger.version` | gauge | |
//!
//! `outcome` is `success` or an [`csclink_core::Error::kind`] string.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, InstrumentationScope, KeyValue};

/// Instruments recorded by a [`crate::Connection`]
pub struct ClientMetrics {
    state: Gauge<i64>,
    requests: Counter<u64>,
    latency: Histogram<f64>,
    errors: Counter<u64>,
    reconnects: Counter<u64>,
    stream_messages: Counter<u64>,
    bad_messages: Counter<u64>,
    ledger_version: Gauge<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter provider, scoped to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into())
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        Self::with_meter(&global::meter_with_scope(scope))
    }

    /// Instruments on `meter`
    pub fn with_meter(meter: &Meter) -> Self {
        Self {
            state: meter
                .i64_gauge("csclink.client.connection.state")
                .with_description("0 disconnected, 1 connecting, 2 ready, 3 reconnecting")
                .build(),
            requests: meter
                .u64_counter("csclink.client.requests")
                .with_description("Settled requests")
                .build(),
            latency: meter
                .f64_histogram("csclink.client.request.duration")
                .with_unit("s")
                .with_description("Time from request to settlement")
                .build(),
            errors: meter
                .u64_counter("csclink.client.errors")
                .with_description("Failed requests and connect attempts")
                .build(),
            reconnects: meter
                .u64_counter("csclink.client.reconnects")
                .with_description("Automatic reconnection attempts and successes")
                .build(),
            stream_messages: meter
                .u64_counter("csclink.client.stream.messages")
                .with_description("Stream messages pushed by the node")
                .build(),
            bad_messages: meter
                .u64_counter("csclink.client.bad_messages")
                .with_description("Frames that could not be classified")
                .build(),
            ledger_version: meter
                .u64_gauge("csclink.client.ledger.version")
                .with_description("Latest validated ledger")
                .build(),
        }
    }

    /// `state` is [`crate::ConnectionState::as_gauge`]
    pub fn update_connection_state(&self, state: i64) {
        self.state.record(state, &[]);
    }

    pub fn record_request(&self, command: &str, outcome: &str, seconds: f64) {
        let attributes = [
            KeyValue::new("command", command.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.requests.add(1, &attributes);
        self.latency.record(seconds, &attributes);
    }

    pub fn record_error(&self, kind: &'static str) {
        self.errors.add(1, &[KeyValue::new("kind", kind)]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnects.add(1, &[KeyValue::new("result", "attempt")]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnects.add(1, &[KeyValue::new("result", "ready")]);
    }

    pub fn record_stream_message(&self, kind: &'static str) {
        self.stream_messages.add(1, &[KeyValue::new("type", kind)]);
    }

    pub fn record_bad_message(&self) {
        self.bad_messages.add(1, &[]);
    }

    pub fn record_ledger_version(&self, version: u32) {
        self.ledger_version.record(u64::from(version), &[]);
    }
}
