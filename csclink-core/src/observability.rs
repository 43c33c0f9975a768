//! Logging, tracing and metrics bootstrap
//!
//! csclink instruments itself with `tracing` spans and events and with
//! OpenTelemetry instruments. Nothing is exported until the application
//! calls [`init_observability`]; a library must not install a global
//! subscriber on its own.
//!
//! The pipeline installed here:
//!
//! - `tracing-subscriber` registry with an `EnvFilter` (`RUST_LOG`, falling
//!   back to [`ObservabilityConfig::log_level`]) and a JSON `fmt` layer
//! - `tracing-opentelemetry` layer feeding an OTLP/gRPC span exporter
//! - an OTLP/gRPC meter provider read every 30 seconds
//!
//! # Frame tracing
//!
//! A connection built with `trace` enabled echoes every frame it sends or
//! receives on the [`FRAME_TARGET`] tracing target. Those events are at
//! `INFO` level, so they show up with the default filter; use
//! [`ObservabilityConfig::with_frame_trace`] to silence them explicitly.
//!
//! ```rust,no_run
//! use csclink_core::ObservabilityConfig;
//!
//! let config = ObservabilityConfig::new("ledger-watcher")
//!     .with_endpoint("http://localhost:4317")
//!     .with_log_level("debug");
//! csclink_core::init_observability(config).expect("observability");
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing target carrying raw frames when a connection has `trace` enabled
pub const FRAME_TARGET: &str = "csclink::frames";

/// How often the meter provider pushes metrics
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Providers installed by [`init_observability`], kept for shutdown
struct Installed {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

static INSTALLED: Mutex<Installed> = Mutex::new(Installed {
    tracer: None,
    meter: None,
});

fn installed() -> std::sync::MutexGuard<'static, Installed> {
    INSTALLED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observability configuration
///
/// Defaults: service name `"csclink"`, the crate version,
/// `$OTEL_EXPORTER_OTLP_ENDPOINT` or `http://localhost:4317`, every pillar
/// enabled, log level `$RUST_LOG` or `"info"`, frame tracing visible.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,
    /// Service version attached to every span and metric
    pub service_version: String,
    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,
    /// Export spans
    pub enable_traces: bool,
    /// Export metrics
    pub enable_metrics: bool,
    /// Emit structured JSON logs to stdout
    pub enable_logs: bool,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether events on [`FRAME_TARGET`] pass the filter
    pub frame_trace: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "csclink".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            frame_trace: true,
        }
    }
}

impl ObservabilityConfig {
    /// Defaults with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint, e.g. `http://collector:4317`
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the fallback filter directive (`"warn"`, `"csclink_client=debug"`, ...)
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the reported service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Enable or disable local JSON logs
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    /// Show or hide raw frames echoed by connections built with `trace`
    pub fn with_frame_trace(mut self, enable: bool) -> Self {
        self.frame_trace = enable;
        self
    }

    /// The filter directives that will be used when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        let frames = if self.frame_trace { "info" } else { "off" };
        format!("{},{}={}", self.log_level, FRAME_TARGET, frames)
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the global subscriber and OpenTelemetry providers
///
/// Call once, early in `main`. A second call fails because the global
/// subscriber is already set.
///
/// # Errors
///
/// Returns an error when an exporter cannot be built, when the filter
/// directives do not parse, or when a global subscriber is already
/// installed.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "observability initialized"
    );
    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // the subscriber layer needs a tracer before the provider goes global
    let tracer = provider.tracer(config.service_name.clone());
    installed().tracer = Some(provider.clone());
    global::set_tracer_provider(provider);
    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    use opentelemetry_sdk::metrics::PeriodicReader;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    installed().meter = Some(provider.clone());
    global::set_meter_provider(provider);
    Ok(())
}

fn init_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let fmt_layer = config.enable_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });
    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Flush pending spans and metrics and stop the exporters
///
/// Only providers installed by [`init_observability`] are shut down. Safe
/// to call more than once, or without a prior init.
pub fn shutdown_observability() {
    let (tracer, meter) = {
        let mut installed = installed();
        (installed.tracer.take(), installed.meter.take())
    };
    if tracer.is_none() && meter.is_none() {
        return;
    }
    tracing::info!("observability shutting down");

    if let Some(provider) = tracer {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
    }
    if let Some(provider) = meter {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "meter provider shutdown failed");
        }
    }
}
