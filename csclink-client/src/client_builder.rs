//! Builder for configuring a connection
//!
//! The `ConnectionBuilder` provides a fluent API for everything a
//! [`Connection`] can be configured with:
//! - Transport options (TLS material, proxy, HTTP authorization)
//! - Request deadline and frame tracing
//! - Reconnection strategy
//! - Observability (OpenTelemetry)
//!
//! Building never opens a socket; call `connect()` on the result, or use
//! [`ConnectionBuilder::connect`] to do both.
//!
//! # Examples
//!
//! ```rust,no_run
//! use csclink_client::{ConnectionBuilder, FixedDelay};
//! use std::time::Duration;
//!
//! # async fn example() -> csclink_core::Result<()> {
//! let connection = ConnectionBuilder::new("wss://ws01.casinocoin.org:4443")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_proxy("http://proxy.internal:3128")
//!     .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(2))))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    reconnect::{ReconnectionStrategy, TieredBackoff},
    ClientMetrics, Connection, ConnectionOptions,
};
use csclink_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a [`Connection`]
pub struct ConnectionBuilder {
    url: Option<String>,
    options: ConnectionOptions,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ConnectionBuilder {
    /// Create a builder for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            options: ConnectionOptions::default(),
            reconnect_strategy: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Create a builder with no server; `connect()` will fail
    pub fn without_server() -> Self {
        Self {
            url: None,
            ..Self::new("")
        }
    }

    /// Replace all transport options at once
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Default deadline for requests
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Log every frame on the `csclink::frames` target
    pub fn with_trace(mut self, enable: bool) -> Self {
        self.options.trace = enable;
        self
    }

    /// HTTP Basic credentials (`user:password`) for the WebSocket handshake
    pub fn with_authorization(mut self, credentials: impl Into<String>) -> Self {
        self.options.authorization = Some(credentials.into());
        self
    }

    /// Tunnel through an HTTP proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.options.proxy = Some(proxy.into());
        self
    }

    /// Basic credentials for the proxy
    pub fn with_proxy_authorization(mut self, credentials: impl Into<String>) -> Self {
        self.options.proxy_authorization = Some(credentials.into());
        self
    }

    /// Client certificate and PKCS#8 key, both PEM
    pub fn with_client_certificate(
        mut self,
        certificate: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.options.certificate = Some(certificate.into());
        self.options.key = Some(key.into());
        self
    }

    /// Client identity from a base64 PKCS#12 archive
    pub fn with_pkcs12(mut self, archive: impl Into<String>, passphrase: impl Into<String>) -> Self {
        self.options.certificate = Some(archive.into());
        self.options.passphrase = Some(passphrase.into());
        self
    }

    /// Passphrase unlocking a PKCS#12 `certificate`
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.options.passphrase = Some(passphrase.into());
        self
    }

    /// Trust these PEM root certificates in addition to the system roots
    pub fn with_trusted_certificates(mut self, certificates: Vec<String>) -> Self {
        self.options.trusted_certificates = Some(certificates);
        self
    }

    /// Pace automatic reconnection with `strategy` instead of [`TieredBackoff`]
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the connection without opening it
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` when observability was requested and
    /// cannot be initialized.
    pub fn build(self) -> Result<Connection> {
        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                config.frame_trace = config.frame_trace || self.options.trace;

                csclink_core::init_observability(config.clone()).map_err(|e| {
                    Error::Internal(format!("failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(ClientMetrics::new(config.service_name)))
            }
            None => None,
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(TieredBackoff::default()));

        Ok(Connection::from_parts(self.url, self.options, strategy, metrics))
    }

    /// Build the connection and connect it
    pub async fn connect(self) -> Result<Connection> {
        let connection = self.build()?;
        connection.connect().await?;
        Ok(connection)
    }
}
