//! Connection options
//!
//! Options only shape the transport (TLS material, proxy, HTTP
//! authorization) and two behaviours: the default request deadline and
//! frame tracing. They deserialize from the camelCase keys used by existing
//! client configuration files:
//!
//! ```rust
//! use csclink_client::ConnectionOptions;
//! use std::time::Duration;
//!
//! let options: ConnectionOptions = serde_json::from_str(
//!     r#"{"timeout": 5000, "trace": true, "proxy": "http://127.0.0.1:3128"}"#,
//! ).unwrap();
//! assert_eq!(options.request_timeout(), Duration::from_secs(5));
//! assert!(options.trace);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Request deadline used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Transport and behaviour options for a [`crate::Connection`]
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    /// `user:password` sent as HTTP Basic authorization on the handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    /// Client certificate (PEM), or a base64 PKCS#12 archive when
    /// `passphrase` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Client private key (PEM, PKCS#8)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Additional root certificates (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_certificates: Option<Vec<String>>,
    /// HTTP proxy URL; the socket is tunnelled with `CONNECT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// `user:password` for the proxy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_authorization: Option<String>,
    /// Unlocks a PKCS#12 `certificate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Default request deadline, milliseconds on the wire
    #[serde(
        with = "timeout_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Echo every frame on the `csclink::frames` tracing target
    pub trace: bool,
}

impl ConnectionOptions {
    /// The configured deadline, or [`DEFAULT_TIMEOUT`]; zero counts as unset
    pub fn request_timeout(&self) -> Duration {
        self.timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

// keys and passwords stay out of logs
impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "<redacted>")
        }

        f.debug_struct("ConnectionOptions")
            .field("authorization", &redacted(&self.authorization))
            .field("certificate", &self.certificate.as_ref().map(|_| "<pem>"))
            .field("key", &redacted(&self.key))
            .field(
                "trusted_certificates",
                &self.trusted_certificates.as_ref().map(Vec::len),
            )
            .field("proxy", &self.proxy)
            .field("proxy_authorization", &redacted(&self.proxy_authorization))
            .field("passphrase", &redacted(&self.passphrase))
            .field("timeout", &self.timeout)
            .field("trace", &self.trace)
            .finish()
    }
}

mod timeout_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
