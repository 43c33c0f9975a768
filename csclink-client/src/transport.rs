//! Socket opening
//!
//! Turns a URL plus [`ConnectionOptions`] into an open WebSocket:
//!
//! 1. TCP connect, directly or through an HTTP `CONNECT` proxy tunnel
//! 2. TLS for `wss://` using a native-tls connector with the configured
//!    roots and client identity
//! 3. WebSocket handshake, carrying Basic authorization when configured
//!
//! Failures are sorted into three buckets because the connection treats
//! them differently: bad configuration, a socket that closed before it
//! finished opening (retried), and everything else (reported).

use crate::options::ConnectionOptions;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use native_tls::{Certificate, Identity, TlsConnector};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, Uri};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

/// An open WebSocket
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest proxy response header we are willing to buffer
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

#[derive(Debug)]
pub(crate) enum OpenError {
    /// The URL or the options cannot work
    Config(String),
    /// The peer closed the socket before the handshake finished
    ClosedBeforeOpen(String),
    /// Any other socket-level failure
    Failed(String),
}

/// Open a WebSocket to `url`
pub(crate) async fn open(url: &str, options: &ConnectionOptions) -> Result<WsStream, OpenError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| OpenError::Config(format!("invalid server url {:?}: {}", url, e)))?;

    if let Some(credentials) = &options.authorization {
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, basic_auth(credentials)?);
    }

    let uri = request.uri().clone();
    let secure = match uri.scheme_str() {
        Some("wss") => true,
        Some("ws") => false,
        other => {
            return Err(OpenError::Config(format!(
                "unsupported url scheme: {}",
                other.unwrap_or("none")
            )))
        }
    };
    let host = uri
        .host()
        .ok_or_else(|| OpenError::Config(format!("server url has no host: {}", url)))?
        .to_string();
    let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

    let stream = match &options.proxy {
        Some(proxy) => tunnel(proxy, &host, port, options.proxy_authorization.as_deref()).await?,
        None => TcpStream::connect((host.as_str(), port))
            .await
            .map_err(classify_io)?,
    };
    let _ = stream.set_nodelay(true);

    let connector = if secure {
        Some(Connector::NativeTls(tls_connector(options)?))
    } else {
        None
    };

    tracing::debug!(%host, port, secure, proxied = options.proxy.is_some(), "opening websocket");
    let (ws, _response) = client_async_tls_with_config(request, stream, None, connector)
        .await
        .map_err(classify_ws)?;
    Ok(ws)
}

fn basic_auth(credentials: &str) -> Result<HeaderValue, OpenError> {
    HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(credentials)))
        .map_err(|e| OpenError::Config(format!("invalid authorization: {}", e)))
}

/// Open a TCP stream to `host:port` through an HTTP proxy
async fn tunnel(
    proxy: &str,
    host: &str,
    port: u16,
    credentials: Option<&str>,
) -> Result<TcpStream, OpenError> {
    let proxy_uri: Uri = proxy
        .parse()
        .map_err(|e| OpenError::Config(format!("invalid proxy url {:?}: {}", proxy, e)))?;
    if proxy_uri.scheme_str() == Some("https") {
        return Err(OpenError::Config("TLS connections to the proxy are not supported".into()));
    }
    let proxy_host = proxy_uri
        .host()
        .ok_or_else(|| OpenError::Config(format!("proxy url has no host: {}", proxy)))?;
    let proxy_port = proxy_uri.port_u16().unwrap_or(80);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(classify_io)?;

    let mut connect = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
        host = host,
        port = port
    );
    if let Some(credentials) = credentials {
        connect.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            STANDARD.encode(credentials)
        ));
    }
    connect.push_str("\r\n");
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(classify_io)?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    while !response.windows(4).any(|window| window == b"\r\n\r\n") {
        if response.len() > MAX_PROXY_RESPONSE {
            return Err(OpenError::Failed("proxy response header too large".into()));
        }
        let read = stream.read(&mut chunk).await.map_err(classify_io)?;
        if read == 0 {
            return Err(OpenError::ClosedBeforeOpen(
                "proxy closed the connection during CONNECT".into(),
            ));
        }
        response.extend_from_slice(&chunk[..read]);
    }

    let status_line = String::from_utf8_lossy(&response);
    let status_line = status_line.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some("200") => Ok(stream),
        _ => Err(OpenError::Failed(format!("proxy refused tunnel: {}", status_line))),
    }
}

fn tls_connector(options: &ConnectionOptions) -> Result<TlsConnector, OpenError> {
    let mut builder = TlsConnector::builder();

    for pem in options.trusted_certificates.iter().flatten() {
        let certificate = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| OpenError::Config(format!("invalid trusted certificate: {}", e)))?;
        builder.add_root_certificate(certificate);
    }

    if let Some(certificate) = &options.certificate {
        let identity = match (&options.passphrase, &options.key) {
            (Some(passphrase), _) => {
                let archive = STANDARD
                    .decode(certificate.trim())
                    .map_err(|e| OpenError::Config(format!("certificate is not base64 PKCS#12: {}", e)))?;
                Identity::from_pkcs12(&archive, passphrase)
            }
            (None, Some(key)) => Identity::from_pkcs8(certificate.as_bytes(), key.as_bytes()),
            (None, None) => {
                return Err(OpenError::Config(
                    "a client certificate needs either a key or a passphrase".into(),
                ))
            }
        }
        .map_err(|e| OpenError::Config(format!("invalid client identity: {}", e)))?;
        builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| OpenError::Config(format!("cannot build TLS connector: {}", e)))
}

fn classify_io(err: io::Error) -> OpenError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => OpenError::ClosedBeforeOpen(err.to_string()),
        _ => OpenError::Failed(err.to_string()),
    }
}

fn classify_ws(err: WsError) -> OpenError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        | WsError::Protocol(ProtocolError::HandshakeIncomplete) => {
            OpenError::ClosedBeforeOpen(err.to_string())
        }
        WsError::Io(err) => classify_io(err),
        WsError::Url(err) => OpenError::Config(err.to_string()),
        other => OpenError::Failed(other.to_string()),
    }
}
