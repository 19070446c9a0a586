//! Endpoint connector: resolves an address, opens a TCP or UNIX socket,
//! applies TCP options, and wraps the result in TLS.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use socket2::{Socket, TcpKeepalive};
use tokio::net::TcpStream;

use crate::clock::{is_ip_literal, set_close_on_exec};
use crate::error::Error;
use crate::options::PoolOptions;
use crate::stream::BoxedStream;

/// `(host, port)`, or a UNIX socket path when `port` is `None` and `host`
/// ends in `.sock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port: Some(port),
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Endpoint {
            host: path.into(),
            port: None,
        }
    }

    pub fn is_unix(&self) -> bool {
        self.host.ends_with(".sock")
    }

    pub fn display(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Opens a connected, TLS-wrapped-if-configured byte stream to `endpoint`.
pub async fn connect(endpoint: &Endpoint, options: &PoolOptions) -> Result<BoxedStream, Error> {
    if endpoint.is_unix() {
        return connect_unix(endpoint).await;
    }

    let tcp = connect_tcp(endpoint, options).await?;

    let stream: BoxedStream = match &options.tls_config {
        Some(tls) => connect_tls(tcp, &endpoint.host, tls, options.tls_verify_hostname).await?,
        None => Box::pin(tcp),
    };

    Ok(stream)
}

#[cfg(unix)]
async fn connect_unix(endpoint: &Endpoint) -> Result<BoxedStream, Error> {
    let stream = tokio::net::UnixStream::connect(&endpoint.host)
        .await
        .map_err(|e| Error::from_io(&endpoint.display(), e))?;
    Ok(Box::pin(stream))
}

#[cfg(not(unix))]
async fn connect_unix(endpoint: &Endpoint) -> Result<BoxedStream, Error> {
    Err(Error::connection_failure(&endpoint.display(), "UNIX sockets unsupported"))
}

/// Resolves `(host, port)` to address candidates and connects to the first
/// that succeeds, remembering the last error if all fail. IPv6 is attempted
/// unless `host == "localhost"`, where it tends to add latency without a
/// matching listener.
async fn connect_tcp(endpoint: &Endpoint, options: &PoolOptions) -> Result<TcpStream, Error> {
    let port = endpoint.port.ok_or_else(|| {
        Error::connection_failure(&endpoint.display(), "non-UNIX endpoint is missing a port")
    })?;

    let candidates = tokio::net::lookup_host((endpoint.host.as_str(), port))
        .await
        .map_err(|e| Error::from_io(&endpoint.display(), e))?;

    let skip_ipv6 = endpoint.host == "localhost";
    let mut candidates: Vec<SocketAddr> = candidates
        .filter(|addr| !(skip_ipv6 && addr.is_ipv6()))
        .collect();
    if candidates.is_empty() {
        return Err(Error::connection_failure(&endpoint.display(), "no addresses resolved"));
    }
    candidates.sort_by_key(|a| !a.is_ipv4()); // prefer IPv4 first, matching common driver behavior

    let mut last_err: Option<Error> = None;
    for addr in candidates {
        match connect_one(addr, options).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::connection_failure(&endpoint.display(), "no addresses resolved")))
}

async fn connect_one(addr: SocketAddr, options: &PoolOptions) -> Result<TcpStream, Error> {
    let domain = if addr.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(|e| Error::from_io(&addr.to_string(), e))?;

    #[cfg(unix)]
    set_close_on_exec(std::os::unix::io::AsRawFd::as_raw_fd(&socket));

    socket
        .set_nodelay(true)
        .map_err(|e| Error::from_io(&addr.to_string(), e))?;

    if options.tcp_keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(120))
            .with_interval(Duration::from_secs(10));
        socket
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| Error::from_io(&addr.to_string(), e))?;
    }

    socket.set_nonblocking(true).map_err(|e| Error::from_io(&addr.to_string(), e))?;

    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if is_connect_in_progress(&e) => {}
        Err(e) => return Err(Error::from_io(&addr.to_string(), e)),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream).map_err(|e| Error::from_io(&addr.to_string(), e))?;

    match tokio::time::timeout(options.connect_timeout, connect_nonblocking(&stream)).await {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => Err(Error::from_io(&addr.to_string(), e)),
        Err(_) => Err(Error::NetworkTimeout {
            endpoint: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect_timeout elapsed"),
        }),
    }
}

/// A nonblocking `connect()` on a just-created socket returns `WouldBlock`
/// (Windows) or `EINPROGRESS` (Unix) to mean "in progress, poll for
/// writability" rather than failure.
fn is_connect_in_progress(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

async fn connect_nonblocking(stream: &TcpStream) -> std::io::Result<()> {
    stream.writable().await?;
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    Ok(())
}

async fn connect_tls(
    tcp: TcpStream,
    host: &str,
    tls: &crate::options::TlsConfig,
    verify_hostname: bool,
) -> Result<BoxedStream, Error> {
    let client_config = build_client_config(tls, verify_hostname)?;
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    // RFC 6066 §3: IP literals are not valid SNI hostnames.
    let server_name = if is_ip_literal(host) {
        ServerName::IpAddress(
            host.parse::<std::net::IpAddr>()
                .expect("is_ip_literal already validated this parses")
                .into(),
        )
    } else {
        ServerName::try_from(host.to_string())
            .map_err(|e| Error::CertificateError {
                endpoint: host.to_string(),
                message: format!("invalid hostname for TLS: {e}"),
            })?
    };

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::CertificateError {
            endpoint: host.to_string(),
            message: e.to_string(),
        })?;

    Ok(Box::pin(stream))
}

fn build_client_config(
    tls: &crate::options::TlsConfig,
    verify_hostname: bool,
) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::ConnectionFailure {
            message: format!("unsupported TLS protocol configuration: {e}"),
        })?;

    let config = if verify_hostname {
        builder
            .with_root_certificates((*tls.root_store).clone())
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    };

    Ok(config)
}

/// Accepts any certificate chain without validation. Used only when
/// `tls_verify_hostname=false` — this also suppresses full chain
/// validation, since rustls 0.23 combines hostname matching and chain
/// validation into one verifier call.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
