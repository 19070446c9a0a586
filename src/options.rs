//! Pool configuration (`PoolOptions`) and the process-wide handshake
//! metadata document.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::listener::ConnectionPoolListener;
use crate::wire::Document;

/// TLS trust material for the connector. Verification behavior
/// (`tls_verify_hostname`) lives on `PoolOptions`, not here, since the same
/// root store can be reused with either posture.
#[derive(Clone)]
pub struct TlsConfig {
    pub root_store: Arc<rustls::RootCertStore>,
}

impl TlsConfig {
    /// Trust the platform's native certificate store, the same source the
    /// teacher's connector uses for outbound TLS.
    pub fn with_native_roots() -> Result<Self, crate::error::Error> {
        let mut store = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::warn!(%err, "error loading a native certificate");
        }
        for cert in native.certs {
            store
                .add(cert)
                .map_err(|e| crate::error::Error::ConnectionFailure {
                    message: format!("invalid native root certificate: {e}"),
                })?;
        }
        Ok(TlsConfig {
            root_store: Arc::new(store),
        })
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("roots", &self.root_store.len())
            .finish()
    }
}

/// Immutable pool configuration. Built once via [`PoolOptionsBuilder`] and
/// shared for the lifetime of a `Pool`.
#[derive(Clone)]
pub struct PoolOptions {
    pub max_pool_size: Option<usize>,
    pub min_pool_size: usize,
    pub max_idle_time_ms: Option<u64>,
    pub connect_timeout: Duration,
    pub socket_timeout: Option<Duration>,
    pub wait_queue_timeout: Option<Duration>,
    pub wait_queue_multiple: Option<usize>,
    pub tls_config: Option<TlsConfig>,
    pub tls_verify_hostname: bool,
    pub tcp_keepalive: bool,
    pub app_name: Option<String>,
    pub liveness_check: LivenessCheck,
    event_listeners: Vec<Arc<dyn ConnectionPoolListener>>,
    metadata: HandshakeMetadata,
}

/// The three-way liveness-check knob: always check, check only after an
/// interval has elapsed since last use, or never check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessCheck {
    Always,
    Interval(Duration),
    Disabled,
}

impl Default for LivenessCheck {
    fn default() -> Self {
        LivenessCheck::Interval(Duration::from_secs(1))
    }
}

impl PoolOptions {
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::default()
    }

    /// Returns an owned clone so callers can never mutate pool-wide state
    /// through the returned document (mirrors `pymongo.PoolOptions.metadata`).
    pub fn metadata(&self) -> Document {
        self.metadata.document.clone()
    }

    pub fn event_listeners(&self) -> &[Arc<dyn ConnectionPoolListener>] {
        &self.event_listeners
    }

    /// `max_pool_size * wait_queue_multiple`, or `None` if either knob is
    /// unset (no cap on waiters).
    pub fn max_waiters(&self) -> Option<usize> {
        match (self.max_pool_size, self.wait_queue_multiple) {
            (Some(size), Some(mult)) => Some(size * mult),
            _ => None,
        }
    }
}

pub struct PoolOptionsBuilder {
    max_pool_size: Option<usize>,
    min_pool_size: usize,
    max_idle_time_ms: Option<u64>,
    connect_timeout: Duration,
    socket_timeout: Option<Duration>,
    wait_queue_timeout: Option<Duration>,
    wait_queue_multiple: Option<usize>,
    tls_config: Option<TlsConfig>,
    tls_verify_hostname: bool,
    tcp_keepalive: bool,
    app_name: Option<String>,
    liveness_check: LivenessCheck,
    event_listeners: Vec<Arc<dyn ConnectionPoolListener>>,
}

impl Default for PoolOptionsBuilder {
    fn default() -> Self {
        PoolOptionsBuilder {
            max_pool_size: Some(100),
            min_pool_size: 0,
            max_idle_time_ms: None,
            connect_timeout: Duration::from_secs(20),
            socket_timeout: None,
            wait_queue_timeout: None,
            wait_queue_multiple: None,
            tls_config: None,
            tls_verify_hostname: true,
            tcp_keepalive: true,
            app_name: None,
            liveness_check: LivenessCheck::default(),
            event_listeners: Vec::new(),
        }
    }
}

impl PoolOptionsBuilder {
    pub fn max_pool_size(mut self, v: Option<usize>) -> Self {
        self.max_pool_size = v;
        self
    }

    pub fn min_pool_size(mut self, v: usize) -> Self {
        self.min_pool_size = v;
        self
    }

    pub fn max_idle_time_ms(mut self, v: Option<u64>) -> Self {
        self.max_idle_time_ms = v;
        self
    }

    pub fn connect_timeout(mut self, v: Duration) -> Self {
        self.connect_timeout = v;
        self
    }

    pub fn socket_timeout(mut self, v: Option<Duration>) -> Self {
        self.socket_timeout = v;
        self
    }

    pub fn wait_queue_timeout(mut self, v: Option<Duration>) -> Self {
        self.wait_queue_timeout = v;
        self
    }

    pub fn wait_queue_multiple(mut self, v: Option<usize>) -> Self {
        self.wait_queue_multiple = v;
        self
    }

    pub fn tls_config(mut self, v: Option<TlsConfig>) -> Self {
        self.tls_config = v;
        self
    }

    pub fn tls_verify_hostname(mut self, v: bool) -> Self {
        self.tls_verify_hostname = v;
        self
    }

    pub fn tcp_keepalive(mut self, v: bool) -> Self {
        self.tcp_keepalive = v;
        self
    }

    pub fn app_name(mut self, v: impl Into<String>) -> Self {
        self.app_name = Some(v.into());
        self
    }

    pub fn liveness_check(mut self, v: LivenessCheck) -> Self {
        self.liveness_check = v;
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn ConnectionPoolListener>) -> Self {
        self.event_listeners.push(listener);
        self
    }

    pub fn build(self) -> PoolOptions {
        PoolOptions {
            max_pool_size: self.max_pool_size,
            min_pool_size: self.min_pool_size,
            max_idle_time_ms: self.max_idle_time_ms,
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
            wait_queue_timeout: self.wait_queue_timeout,
            wait_queue_multiple: self.wait_queue_multiple,
            tls_config: self.tls_config,
            tls_verify_hostname: self.tls_verify_hostname,
            tcp_keepalive: self.tcp_keepalive,
            event_listeners: self.event_listeners,
            liveness_check: self.liveness_check,
            metadata: base_metadata(self.app_name),
        }
    }
}

/// The process-wide immutable handshake metadata document: driver
/// name/version, OS family/name/arch/version, runtime name/version,
/// optional application name. Built once per distinct `app_name` and
/// cloned into each pool; the shared skeleton (driver/os/runtime) is
/// computed exactly once via `OnceLock`.
#[derive(Clone)]
struct HandshakeMetadata {
    document: Document,
}

fn base_metadata(app_name: Option<String>) -> HandshakeMetadata {
    static SKELETON: OnceLock<Document> = OnceLock::new();
    let skeleton = SKELETON.get_or_init(|| {
        serde_json::json!({
            "driver": {
                "name": "mongo-conn-pool",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "os": {
                "type": std::env::consts::FAMILY,
                "name": std::env::consts::OS,
                "architecture": std::env::consts::ARCH,
            },
            "platform": format!("rustc/{}", rustc_marker()),
        })
    });

    let mut document = skeleton.clone();
    if let Some(name) = app_name {
        document["application"] = serde_json::json!({ "name": name });
    }
    HandshakeMetadata { document }
}

fn rustc_marker() -> &'static str {
    "stable"
}
