//! Driver error taxonomy.
//!
//! I/O errors on a socket always close that socket before this is raised.
//! `OperationFailure` is the only variant that leaves the socket usable —
//! everything else implies the connection is gone.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A socket timeout, or a TLS error whose message indicates timing out.
    #[error("{endpoint}: timed out: {source}")]
    NetworkTimeout {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-timeout I/O, TLS handshake failure, admission timeout, or a
    /// UNIX-socket request on a platform without them.
    #[error("{message}")]
    ConnectionFailure { message: String },

    /// Peer hostname did not match the certificate presented.
    #[error("certificate error for {endpoint}: {message}")]
    CertificateError { endpoint: String, message: String },

    /// Read concern / write concern / collation unsupported by the peer's
    /// wire version. No network side effect.
    #[error("{0}")]
    ConfigurationError(String),

    /// Outgoing message exceeds the peer's `max_bson_size`. No send
    /// performed.
    #[error(
        "BSON document too large ({size} bytes) - the connected server \
         supports BSON document sizes up to {max} bytes"
    )]
    DocumentTooLarge { size: usize, max: usize },

    /// Unacknowledged write to a peer that is not currently writable.
    #[error("not master")]
    NotMasterError,

    /// Server-returned error on a command. The socket remains usable.
    #[error("command failed: {0}")]
    OperationFailure(String),
}

impl Error {
    pub(crate) fn connection_failure(endpoint: &str, msg: impl std::fmt::Display) -> Self {
        Error::ConnectionFailure {
            message: format!("{endpoint}: {msg}"),
        }
    }

    /// Matches `pymongo`'s `Pool._raise_wait_queue_timeout` wording exactly,
    /// naming both knobs the caller would need to adjust.
    pub(crate) fn wait_queue_timeout(
        max_pool_size: Option<usize>,
        wait_queue_timeout: Option<Duration>,
    ) -> Self {
        Error::ConnectionFailure {
            message: format!(
                "Timed out waiting for socket from pool with max_size {} and wait_queue_timeout {}",
                fmt_opt_usize(max_pool_size),
                fmt_opt_duration(wait_queue_timeout),
            ),
        }
    }

    pub(crate) fn wait_queue_full(max_waiters: usize) -> Self {
        Error::ConnectionFailure {
            message: format!("Too many threads are already waiting for a socket (max {max_waiters})"),
        }
    }

    /// Maps a raw I/O error observed during connect/send/receive into the
    /// driver's taxonomy, rather than wrapping every socket method with a
    /// decorator at each call site.
    pub(crate) fn from_io(endpoint: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Error::NetworkTimeout {
                endpoint: endpoint.to_string(),
                source: err,
            }
        } else {
            Error::ConnectionFailure {
                message: format!("{endpoint}: {err}"),
            }
        }
    }
}

fn fmt_opt_usize(v: Option<usize>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

fn fmt_opt_duration(v: Option<Duration>) -> String {
    match v {
        Some(v) => format!("{}", v.as_secs_f64()),
        None => "None".to_string(),
    }
}
