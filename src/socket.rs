//! Socket record: one live stream plus the metadata the pool and caller
//! need to use it safely.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::auth::{AuthMechanism, Credential};
use crate::connector::Endpoint;
use crate::error::Error;
use crate::handshake::Capabilities;
use crate::stream::{self, BoxedStream};
use crate::wire::{self, Document};

fn next_socket_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The size `send_raw` should check against the peer's `max_bson_size` for
/// a document this module serializes itself. A serialization failure here
/// is reported as size `0` and surfaces properly when `wire::send_message`
/// re-encodes the same document.
fn encoded_len(doc: &Document) -> usize {
    serde_json::to_vec(doc).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Shared by `command`/`write_command`: asserts the reply is well-formed
/// and raises `OperationFailure` for a server-returned error.
fn check_ok(reply: Document) -> Result<Document, Error> {
    if let Some(false) = reply.get("ok").and_then(|v| v.as_f64()).map(|n| n != 0.0) {
        let message = reply
            .get("errmsg")
            .and_then(|v| v.as_str())
            .unwrap_or("command failed")
            .to_string();
        return Err(Error::OperationFailure(message));
    }
    Ok(reply)
}

/// One live connection plus the state the pool tracks about it.
///
/// Equality and hashing are the identity of the underlying stream: since
/// `dyn Stream` trait objects have no stable, meaningful pointer identity
/// once boxed, this is implemented via a private monotonically
/// increasing `socket_id` stamped at construction — two records never
/// compare equal even if they happen to wrap the same endpoint.
pub struct SocketRecord {
    socket_id: u64,
    stream: BoxedStream,
    pub endpoint: Endpoint,
    authset: HashSet<Credential>,
    closed: bool,
    pub last_checkout: f64,
    pub capabilities: Capabilities,
    pub generation: u64,
    next_request_id: AtomicU32,
    socket_timeout: Option<std::time::Duration>,
}

impl SocketRecord {
    pub fn new(
        stream: BoxedStream,
        endpoint: Endpoint,
        capabilities: Capabilities,
        generation: u64,
        last_checkout: f64,
        socket_timeout: Option<std::time::Duration>,
    ) -> Self {
        SocketRecord {
            socket_id: next_socket_id(),
            stream,
            endpoint,
            authset: HashSet::new(),
            closed: false,
            last_checkout,
            capabilities,
            generation,
            next_request_id: AtomicU32::new(1),
            socket_timeout,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn alloc_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, std::io::Error>>,
    ) -> Result<T, std::io::Error> {
        match self.socket_timeout {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "socket_timeout elapsed"))),
            None => fut.await,
        }
    }

    /// Writes the entire message. Rejects oversized documents without
    /// sending; any I/O error closes the stream.
    ///
    /// `max_doc_size` is the size of `doc` as the caller intends to encode
    /// it, checked against the peer's `max_bson_size` before anything is
    /// written — callers that don't otherwise need to track a size (e.g.
    /// `command`/`write_command`) should pass the document's actual
    /// serialized length, not an unbounded sentinel.
    pub async fn send_raw(&mut self, doc: &Document, max_doc_size: usize) -> Result<u32, Error> {
        if let Some(max_bson) = self.capabilities.max_bson_size {
            if max_doc_size > max_bson {
                return Err(Error::DocumentTooLarge {
                    size: max_doc_size,
                    max: max_bson,
                });
            }
        }

        let request_id = self.alloc_request_id();
        let endpoint = self.endpoint.display();
        let result = self
            .with_timeout(wire::send_message(&mut self.stream, request_id, wire::OP_COMMAND, doc))
            .await;

        match result {
            Ok(()) => Ok(request_id),
            Err(e) => {
                self.close();
                Err(Error::from_io(&endpoint, e))
            }
        }
    }

    /// Receives one framed reply bounded by the peer's `max_message_size`.
    pub async fn receive(&mut self, opcode: u32, request_id: u32) -> Result<Document, Error> {
        let max_message_size = self.capabilities.effective_max_message_size();
        let endpoint = self.endpoint.display();
        let result = self
            .with_timeout(wire::receive_message(&mut self.stream, opcode, request_id, max_message_size))
            .await;

        match result {
            Ok(doc) => Ok(doc),
            Err(e) => {
                self.close();
                Err(Error::from_io(&endpoint, e))
            }
        }
    }

    /// Validates the command against the peer's negotiated capabilities,
    /// then sends and receives exactly one reply document.
    pub async fn command(&mut self, db: &str, spec: &Document, opts: &CommandOptions) -> Result<Document, Error> {
        let max_wire_version = self.capabilities.max_wire_version.unwrap_or(0);

        if max_wire_version < 4 && !opts.read_concern_is_legacy_default {
            return Err(Error::ConfigurationError(
                "read concern is not supported by this server".to_string(),
            ));
        }
        if opts.unacknowledged_write && opts.collation.is_some() {
            return Err(Error::ConfigurationError(
                "collation is unsupported on unacknowledged writes".to_string(),
            ));
        }

        let mut doc = spec.clone();
        if let Document::Object(ref mut map) = doc {
            map.insert("$db".to_string(), serde_json::Value::String(db.to_string()));
            if max_wire_version >= 5 {
                if let Some(wc) = &opts.write_concern {
                    map.insert("writeConcern".to_string(), wc.clone());
                }
            } else if opts.collation.is_some() {
                return Err(Error::ConfigurationError(
                    "collation requires a newer server (wire version >= 5)".to_string(),
                ));
            }
        }

        let request_id = self.send_raw(&doc, encoded_len(&doc)).await?;
        let reply = self.receive(wire::OP_COMMAND_REPLY, request_id).await?;
        check_ok(reply)
    }

    /// Unacknowledged writes are pre-checked against writability so a
    /// non-primary failure is diagnosable without a reply.
    pub async fn legacy_write(
        &mut self,
        msg: &Document,
        max_doc_size: usize,
        with_ack: bool,
    ) -> Result<Option<Document>, Error> {
        if !with_ack && self.capabilities.is_writable == Some(false) {
            return Err(Error::NotMasterError);
        }

        let request_id = self.send_raw(msg, max_doc_size).await?;
        if with_ack {
            let reply = self.receive(wire::OP_REPLY, request_id).await?;
            Ok(Some(reply))
        } else {
            Ok(None)
        }
    }

    /// Asserts the reply is well-formed and propagates server-returned
    /// errors, same as `command()`.
    pub async fn write_command(&mut self, msg: &Document) -> Result<Document, Error> {
        let request_id = self.send_raw(msg, encoded_len(msg)).await?;
        let reply = self.receive(wire::OP_COMMAND_REPLY, request_id).await?;
        check_ok(reply)
    }

    /// Aligns `authset` with `all_credentials`: logs out credentials no
    /// longer present, logs in newly-present ones.
    pub async fn reconcile_auth(
        &mut self,
        all_credentials: &std::collections::HashMap<String, Credential>,
        auth: &dyn AuthMechanism,
    ) -> Result<(), Error> {
        let cached: HashSet<Credential> = all_credentials.values().cloned().collect();
        let current = self.authset.clone();

        for c in current.difference(&cached) {
            auth.logout(&c.source, &mut self.stream).await?;
            self.authset.remove(c);
        }
        for c in cached.difference(&current) {
            auth.login(c, &mut self.stream).await?;
            self.authset.insert(c.clone());
        }
        Ok(())
    }

    pub async fn is_stream_closed(&mut self) -> bool {
        stream::socket_closed(&mut self.stream).await
    }

    /// Idempotent; swallows errors from the underlying close.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl PartialEq for SocketRecord {
    fn eq(&self, other: &Self) -> bool {
        self.socket_id == other.socket_id
    }
}
impl Eq for SocketRecord {}

impl std::hash::Hash for SocketRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.socket_id.hash(state);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub read_concern_is_legacy_default: bool,
    pub unacknowledged_write: bool,
    pub collation: Option<Document>,
    pub write_concern: Option<Document>,
}
