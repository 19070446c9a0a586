//! Client-side connection pool and socket lifecycle for a MongoDB driver.
//!
//! Owns the end-to-end lifecycle of a connection to one server endpoint:
//! opening it, performing the server handshake, authenticating per-socket
//! against a caller-supplied credential set, checking it out under
//! concurrency limits, sending and receiving wire-protocol messages,
//! detecting staleness and failure, and returning or discarding it.
//!
//! Out of scope, treated as external collaborators: the topology monitor,
//! higher-level query/cursor APIs, the real BSON codec and wire-protocol
//! framer, and real SASL/SCRAM/x.509 authentication mechanisms.

pub mod auth;
pub mod clock;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod options;
pub mod pool;
pub mod semaphore;
pub mod socket;
pub mod stream;
pub mod wire;

pub use auth::{AuthMechanism, Credential, Mechanism, NoAuth};
pub use connector::Endpoint;
pub use error::Error;
pub use listener::ConnectionPoolListener;
pub use options::{LivenessCheck, PoolOptions, PoolOptionsBuilder, TlsConfig};
pub use pool::{Checkout, Pool};
pub use socket::{CommandOptions, SocketRecord};
