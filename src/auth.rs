//! The authentication facade the pool delegates to:
//! `login(credential, socket)` / `logout(source, socket)`.
//!
//! Real SASL/SCRAM/x.509 mechanism implementations live outside this
//! crate; this module defines the facade trait plus a `NoAuth` stand-in
//! used by deployments with no auth configured and by tests.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::stream::BoxedStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    ScramSha256,
    X509,
}

/// One set of credentials against one auth source. Equality and hashing
/// follow spec invariant 4: identity is `(source, username, mechanism)`,
/// the secret plays no part in set membership.
#[derive(Debug, Clone)]
pub struct Credential {
    pub source: String,
    pub username: String,
    secret: Arc<str>,
    pub mechanism: Mechanism,
}

impl Credential {
    pub fn new(
        source: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
        mechanism: Mechanism,
    ) -> Self {
        Credential {
            source: source.into(),
            username: username.into(),
            secret: Arc::from(secret.into()),
            mechanism,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.username == other.username && self.mechanism == other.mechanism
    }
}
impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.username.hash(state);
        self.mechanism.hash(state);
    }
}

/// The external authentication collaborator. Implementations may raise
/// `Error::OperationFailure` (the socket stays usable) or any
/// connection-class error (the socket is closed by the caller).
#[async_trait]
pub trait AuthMechanism: Send + Sync {
    async fn login(&self, credential: &Credential, stream: &mut BoxedStream) -> Result<(), Error>;
    async fn logout(&self, source: &str, stream: &mut BoxedStream) -> Result<(), Error>;
}

/// No-op facade: every login/logout succeeds trivially. Used for
/// unauthenticated deployments and as the default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl AuthMechanism for NoAuth {
    async fn login(&self, _credential: &Credential, _stream: &mut BoxedStream) -> Result<(), Error> {
        Ok(())
    }

    async fn logout(&self, _source: &str, _stream: &mut BoxedStream) -> Result<(), Error> {
        Ok(())
    }
}
