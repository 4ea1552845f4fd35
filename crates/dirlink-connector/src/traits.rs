//! Transport traits
//!
//! The pluggable seam between the client core and a concrete directory
//! protocol client. A [`Transport`] opens [`Session`]s; a session carries the
//! wire calls. Sessions are cheap handles (cloning shares the underlying
//! connection), so the connection guard can hand a clone to each attempt.

use async_trait::async_trait;

use crate::config::Endpoint;
use crate::error::DirectoryResult;
use crate::operation::{Entry, Modification, SearchRequest};

/// Outcome of one SASL bind round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// The server wants another round; carries its challenge.
    Challenge(Vec<u8>),
    /// Authentication completed successfully.
    Done,
}

/// Factory for sessions against a directory server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Session handle produced by this transport.
    type Session: Session;

    /// Open a new, unbound session.
    async fn open(&self, endpoint: &Endpoint) -> DirectoryResult<Self::Session>;
}

/// An open connection to a directory server.
///
/// Server result codes surface as `DirectoryError::Directory`; transport
/// failures as `DirectoryError::ConnectionFailed`. Normalization happens in
/// the façade, not here.
#[async_trait]
pub trait Session: Clone + Send + Sync + 'static {
    /// Simple bind. An empty DN and password is an anonymous bind.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()>;

    /// Send one SASL bind request.
    async fn sasl_bind(
        &mut self,
        mechanism: &str,
        credentials: Option<&[u8]>,
    ) -> DirectoryResult<SaslStep>;

    /// Run a search and collect every returned entry.
    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<Vec<Entry>>;

    async fn add(&mut self, dn: &str, attributes: &[(String, Vec<Vec<u8>>)])
        -> DirectoryResult<()>;

    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> DirectoryResult<()>;

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()>;

    /// Modify DN: change the RDN and optionally move under `new_superior`.
    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()>;

    /// Unbind and release the connection.
    async fn unbind(&mut self) -> DirectoryResult<()>;
}
