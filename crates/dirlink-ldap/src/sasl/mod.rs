//! SASL mechanisms
//!
//! Each bind attempt gets a fresh mechanism instance from the
//! [`MechanismRegistry`], so per-exchange state (nonce counters, expected
//! server proofs) never leaks between attempts.

mod cram_md5;
mod digest_md5;
mod external;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dirlink_connector::error::DirectoryResult;

pub use cram_md5::CramMd5;
pub use digest_md5::DigestMd5;
pub use external::External;

/// Inputs a mechanism may draw on when building its responses.
#[derive(Clone, Default)]
pub struct SaslCredentials {
    /// Authentication identity (the bind DN or user name).
    pub identity: String,
    pub password: Option<String>,
    /// Host name of the server, used for the digest URI.
    pub host: String,
    /// Identity to act as, when different from `identity`.
    pub authorization_id: Option<String>,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("identity", &self.identity)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("authorization_id", &self.authorization_id)
            .finish()
    }
}

/// One SASL mechanism's side of the exchange.
pub trait SaslMechanism: Send {
    /// Registered mechanism name, e.g. `DIGEST-MD5`.
    fn name(&self) -> &'static str;

    /// Whether a password must be resolved before the exchange starts.
    fn needs_credential(&self) -> bool {
        true
    }

    /// Credentials sent with the first bind request, if any.
    fn initial_response(&mut self, credentials: &SaslCredentials)
        -> DirectoryResult<Option<Vec<u8>>>;

    /// Answer a server challenge.
    fn respond(
        &mut self,
        challenge: &[u8],
        credentials: &SaslCredentials,
    ) -> DirectoryResult<Vec<u8>>;
}

/// Produces a fresh mechanism per bind attempt.
pub type MechanismFactory = Arc<dyn Fn() -> Box<dyn SaslMechanism> + Send + Sync>;

/// Mechanism name to factory.
#[derive(Clone)]
pub struct MechanismRegistry {
    factories: HashMap<String, MechanismFactory>,
}

impl MechanismRegistry {
    /// Registry with no mechanisms.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) a mechanism. Names are case-insensitive.
    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn SaslMechanism> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(name.to_ascii_uppercase(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_uppercase())
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn SaslMechanism>> {
        self.factories
            .get(&name.to_ascii_uppercase())
            .map(|factory| factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DigestMd5::NAME, || Box::new(DigestMd5::new()));
        registry.register(CramMd5::NAME, || Box::new(CramMd5::new()));
        registry.register(External::NAME, || Box::new(External));
        registry
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismRegistry")
            .field("mechanisms", &self.names())
            .finish()
    }
}
