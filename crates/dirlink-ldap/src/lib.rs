//! # LDAP Client
//!
//! Connection management and protocol helpers for LDAP directories.
//!
//! This crate keeps one connection to a directory server alive across
//! failures, negotiates how to bind, compiles structured search filters and
//! reads the server schema on demand.
//!
//! ## Features
//!
//! - Automatic reconnect with a configurable retry budget
//! - Per-operation timeouts with one transparent retry
//! - SASL (DIGEST-MD5, CRAM-MD5, EXTERNAL), simple and anonymous binds
//! - RFC 4515 filter compilation from structured or JSON input
//! - Lazy RFC 4512 schema parsing with `SUP` inheritance
//! - Pluggable transport, with an `ldap3`-backed implementation
//!
//! ## Example
//!
//! ```ignore
//! use dirlink_ldap::{DirectoryClient, Filter, LdapTransport, Search};
//! use dirlink_connector::prelude::*;
//!
//! let config = ClientConfig::new("ldap.example.com")
//!     .with_credentials("cn=admin,dc=example,dc=com", "secret")
//!     .with_method(TransportMethod::Tls);
//!
//! let mut client = DirectoryClient::new(LdapTransport::from_config(&config), config)?;
//! let people = client
//!     .search(&Search::new("ou=people,dc=example,dc=com").with_filter(Filter::eq("uid", "alice")))
//!     .await?;
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod filter;
pub mod sasl;
pub mod schema;
pub mod transport;

// Re-exports
pub use auth::BindMethod;
pub use client::{DirectoryClient, Search};
pub use connection::{CallOptions, Connection, ConnectionState};
pub use filter::{ComparisonOp, Filter, FilterValue, LogicalOp};
pub use sasl::{MechanismRegistry, SaslCredentials, SaslMechanism};
pub use schema::{
    AttributeDefinition, ClassAttributes, ObjectClassDefinition, ObjectClassKind, SchemaCache,
    SchemaGroup,
};
pub use transport::{LdapSession, LdapTransport};
