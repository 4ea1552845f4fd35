//! # Directory Client Framework
//!
//! Backend-independent building blocks for talking to LDAP-style directory
//! servers.
//!
//! This crate holds the pieces that do not depend on a concrete protocol
//! client: configuration, the error taxonomy, the operation types handed to a
//! session, the reconnect policy, and the [`Transport`]/[`Session`] seam that
//! a protocol implementation plugs into.
//!
//! ## Example
//!
//! ```ignore
//! use dirlink_connector::prelude::*;
//!
//! let config = ClientConfig::new("ldap.example.com")
//!     .with_credentials("cn=admin,dc=example,dc=com", "secret")
//!     .with_retry(3, 0.5);
//! config.validate()?;
//!
//! let request = SearchRequest::new("dc=example,dc=com", SearchScope::Sub, "(uid=alice)")
//!     .with_attributes(["cn", "mail"]);
//! ```
//!
//! ## Crate Organization
//!
//! - [`config`] - Client configuration and endpoint selection
//! - [`error`] - Error types with connection/permanent classification
//! - [`operation`] - Entries, modifications and search requests
//! - [`resilience`] - Reconnect retry policy
//! - [`traits`] - Transport and session traits

pub mod config;
pub mod error;
pub mod operation;
pub mod resilience;
pub mod traits;

/// Prelude module for convenient imports.
///
/// ```
/// use dirlink_connector::prelude::*;
/// ```
pub mod prelude {
    // Configuration
    pub use crate::config::{
        ClientConfig, Endpoint, PasswordBlock, SearchScope, TransportMethod,
    };

    // Error handling
    pub use crate::error::{result_code, DirectoryError, DirectoryResult};

    // Operations
    pub use crate::operation::{Entry, ModOp, Modification, SearchRequest};

    // Resilience
    pub use crate::resilience::{RetryBudget, RetryPolicy};

    // Traits
    pub use crate::traits::{SaslStep, Session, Transport};
}

// Re-export async_trait for transport implementors
pub use async_trait::async_trait;
