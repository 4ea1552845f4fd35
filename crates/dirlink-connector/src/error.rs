//! Directory error types
//!
//! Backend-independent error taxonomy with connection/permanent classification
//! for retry logic.

use std::time::Duration;

use thiserror::Error;

/// LDAP result codes that the façade maps onto typed errors (RFC 4511).
pub mod result_code {
    pub const SUCCESS: u32 = 0;
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const STRONGER_AUTH_REQUIRED: u32 = 8;
    pub const SASL_BIND_IN_PROGRESS: u32 = 14;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_DN_SYNTAX: u32 = 34;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    pub const BUSY: u32 = 51;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    pub const OBJECT_CLASS_VIOLATION: u32 = 65;
    pub const ALREADY_EXISTS: u32 = 68;
}

/// Error that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Connection errors (retried once by the connection guard)
    /// Transport unreachable, session dropped, or reconnect budget exhausted.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation exceeded its deadline.
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Authentication errors (never retried automatically)
    /// Every bind strategy was exhausted, or the credential was rejected.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The server requires a stronger authentication method.
    #[error("strong authentication required: {message}")]
    StrongAuthenticationRequired { message: String },

    // Entry errors
    /// Target entry does not exist.
    #[error("no such entry: {dn}")]
    EntryNotFound { dn: String },

    /// Entry already exists (add conflict).
    #[error("entry already exists: {dn}")]
    EntryAlreadyExists { dn: String },

    /// Insufficient rights, or the server is unwilling to perform the operation.
    #[error("operation not permitted on {dn}: {message}")]
    OperationNotPermitted { dn: String, message: String },

    /// Object class violation, typically a missing MUST attribute.
    #[error("required attribute missing on {dn}: {message}")]
    RequiredAttributeMissing { dn: String, message: String },

    /// Distinguished name is syntactically invalid.
    #[error("invalid distinguished name: {dn}")]
    DistinguishedNameInvalid { dn: String },

    /// Any server result code without a dedicated variant.
    #[error("directory error {code}: {message}")]
    Directory { code: u32, message: String },

    // Local errors
    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Filter expression cannot be compiled.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// SASL mechanism is not supported by this client or transport.
    #[error("unsupported SASL mechanism: {mechanism}")]
    UnsupportedMechanism { mechanism: String },

    /// Malformed or unexpected SASL exchange.
    #[error("SASL protocol error: {message}")]
    SaslProtocol { message: String },
}

impl DirectoryError {
    /// Check if this error is a transport-level connection failure.
    ///
    /// Only these errors make the connection guard drop the session and retry.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DirectoryError::ConnectionFailed { .. })
    }

    /// Check if this error is an authentication failure.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, DirectoryError::AuthenticationFailed { .. })
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_connection_failure() && !matches!(self, DirectoryError::Timeout { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            DirectoryError::Timeout { .. } => "TIMEOUT",
            DirectoryError::AuthenticationFailed { .. } => "AUTH_FAILED",
            DirectoryError::StrongAuthenticationRequired { .. } => "STRONG_AUTH_REQUIRED",
            DirectoryError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            DirectoryError::EntryAlreadyExists { .. } => "ENTRY_EXISTS",
            DirectoryError::OperationNotPermitted { .. } => "OPERATION_NOT_PERMITTED",
            DirectoryError::RequiredAttributeMissing { .. } => "REQUIRED_ATTRIBUTE_MISSING",
            DirectoryError::DistinguishedNameInvalid { .. } => "INVALID_DN",
            DirectoryError::Directory { .. } => "DIRECTORY_ERROR",
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            DirectoryError::InvalidFilter { .. } => "INVALID_FILTER",
            DirectoryError::UnsupportedMechanism { .. } => "UNSUPPORTED_MECHANISM",
            DirectoryError::SaslProtocol { .. } => "SASL_PROTOCOL",
        }
    }

    /// Map a raw server result code onto the normalized taxonomy.
    ///
    /// `dn` names the entry the operation targeted; it is carried into the
    /// entry-level variants. Errors that are not `Directory` pass through.
    #[must_use]
    pub fn normalize(self, dn: &str) -> Self {
        let DirectoryError::Directory { code, message } = self else {
            return self;
        };

        match code {
            result_code::NO_SUCH_OBJECT => DirectoryError::EntryNotFound { dn: dn.to_string() },
            result_code::ALREADY_EXISTS => DirectoryError::EntryAlreadyExists { dn: dn.to_string() },
            result_code::INVALID_DN_SYNTAX => {
                DirectoryError::DistinguishedNameInvalid { dn: dn.to_string() }
            }
            result_code::INSUFFICIENT_ACCESS_RIGHTS | result_code::UNWILLING_TO_PERFORM => {
                DirectoryError::OperationNotPermitted {
                    dn: dn.to_string(),
                    message,
                }
            }
            result_code::OBJECT_CLASS_VIOLATION => DirectoryError::RequiredAttributeMissing {
                dn: dn.to_string(),
                message,
            },
            result_code::STRONGER_AUTH_REQUIRED => {
                DirectoryError::StrongAuthenticationRequired { message }
            }
            result_code::INVALID_CREDENTIALS => DirectoryError::AuthenticationFailed { message },
            _ => DirectoryError::Directory { code, message },
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        DirectoryError::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create an error carrying a raw server result code.
    pub fn directory(code: u32, message: impl Into<String>) -> Self {
        DirectoryError::Directory {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        DirectoryError::InvalidFilter {
            message: message.into(),
        }
    }

    /// Create a SASL protocol error.
    pub fn sasl_protocol(message: impl Into<String>) -> Self {
        DirectoryError::SaslProtocol {
            message: message.into(),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
