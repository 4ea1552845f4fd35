//! Directory client configuration
//!
//! Connection, retry and authentication settings. The accepted keys form a
//! closed set: unknown keys are rejected at deserialization.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// How the transport secures the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMethod {
    /// Unencrypted connection.
    #[default]
    Plain,
    /// Plain connection upgraded with STARTTLS.
    Tls,
    /// TLS from the first byte (LDAPS).
    Ssl,
}

impl TransportMethod {
    /// Default port for this method.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            TransportMethod::Plain | TransportMethod::Tls => 389,
            TransportMethod::Ssl => 636,
        }
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Immediate children of the base entry.
    One,
    /// The base entry and its whole subtree.
    #[default]
    Sub,
}

/// Where a session should be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub method: TransportMethod,
}

impl Endpoint {
    /// Render the endpoint as an LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = match self.method {
            TransportMethod::Ssl => "ldaps",
            TransportMethod::Plain | TransportMethod::Tls => "ldap",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Callback that supplies the bind password on demand.
///
/// Called with the bind DN; returning `None` means no credential is available.
#[derive(Clone)]
pub struct PasswordBlock(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>);

impl PasswordBlock {
    pub fn new(provider: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(provider))
    }

    /// Ask the provider for the password of `bind_dn`.
    pub fn call(&self, bind_dn: &str) -> Option<String> {
        (self.0)(bind_dn)
    }
}

impl fmt::Debug for PasswordBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordBlock(..)")
    }
}

/// Configuration for a directory client connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server hostname or IP address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port; defaults from `method` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Transport security.
    #[serde(default)]
    pub method: TransportMethod,

    /// Per-operation timeout in seconds (0 = unbounded).
    #[serde(default)]
    pub timeout: f64,

    /// Reconnect and retry once when an operation times out.
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,

    /// Reconnect retries after the first attempt (negative = unlimited).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: i32,

    /// Seconds to wait between reconnect attempts.
    #[serde(default = "default_retry_wait")]
    pub retry_wait: f64,

    /// DN to bind as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Password provider callback; only settable in code.
    #[serde(
        default,
        skip_serializing,
        deserialize_with = "deserialize_password_block"
    )]
    pub password_block: Option<PasswordBlock>,

    /// Try SASL mechanisms before simple bind.
    #[serde(default)]
    pub try_sasl: bool,

    /// Acceptable SASL mechanisms in order of preference.
    #[serde(default = "default_sasl_mechanisms")]
    pub sasl_mechanisms: Vec<String>,

    /// Suppress interactive SASL prompts.
    #[serde(default)]
    pub sasl_quiet: bool,

    /// Fall back to an anonymous bind.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,

    /// Keep the password after a successful bind.
    #[serde(default = "default_true")]
    pub store_password: bool,

    /// Default search scope.
    #[serde(default)]
    pub scope: SearchScope,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_limit() -> i32 {
    1
}

fn default_retry_wait() -> f64 {
    1.0
}

fn default_sasl_mechanisms() -> Vec<String> {
    vec![
        "DIGEST-MD5".to_string(),
        "CRAM-MD5".to_string(),
        "EXTERNAL".to_string(),
    ]
}

fn deserialize_password_block<'de, D>(deserializer: D) -> Result<Option<PasswordBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    // A callback has no serialized form; only an explicit null is accepted.
    Option::<()>::deserialize(deserializer)?;
    Ok(None)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            method: TransportMethod::default(),
            timeout: 0.0,
            retry_on_timeout: true,
            retry_limit: default_retry_limit(),
            retry_wait: default_retry_wait(),
            bind_dn: None,
            password: None,
            password_block: None,
            try_sasl: false,
            sasl_mechanisms: default_sasl_mechanisms(),
            sasl_quiet: false,
            allow_anonymous: true,
            store_password: true,
            scope: SearchScope::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("retry_limit", &self.retry_limit)
            .field("retry_wait", &self.retry_wait)
            .field("bind_dn", &self.bind_dn)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("password_block", &self.password_block)
            .field("try_sasl", &self.try_sasl)
            .field("sasl_mechanisms", &self.sasl_mechanisms)
            .field("sasl_quiet", &self.sasl_quiet)
            .field("allow_anonymous", &self.allow_anonymous)
            .field("store_password", &self.store_password)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ClientConfig {
    /// Create a config for `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration object.
    pub fn from_json(json: &str) -> DirectoryResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DirectoryError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the transport method.
    #[must_use]
    pub fn with_method(mut self, method: TransportMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the bind DN and password.
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.password = Some(password.into());
        self
    }

    /// Set the bind DN only.
    pub fn with_bind_dn(mut self, bind_dn: impl Into<String>) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self
    }

    /// Set a password provider callback.
    pub fn with_password_block(
        mut self,
        provider: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.password_block = Some(PasswordBlock::new(provider));
        self
    }

    /// Enable SASL with the given mechanisms, in preference order.
    pub fn with_sasl<I, S>(mut self, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.try_sasl = true;
        self.sasl_mechanisms = mechanisms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the operation timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the reconnect budget and wait.
    #[must_use]
    pub fn with_retry(mut self, retry_limit: i32, retry_wait: f64) -> Self {
        self.retry_limit = retry_limit;
        self.retry_wait = retry_wait;
        self
    }

    /// Allow or forbid anonymous binds.
    #[must_use]
    pub fn with_allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    /// Keep or forget the password after a successful bind.
    #[must_use]
    pub fn with_store_password(mut self, store: bool) -> Self {
        self.store_password = store;
        self
    }

    /// Set the default search scope.
    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Effective port, falling back to the method's default.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.method.default_port())
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.effective_port(),
            method: self.method,
        }
    }

    /// Operation timeout; `None` when unbounded.
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        seconds_to_duration(self.timeout)
    }

    /// Wait between reconnect attempts.
    #[must_use]
    pub fn retry_wait_duration(&self) -> Duration {
        seconds_to_duration(self.retry_wait).unwrap_or_default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.host.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration("host is required"));
        }

        if Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(DirectoryError::invalid_configuration(
                "timeout must be a non-negative number of seconds within range",
            ));
        }

        if Duration::try_from_secs_f64(self.retry_wait).is_err() {
            return Err(DirectoryError::invalid_configuration(
                "retry_wait must be a non-negative number of seconds within range",
            ));
        }

        if self.sasl_mechanisms.iter().any(|m| m.trim().is_empty()) {
            return Err(DirectoryError::invalid_configuration(
                "sasl_mechanisms must not contain blank names",
            ));
        }

        Ok(())
    }

    /// Create a redacted version of this config (for logging/display).
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.password.is_some() {
            config.password = Some("***REDACTED***".to_string());
        }
        config
    }
}

/// Convert a positive number of seconds to a duration; `None` when zero,
/// negative, not finite or too large to represent.
pub fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}
