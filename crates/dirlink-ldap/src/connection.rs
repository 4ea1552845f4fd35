//! Connection lifecycle
//!
//! Owns one session and its bind state. [`Connection::guard`] is the entry
//! point for every remote call: it (re)connects on demand, enforces the
//! operation timeout and transparently retries once after a dropped
//! connection.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use dirlink_connector::config::{ClientConfig, Endpoint, TransportMethod};
use dirlink_connector::error::{DirectoryError, DirectoryResult};
use dirlink_connector::resilience::RetryPolicy;
use dirlink_connector::traits::{Session, Transport};

use crate::auth;
use crate::sasl::MechanismRegistry;
use crate::schema::{self, SchemaCache};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ConnectedUnbound,
    Bound,
}

/// Per-call overrides of the configuration. Unset fields use the configured
/// values.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub method: Option<TransportMethod>,
    /// Zero means unbounded.
    pub timeout: Option<Duration>,
    pub retry_limit: Option<i32>,
    pub retry_wait: Option<Duration>,
    /// Reconnect when the connection is down (default `true`).
    pub try_reconnect: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, limit: i32, wait: Duration) -> Self {
        self.retry_limit = Some(limit);
        self.retry_wait = Some(wait);
        self
    }

    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.try_reconnect = Some(false);
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    fn endpoint(&self, config: &ClientConfig) -> Endpoint {
        let method = self.method.unwrap_or(config.method);
        Endpoint {
            host: self.host.clone().unwrap_or_else(|| config.host.clone()),
            port: self
                .port
                .or(config.port)
                .unwrap_or_else(|| method.default_port()),
            method,
        }
    }

    fn timeout(&self, config: &ClientConfig) -> Option<Duration> {
        match self.timeout {
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
            None => config.timeout_duration(),
        }
    }

    fn retry_policy(&self, config: &ClientConfig) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_limit.unwrap_or(config.retry_limit),
            self.retry_wait
                .unwrap_or_else(|| config.retry_wait_duration()),
        )
    }

    fn try_reconnect(&self) -> bool {
        self.try_reconnect.unwrap_or(true)
    }
}

/// Await `future`, failing with `Timeout` after `timeout`.
async fn within<F, R>(timeout: Option<Duration>, future: F) -> DirectoryResult<R>
where
    F: Future<Output = DirectoryResult<R>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| DirectoryError::Timeout { timeout: limit })?,
        None => future.await,
    }
}

/// A managed connection to one directory server.
pub struct Connection<T: Transport> {
    transport: T,
    config: ClientConfig,
    registry: MechanismRegistry,
    session: Option<T::Session>,
    endpoint: Option<Endpoint>,
    connecting: bool,
    bound: bool,
    bind_attempted: bool,
    schema: Option<SchemaCache>,
}

impl<T: Transport> Connection<T> {
    /// Create a disconnected connection. Nothing is opened until first use.
    pub fn new(transport: T, config: ClientConfig) -> DirectoryResult<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            config,
            registry: MechanismRegistry::default(),
            session: None,
            endpoint: None,
            connecting: false,
            bound: false,
            bind_attempted: false,
            schema: None,
        })
    }

    /// Replace the SASL mechanism registry.
    #[must_use]
    pub fn with_registry(mut self, registry: MechanismRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Endpoint of the current session, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        match (self.connecting && self.session.is_some(), self.bound) {
            (true, true) => ConnectionState::Bound,
            (true, false) => ConnectionState::ConnectedUnbound,
            (false, _) => ConnectionState::Disconnected,
        }
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Open a session and bind it.
    #[instrument(skip(self, options))]
    pub async fn connect(&mut self, options: &CallOptions) -> DirectoryResult<()> {
        let endpoint = options.endpoint(&self.config);
        let timeout = options.timeout(&self.config);
        debug!(endpoint = %endpoint, "Connecting to directory server");

        let session = within(timeout, self.transport.open(&endpoint)).await?;
        self.session = Some(session);
        self.endpoint = Some(endpoint);
        self.connecting = true;
        self.bound = false;
        self.bind_attempted = false;

        if let Err(e) = self.bind(options).await {
            self.disconnect(options).await;
            return Err(e);
        }
        Ok(())
    }

    /// Authenticate the open session.
    pub async fn bind(&mut self, options: &CallOptions) -> DirectoryResult<()> {
        let timeout = options.timeout(&self.config);
        let Some(session) = self.session.as_mut() else {
            return Err(DirectoryError::connection_failed("bind without an open session"));
        };
        let host = self
            .endpoint
            .as_ref()
            .map_or_else(|| self.config.host.clone(), |e| e.host.clone());

        self.bind_attempted = true;
        let method = within(
            timeout,
            auth::negotiate(session, &self.config, &self.registry, &host),
        )
        .await?;
        self.bound = true;

        info!(
            identity = self.config.bind_dn.as_deref().unwrap_or("(anonymous)"),
            endpoint = %self.endpoint.as_ref().map(ToString::to_string).unwrap_or_default(),
            method = %method,
            "Bound to directory server"
        );

        if !self.config.store_password && self.config.password.take().is_some() {
            debug!("Discarded stored password after bind");
        }
        Ok(())
    }

    /// End the bind. A no-op unless a session exists and a bind happened or
    /// was attempted.
    pub async fn unbind(&mut self, options: &CallOptions) -> DirectoryResult<()> {
        if self.session.is_none() || !(self.bound || self.bind_attempted) {
            return Ok(());
        }

        self.bound = false;
        self.bind_attempted = false;
        self.connecting = false;

        let timeout = options.timeout(&self.config);
        if let Some(session) = self.session.as_mut() {
            within(timeout, session.unbind()).await?;
        }
        debug!("Unbound from directory server");
        Ok(())
    }

    /// Unbind, then release the session and the schema cache.
    pub async fn disconnect(&mut self, options: &CallOptions) {
        if let Err(e) = self.unbind(options).await {
            warn!(error = %e, "Unbind failed during disconnect");
        }
        self.mark_disconnected();
    }

    /// Drop the session without talking to the server.
    fn mark_disconnected(&mut self) {
        self.session = None;
        self.connecting = false;
        self.bound = false;
        self.bind_attempted = false;
        self.schema = None;
    }

    /// Disconnect and connect again, retrying per the retry policy.
    #[instrument(skip(self, options))]
    pub async fn reconnect(&mut self, options: &CallOptions) -> DirectoryResult<()> {
        let mut budget = options.retry_policy(&self.config).budget();

        loop {
            self.disconnect(options).await;

            match self.connect(options).await {
                Ok(()) => {
                    if budget.retries() > 0 {
                        info!(retries = budget.retries(), "Reconnected to directory server");
                    }
                    return Ok(());
                }
                Err(
                    e @ (DirectoryError::AuthenticationFailed { .. }
                    | DirectoryError::DistinguishedNameInvalid { .. }),
                ) => return Err(e),
                Err(e) => {
                    warn!(
                        error = %e,
                        retries = budget.retries(),
                        "Connect attempt failed"
                    );
                    if !budget.pause().await {
                        let endpoint = options.endpoint(&self.config);
                        return Err(DirectoryError::connection_failed_with_source(
                            format!(
                                "giving up on {endpoint} after {} retries",
                                budget.retries()
                            ),
                            e,
                        ));
                    }
                }
            }
        }
    }

    /// Run `body` against a live session.
    ///
    /// Connects first when needed. A connection failure from `body` causes
    /// one reconnect and one more run; a timeout does the same when
    /// `retry_on_timeout` is set and retries are allowed.
    pub async fn guard<F, Fut, R>(&mut self, options: &CallOptions, mut body: F) -> DirectoryResult<R>
    where
        F: FnMut(T::Session) -> Fut,
        Fut: Future<Output = DirectoryResult<R>>,
    {
        let timeout = options.timeout(&self.config);
        let try_reconnect = options.try_reconnect();
        let retry_limit = options.retry_limit.unwrap_or(self.config.retry_limit);
        let mut retried_connection = false;
        let mut retried_timeout = false;

        loop {
            if !self.connecting || self.session.is_none() {
                if !try_reconnect {
                    return Err(DirectoryError::connection_failed("not connected"));
                }
                self.reconnect(options).await?;
            }

            let session = self
                .session
                .clone()
                .ok_or_else(|| DirectoryError::connection_failed("not connected"))?;

            match within(timeout, body(session)).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_connection_failure() && try_reconnect && !retried_connection => {
                    warn!(error = %e, "Connection lost, reconnecting and retrying");
                    retried_connection = true;
                    self.mark_disconnected();
                }
                Err(DirectoryError::Timeout { timeout: limit })
                    if self.config.retry_on_timeout
                        && try_reconnect
                        && retry_limit != 0
                        && !retried_timeout =>
                {
                    warn!(timeout_ms = limit.as_millis() as u64, "Operation timed out, retrying");
                    retried_timeout = true;
                    self.mark_disconnected();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The server schema, loaded on first use and kept until disconnect.
    pub async fn schema(&mut self, options: &CallOptions) -> DirectoryResult<&mut SchemaCache> {
        if self.schema.is_none() {
            let cache = self
                .guard(options, |mut session| async move { schema::load(&mut session).await })
                .await?;
            self.schema = Some(cache);
        }
        Ok(self.schema.get_or_insert_with(SchemaCache::empty))
    }

    /// Whether a schema cache is currently held.
    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
