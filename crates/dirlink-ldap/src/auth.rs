//! Bind negotiation
//!
//! Tries SASL, then a simple bind, then an anonymous bind, stopping at the
//! first that succeeds. Connection failures abort the negotiation at once so
//! the connection guard can reconnect, and a malformed bind DN is reported
//! as is. Every other failure moves on to the next strategy.

use std::fmt;

use tracing::{debug, warn};

use dirlink_connector::config::{ClientConfig, SearchScope};
use dirlink_connector::error::{DirectoryError, DirectoryResult};
use dirlink_connector::operation::SearchRequest;
use dirlink_connector::traits::{SaslStep, Session};

use crate::sasl::{MechanismRegistry, SaslCredentials, SaslMechanism};

/// Upper bound on challenge/response round trips in one SASL exchange.
pub const MAX_SASL_ROUNDS: usize = 8;

/// How a successful bind authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMethod {
    Sasl(String),
    Simple,
    Anonymous,
}

impl fmt::Display for BindMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindMethod::Sasl(mechanism) => write!(f, "SASL {mechanism}"),
            BindMethod::Simple => f.write_str("simple"),
            BindMethod::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Password from configuration, else from the provider callback.
pub fn resolve_password(config: &ClientConfig, bind_dn: &str) -> Option<String> {
    config
        .password
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| config.password_block.as_ref().and_then(|block| block.call(bind_dn)))
        .filter(|p| !p.is_empty())
}

/// Authenticate `session` according to `config`.
pub async fn negotiate<S: Session>(
    session: &mut S,
    config: &ClientConfig,
    registry: &MechanismRegistry,
    host: &str,
) -> DirectoryResult<BindMethod> {
    let mut last_error: Option<DirectoryError> = None;

    if config.try_sasl && !config.sasl_mechanisms.is_empty() {
        if let Some(mechanism) =
            sasl_bind(session, config, registry, host, &mut last_error).await?
        {
            return Ok(BindMethod::Sasl(mechanism));
        }
    }

    if let Some(bind_dn) = config.bind_dn.as_deref() {
        match resolve_password(config, bind_dn) {
            Some(password) => match session.simple_bind(bind_dn, &password).await {
                Ok(()) => return Ok(BindMethod::Simple),
                Err(e) if e.is_connection_failure() => return Err(e),
                Err(e) => match e.normalize(bind_dn) {
                    // A malformed bind DN will not succeed on any retry.
                    e @ DirectoryError::DistinguishedNameInvalid { .. } => return Err(e),
                    e => {
                        debug!(bind_dn = %bind_dn, error = %e, "Simple bind failed");
                        last_error = Some(e);
                    }
                },
            },
            None if config.allow_anonymous => {
                debug!(bind_dn = %bind_dn, "No credential available, skipping simple bind");
            }
            None => {
                return Err(DirectoryError::authentication_failed(format!(
                    "no credential available for {bind_dn} and anonymous bind is disabled"
                )));
            }
        }
    }

    if config.allow_anonymous {
        match session.simple_bind("", "").await {
            Ok(()) => return Ok(BindMethod::Anonymous),
            Err(e) if e.is_connection_failure() => return Err(e),
            Err(e) => {
                debug!(error = %e, "Anonymous bind failed");
                last_error = Some(e.normalize(""));
            }
        }
    }

    Err(DirectoryError::authentication_failed(match last_error {
        Some(e) => format!("all bind methods failed, last error: {e}"),
        None => "no bind method available".to_string(),
    }))
}

/// Mechanisms the server advertises in its root DSE, upper-cased.
async fn supported_mechanisms<S: Session>(session: &mut S) -> DirectoryResult<Vec<String>> {
    let request = SearchRequest::new("", SearchScope::Base, "(objectClass=*)")
        .with_attributes(["supportedSASLMechanisms"]);

    let entries = session.search(&request).await?;
    Ok(entries
        .first()
        .map(|entry| entry.values_str("supportedSASLMechanisms"))
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.to_ascii_uppercase())
        .collect())
}

/// Run each configured mechanism the server supports until one succeeds.
///
/// `Ok(None)` means no mechanism succeeded; the reason is left in `last_error`.
async fn sasl_bind<S: Session>(
    session: &mut S,
    config: &ClientConfig,
    registry: &MechanismRegistry,
    host: &str,
    last_error: &mut Option<DirectoryError>,
) -> DirectoryResult<Option<String>> {
    let supported = match supported_mechanisms(session).await {
        Ok(supported) => supported,
        Err(e) if e.is_connection_failure() => return Err(e),
        Err(e) => {
            debug!(error = %e, "Cannot read supportedSASLMechanisms");
            *last_error = Some(e);
            return Ok(None);
        }
    };

    let identity = config.bind_dn.clone().unwrap_or_default();

    for name in &config.sasl_mechanisms {
        let name = name.to_ascii_uppercase();
        if !supported.contains(&name) {
            continue;
        }
        let Some(mut mechanism) = registry.create(&name) else {
            debug!(mechanism = %name, "Server supports mechanism but none is registered");
            continue;
        };

        let password = if mechanism.needs_credential() {
            match resolve_password(config, &identity) {
                Some(password) => Some(password),
                None => {
                    debug!(mechanism = %name, "No credential available, skipping mechanism");
                    continue;
                }
            }
        } else {
            None
        };

        let credentials = SaslCredentials {
            identity: identity.clone(),
            password,
            host: host.to_string(),
            authorization_id: None,
        };

        match run_exchange(session, mechanism.as_mut(), &credentials).await {
            Ok(()) => return Ok(Some(name)),
            Err(e) if e.is_connection_failure() => return Err(e),
            Err(e) => {
                if config.sasl_quiet {
                    debug!(mechanism = %name, error = %e, "SASL bind failed");
                } else {
                    warn!(mechanism = %name, error = %e, "SASL bind failed");
                }
                *last_error = Some(e.normalize(&identity));
            }
        }
    }

    Ok(None)
}

/// Drive one mechanism against the server until it reports completion.
pub async fn run_exchange<S: Session>(
    session: &mut S,
    mechanism: &mut dyn SaslMechanism,
    credentials: &SaslCredentials,
) -> DirectoryResult<()> {
    let mut response = mechanism.initial_response(credentials)?;

    for _ in 0..MAX_SASL_ROUNDS {
        match session.sasl_bind(mechanism.name(), response.as_deref()).await? {
            SaslStep::Done => return Ok(()),
            SaslStep::Challenge(challenge) => {
                response = Some(mechanism.respond(&challenge, credentials)?);
            }
        }
    }

    Err(DirectoryError::sasl_protocol(format!(
        "{} exchange did not complete within {MAX_SASL_ROUNDS} rounds",
        mechanism.name()
    )))
}
