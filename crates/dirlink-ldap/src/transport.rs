//! `ldap3` transport
//!
//! The reference [`Transport`] backed by the `ldap3` crate. Each session owns
//! one `ldap3` connection whose driver runs on a spawned Tokio task.
//!
//! `ldap3` only exposes the EXTERNAL SASL mechanism, so challenge/response
//! mechanisms report `UnsupportedMechanism` here and the negotiator falls
//! through to the next strategy.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope, SearchEntry,
    SearchOptions,
};
use tracing::{debug, warn};

use dirlink_connector::config::{ClientConfig, Endpoint, SearchScope, TransportMethod};
use dirlink_connector::error::{result_code, DirectoryError, DirectoryResult};
use dirlink_connector::operation::{Entry, ModOp, Modification, SearchRequest};
use dirlink_connector::traits::{SaslStep, Session, Transport};

/// Default time allowed for establishing the TCP/TLS connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens `ldap3` sessions.
#[derive(Debug, Clone)]
pub struct LdapTransport {
    connect_timeout: Duration,
}

impl LdapTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Transport whose connect timeout follows the client's operation timeout.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.timeout_duration().unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for LdapTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LdapTransport {
    type Session = LdapSession;

    async fn open(&self, endpoint: &Endpoint) -> DirectoryResult<LdapSession> {
        let url = endpoint.url();
        debug!(url = %url, "Opening LDAP connection");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_starttls(endpoint.method == TransportMethod::Tls);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(LdapSession { ldap })
    }
}

/// One `ldap3` connection. Clones share the connection.
#[derive(Clone)]
pub struct LdapSession {
    ldap: Ldap,
}

impl std::fmt::Debug for LdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSession").finish_non_exhaustive()
    }
}

fn transport_error(operation: &str, error: LdapError) -> DirectoryError {
    DirectoryError::connection_failed_with_source(format!("LDAP {operation} failed"), error)
}

fn check(result: LdapResult) -> DirectoryResult<()> {
    if result.rc == result_code::SUCCESS {
        Ok(())
    } else {
        Err(DirectoryError::directory(result.rc, result.text))
    }
}

fn scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::One => Scope::OneLevel,
        SearchScope::Sub => Scope::Subtree,
    }
}

fn value_set(values: &[Vec<u8>]) -> HashSet<Vec<u8>> {
    values.iter().cloned().collect()
}

fn to_mod(modification: &Modification) -> Mod<Vec<u8>> {
    let attribute = modification.attribute.as_bytes().to_vec();
    match modification.op {
        ModOp::Add => Mod::Add(attribute, value_set(&modification.values)),
        ModOp::Delete => Mod::Delete(attribute, value_set(&modification.values)),
        ModOp::Replace => Mod::Replace(attribute, value_set(&modification.values)),
        ModOp::Increment => Mod::Increment(
            attribute,
            modification.values.first().cloned().unwrap_or_else(|| b"1".to_vec()),
        ),
    }
}

fn to_entry(raw: SearchEntry) -> Entry {
    let mut entry = Entry::new(raw.dn);
    for (name, values) in raw.attrs {
        entry
            .attributes
            .insert(name, values.into_iter().map(String::into_bytes).collect());
    }
    for (name, values) in raw.bin_attrs {
        entry.attributes.entry(name).or_default().extend(values);
    }
    entry
}

#[async_trait]
impl Session for LdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| transport_error("bind", e))?;
        check(result)
    }

    async fn sasl_bind(
        &mut self,
        mechanism: &str,
        _credentials: Option<&[u8]>,
    ) -> DirectoryResult<SaslStep> {
        if !mechanism.eq_ignore_ascii_case("EXTERNAL") {
            return Err(DirectoryError::UnsupportedMechanism {
                mechanism: mechanism.to_string(),
            });
        }

        let result = self
            .ldap
            .sasl_external_bind()
            .await
            .map_err(|e| transport_error("SASL bind", e))?;
        check(result)?;
        Ok(SaslStep::Done)
    }

    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<Vec<Entry>> {
        let mut options = SearchOptions::new();
        if let Some(limit) = request.size_limit {
            options = options.sizelimit(i32::try_from(limit).unwrap_or(i32::MAX));
        }

        let ldap3::SearchResult(entries, result) = self
            .ldap
            .with_search_options(options)
            .search(
                &request.base,
                scope(request.scope),
                &request.filter,
                &request.attributes,
            )
            .await
            .map_err(|e| transport_error("search", e))?;

        match result.rc {
            result_code::SUCCESS => {}
            result_code::SIZE_LIMIT_EXCEEDED => {
                debug!(returned = entries.len(), "Search size limit reached");
            }
            code => return Err(DirectoryError::directory(code, result.text)),
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(to_entry)
            .collect())
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<Vec<u8>>)],
    ) -> DirectoryResult<()> {
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attributes
            .iter()
            .map(|(name, values)| (name.as_bytes().to_vec(), value_set(values)))
            .collect();

        let result = self
            .ldap
            .add(dn, attrs)
            .await
            .map_err(|e| transport_error("add", e))?;
        check(result)
    }

    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> DirectoryResult<()> {
        let mods: Vec<Mod<Vec<u8>>> = modifications.iter().map(to_mod).collect();

        let result = self
            .ldap
            .modify(dn, mods)
            .await
            .map_err(|e| transport_error("modify", e))?;
        check(result)
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        let result = self
            .ldap
            .delete(dn)
            .await
            .map_err(|e| transport_error("delete", e))?;
        check(result)
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        let result = self
            .ldap
            .modifydn(dn, new_rdn, delete_old_rdn, new_superior)
            .await
            .map_err(|e| transport_error("modify DN", e))?;
        check(result)
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| transport_error("unbind", e))
    }
}
