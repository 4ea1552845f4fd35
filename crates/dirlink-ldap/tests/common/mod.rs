//! Common test utilities for dirlink-ldap integration tests.
//!
//! Provides an in-memory directory behind the `Transport`/`Session` traits,
//! with scripted failures and delays, so lifecycle, bind and façade behavior
//! can be verified without a real server.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use dirlink_connector::async_trait;
use dirlink_connector::config::{ClientConfig, Endpoint};
use dirlink_connector::error::{result_code, DirectoryError, DirectoryResult};
use dirlink_connector::operation::{Entry, Modification, SearchRequest};
use dirlink_connector::traits::{SaslStep, Session, Transport};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const BASE_DN: &str = "dc=example,dc=com";
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
pub const ADMIN_PASSWORD: &str = "secret";
pub const SUBSCHEMA_DN: &str = "cn=Subschema";

/// Operations that can be scripted to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Bind,
    RootDse,
    Schema,
    Search,
    Add,
    Modify,
    Delete,
    Rename,
}

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Configuration pointing at the fake server, with instant retries.
pub fn test_config() -> ClientConfig {
    init_tracing();
    ClientConfig::new("ldap.test")
        .with_credentials(ADMIN_DN, ADMIN_PASSWORD)
        .with_retry(1, 0.0)
}

pub fn connection_lost() -> DirectoryError {
    DirectoryError::connection_failed("connection reset by peer")
}

// ---------------------------------------------------------------------------
// FakeDirectory - shared server state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct State {
    pub users: HashMap<String, String>,
    pub allow_anonymous: bool,
    pub sasl_mechanisms: Vec<String>,
    pub sasl_script: VecDeque<DirectoryResult<SaslStep>>,
    pub subschema_dn: Option<String>,
    pub schema: Option<Entry>,
    pub entries: BTreeMap<String, Entry>,

    pub failures: HashMap<Op, VecDeque<DirectoryError>>,
    pub delays: HashMap<Op, VecDeque<Duration>>,

    pub opened: Vec<Endpoint>,
    pub binds: Vec<(String, String)>,
    pub sasl_binds: Vec<(String, Option<Vec<u8>>)>,
    pub searches: Vec<SearchRequest>,
    pub schema_reads: usize,
    pub adds: Vec<(String, Vec<(String, Vec<Vec<u8>>)>)>,
    pub modifies: Vec<(String, Vec<Modification>)>,
    pub deletes: Vec<String>,
    pub renames: Vec<(String, String, bool, Option<String>)>,
    pub unbinds: usize,
}

/// Handle to an in-memory directory. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDirectory {
    /// Directory with the admin account and the base entry.
    pub fn new() -> Self {
        let mut state = State {
            allow_anonymous: true,
            ..State::default()
        };
        state
            .users
            .insert(ADMIN_DN.to_string(), ADMIN_PASSWORD.to_string());
        state.entries.insert(
            BASE_DN.to_string(),
            Entry::new(BASE_DN).with("objectClass", ["domain"]).with("dc", ["example"]),
        );

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self) -> FakeTransport {
        FakeTransport {
            state: self.state.clone(),
        }
    }

    pub fn with_entry(self, entry: Entry) -> Self {
        self.state().entries.insert(entry.dn.clone(), entry);
        self
    }

    pub fn with_user(self, dn: &str, password: &str) -> Self {
        self.state().users.insert(dn.to_string(), password.to_string());
        self
    }

    pub fn with_sasl(self, mechanisms: &[&str], script: Vec<DirectoryResult<SaslStep>>) -> Self {
        {
            let mut state = self.state();
            state.sasl_mechanisms = mechanisms.iter().map(|m| m.to_string()).collect();
            state.sasl_script = script.into();
        }
        self
    }

    /// Publish a subschema entry holding the given definitions.
    pub fn with_schema(
        self,
        attribute_types: &[&str],
        object_classes: &[&str],
        ldap_syntaxes: &[&str],
    ) -> Self {
        {
            let mut state = self.state();
            state.subschema_dn = Some(SUBSCHEMA_DN.to_string());
            state.schema = Some(
                Entry::new(SUBSCHEMA_DN)
                    .with("attributeTypes", attribute_types.iter().copied())
                    .with("objectClasses", object_classes.iter().copied())
                    .with("ldapSyntaxes", ldap_syntaxes.iter().copied()),
            );
        }
        self
    }

    /// Make the next `op` fail with `error`. Failures queue up.
    pub fn fail_next(&self, op: Op, error: DirectoryError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Make the next `op` take `delay` before answering.
    pub fn delay_next(&self, op: Op, delay: Duration) {
        self.state().delays.entry(op).or_default().push_back(delay);
    }

    pub fn open_count(&self) -> usize {
        self.state().opened.len()
    }

    /// Searches excluding root DSE and schema reads.
    pub fn search_count(&self) -> usize {
        self.state().searches.len()
    }
}

fn is_under(dn: &str, base: &str) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{base}"))
}

/// Take the scripted failure and delay for `op`, releasing the lock before
/// the caller sleeps.
fn scripted(state: &Arc<Mutex<State>>, op: Op) -> (Option<DirectoryError>, Option<Duration>) {
    let mut state = state.lock().unwrap();
    let delay = state.delays.get_mut(&op).and_then(VecDeque::pop_front);
    let failure = state.failures.get_mut(&op).and_then(VecDeque::pop_front);
    (failure, delay)
}

async fn apply_script(state: &Arc<Mutex<State>>, op: Op) -> DirectoryResult<()> {
    let (failure, delay) = scripted(state, op);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// FakeTransport / FakeSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn open(&self, endpoint: &Endpoint) -> DirectoryResult<FakeSession> {
        self.state.lock().unwrap().opened.push(endpoint.clone());
        apply_script(&self.state, Op::Open).await?;
        Ok(FakeSession {
            state: self.state.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    state: Arc<Mutex<State>>,
}

impl FakeSession {
    fn root_dse(&self) -> Entry {
        let state = self.state.lock().unwrap();
        let mut entry = Entry::new("");
        if !state.sasl_mechanisms.is_empty() {
            entry = entry.with("supportedSASLMechanisms", state.sasl_mechanisms.clone());
        }
        if let Some(dn) = &state.subschema_dn {
            entry = entry.with("subschemaSubentry", [dn.clone()]);
        }
        entry
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        self.state
            .lock()
            .unwrap()
            .binds
            .push((dn.to_string(), password.to_string()));
        apply_script(&self.state, Op::Bind).await?;

        let state = self.state.lock().unwrap();
        if dn.is_empty() && password.is_empty() {
            return if state.allow_anonymous {
                Ok(())
            } else {
                Err(DirectoryError::directory(48, "anonymous bind disallowed"))
            };
        }
        match state.users.get(dn) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(DirectoryError::directory(
                result_code::INVALID_CREDENTIALS,
                "invalid credentials",
            )),
        }
    }

    async fn sasl_bind(
        &mut self,
        mechanism: &str,
        credentials: Option<&[u8]>,
    ) -> DirectoryResult<SaslStep> {
        let mut state = self.state.lock().unwrap();
        state
            .sasl_binds
            .push((mechanism.to_string(), credentials.map(<[u8]>::to_vec)));
        state
            .sasl_script
            .pop_front()
            .unwrap_or_else(|| Err(DirectoryError::directory(7, "authMethodNotSupported")))
    }

    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<Vec<Entry>> {
        if request.base.is_empty() {
            apply_script(&self.state, Op::RootDse).await?;
            return Ok(vec![self.root_dse()]);
        }

        let is_schema_read = {
            let state = self.state.lock().unwrap();
            state
                .subschema_dn
                .as_deref()
                .map_or(request.base.eq_ignore_ascii_case("cn=schema"), |dn| {
                    dn.eq_ignore_ascii_case(&request.base)
                })
        };
        if is_schema_read {
            apply_script(&self.state, Op::Schema).await?;
            let mut state = self.state.lock().unwrap();
            state.schema_reads += 1;
            return match &state.schema {
                Some(entry) => Ok(vec![entry.clone()]),
                None => Err(DirectoryError::directory(
                    result_code::NO_SUCH_OBJECT,
                    "no such object",
                )),
            };
        }

        self.state.lock().unwrap().searches.push(request.clone());
        apply_script(&self.state, Op::Search).await?;

        let state = self.state.lock().unwrap();
        if !state.entries.keys().any(|dn| is_under(dn, &request.base)) {
            return Err(DirectoryError::directory(
                result_code::NO_SUCH_OBJECT,
                "no such object",
            ));
        }
        let mut found: Vec<Entry> = state
            .entries
            .values()
            .filter(|entry| is_under(&entry.dn, &request.base))
            .cloned()
            .collect();
        if let Some(limit) = request.size_limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<Vec<u8>>)],
    ) -> DirectoryResult<()> {
        self.state
            .lock()
            .unwrap()
            .adds
            .push((dn.to_string(), attributes.to_vec()));
        apply_script(&self.state, Op::Add).await?;

        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(dn) {
            return Err(DirectoryError::directory(
                result_code::ALREADY_EXISTS,
                "already exists",
            ));
        }
        let mut entry = Entry::new(dn);
        for (name, values) in attributes {
            entry.attributes.insert(name.clone(), values.clone());
        }
        state.entries.insert(dn.to_string(), entry);
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> DirectoryResult<()> {
        self.state
            .lock()
            .unwrap()
            .modifies
            .push((dn.to_string(), modifications.to_vec()));
        apply_script(&self.state, Op::Modify).await?;

        if self.state.lock().unwrap().entries.contains_key(dn) {
            Ok(())
        } else {
            Err(DirectoryError::directory(
                result_code::NO_SUCH_OBJECT,
                "no such object",
            ))
        }
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.state.lock().unwrap().deletes.push(dn.to_string());
        apply_script(&self.state, Op::Delete).await?;

        match self.state.lock().unwrap().entries.remove(dn) {
            Some(_) => Ok(()),
            None => Err(DirectoryError::directory(
                result_code::NO_SUCH_OBJECT,
                "no such object",
            )),
        }
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        self.state.lock().unwrap().renames.push((
            dn.to_string(),
            new_rdn.to_string(),
            delete_old_rdn,
            new_superior.map(str::to_string),
        ));
        apply_script(&self.state, Op::Rename).await?;

        let mut state = self.state.lock().unwrap();
        let Some(mut entry) = state.entries.remove(dn) else {
            return Err(DirectoryError::directory(
                result_code::NO_SUCH_OBJECT,
                "no such object",
            ));
        };
        let parent = match new_superior {
            Some(parent) => parent.to_string(),
            None => dn.split_once(',').map(|(_, p)| p.to_string()).unwrap_or_default(),
        };
        entry.dn = format!("{new_rdn},{parent}");
        state.entries.insert(entry.dn.clone(), entry);
        Ok(())
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        self.state.lock().unwrap().unbinds += 1;
        Ok(())
    }
}
