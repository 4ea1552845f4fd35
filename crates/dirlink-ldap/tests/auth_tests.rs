//! Bind negotiation tests: SASL exchanges, fallback order and anonymous
//! binds against the in-memory directory.

mod common;

use common::*;
use dirlink_connector::config::{ClientConfig, Endpoint, TransportMethod};
use dirlink_connector::error::DirectoryError;
use dirlink_connector::traits::{SaslStep, Transport};
use dirlink_ldap::auth::{self, BindMethod, MAX_SASL_ROUNDS};
use dirlink_ldap::sasl::{DigestMd5, External, MechanismRegistry, SaslCredentials};
use dirlink_ldap::{CallOptions, Connection, ConnectionState};

// =============================================================================
// Test Helpers
// =============================================================================

const DIGEST_CHALLENGE: &[u8] =
    b"realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",algorithm=md5-sess,charset=utf-8";
const DIGEST_RSPAUTH: &[u8] = b"rspauth=b10ca1a1f716b6496c98bc5dcad7279c";
const CRAM_CHALLENGE: &[u8] = b"<1896.697170952@postoffice.reston.mci.net>";

async fn open_session(directory: &FakeDirectory) -> FakeSession {
    let endpoint = Endpoint {
        host: "ldap.test".to_string(),
        port: 389,
        method: TransportMethod::Plain,
    };
    directory.transport().open(&endpoint).await.unwrap()
}

async fn negotiate(
    directory: &FakeDirectory,
    config: &ClientConfig,
) -> Result<BindMethod, DirectoryError> {
    let mut session = open_session(directory).await;
    auth::negotiate(&mut session, config, &MechanismRegistry::default(), "ldap.test").await
}

fn sasl_mechanisms_tried(directory: &FakeDirectory) -> Vec<String> {
    directory
        .state()
        .sasl_binds
        .iter()
        .map(|(mechanism, _)| mechanism.clone())
        .collect()
}

// =============================================================================
// SASL
// =============================================================================

#[tokio::test]
async fn test_digest_md5_full_exchange() {
    init_tracing();
    let directory = FakeDirectory::new().with_sasl(
        &["DIGEST-MD5"],
        vec![
            Ok(SaslStep::Challenge(DIGEST_CHALLENGE.to_vec())),
            Ok(SaslStep::Challenge(DIGEST_RSPAUTH.to_vec())),
            Ok(SaslStep::Done),
        ],
    );
    let config = ClientConfig::new("elwood.innosoft.com")
        .with_credentials("chris", "secret")
        .with_sasl(["DIGEST-MD5"]);

    let mut registry = MechanismRegistry::empty();
    registry.register(DigestMd5::NAME, || {
        Box::new(DigestMd5::with_cnonce("OA6MHXh6VqTrRk"))
    });
    let mut conn = Connection::new(directory.transport(), config)
        .unwrap()
        .with_registry(registry);

    conn.connect(&CallOptions::default()).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Bound);

    let state = directory.state();
    assert!(state.binds.is_empty());
    assert_eq!(state.sasl_binds.len(), 3);
    assert_eq!(state.sasl_binds[0], ("DIGEST-MD5".to_string(), None));

    let response = String::from_utf8(state.sasl_binds[1].1.clone().unwrap()).unwrap();
    assert!(response.contains("username=\"chris\""));
    assert!(response.contains("digest-uri=\"ldap/elwood.innosoft.com\""));
    assert!(response.contains("response=d184adb7122fc002ba1970601aecf06c"));

    assert_eq!(state.sasl_binds[2].1.as_deref(), Some(&b""[..]));
}

#[tokio::test]
async fn test_digest_md5_bad_server_proof_falls_back_to_simple() {
    let directory = FakeDirectory::new()
        .with_user("chris", "secret")
        .with_sasl(
            &["DIGEST-MD5"],
            vec![
                Ok(SaslStep::Challenge(DIGEST_CHALLENGE.to_vec())),
                Ok(SaslStep::Challenge(
                    b"rspauth=00000000000000000000000000000000".to_vec(),
                )),
            ],
        );
    let config = ClientConfig::new("elwood.innosoft.com")
        .with_credentials("chris", "secret")
        .with_sasl(["DIGEST-MD5"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Simple);
    assert_eq!(
        directory.state().binds,
        vec![("chris".to_string(), "secret".to_string())]
    );
}

#[tokio::test]
async fn test_cram_md5_exchange() {
    let directory = FakeDirectory::new().with_sasl(
        &["CRAM-MD5"],
        vec![
            Ok(SaslStep::Challenge(CRAM_CHALLENGE.to_vec())),
            Ok(SaslStep::Done),
        ],
    );
    let config = ClientConfig::new("ldap.test")
        .with_credentials("tim", "tanstaaftanstaaf")
        .with_sasl(["CRAM-MD5"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Sasl("CRAM-MD5".to_string()));
    let state = directory.state();
    assert_eq!(
        state.sasl_binds[1].1.as_deref(),
        Some(&b"tim b913a602c7eda7a495b4e6e7334d3890"[..])
    );
}

#[tokio::test]
async fn test_external_needs_no_password() {
    let directory =
        FakeDirectory::new().with_sasl(&["EXTERNAL"], vec![Ok(SaslStep::Done)]);
    let config = ClientConfig::new("ldap.test").with_sasl(["EXTERNAL"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Sasl("EXTERNAL".to_string()));
    let state = directory.state();
    assert_eq!(state.sasl_binds, vec![("EXTERNAL".to_string(), None)]);
    assert!(state.binds.is_empty());
}

#[tokio::test]
async fn test_mechanisms_tried_in_configured_order() {
    let directory = FakeDirectory::new().with_sasl(
        &["digest-md5", "CRAM-MD5"],
        vec![
            Err(DirectoryError::directory(49, "invalid credentials")),
            Ok(SaslStep::Done),
        ],
    );
    let config = ClientConfig::new("ldap.test")
        .with_credentials(ADMIN_DN, ADMIN_PASSWORD)
        .with_sasl(["GSSAPI", "CRAM-MD5", "DIGEST-MD5"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Sasl("DIGEST-MD5".to_string()));
    assert_eq!(sasl_mechanisms_tried(&directory), vec!["CRAM-MD5", "DIGEST-MD5"]);
}

#[tokio::test]
async fn test_unadvertised_mechanism_is_skipped() {
    let directory = FakeDirectory::new();
    let config = test_config().with_sasl(["DIGEST-MD5"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Simple);
    assert!(sasl_mechanisms_tried(&directory).is_empty());
}

#[tokio::test]
async fn test_sasl_disabled_goes_straight_to_simple() {
    let directory = FakeDirectory::new().with_sasl(&["EXTERNAL"], vec![Ok(SaslStep::Done)]);

    let method = negotiate(&directory, &test_config()).await.unwrap();

    assert_eq!(method, BindMethod::Simple);
    assert!(sasl_mechanisms_tried(&directory).is_empty());
}

#[tokio::test]
async fn test_sasl_without_credential_is_skipped() {
    let directory = FakeDirectory::new().with_sasl(&["DIGEST-MD5"], Vec::new());
    let config = ClientConfig::new("ldap.test")
        .with_bind_dn(ADMIN_DN)
        .with_sasl(["DIGEST-MD5"]);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Anonymous);
    assert!(sasl_mechanisms_tried(&directory).is_empty());
}

#[tokio::test]
async fn test_connection_failure_during_sasl_aborts_negotiation() {
    let directory =
        FakeDirectory::new().with_sasl(&["CRAM-MD5"], vec![Err(connection_lost())]);
    let config = test_config().with_sasl(["CRAM-MD5"]);

    let err = negotiate(&directory, &config).await.unwrap_err();

    assert!(err.is_connection_failure());
    assert!(directory.state().binds.is_empty());
}

#[tokio::test]
async fn test_exchange_round_limit() {
    let directory = FakeDirectory::new();
    directory.state().sasl_script = (0..MAX_SASL_ROUNDS + 1)
        .map(|_| Ok(SaslStep::Challenge(Vec::new())))
        .collect();
    let mut session = open_session(&directory).await;

    let err = auth::run_exchange(&mut session, &mut External, &SaslCredentials::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DirectoryError::SaslProtocol { .. }));
    assert_eq!(directory.state().sasl_binds.len(), MAX_SASL_ROUNDS);
}

// =============================================================================
// Simple and anonymous
// =============================================================================

#[tokio::test]
async fn test_missing_password_falls_back_to_anonymous() {
    let directory = FakeDirectory::new();
    let config = ClientConfig::new("ldap.test").with_bind_dn(ADMIN_DN);

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Anonymous);
    assert_eq!(
        directory.state().binds,
        vec![(String::new(), String::new())]
    );
}

#[tokio::test]
async fn test_missing_password_without_anonymous_fails_immediately() {
    let directory = FakeDirectory::new();
    let config = ClientConfig::new("ldap.test")
        .with_credentials(ADMIN_DN, "")
        .with_allow_anonymous(false);

    let err = negotiate(&directory, &config).await.unwrap_err();

    assert!(err.is_authentication_failure());
    assert!(err.to_string().contains("no credential available"));
    assert!(directory.state().binds.is_empty());
}

#[tokio::test]
async fn test_wrong_password_falls_back_to_anonymous() {
    let directory = FakeDirectory::new();
    let config = test_config().with_credentials(ADMIN_DN, "wrong");

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Anonymous);
    assert_eq!(directory.state().binds.len(), 2);
}

#[tokio::test]
async fn test_invalid_bind_dn_is_reported_without_anonymous_fallback() {
    let directory = FakeDirectory::new();
    directory.fail_next(Op::Bind, DirectoryError::directory(34, "invalid DN syntax"));
    let config = test_config().with_credentials("not a dn", "secret");

    let err = negotiate(&directory, &config).await.unwrap_err();

    match err {
        DirectoryError::DistinguishedNameInvalid { dn } => assert_eq!(dn, "not a dn"),
        other => panic!("expected DistinguishedNameInvalid, got {other:?}"),
    }
    assert_eq!(
        directory.state().binds,
        vec![("not a dn".to_string(), "secret".to_string())]
    );
}

#[tokio::test]
async fn test_exhausted_negotiation_reports_last_error() {
    let directory = FakeDirectory::new();
    directory.state().allow_anonymous = false;
    let config = test_config().with_credentials(ADMIN_DN, "wrong");

    let err = negotiate(&directory, &config).await.unwrap_err();

    assert!(matches!(err, DirectoryError::AuthenticationFailed { .. }));
    assert!(err.to_string().contains("anonymous bind disallowed"));
}

#[tokio::test]
async fn test_anonymous_only_config() {
    let directory = FakeDirectory::new();
    let config = ClientConfig::new("ldap.test");

    let method = negotiate(&directory, &config).await.unwrap();

    assert_eq!(method, BindMethod::Anonymous);
}

#[tokio::test]
async fn test_nothing_to_try_is_an_authentication_failure() {
    let directory = FakeDirectory::new();
    let config = ClientConfig::new("ldap.test").with_allow_anonymous(false);

    let err = negotiate(&directory, &config).await.unwrap_err();

    assert!(err.is_authentication_failure());
    assert!(err.to_string().contains("no bind method available"));
}
