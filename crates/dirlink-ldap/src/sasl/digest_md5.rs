use std::collections::HashMap;

use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

use dirlink_connector::error::{DirectoryError, DirectoryResult};

use super::{SaslCredentials, SaslMechanism};

const CNONCE_LENGTH: usize = 32;
const MAX_BUFFER: &str = "65536";

#[derive(Debug)]
enum Stage {
    Initial,
    AwaitingProof { expected: String },
    Done,
}

/// SASL DIGEST-MD5 (RFC 2831), authentication only (`qop=auth`).
#[derive(Debug)]
pub struct DigestMd5 {
    cnonce: String,
    nonce_count: u32,
    stage: Stage,
}

impl DigestMd5 {
    pub const NAME: &'static str = "DIGEST-MD5";

    pub fn new() -> Self {
        let cnonce: String = (0..CNONCE_LENGTH)
            .map(|_| OsRng.sample(Alphanumeric) as char)
            .collect();
        Self::with_cnonce(cnonce)
    }

    /// Use a fixed client nonce instead of a random one.
    pub fn with_cnonce(cnonce: impl Into<String>) -> Self {
        Self {
            cnonce: cnonce.into(),
            nonce_count: 0,
            stage: Stage::Initial,
        }
    }

    fn answer_challenge(
        &mut self,
        params: &HashMap<String, String>,
        credentials: &SaslCredentials,
    ) -> DirectoryResult<Vec<u8>> {
        let qop = params.get("qop").map(String::as_str).unwrap_or("auth");
        if !qop.split(',').any(|q| q.trim() == "auth") {
            return Err(DirectoryError::sasl_protocol(format!(
                "server does not offer qop=auth (offered: {qop})"
            )));
        }
        let nonce = params
            .get("nonce")
            .ok_or_else(|| DirectoryError::sasl_protocol("challenge has no nonce"))?;
        let password = credentials
            .password
            .as_deref()
            .ok_or_else(|| DirectoryError::sasl_protocol("DIGEST-MD5 requires a password"))?;
        let realm = params
            .get("realm")
            .cloned()
            .unwrap_or_else(|| credentials.host.clone());

        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let digest_uri = format!("ldap/{}", credentials.host);

        let ha1 = session_key(&credentials.identity, &realm, password, nonce, &self.cnonce);
        let response = request_digest(&ha1, nonce, &nc, &self.cnonce, "AUTHENTICATE:", &digest_uri);
        let expected = request_digest(&ha1, nonce, &nc, &self.cnonce, ":", &digest_uri);
        self.stage = Stage::AwaitingProof { expected };

        let mut fields = vec![
            format!("username={}", quote(&credentials.identity)),
            format!("realm={}", quote(&realm)),
            format!("nonce={}", quote(nonce)),
            format!("cnonce={}", quote(&self.cnonce)),
            format!("nc={nc}"),
            "qop=auth".to_string(),
            format!("maxbuf={}", quote(MAX_BUFFER)),
            format!("digest-uri={}", quote(&digest_uri)),
            format!("response={response}"),
        ];
        if let Some(authz) = &credentials.authorization_id {
            fields.push(format!("authzid={}", quote(authz)));
        }

        Ok(fields.join(",").into_bytes())
    }
}

impl Default for DigestMd5 {
    fn default() -> Self {
        Self::new()
    }
}

impl SaslMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initial_response(
        &mut self,
        _credentials: &SaslCredentials,
    ) -> DirectoryResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn respond(
        &mut self,
        challenge: &[u8],
        credentials: &SaslCredentials,
    ) -> DirectoryResult<Vec<u8>> {
        let text = std::str::from_utf8(challenge)
            .map_err(|_| DirectoryError::sasl_protocol("challenge is not valid UTF-8"))?;
        let params = parse_challenge(text);

        match &self.stage {
            Stage::Initial => self.answer_challenge(&params, credentials),
            Stage::AwaitingProof { expected } => {
                let proof = params
                    .get("rspauth")
                    .ok_or_else(|| DirectoryError::sasl_protocol("expected rspauth"))?;
                if proof != expected {
                    return Err(DirectoryError::sasl_protocol(
                        "server proof (rspauth) does not match",
                    ));
                }
                self.stage = Stage::Done;
                Ok(Vec::new())
            }
            Stage::Done => Err(DirectoryError::sasl_protocol(
                "unexpected challenge after authentication completed",
            )),
        }
    }
}

/// HA1 = hex(MD5(MD5(user:realm:password) ":" nonce ":" cnonce))
fn session_key(identity: &str, realm: &str, password: &str, nonce: &str, cnonce: &str) -> String {
    let inner = Md5::digest(format!("{identity}:{realm}:{password}").as_bytes());
    let mut a1 = inner.to_vec();
    a1.extend_from_slice(format!(":{nonce}:{cnonce}").as_bytes());
    hex::encode(Md5::digest(&a1))
}

fn request_digest(
    ha1: &str,
    nonce: &str,
    nc: &str,
    cnonce: &str,
    a2_prefix: &str,
    digest_uri: &str,
) -> String {
    let ha2 = hex::encode(Md5::digest(format!("{a2_prefix}{digest_uri}").as_bytes()));
    hex::encode(Md5::digest(
        format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}").as_bytes(),
    ))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split `key=value,key="quoted, value"` pairs. The first occurrence of a key wins.
fn parse_challenge(text: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        let key = key.trim().to_ascii_lowercase();
        if !key.is_empty() {
            params.entry(key).or_insert_with(|| value.trim().to_string());
        }
    }

    params
}
