use dirlink_connector::error::DirectoryResult;

use super::{SaslCredentials, SaslMechanism};

/// SASL EXTERNAL (RFC 4422 appendix A): identity comes from the transport,
/// e.g. a TLS client certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct External;

impl External {
    pub const NAME: &'static str = "EXTERNAL";
}

impl SaslMechanism for External {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn needs_credential(&self) -> bool {
        false
    }

    fn initial_response(
        &mut self,
        credentials: &SaslCredentials,
    ) -> DirectoryResult<Option<Vec<u8>>> {
        Ok(credentials
            .authorization_id
            .as_ref()
            .map(|authz| authz.as_bytes().to_vec()))
    }

    fn respond(
        &mut self,
        _challenge: &[u8],
        _credentials: &SaslCredentials,
    ) -> DirectoryResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_response_is_authorization_id() {
        let mut external = External;
        assert_eq!(
            external.initial_response(&SaslCredentials::default()).unwrap(),
            None
        );

        let credentials = SaslCredentials {
            authorization_id: Some("dn:cn=proxy".to_string()),
            ..SaslCredentials::default()
        };
        assert_eq!(
            external.initial_response(&credentials).unwrap(),
            Some(b"dn:cn=proxy".to_vec())
        );
    }
}
