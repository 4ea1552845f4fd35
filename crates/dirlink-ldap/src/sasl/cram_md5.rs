use hmac::{Hmac, Mac};
use md5::Md5;

use dirlink_connector::error::{DirectoryError, DirectoryResult};

use super::{SaslCredentials, SaslMechanism};

type HmacMd5 = Hmac<Md5>;

/// SASL CRAM-MD5 (RFC 2195).
#[derive(Debug, Default)]
pub struct CramMd5 {
    answered: bool,
}

impl CramMd5 {
    pub const NAME: &'static str = "CRAM-MD5";

    pub fn new() -> Self {
        Self::default()
    }
}

impl SaslMechanism for CramMd5 {
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
        if self.answered {
            return Err(DirectoryError::sasl_protocol(
                "CRAM-MD5 received more than one challenge",
            ));
        }
        let password = credentials
            .password
            .as_deref()
            .ok_or_else(|| DirectoryError::sasl_protocol("CRAM-MD5 requires a password"))?;

        let mut mac = <HmacMd5 as Mac>::new_from_slice(password.as_bytes())
            .map_err(|e| DirectoryError::sasl_protocol(format!("invalid HMAC key: {e}")))?;
        mac.update(challenge);
        let digest = hex::encode(mac.finalize().into_bytes());

        self.answered = true;
        Ok(format!("{} {}", credentials.identity, digest).into_bytes())
    }
}
