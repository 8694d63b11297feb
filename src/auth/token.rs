use std::time::Duration;

use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Config;

/// The identity a verified access token stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed credential")]
    Malformed,
    #[error("credential expired")]
    Expired,
    #[error("credential signature mismatch")]
    SignatureMismatch,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) jti: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) iss: String,
}

/// Mints and verifies HS256 access tokens. Verification is a pure function of
/// the token and the configured key; nothing is looked up.
#[derive(Clone)]
pub struct Tokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Tokens {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Tokens {
        Tokens {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Tokens {
        Tokens::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user_id: i64) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.encode(&Claims {
            sub: user_id.to_string(),
            jti: Uuid::now_v7().to_string(),
            iat: now,
            exp: now + self.access_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
        })
    }

    pub(crate) fn encode(&self, claims: &Claims) -> anyhow::Result<String> {
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?)
    }

    pub fn verify(&self, credential: &str) -> Result<Principal, VerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<Claims>(credential, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer => {
                    VerifyError::SignatureMismatch
                }
                _ => VerifyError::Malformed,
            })?;

        let user_id = data.claims.sub.parse().map_err(|_| VerifyError::Malformed)?;
        Ok(Principal {
            user_id,
            issued_at: data.claims.iat,
            expires_at: data.claims.exp,
        })
    }
}
