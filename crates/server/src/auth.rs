//! HS256 tokens binding a push connection to one owner.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id, as a decimal string.
    pub sub: String,
    pub exp: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication token required.")]
    Missing,

    #[error("Invalid token format.")]
    Malformed,

    #[error("Invalid or expired token.")]
    Rejected,

    #[error("Token subject is not a user id.")]
    BadSubject,

    #[error("failed to sign token: {0}")]
    Sign(String),
}

pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Owner id carried by `token`.
    pub fn verify(&self, token: &str) -> Result<i64, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken => AuthError::Malformed,
                _ => AuthError::Rejected,
            }
        })?;
        data.claims.sub.parse().map_err(|_| AuthError::BadSubject)
    }

    /// Mint a token for `owner_id` valid for `ttl`.
    pub fn issue(&self, owner_id: i64, ttl: Duration) -> Result<String, AuthError> {
        let exp = chrono::Utc::now().timestamp().max(0) as u64 + ttl.as_secs();
        let claims = Claims {
            sub: owner_id.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Sign(e.to_string()))
    }
}
