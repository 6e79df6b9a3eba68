use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::state::AppState;

/// Why a bearer token was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, malformed token, or a signing algorithm other than the
    /// configured one. Tokens whose header names a different algorithm family
    /// are rejected outright rather than interpreted under their own rules.
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
}

/// Signed assertion of a user identity. Not persisted anywhere; the whole
/// credential is computed from the secret plus these claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

/// Issues and verifies time-bounded bearer credentials.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user_id: Uuid) -> anyhow::Result<String>;
    fn verify(&self, token: &str) -> Result<Uuid, TokenError>;
}

/// HS256 key pair derived from one symmetric secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let jwt = &state.config.jwt;
        Self::new(&jwt.secret, Duration::hours(jwt.ttl_hours))
    }
}

impl TokenIssuer for JwtKeys {
    fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "bearer token signed");
        Ok(token)
    }

    fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            }
        })?;
        debug!(user_id = %data.claims.sub, "bearer token verified");
        Ok(data.claims.sub)
    }
}
