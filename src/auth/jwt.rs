use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::claims::Claims;
use crate::state::AppState;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("token lifetime {0} is out of range")]
    TtlOutOfRange(TimeDuration),

    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// A freshly signed token with its expiry metadata.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl IssuedToken {
    /// Seconds between issuance and expiry.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - self.issued_at).whole_seconds()
    }
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub ttl: TimeDuration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let jwt = &state.config.jwt;
        Self::new(&jwt.secret, TimeDuration::minutes(jwt.ttl_minutes))
    }
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: TimeDuration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_with_ttl(subject, self.ttl)
    }

    pub fn issue_with_ttl(&self, subject: &str, ttl: TimeDuration) -> Result<IssuedToken, TokenError> {
        let now = OffsetDateTime::now_utc();
        // claims carry whole seconds; keep the metadata in step with them
        let issued_at = now - TimeDuration::nanoseconds(i64::from(now.nanosecond()));
        let expires_at = issued_at
            .checked_add(ttl)
            .ok_or(TokenError::TtlOutOfRange(ttl))?;

        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        debug!(sub = %subject, exp = claims.exp, "jwt signed");
        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Checks signature and expiry. Runs on every protected request.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        // expiry is compared below as `exp <= now`, without leeway
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        if data.claims.exp <= now.unix_timestamp() {
            return Err(TokenError::Expired);
        }
        debug!(sub = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}
