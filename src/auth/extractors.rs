use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{
    claims::Claims,
    jwt::{JwtKeys, TokenError},
    repo_types::User,
    services::resolve_subject,
    AuthError,
};
use crate::{error::AppError, state::AppState};

/// Claims of a verified bearer token.
pub struct AuthClaims(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;

        let token = match header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => {
                warn!("authorization header without bearer scheme");
                return Err(AppError::Unauthorized("Invalid authentication scheme".into()));
            }
        };

        let keys = JwtKeys::from_ref(state);
        match keys.verify(token) {
            Ok(claims) => Ok(AuthClaims(claims)),
            Err(e) => {
                match &e {
                    TokenError::Expired => warn!("expired token"),
                    TokenError::Malformed(reason) => warn!(%reason, "invalid token"),
                    TokenError::Signing(_) | TokenError::TtlOutOfRange(_) => {}
                }
                Err(e.into())
            }
        }
    }
}

/// The active account behind a verified bearer token.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthClaims(claims) = AuthClaims::from_request_parts(parts, state).await?;

        let user = match resolve_subject(&state.users, &claims).await {
            Ok(user) => user,
            Err(AuthError::NotFound) => {
                warn!(sub = %claims.sub, "token subject no longer exists");
                return Err(AppError::unauthorized());
            }
            Err(e) => return Err(e.into()),
        };

        if user.disabled {
            warn!(username = %user.username, "inactive user");
            return Err(AppError::InactiveUser);
        }
        Ok(CurrentUser(user))
    }
}
