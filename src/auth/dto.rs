use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{jwt::IssuedToken, repo_types::User};

/// Form body of `POST /token`.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Request body for signup.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub disabled: bool,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub expires_in: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            expires_in: issued.expires_in(),
            access_token: issued.token,
            token_type: "Bearer",
            expires_at: issued.expires_at,
            updated_at: issued.issued_at,
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub username: String,
    pub disabled: bool,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            username: u.username,
            disabled: u.disabled,
            full_name: u.full_name,
            email: u.email,
        }
    }
}
