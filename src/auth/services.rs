use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use super::{
    claims::Claims,
    password::verify_password,
    repo::UserRepo,
    repo_types::User,
    AuthError,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Checks a username/password pair against the stored credential record.
pub async fn authenticate(users: &UserRepo, username: &str, password: &str) -> Result<User, AuthError> {
    let Some(user) = users.find_by_username(username).await? else {
        warn!(%username, "login unknown username");
        return Err(AuthError::NotFound);
    };

    if !verify_password(password, &user.hashed_password).map_err(AuthError::Hash)? {
        warn!(%username, "login invalid password");
        return Err(AuthError::BadCredential);
    }
    debug!(%username, "credentials accepted");
    Ok(user)
}

/// Re-reads the account a verified token was issued for.
pub async fn resolve_subject(users: &UserRepo, claims: &Claims) -> Result<User, AuthError> {
    users
        .find_by_username(&claims.sub)
        .await?
        .ok_or(AuthError::NotFound)
}
