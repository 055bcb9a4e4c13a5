use crate::state::AppState;
use axum::Router;
use thiserror::Error;

use crate::store::StoreError;

mod claims;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use jwt::TokenError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found")]
    NotFound,

    #[error("password does not match")]
    BadCredential,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hashing failed: {0}")]
    Hash(anyhow::Error),
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
