//! Errors as seen by HTTP clients.

use axum::{
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::{AuthError, TokenError};
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Inactive user")]
    InactiveUser,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Request that an extractor could not parse.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub status_code: u16,
}

impl AppError {
    pub fn unauthorized() -> Self {
        AppError::Unauthorized("Could not validate credentials".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InactiveUser => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Rejected { status, .. } => *status,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                error!(error = %e, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorBody {
                message,
                status_code: status.as_u16(),
            }),
        )
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { index } => {
                AppError::Conflict(format!("An entry with the same key already exists ({index})"))
            }
            StoreError::InvariantViolation { .. } => {
                error!(error = %e, "store invariant violated");
                AppError::Internal(e.into())
            }
            other => AppError::Internal(other.into()),
        }
    }
}

macro_rules! from_rejection {
    ($($rejection:ty),+ $(,)?) => {
        $(
            impl From<$rejection> for AppError {
                fn from(r: $rejection) -> Self {
                    AppError::Rejected {
                        status: r.status(),
                        message: r.body_text(),
                    }
                }
            }
        )+
    };
}

from_rejection!(JsonRejection, FormRejection, QueryRejection, PathRejection);

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Malformed(_) => AppError::unauthorized(),
            TokenError::Signing(err) => AppError::Internal(err.into()),
            e @ TokenError::TtlOutOfRange(_) => AppError::Internal(e.into()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotFound | AuthError::BadCredential => {
                AppError::Unauthorized("Incorrect username or password".into())
            }
            AuthError::Token(t) => t.into(),
            AuthError::Store(s) => s.into(),
            AuthError::Hash(h) => AppError::Internal(h),
        }
    }
}
