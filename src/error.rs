//! Error kinds surfaced by handlers and their HTTP mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{auth::jwt::TokenError, db::StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input: field length or format.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad credentials or a missing, invalid or expired access token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or owned by someone else.
    #[error("not found: {0}")]
    NotFound(String),

    /// A token presented for redemption (e.g. email verification) did not decode.
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("too many requests, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => AppError::Conflict("Resource already exists".into()),
            StoreError::Database(e) => AppError::Internal(e.into()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid => AppError::InvalidToken,
            TokenError::Sign(e) => AppError::Internal(e.into()),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidToken => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::Conflict(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m) => m.clone(),
            Self::InvalidToken => "Invalid or expired token".into(),
            Self::TooManyRequests { retry_after_secs } => {
                format!("Too many requests. Please wait {retry_after_secs} seconds.")
            }
            // Don't expose internal error details to clients
            Self::Internal(_) => "Internal server error".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            tracing::error!(error = ?e, "request failed");
        }

        let status = self.status();
        let mut res = (status, Json(json!({ "detail": self.detail() }))).into_response();

        match &self {
            Self::Unauthorized(_) => {
                res.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Self::TooManyRequests { retry_after_secs } => {
                res.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }
        res
    }
}
