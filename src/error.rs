// src/error.rs
use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::validation::ValidationError;

#[derive(Debug, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("remote API error ({status:?}): {message}")]
    RemoteApi {
        status: Option<u16>,
        message: String,
    },

    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => AppError::NotFound(what),
            ProviderError::RateLimited { retry_after } => AppError::RateLimited { retry_after },
            ProviderError::Tunnel(e) => AppError::Tunnel(e.to_string()),
            ProviderError::Authentication { status, message } => AppError::RemoteApi {
                status: Some(status),
                message: format!("authentication failed: {message}"),
            },
            ProviderError::Rejected { status, message } => AppError::RemoteApi {
                status: Some(status),
                message,
            },
            ProviderError::Transient(message) => AppError::RemoteApi {
                status: None,
                message: format!("transient network failure: {message}"),
            },
            ProviderError::Decode(message) => AppError::RemoteApi {
                status: None,
                message: format!("unexpected response: {message}"),
            },
            ProviderError::Unsupported(what) => {
                AppError::Configuration(format!("backend does not support {what}"))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after_secs = None;
        let (status, msg) = match &self {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Configuration(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RemoteApi { .. } | AppError::Tunnel(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::RateLimited { retry_after } => {
                retry_after_secs = retry_after.map(|d| d.as_secs());
                (StatusCode::TOO_MANY_REQUESTS, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::AlreadyExists(_) | AppError::Conflict(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".into()),
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(error = ?self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                )
            }
        };

        let body = Json(ErrorResponseBody {
            error: msg,
            retry_after_secs,
        });
        (status, body).into_response()
    }
}
