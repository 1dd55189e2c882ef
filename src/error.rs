use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input, rejected before any side effect.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("cryptographic operation failed: {0}")]
    CryptoFailure(String),

    #[error("{0}")]
    NotFound(String),

    /// Device slots or usage limits exhausted.
    #[error("{0}")]
    CapacityExceeded(String),

    /// The license status forbids the operation (e.g. activating a revoked license).
    #[error("{0}")]
    InvalidState(String),

    /// Lost a race on a locked store. Safe to retry.
    #[error("{0}")]
    ConcurrencyConflict(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                AppError::ConcurrencyConflict("store is busy, retry the request".into())
            }
            _ => AppError::Database(err),
        }
    }
}

impl AppError {
    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::CryptoFailure(_) => "crypto_failure",
            AppError::NotFound(_) => "not_found",
            AppError::CapacityExceeded(_) => "capacity_exceeded",
            AppError::InvalidState(_) => "invalid_state",
            AppError::ConcurrencyConflict(_) => "concurrency_conflict",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CapacityExceeded(_) | AppError::InvalidState(_) => StatusCode::FORBIDDEN,
            AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::CryptoFailure(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error,
                code: self.code(),
            }),
        )
            .into_response()
    }
}
