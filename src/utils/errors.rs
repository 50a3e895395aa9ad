// src/utils/errors.rs

use std::{error::Error, fmt};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::utils::types::ApiResponse;

/// Errors coming from external provider calls (price APIs, email API, Redis).
#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Redis(redis::RedisError),
    Status { provider: &'static str, code: u16, body: String },
    Other(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(e)   => write!(f, "HTTP error: {}", e),
            ApiError::Json(e)   => write!(f, "JSON error: {}", e),
            ApiError::Redis(e)  => write!(f, "Redis error: {}", e),
            ApiError::Status { provider, code, body } => {
                write!(f, "{} returned {}: {}", provider, code, body)
            }
            ApiError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Http(e)  => Some(e),
            ApiError::Json(e)  => Some(e),
            ApiError::Redis(e) => Some(e),
            ApiError::Status { .. } | ApiError::Other(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self { ApiError::Http(err) }
}
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self { ApiError::Json(err) }
}
impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self { ApiError::Redis(err) }
}

/// Application-level failures, classified so handlers can map them onto
/// status codes: caller mistakes, integrity violations and infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient balance")]
    InsufficientFunds,
    #[error("Insufficient margin")]
    InsufficientMargin,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Upstream error: {0}")]
    Upstream(#[from] ApiError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InsufficientFunds
            | AppError::InsufficientMargin => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_)    => StatusCode::FORBIDDEN,
            AppError::NotFound(_)     => StatusCode::NOT_FOUND,
            AppError::Conflict(_)     => StatusCode::CONFLICT,
            AppError::Database(_)     => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(_)     => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("request failed: {self}");
        }
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::err(self.to_string()))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(AppError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InsufficientFunds.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("deposit").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("done").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Upstream(ApiError::Other("boom".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(AppError::InsufficientFunds.to_string(), "Insufficient balance");
        assert_eq!(AppError::InsufficientMargin.to_string(), "Insufficient margin");
        assert_eq!(AppError::NotFound("trade").to_string(), "trade not found");
    }
}
