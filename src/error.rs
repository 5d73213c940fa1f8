use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::modules::auth::schema::ErrorResponse;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid or expired session")]
    InvalidChallenge,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid verification code")]
    InvalidTwoFactorCode {
        failed_attempts: u32,
        additional_unlocked: bool,
    },

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Too many failed attempts, please sign in again")]
    TooManyAttempts,

    #[error("2FA not enabled")]
    TwoFactorNotEnabled,

    #[error("2FA already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Account temporarily locked")]
    AccountLocked,

    #[error("Rate limited")]
    RateLimited,

    #[error("Cannot untrust the last trusted device")]
    LastTrustedDevice,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::EmailAlreadyExists => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::InvalidChallenge => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::FORBIDDEN,
            Self::InvalidTwoFactorCode { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidCode => StatusCode::BAD_REQUEST,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::TwoFactorNotEnabled => StatusCode::BAD_REQUEST,
            Self::TwoFactorAlreadyEnabled => StatusCode::BAD_REQUEST,
            Self::AccountLocked => StatusCode::LOCKED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::LastTrustedDevice => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(e: redis::RedisError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(e: argon2::password_hash::Error) -> Self {
        Self::Internal(format!("password hashing: {}", e))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("token signing: {}", e))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {}", e))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            Self::InvalidTwoFactorCode {
                failed_attempts,
                additional_unlocked,
            } => {
                let body = json!({
                    "error": "Invalid verification code",
                    "failed_attempts": failed_attempts,
                    "additional_unlocked": additional_unlocked,
                });
                (status, Json(body)).into_response()
            }
            Self::Database(_) | Self::Cache(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                (status, Json(ErrorResponse::new("Internal server error"))).into_response()
            }
            Self::Upstream(ref detail) => {
                tracing::warn!(error = %detail, "upstream provider failed");
                (status, Json(ErrorResponse::new("Provider unavailable"))).into_response()
            }
            other => (status, Json(ErrorResponse::new(other.to_string()))).into_response(),
        }
    }
}
