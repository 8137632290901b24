use crate::crypto::KeyError;
use crate::db::StoreError;
use crate::settings::{GateError, MigrationError, Refusal};
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Encryption key error: {0}")]
    Key(#[from] KeyError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("{0}")]
    Refused(Refusal),

    #[error("Setting not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Storage(e) => Self::Store(e),
            GateError::Fault(msg) => Self::Internal(msg),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convert AppError to HTTP status codes for web responses
impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Migration(MigrationError::CipherUnavailable | MigrationError::EphemeralKey) => {
                StatusCode::FORBIDDEN
            }
            Self::Migration(MigrationError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Refused(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client is told. Details stay in the server logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Refused(refusal) => refusal.user_message().to_string(),
            Self::Store(_) | Self::Migration(MigrationError::Store(_)) => {
                "storage unavailable, try again".to_string()
            }
            Self::Migration(MigrationError::CipherUnavailable | MigrationError::EphemeralKey) => {
                "operation refused".to_string()
            }
            Self::NotFound(_) | Self::BadRequest(_) => self.to_string(),
            Self::Config(_) | Self::Key(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let mut body = serde_json::json!({
            "error": self.public_message(),
            "code": status.as_u16()
        });
        if let Self::Refused(refusal) = &self {
            body["reason"] = serde_json::json!(refusal.reason);
        }
        (status, axum::Json(body)).into_response()
    }
}
