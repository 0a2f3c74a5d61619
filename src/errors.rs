use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentryError {
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Network timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] tokio::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Response too large")]
    ResponseTooLarge,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Domain {0} not found")]
    DomainNotFound(i64),

    #[error("Unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("Malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::time::error::Elapsed> for SentryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SentryError::Timeout
    }
}

impl SentryError {
    /// Whether a storage error is worth retrying under the claim/finish
    /// retry policy. SQLite reports writer contention as "database is
    /// locked"; pool checkout timeouts also clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            SentryError::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message().to_lowercase();
                msg.contains("locked") || msg.contains("busy")
            }
            SentryError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

impl IntoResponse for SentryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            SentryError::InvalidDomain(_)
            | SentryError::UnknownJobKind(_)
            | SentryError::Payload(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            SentryError::JobNotFound(_) | SentryError::DomainNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            SentryError::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
