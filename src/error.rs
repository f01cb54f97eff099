use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConciergeError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("SQL extraction error: {0}")]
    Extraction(String),

    #[error("SQL execution error: {0}")]
    SqlExecution(String),

    #[error("Query returned no rows")]
    EmptyResult,

    #[error("Prediction service returned {status}: {message}")]
    UpstreamPrediction { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Failed to create Redis pool: {0}")]
    PoolCreation(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConciergeError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for ConciergeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::SqlExecution(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConciergeError>;
