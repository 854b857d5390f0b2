use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad or missing input; surfaced verbatim to the caller.
    #[error("{0}")]
    Validation(String),
    /// Referenced entity is absent or inactive.
    #[error("{0}")]
    NotFound(String),
    /// Persistence unavailable or a constraint was violated.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Message safe to hand back to an API caller. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::NotFound(message) => message.clone(),
            Self::Storage(_) => "internal storage failure".to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("record not found".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}
