//! Error types for logvault
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized for a REST layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No data was provided")]
    NoData,

    #[error("No data was uploaded")]
    EmptyUpload,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A metadata row exists but its blob file does not.
    #[error("Blob data missing for id {0}")]
    BlobNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`AppError`] for callers deciding how to report it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller. Never retried automatically.
    User,
    /// The requested owner/path or id does not exist.
    NotFound,
    /// A uniqueness constraint rejected the write.
    Conflict,
    /// Filesystem, database or mapping failure.
    Server,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NoData | AppError::EmptyUpload | AppError::Validation(_) => ErrorKind::User,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::BlobNotFound(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Config(_)
            | AppError::Internal(_) => ErrorKind::Server,
        }
    }

    /// Map a store error, turning unique-constraint violations into `Conflict`
    pub(crate) fn from_db(err: sqlx::Error, context: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(context.into())
            }
            _ => AppError::Database(err),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
