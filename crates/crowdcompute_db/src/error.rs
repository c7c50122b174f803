//! Persistence error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
