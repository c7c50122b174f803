//! Top-level error type for the foreman binary and its internals.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForemanError>;

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("persistence error: {0}")]
    Db(#[from] crowdcompute_db::DbError),

    #[error("protocol error: {0}")]
    Protocol(#[from] crowdcompute_protocol::ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job not found: {0}")]
    UnknownJob(String),

    #[error("task not found: {0}")]
    UnknownTask(String),

    #[error("invariant violation: {0}")]
    Internal(String),
}
