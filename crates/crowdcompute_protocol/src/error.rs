//! Protocol error taxonomy.
//!
//! Mirrors the `kind` values surfaced in `error`/`job_error` envelopes and
//! `WorkerFailure` records (see [`crate::FailureCause`] for the subset that
//! is persisted).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    BadMessage(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("frame exceeds maximum size: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
}
