// Central Error Type for the engine (spec.md 7)

use thiserror::Error;

/// Application-level error type. Mirrors the error taxonomy in spec.md
/// 7 one-to-one; `LimiterExceeded` has no variant here because it is an
/// internal reply, not a user-facing error (it drives worker back-off).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("backing-store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("lock mismatch: worker no longer owns this job")]
    LockMismatch,

    #[error("job stalled more than allowable limit")]
    Stalled,

    #[error("client closed")]
    ClientClosed,

    #[error("user processor error: {0}")]
    UserProcessor(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
