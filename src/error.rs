//! Crate-wide error type.
//!
//! Error kinds: `not-found`, `corruption`, `unsupported`, `invalid-argument`,
//! `io-error`. Propagation policy (sticky background error, paranoid-checks
//! escalation) lives with the callers that observe the failure, not in this
//! type.

use std::io;
use std::sync::PoisonError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database-wide mutex was poisoned by a panicking thread. Once this happens the
    /// database can no longer make any correctness guarantees and must be reopened.
    #[error("internal lock poisoned, database must be reopened")]
    LockPoisoned,

    /// A background compaction, flush, or manifest sync previously failed and the error has
    /// been latched so subsequent writers see it too.
    #[error("background error: {0}")]
    Background(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

impl Error {
    #[must_use]
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
