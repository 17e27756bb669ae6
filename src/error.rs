//! Crate-level error wrapper and the stable error taxonomy.
//!
//! Not a "god error": it is a thin wrapper over the capability errors, plus
//! the jacket-protocol errors (conflict, non-existence, corruption) that no
//! single capability owns.

use thiserror::Error;

use crate::core::{CoreError, LimitViolation};
use crate::lock::LockError;
use crate::state::StateError;
use crate::store::StoreError;

/// Stable classification, uniform across store backends.
///
/// `Permission` is reserved for the binder layer above this crate; the core
/// never raises it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Input failed validation.
    Limits,
    /// Logically missing.
    NonExistent,
    /// Decoded bytes violated invariants, or the state index references a
    /// blob that must exist.
    Corrupt,
    /// Optimistic-concurrency revision mismatch.
    Conflict,
    /// API misuse.
    Sanity,
    /// Raised by the binder layer only.
    Permission,
}

/// Crate-level convenience error.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("entry {entry}: expected revision {expected}, got {found}")]
    Conflict {
        entry: u64,
        expected: u64,
        found: u64,
    },

    #[error("{what} does not exist")]
    NonExistent { what: String },

    #[error("{what} is corrupt: {reason}")]
    Corrupt { what: String, reason: String },

    #[error("{0}")]
    Sanity(String),

    #[error("permission denied: {0}")]
    Permission(String),
}

impl Error {
    /// Stable kind, or `None` for native backend I/O failures, which pass
    /// through unclassified.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Core(CoreError::Limit(_)) => Some(ErrorKind::Limits),
            Error::Core(CoreError::Decode(_)) => Some(ErrorKind::Corrupt),
            Error::Core(CoreError::State(_)) => Some(ErrorKind::Sanity),
            Error::Core(_) => None,
            Error::Store(_) => None,
            Error::State(StateError::Corrupt { .. }) => Some(ErrorKind::Corrupt),
            Error::State(StateError::TooLarge { .. }) => Some(ErrorKind::Limits),
            Error::State(_) => None,
            Error::Lock(_) => None,
            Error::Conflict { .. } => Some(ErrorKind::Conflict),
            Error::NonExistent { .. } => Some(ErrorKind::NonExistent),
            Error::Corrupt { .. } => Some(ErrorKind::Corrupt),
            Error::Sanity(_) => Some(ErrorKind::Sanity),
            Error::Permission(_) => Some(ErrorKind::Permission),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == Some(ErrorKind::Conflict)
    }

    pub fn is_non_existent(&self) -> bool {
        self.kind() == Some(ErrorKind::NonExistent)
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind() == Some(ErrorKind::Corrupt)
    }

    pub(crate) fn non_existent(what: impl Into<String>) -> Self {
        Error::NonExistent { what: what.into() }
    }

    pub(crate) fn corrupt(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn sanity(message: impl Into<String>) -> Self {
        Error::Sanity(message.into())
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        Error::Store(err.into())
    }
}

impl From<LimitViolation> for Error {
    fn from(err: LimitViolation) -> Self {
        Error::Core(CoreError::Limit(err))
    }
}
