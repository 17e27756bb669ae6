//! Core capability errors (validation, canonical codec, record lifecycle).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details.

use thiserror::Error;

/// Input failed a normative field limit.
#[derive(Debug, Error, Clone)]
#[error("{field} is invalid: {reason}")]
pub struct LimitViolation {
    pub field: &'static str,
    pub reason: String,
}

impl LimitViolation {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Canonical bytes violated the record grammar.
///
/// Decoding is strict: field order, number formatting, and sort order are all
/// part of the format. A decoder that returns `Ok` guarantees
/// `encode(decode(bytes)) == bytes`.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("line {line}: expected `{field}` field")]
    ExpectedField { line: usize, field: &'static str },
    #[error("line {line}: malformed decimal number")]
    BadNumber { line: usize },
    #[error("line {line}: malformed sha-256 hex")]
    BadHash { line: usize },
    #[error("line {line}: {field} violates limits: {reason}")]
    FieldInvalid {
        line: usize,
        field: &'static str,
        reason: String,
    },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("record truncated")]
    Truncated,
    #[error("record is not valid utf-8")]
    NotUtf8,
}

/// Record API misuse (draft/finalized lifecycle violations).
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum RecordStateError {
    #[error("record is a draft; it has no canonical form until finalized")]
    Draft,
    #[error("{field} is already set")]
    AlreadySet { field: &'static str },
    #[error("{field} is not set")]
    NotSet { field: &'static str },
    #[error("entry has no attachment {attach}")]
    UnknownAttachment { attach: u64 },
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Limit(#[from] LimitViolation),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    State(#[from] RecordStateError),
}
