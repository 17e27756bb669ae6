//! Core domain types for the filing engine.
//!
//! Module hierarchy follows type dependency order:
//! - error: validation/codec/lifecycle errors
//! - limits: normative field limits
//! - identity: hashing, jacket identity, item id derivation
//! - time: fixed-format UTC timestamps
//! - entry: versioned records
//! - history: the hash-linked change log

pub mod entry;
pub mod error;
pub mod history;
pub mod identity;
pub mod limits;
pub mod time;

mod codec;

pub use entry::{Attachment, Entry, EntryChanges, FileChange, TAG_ALL};
pub use error::{CoreError, DecodeError, LimitViolation, RecordStateError};
pub use history::{History, HistoryAttach, HistoryChanges, HistoryEntry, NewFile, TagDelta};
pub use identity::{
    ItemKind, JacketId, Sha256, attach_id, entry_id, history_id, sha256_bytes,
};
pub use limits::Limits;
pub use time::{Clock, FixedClock, SystemClock, TimeError, TimeStr};
