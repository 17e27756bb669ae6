//! sgfa: a content-addressed, append-only filing engine.
//!
//! Versioned records ("entries") with arbitrary file attachments are grouped
//! into containers ("jackets"); every change is sealed into a
//! cryptographically linked change log (the "history chain"). A mutable
//! state index makes current-revision lookups and tag queries cheap, and a
//! push/pull protocol mirrors a jacket between content-addressed stores.
//!
//! Start with [`Jacket::create`] / [`Jacket::open`].

#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod jacket;
pub mod lock;
pub mod state;
pub mod store;

pub use error::{Error, ErrorKind};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working surface at the crate root for convenience.
pub use crate::config::JacketConfig;
pub use crate::core::{
    Attachment, Clock, Entry, EntryChanges, FixedClock, History, ItemKind, JacketId, Limits,
    Sha256, SystemClock, TAG_ALL, TagDelta, TimeStr, sha256_bytes,
};
pub use crate::jacket::{
    BackupOptions, CheckOptions, Jacket, JacketOptions, ReportSink, TagPage, TracingSink,
    WriteOutcome,
};
pub use crate::lock::{JacketLock, LockMode};
pub use crate::state::StateIndex;
pub use crate::store::{FsStore, ItemStore, MemoryObjectClient, ObjectClient, ObjectStore};
