//! Content-addressed item stores.
//!
//! A store is a mapping from `(kind, id)` to an opaque blob. Stores do not
//! enforce that content hashes back to the id; that is the jacket's job.
//! Missing items are `None`, never an error.

pub mod fs;
pub mod object;

pub use fs::FsStore;
pub use object::{MemoryObjectClient, ObjectClient, ObjectStore};

use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::{ItemKind, Sha256};

/// Store-level failure. "Not found" is never an error at this layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store i/o: {0}")]
    Io(#[from] io::Error),
}

/// Scratch blob created on a store's medium so installation can be atomic.
///
/// Ownership transfers into the store on `write`; the blob must not be used
/// by the caller thereafter.
#[derive(Debug)]
pub struct TempBlob {
    inner: TempInner,
}

#[derive(Debug)]
pub(crate) enum TempInner {
    File(NamedTempFile),
    Memory(Vec<u8>),
}

impl TempBlob {
    /// Scratch file inside `dir` (same file system as the store).
    pub fn file_in(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            inner: TempInner::File(NamedTempFile::new_in(dir)?),
        })
    }

    /// In-memory scratch buffer for stores without a local medium.
    pub fn memory() -> Self {
        Self {
            inner: TempInner::Memory(Vec::new()),
        }
    }

    pub(crate) fn into_inner(self) -> TempInner {
        self.inner
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>, StoreError> {
        match self.inner {
            TempInner::File(file) => {
                let mut bytes = Vec::new();
                file.reopen()?.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            TempInner::Memory(bytes) => Ok(bytes),
        }
    }
}

impl Write for TempBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            TempInner::File(file) => file.write(buf),
            TempInner::Memory(bytes) => bytes.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            TempInner::File(file) => file.flush(),
            TempInner::Memory(_) => Ok(()),
        }
    }
}

/// Content-addressed blob store keyed by `(kind, id)`.
///
/// Contract:
/// - `write(k, i, b)` makes `read(k, i)` return bytes equal to `b`, and is
///   idempotent under identical content.
/// - A failed `write` never tombstones the id.
/// - `size` doubles as the presence probe used by backup.
pub trait ItemStore {
    /// Readable handle positioned at offset 0, or `None` when absent.
    fn read(&self, kind: ItemKind, id: &Sha256) -> Result<Option<Box<dyn Read>>, StoreError>;

    /// Scratch blob on this store's medium.
    fn temp(&self) -> Result<TempBlob, StoreError>;

    /// Atomically install `blob` at `(kind, id)`, consuming it.
    fn write(&self, kind: ItemKind, id: &Sha256, blob: TempBlob) -> Result<(), StoreError>;

    /// Remove the item; reports whether it existed.
    fn delete(&self, kind: ItemKind, id: &Sha256) -> Result<bool, StoreError>;

    /// Byte size, or `None` when absent.
    fn size(&self, kind: ItemKind, id: &Sha256) -> Result<Option<u64>, StoreError>;
}

/// Read an item fully into memory, or `None` when absent.
pub fn read_bytes(
    store: &dyn ItemStore,
    kind: ItemKind,
    id: &Sha256,
) -> Result<Option<Vec<u8>>, StoreError> {
    match store.read(kind, id)? {
        Some(mut handle) => {
            let mut bytes = Vec::new();
            handle.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

/// Write `bytes` as a fresh item via a scratch blob.
pub fn write_bytes(
    store: &dyn ItemStore,
    kind: ItemKind,
    id: &Sha256,
    bytes: &[u8],
) -> Result<(), StoreError> {
    let mut blob = store.temp()?;
    blob.write_all(bytes)?;
    store.write(kind, id, blob)
}
