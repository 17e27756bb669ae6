//! Local file-system store backend.
//!
//! Blobs live under the store root at `<xx>/<rest>-<k>`, where `xx` is the
//! first two hex chars of the id, `rest` the remaining 62, and `k` the kind
//! char. Installation hard-links a same-root temp file into place, so a blob
//! is either fully visible or absent; shard directories are created lazily.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::{ItemStore, StoreError, TempBlob, TempInner};
use crate::core::{ItemKind, Sha256};

#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, kind: ItemKind, id: &Sha256) -> PathBuf {
        let hex = id.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{}-{}", &hex[2..], kind.as_char()))
    }

    fn install(&self, temp_path: &Path, dest: &Path) -> Result<(), StoreError> {
        if let Some(shard) = dest.parent() {
            fs::create_dir_all(shard)?;
        }
        match fs::hard_link(temp_path, dest) {
            Ok(()) => Ok(()),
            // Content-addressed: an existing blob with this id is this blob.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ItemStore for FsStore {
    fn read(&self, kind: ItemKind, id: &Sha256) -> Result<Option<Box<dyn Read>>, StoreError> {
        match File::open(self.blob_path(kind, id)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn temp(&self) -> Result<TempBlob, StoreError> {
        TempBlob::file_in(&self.root)
    }

    fn write(&self, kind: ItemKind, id: &Sha256, blob: TempBlob) -> Result<(), StoreError> {
        let dest = self.blob_path(kind, id);
        match blob.into_inner() {
            TempInner::File(mut file) => {
                file.flush()?;
                self.install(file.path(), &dest)
                // Temp file unlinks on drop.
            }
            TempInner::Memory(bytes) => {
                let mut file = tempfile::NamedTempFile::new_in(&self.root)?;
                file.write_all(&bytes)?;
                file.flush()?;
                self.install(file.path(), &dest)
            }
        }
    }

    fn delete(&self, kind: ItemKind, id: &Sha256) -> Result<bool, StoreError> {
        match fs::remove_file(self.blob_path(kind, id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn size(&self, kind: ItemKind, id: &Sha256) -> Result<Option<u64>, StoreError> {
        match fs::metadata(self.blob_path(kind, id)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
