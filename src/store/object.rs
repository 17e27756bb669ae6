//! Object-store backend.
//!
//! Keys are `<prefix><64-hex>-<kind>` with PUT/GET/HEAD/DELETE semantics
//! supplied by an [`ObjectClient`] capability; "not found" maps to the
//! absent sentinel. A single PUT is already atomic on object stores, so no
//! link dance is needed.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

use super::{ItemStore, StoreError, TempBlob};
use crate::core::{ItemKind, Sha256};

/// Minimal object API: PUT/GET/HEAD/DELETE over string keys.
///
/// `None` means the key does not exist; all other failures surface as
/// `io::Error`.
pub trait ObjectClient {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    fn head(&self, key: &str) -> io::Result<Option<u64>>;
    fn delete(&self, key: &str) -> io::Result<bool>;
}

/// Content-addressed store over an object API.
#[derive(Debug)]
pub struct ObjectStore<C> {
    client: C,
    prefix: String,
}

impl<C: ObjectClient> ObjectStore<C> {
    pub fn new(client: C, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn key(&self, kind: ItemKind, id: &Sha256) -> String {
        format!("{}{}-{}", self.prefix, id.to_hex(), kind.as_char())
    }
}

impl<C: ObjectClient> ItemStore for ObjectStore<C> {
    fn read(&self, kind: ItemKind, id: &Sha256) -> Result<Option<Box<dyn Read>>, StoreError> {
        match self.client.get(&self.key(kind, id))? {
            Some(bytes) => Ok(Some(Box::new(Cursor::new(bytes)))),
            None => Ok(None),
        }
    }

    fn temp(&self) -> Result<TempBlob, StoreError> {
        Ok(TempBlob::memory())
    }

    fn write(&self, kind: ItemKind, id: &Sha256, blob: TempBlob) -> Result<(), StoreError> {
        let bytes = blob.into_bytes()?;
        self.client.put(&self.key(kind, id), &bytes)?;
        Ok(())
    }

    fn delete(&self, kind: ItemKind, id: &Sha256) -> Result<bool, StoreError> {
        Ok(self.client.delete(&self.key(kind, id))?)
    }

    fn size(&self, kind: ItemKind, id: &Sha256) -> Result<Option<u64>, StoreError> {
        Ok(self.client.head(&self.key(kind, id))?)
    }
}

/// In-memory object client.
///
/// Clones share the same bucket, so a "remote" can be handed to both ends
/// of a backup in tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectClient {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ObjectClient for MemoryObjectClient {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn head(&self, key: &str) -> io::Result<Option<u64>> {
        Ok(self.lock().get(key).map(|b| b.len() as u64))
    }

    fn delete(&self, key: &str) -> io::Result<bool> {
        Ok(self.lock().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sha256_bytes;
    use crate::store::{read_bytes, write_bytes};

    #[test]
    fn keys_carry_prefix_and_kind_suffix() {
        let store = ObjectStore::new(MemoryObjectClient::new(), "jackets/");
        let id = sha256_bytes(b"x");
        assert_eq!(
            store.key(ItemKind::File, &id),
            format!("jackets/{}-f", id.to_hex())
        );
    }

    #[test]
    fn put_get_head_delete_roundtrip() {
        let store = ObjectStore::new(MemoryObjectClient::new(), "");
        let id = sha256_bytes(b"blob");
        assert!(read_bytes(&store, ItemKind::Entry, &id).unwrap().is_none());

        write_bytes(&store, ItemKind::Entry, &id, b"blob").unwrap();
        assert_eq!(
            read_bytes(&store, ItemKind::Entry, &id).unwrap().unwrap(),
            b"blob"
        );
        assert_eq!(store.size(ItemKind::Entry, &id).unwrap(), Some(4));
        assert!(store.delete(ItemKind::Entry, &id).unwrap());
        assert_eq!(store.size(ItemKind::Entry, &id).unwrap(), None);
    }

    #[test]
    fn clones_share_the_bucket() {
        let client = MemoryObjectClient::new();
        let a = ObjectStore::new(client.clone(), "");
        let b = ObjectStore::new(client, "");
        let id = sha256_bytes(b"shared");
        write_bytes(&a, ItemKind::History, &id, b"shared").unwrap();
        assert_eq!(
            read_bytes(&b, ItemKind::History, &id).unwrap().unwrap(),
            b"shared"
        );
    }
}
