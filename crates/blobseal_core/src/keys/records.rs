//! Wrapped DEK records and their persistence.

use crate::content::ContentReference;
use crate::error::{ContentError, ContentResult};
use crate::keys::WrappingKeyId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A data-encryption key wrapped under one wrapping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    key_id: WrappingKeyId,
    ciphertext: Vec<u8>,
}

impl WrappedDek {
    /// Creates a record.
    #[must_use]
    pub fn new(key_id: WrappingKeyId, ciphertext: Vec<u8>) -> Self {
        Self { key_id, ciphertext }
    }

    /// The wrapping key the DEK is wrapped under.
    #[must_use]
    pub fn key_id(&self) -> &WrappingKeyId {
        &self.key_id
    }

    /// The wrapped DEK bytes.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

/// Durable mapping from content references to wrapped DEK records.
///
/// Records for one reference are kept in insertion order, oldest first.
/// History is preserved across key rotation until explicitly pruned.
pub trait WrappedKeyStore: Send + Sync {
    /// Appends a record for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn put(&self, reference: &ContentReference, record: WrappedDek) -> ContentResult<()>;

    /// Replaces all records for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be persisted.
    fn replace(&self, reference: &ContentReference, records: Vec<WrappedDek>)
        -> ContentResult<()>;

    /// Returns all records for `reference`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be loaded.
    fn get(&self, reference: &ContentReference) -> ContentResult<Vec<WrappedDek>>;

    /// Removes every record for `reference`. Returns `true` if any existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be removed.
    fn remove(&self, reference: &ContentReference) -> ContentResult<bool>;

    /// Removes the records wrapped under `key_id`. Returns `true` if any
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be loaded or persisted.
    fn prune(&self, reference: &ContentReference, key_id: &WrappingKeyId) -> ContentResult<bool> {
        let records = self.get(reference)?;
        let before = records.len();
        let kept: Vec<WrappedDek> = records
            .into_iter()
            .filter(|record| record.key_id() != key_id)
            .collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.replace(reference, kept)?;
        Ok(true)
    }
}

/// In-memory record store for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryWrappedKeyStore {
    records: RwLock<HashMap<ContentReference, Vec<WrappedDek>>>,
}

impl MemoryWrappedKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of references with at least one record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl WrappedKeyStore for MemoryWrappedKeyStore {
    fn put(&self, reference: &ContentReference, record: WrappedDek) -> ContentResult<()> {
        self.records
            .write()
            .entry(reference.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn replace(
        &self,
        reference: &ContentReference,
        records: Vec<WrappedDek>,
    ) -> ContentResult<()> {
        let mut map = self.records.write();
        if records.is_empty() {
            map.remove(reference);
        } else {
            map.insert(reference.clone(), records);
        }
        Ok(())
    }

    fn get(&self, reference: &ContentReference) -> ContentResult<Vec<WrappedDek>> {
        Ok(self.records.read().get(reference).cloned().unwrap_or_default())
    }

    fn remove(&self, reference: &ContentReference) -> ContentResult<bool> {
        Ok(self.records.write().remove(reference).is_some())
    }
}

const RECORD_FORMAT_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "cbor";

#[derive(Serialize, Deserialize)]
struct RecordDocument {
    version: u32,
    reference: ContentReference,
    records: Vec<WrappedDek>,
}

/// File-backed record store: one CBOR document per reference.
///
/// Documents are named after the SHA-256 of the reference and replaced
/// atomically through a temp file in the same directory.
#[derive(Debug)]
pub struct FileWrappedKeyStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWrappedKeyStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> ContentResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// The directory holding record documents.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, reference: &ContentReference) -> PathBuf {
        let digest = Sha256::digest(reference.as_str().as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 1 + RECORD_EXTENSION.len());
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push('.');
        name.push_str(RECORD_EXTENSION);
        self.root.join(name)
    }

    fn load(&self, reference: &ContentReference) -> ContentResult<Vec<WrappedDek>> {
        let file = match File::open(self.document_path(reference)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let document: RecordDocument = ciborium::from_reader(BufReader::new(file))
            .map_err(|e| ContentError::codec(format!("invalid record document: {e}")))?;
        if document.version != RECORD_FORMAT_VERSION {
            return Err(ContentError::codec(format!(
                "unsupported record document version {}",
                document.version
            )));
        }
        if &document.reference != reference {
            return Err(ContentError::codec(format!(
                "record document for {} found under {reference}",
                document.reference
            )));
        }
        Ok(document.records)
    }

    fn save(&self, reference: &ContentReference, records: Vec<WrappedDek>) -> ContentResult<()> {
        let path = self.document_path(reference);
        if records.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let document = RecordDocument {
            version: RECORD_FORMAT_VERSION,
            reference: reference.clone(),
            records,
        };
        let temp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            ciborium::into_writer(&document, &mut writer)
                .map_err(|e| ContentError::codec(format!("failed to encode records: {e}")))?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| ContentError::Io(e.error))?;
        Ok(())
    }
}

impl WrappedKeyStore for FileWrappedKeyStore {
    fn put(&self, reference: &ContentReference, record: WrappedDek) -> ContentResult<()> {
        let _guard = self.write_lock.lock();
        let mut records = self.load(reference)?;
        records.push(record);
        self.save(reference, records)
    }

    fn replace(
        &self,
        reference: &ContentReference,
        records: Vec<WrappedDek>,
    ) -> ContentResult<()> {
        let _guard = self.write_lock.lock();
        self.save(reference, records)
    }

    fn get(&self, reference: &ContentReference) -> ContentResult<Vec<WrappedDek>> {
        self.load(reference)
    }

    fn remove(&self, reference: &ContentReference) -> ContentResult<bool> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.document_path(reference)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn prune(&self, reference: &ContentReference, key_id: &WrappingKeyId) -> ContentResult<bool> {
        let _guard = self.write_lock.lock();
        let records = self.load(reference)?;
        let before = records.len();
        let kept: Vec<WrappedDek> = records
            .into_iter()
            .filter(|record| record.key_id() != key_id)
            .collect();
        if kept.len() == before {
            return Ok(false);
        }
        self.save(reference, kept)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(key: &str, byte: u8) -> WrappedDek {
        WrappedDek::new(WrappingKeyId::new(key).unwrap(), vec![byte; 4])
    }

    fn exercise(store: &dyn WrappedKeyStore) {
        let reference = ContentReference::new("blob-1");
        assert!(store.get(&reference).unwrap().is_empty());

        store.put(&reference, record("k1", 1)).unwrap();
        store.put(&reference, record("k2", 2)).unwrap();
        assert_eq!(
            store.get(&reference).unwrap(),
            vec![record("k1", 1), record("k2", 2)]
        );

        assert!(store
            .prune(&reference, &WrappingKeyId::new("k1").unwrap())
            .unwrap());
        assert!(!store
            .prune(&reference, &WrappingKeyId::new("k1").unwrap())
            .unwrap());
        assert_eq!(store.get(&reference).unwrap(), vec![record("k2", 2)]);

        store
            .replace(&reference, vec![record("k3", 3)])
            .unwrap();
        assert_eq!(store.get(&reference).unwrap(), vec![record("k3", 3)]);

        assert!(store.remove(&reference).unwrap());
        assert!(!store.remove(&reference).unwrap());
        assert!(store.get(&reference).unwrap().is_empty());
    }

    #[test]
    fn memory_store_semantics() {
        exercise(&MemoryWrappedKeyStore::new());
    }

    #[test]
    fn file_store_semantics() {
        let dir = tempdir().unwrap();
        exercise(&FileWrappedKeyStore::open(dir.path()).unwrap());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let reference = ContentReference::new("persisted");
        {
            let store = FileWrappedKeyStore::open(dir.path()).unwrap();
            store.put(&reference, record("k1", 7)).unwrap();
        }
        let store = FileWrappedKeyStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&reference).unwrap(), vec![record("k1", 7)]);
    }

    #[test]
    fn file_store_rejects_corrupt_document() {
        let dir = tempdir().unwrap();
        let store = FileWrappedKeyStore::open(dir.path()).unwrap();
        let reference = ContentReference::new("corrupt");
        store.put(&reference, record("k1", 1)).unwrap();

        fs::write(store.document_path(&reference), b"not cbor").unwrap();
        assert!(matches!(
            store.get(&reference),
            Err(ContentError::Codec { .. })
        ));
    }

    #[test]
    fn replace_with_nothing_removes() {
        let store = MemoryWrappedKeyStore::new();
        let reference = ContentReference::new("r");
        store.put(&reference, record("k1", 1)).unwrap();
        store.replace(&reference, Vec::new()).unwrap();
        assert!(store.is_empty());
    }
}
