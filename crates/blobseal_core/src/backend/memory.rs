//! In-memory content store for testing.

use crate::content::{ByteRange, ContentAccessor, ContentReader, ContentReference, ContentStore};
use crate::error::{ContentError, ContentResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;

/// An in-memory content store.
///
/// Every blob is kept as an immutable byte slice. Readers share the slice,
/// so deleting a blob never disturbs a read in progress.
///
/// Suitable for:
/// - Unit tests
/// - Checking the store contract cheaply
///
/// # Example
///
/// ```rust
/// use blobseal_core::{ContentStore, MemoryContentStore};
///
/// let store = MemoryContentStore::new();
/// let reference = store.store_bytes(b"test data").unwrap();
/// let bytes = store.read(&reference).unwrap().read_all().unwrap();
/// assert_eq!(bytes, b"test data");
/// ```
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentReference, Arc<[u8]>>>,
}

impl MemoryContentStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Returns true if `reference` is stored.
    #[must_use]
    pub fn contains(&self, reference: &ContentReference) -> bool {
        self.blobs.read().contains_key(reference)
    }

    /// Returns a copy of the stored bytes.
    ///
    /// Useful for inspecting ciphertext in tests.
    #[must_use]
    pub fn raw(&self, reference: &ContentReference) -> Option<Vec<u8>> {
        self.blobs.read().get(reference).map(|bytes| bytes.to_vec())
    }

    /// Overwrites the bytes of an existing blob.
    ///
    /// Useful for simulating corruption. Returns `false` if the reference is
    /// unknown.
    pub fn replace_raw(&self, reference: &ContentReference, bytes: Vec<u8>) -> bool {
        match self.blobs.write().get_mut(reference) {
            Some(slot) => {
                *slot = bytes.into();
                true
            }
            None => false,
        }
    }

    /// Removes every blob.
    pub fn clear(&self) {
        self.blobs.write().clear();
    }

    fn get(&self, reference: &ContentReference) -> ContentResult<Arc<[u8]>> {
        self.blobs
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| ContentError::not_found(reference))
    }
}

impl ContentStore for MemoryContentStore {
    fn store(&self, content: &mut (dyn Read + Send)) -> ContentResult<ContentReference> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;

        let reference = ContentReference::generate();
        debug!(%reference, size = bytes.len(), "stored blob in memory");
        self.blobs.write().insert(reference.clone(), bytes.into());
        Ok(reference)
    }

    fn read(&self, reference: &ContentReference) -> ContentResult<ContentReader> {
        let bytes = self.get(reference)?;
        let size = bytes.len() as u64;
        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), size, "memory"),
            Box::new(Cursor::new(bytes)),
        ))
    }

    fn read_range(
        &self,
        reference: &ContentReference,
        range: ByteRange,
    ) -> ContentResult<ContentReader> {
        let bytes = self.get(reference)?;
        let resolved = range.resolve(bytes.len() as u64)?;

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(resolved.start);
        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), resolved.size(), format!("memory {resolved}")),
            Box::new(cursor.take(resolved.size())),
        ))
    }

    fn delete(&self, reference: &ContentReference) -> ContentResult<bool> {
        Ok(self.blobs.write().remove(reference).is_some())
    }
}
