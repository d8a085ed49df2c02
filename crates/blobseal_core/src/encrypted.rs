//! Envelope-encrypted content store.
//!
//! This module provides a content store that wraps any other store with
//! per-object encryption.
//!
//! ## Security Model
//!
//! - Every object gets a fresh random DEK
//! - The DEK is wrapped under the active wrapping key and the wrapped record
//!   is persisted next to the content reference
//! - The inner store only ever sees ciphertext
//! - Plaintext DEKs live for one operation and are destroyed afterwards
//!
//! ## Range Reads
//!
//! A plaintext range is widened to whole chunks of the engine's
//! [`ChunkLayout`](crate::ChunkLayout), only that ciphertext is fetched and
//! decrypted, and the result is trimmed back to the requested bytes.

use crate::content::{
    ByteRange, ContentAccessor, ContentReader, ContentReference, ContentStore, RangeWindow,
};
use crate::crypto::{BoxedReader, ContentEncryptionEngine, StreamSpan};
use crate::error::{ContentError, ContentResult};
use crate::keys::DataEncryptionKeyAccessor;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// A content store that encrypts everything it writes to an inner store.
///
/// # Example
///
/// ```rust
/// use blobseal_core::{
///     ChunkedAesGcmEngine, ContentStore, DataEncryptionKeyAccessor,
///     EncryptedContentStore, MemoryContentStore, MemoryWrappedKeyStore,
///     WrappingKey, WrappingKeyId, WrappingKeyRing,
/// };
/// use std::sync::Arc;
///
/// let ring = WrappingKeyRing::with_active(WrappingKey::generate(
///     WrappingKeyId::new("kek-1").unwrap(),
/// ));
/// let keys = DataEncryptionKeyAccessor::new(
///     Arc::new(ring),
///     Arc::new(MemoryWrappedKeyStore::new()),
/// );
/// let store = EncryptedContentStore::new(
///     MemoryContentStore::new(),
///     Arc::new(ChunkedAesGcmEngine::default()),
///     keys,
/// )
/// .unwrap();
///
/// let reference = store.store_bytes(b"secret data").unwrap();
/// assert_ne!(store.inner().raw(&reference).unwrap(), b"secret data");
/// assert_eq!(store.read(&reference).unwrap().read_all().unwrap(), b"secret data");
/// ```
pub struct EncryptedContentStore<S> {
    inner: S,
    engine: Arc<dyn ContentEncryptionEngine>,
    keys: DataEncryptionKeyAccessor,
}

impl<S: ContentStore> EncryptedContentStore<S> {
    /// Creates an encrypted store over `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Config`] if the accessor generates DEKs of a
    /// different length than the engine needs.
    pub fn new(
        inner: S,
        engine: Arc<dyn ContentEncryptionEngine>,
        keys: DataEncryptionKeyAccessor,
    ) -> ContentResult<Self> {
        if keys.dek_len() != engine.key_len() {
            return Err(ContentError::config(format!(
                "engine {} needs {}-byte keys but the accessor generates {}-byte keys",
                engine.name(),
                engine.key_len(),
                keys.dek_len()
            )));
        }
        Ok(Self {
            inner,
            engine,
            keys,
        })
    }

    /// The store holding the ciphertext.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The key accessor.
    pub fn keys(&self) -> &DataEncryptionKeyAccessor {
        &self.keys
    }

    /// The encryption engine.
    pub fn engine(&self) -> &Arc<dyn ContentEncryptionEngine> {
        &self.engine
    }

    /// Wraps the DEK of `reference` under the active wrapping key without
    /// re-encrypting the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the DEK cannot be unwrapped or the new record
    /// cannot be persisted.
    pub fn rewrap(&self, reference: &ContentReference) -> ContentResult<bool> {
        self.keys.rewrap(reference)
    }

    fn describe(&self, inner: &ContentAccessor) -> String {
        format!("{} ({})", inner.description(), self.engine.name())
    }
}

impl<S: ContentStore> ContentStore for EncryptedContentStore<S> {
    fn store(&self, content: &mut (dyn Read + Send)) -> ContentResult<ContentReference> {
        let key_id = self.keys.active_key_id()?;
        let (dek, record) = self.keys.generate_and_wrap(&key_id)?;

        let plaintext: BoxedReader<'_> = Box::new(content);
        let mut ciphertext = self.engine.encrypt(dek, plaintext)?;
        let reference = self.inner.store(&mut ciphertext)?;
        // Dropping the stream destroys the DEK.
        drop(ciphertext);

        if let Err(e) = self.keys.persist(&reference, record) {
            if let Err(cleanup) = self.inner.delete(&reference) {
                warn!(%reference, error = %cleanup, "failed to remove orphaned ciphertext");
            }
            return Err(e);
        }

        debug!(%reference, %key_id, engine = self.engine.name(), "stored encrypted content");
        Ok(reference)
    }

    fn read(&self, reference: &ContentReference) -> ContentResult<ContentReader> {
        let (accessor, ciphertext) = self.inner.read(reference)?.into_parts();
        let size = self
            .engine
            .layout()
            .plaintext_len(accessor.size(), true)
            .ok_or_else(|| {
                ContentError::decryption(format!(
                    "ciphertext of {reference} has impossible length {}",
                    accessor.size()
                ))
            })?;

        let dek = self.keys.unwrap_for(reference)?;
        let plaintext = self.engine.decrypt(dek, ciphertext, StreamSpan::WHOLE)?;

        debug!(%reference, size, "opened encrypted content");
        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), size, self.describe(&accessor)),
            plaintext,
        ))
    }

    fn read_range(
        &self,
        reference: &ContentReference,
        range: ByteRange,
    ) -> ContentResult<ContentReader> {
        range.validate()?;
        let layout = self.engine.layout();
        let (first_chunk, cipher_range) = layout.cipher_range(range);

        let (accessor, ciphertext) = self
            .inner
            .read_range(reference, cipher_range)
            .map_err(|e| match e {
                ContentError::RangeNotSatisfiable { length, .. } => {
                    ContentError::range_not_satisfiable(
                        range,
                        length.and_then(|len| layout.plaintext_len(len, true)),
                    )
                }
                other => other,
            })?
            .into_parts();

        let served = layout.plaintext_len(accessor.size(), false).ok_or_else(|| {
            ContentError::decryption(format!(
                "ciphertext span of {reference} has impossible length {}",
                accessor.size()
            ))
        })?;
        let span_start = first_chunk * layout.chunk_len;
        let span_end = span_start + served;
        if range.start >= span_end {
            return Err(ContentError::range_not_satisfiable(range, None));
        }
        let resolved = ByteRange::new(range.start, range.end.min(span_end - 1));

        let dek = self.keys.unwrap_for(reference)?;
        let plaintext = self
            .engine
            .decrypt(dek, ciphertext, StreamSpan::partial(first_chunk))?;

        debug!(
            %reference,
            %range,
            %cipher_range,
            first_chunk,
            "opened encrypted content range"
        );
        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), resolved.size(), self.describe(&accessor)),
            Box::new(RangeWindow::new(
                plaintext,
                reference.clone(),
                range.start - span_start,
                resolved.size(),
            )),
        ))
    }

    fn delete(&self, reference: &ContentReference) -> ContentResult<bool> {
        let removed = self.inner.delete(reference)?;
        self.keys.forget(reference)?;
        debug!(%reference, removed, "deleted encrypted content");
        Ok(removed)
    }
}

impl<S: fmt::Debug> fmt::Debug for EncryptedContentStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedContentStore")
            .field("inner", &self.inner)
            .field("engine", &self.engine.name())
            .field("keys", &self.keys)
            .finish()
    }
}
