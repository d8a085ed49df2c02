//! Content store trait definition.

use crate::content::{ByteRange, ContentReader, ContentReference};
use crate::error::ContentResult;
use std::io::Read;

/// A backend-agnostic content store.
///
/// Stores are **opaque byte stores**: they persist whatever stream they are
/// given and hand the same bytes back. Encryption is layered on top by
/// wrapping one store in another.
///
/// # Invariants
///
/// - `store` consumes the entire stream and either persists all of it or
///   nothing; a reference is only returned on success
/// - `read` returns exactly the bytes previously stored
/// - `read_range` returns exactly the requested inclusive range, clamped to
///   the end of the object, and never silently falls back to a full read
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::MemoryContentStore`] - For testing
/// - [`crate::FileContentStore`] - One file per blob
/// - [`crate::ObjectContentStore`] - Object storage through an [`crate::ObjectClient`]
/// - [`crate::EncryptedContentStore`] - Envelope encryption over another store
pub trait ContentStore: Send + Sync {
    /// Persists the whole stream and returns its reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or the backend rejects the write.
    fn store(&self, content: &mut (dyn Read + Send)) -> ContentResult<ContentReference>;

    /// Opens the full content behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ContentError::NotFound`] for unknown references and
    /// [`crate::ContentError::Unreadable`] if the backend cannot serve them.
    fn read(&self, reference: &ContentReference) -> ContentResult<ContentReader>;

    /// Opens the inclusive byte range `range` of the content.
    ///
    /// # Errors
    ///
    /// As for [`read`](Self::read), plus
    /// [`crate::ContentError::RangeNotSatisfiable`] if the range is inverted
    /// or starts beyond the end of the content.
    fn read_range(
        &self,
        reference: &ContentReference,
        range: ByteRange,
    ) -> ContentResult<ContentReader>;

    /// Removes the content behind `reference`.
    ///
    /// Returns `true` if something was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to delete.
    fn delete(&self, reference: &ContentReference) -> ContentResult<bool>;

    /// Convenience wrapper storing an in-memory slice.
    ///
    /// # Errors
    ///
    /// As for [`store`](Self::store).
    fn store_bytes(&self, bytes: &[u8]) -> ContentResult<ContentReference> {
        let mut cursor = std::io::Cursor::new(bytes);
        self.store(&mut cursor)
    }
}
