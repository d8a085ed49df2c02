//! # Blobseal Core
//!
//! Envelope-encrypted content storage with byte-range reads.
//!
//! Content stores are **opaque byte stores**: they persist a stream and hand
//! back an opaque [`ContentReference`]. Encryption is layered on top by
//! [`EncryptedContentStore`], which works over any other store.
//!
//! ## Design Principles
//!
//! - Every object is encrypted under its own data-encryption key (DEK)
//! - DEKs are wrapped under wrapping keys (KEKs) and only the wrapped form
//!   is persisted
//! - Wrapping keys rotate without re-encrypting content
//! - Raw key material lives in [`KeyBytes`] and is destroyed explicitly
//! - Range reads fetch and decrypt only the chunks that cover the range
//!
//! ## Available Stores
//!
//! - [`MemoryContentStore`] - For testing
//! - [`FileContentStore`] - One file per blob
//! - [`ObjectContentStore`] - Object storage through an [`ObjectClient`]
//! - [`EncryptedContentStore`] - Envelope encryption over any of the above
//!
//! ## Example
//!
//! ```rust
//! use blobseal_core::{ByteRange, ContentStore, MemoryContentStore};
//!
//! let store = MemoryContentStore::new();
//! let reference = store.store_bytes(b"hello world").unwrap();
//! let reader = store.read_range(&reference, ByteRange::new(6, 10)).unwrap();
//! assert_eq!(reader.read_all().unwrap(), b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod content;
mod crypto;
mod encrypted;
mod error;
mod keys;

pub use backend::{
    FileContentStore, MemoryContentStore, MemoryObjectClient, ObjectClient, ObjectClientError,
    ObjectContentStore, ObjectResponse,
};
pub use config::{RecordPolicy, StoreConfig};
pub use content::{
    declared_size, ByteRange, ByteStream, ContentAccessor, ContentRange, ContentReader,
    ContentReference, ContentStore,
};
pub use crypto::{
    BoxedReader, ChunkLayout, ChunkedAesGcmEngine, ContentEncryptionEngine, StreamSpan, XorEngine,
    CHUNK_NONCE_SIZE, CHUNK_TAG_SIZE, DEFAULT_CHUNK_SIZE,
};
pub use encrypted::EncryptedContentStore;
pub use error::{ContentError, ContentResult, UnwrapError, UnwrapReason};
pub use keys::{
    DataEncryptionKeyAccessor, FileWrappedKeyStore, KeyBytes, MemoryWrappedKeyStore, SecretBuffer,
    SecretGuard, WrappedDek, WrappedKeyStore, WrappingKey, WrappingKeyId, WrappingKeyRing,
    MAX_KEY_ID_LEN, WRAPPING_KEY_SIZE, WRAP_NONCE_SIZE, WRAP_TAG_SIZE,
};
