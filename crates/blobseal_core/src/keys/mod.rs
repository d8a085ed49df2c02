//! Key material and envelope key management.
//!
//! Content is encrypted under a per-object data-encryption key (DEK). DEKs
//! are wrapped under wrapping keys (KEKs) held in a [`WrappingKeyRing`], and
//! the wrapped records are persisted in a [`WrappedKeyStore`].

mod accessor;
mod bytes;
mod id;
mod records;
mod wrapping;

pub use accessor::DataEncryptionKeyAccessor;
pub use bytes::{KeyBytes, SecretBuffer, SecretGuard};
pub use id::{WrappingKeyId, MAX_KEY_ID_LEN};
pub use records::{FileWrappedKeyStore, MemoryWrappedKeyStore, WrappedDek, WrappedKeyStore};
pub use wrapping::{
    WrappingKey, WrappingKeyRing, WRAPPING_KEY_SIZE, WRAP_NONCE_SIZE, WRAP_TAG_SIZE,
};
