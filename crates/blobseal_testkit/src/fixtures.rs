//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up stores, key rings and
//! encrypted stacks in tests.

use blobseal_core::{
    ChunkedAesGcmEngine, ContentStore, DataEncryptionKeyAccessor, EncryptedContentStore,
    FileContentStore, MemoryWrappedKeyStore, WrappedKeyStore, WrappingKey, WrappingKeyId,
    WrappingKeyRing, XorEngine,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Safe to call
/// from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Creates a wrapping key id, panicking on invalid input.
pub fn key_id(name: &str) -> WrappingKeyId {
    WrappingKeyId::new(name).expect("Invalid wrapping key id")
}

/// Creates a key ring holding a fresh random key `active` as the active key.
pub fn key_ring(active: &str) -> Arc<WrappingKeyRing> {
    Arc::new(WrappingKeyRing::with_active(WrappingKey::generate(key_id(
        active,
    ))))
}

/// A file store in a temporary directory with automatic cleanup.
pub struct TestFileStore {
    /// The store instance.
    pub store: FileContentStore,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: TempDir,
}

impl TestFileStore {
    /// Creates a store in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileContentStore::open(temp_dir.path()).expect("Failed to open file store");
        Self { store, temp_dir }
    }

    /// Root directory of the store.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestFileStore {
    type Target = FileContentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Builds a key accessor over `ring` with an in-memory record store.
pub fn memory_accessor(ring: Arc<WrappingKeyRing>, dek_len: usize) -> DataEncryptionKeyAccessor {
    accessor_with_records(ring, Arc::new(MemoryWrappedKeyStore::new()), dek_len)
}

/// Builds a key accessor over `ring` and `records`.
pub fn accessor_with_records(
    ring: Arc<WrappingKeyRing>,
    records: Arc<dyn WrappedKeyStore>,
    dek_len: usize,
) -> DataEncryptionKeyAccessor {
    DataEncryptionKeyAccessor::new(ring, records).with_dek_len(dek_len)
}

/// Wraps `inner` with the XOR test engine.
pub fn xor_store<S: ContentStore>(inner: S, ring: Arc<WrappingKeyRing>) -> EncryptedContentStore<S> {
    EncryptedContentStore::new(inner, Arc::new(XorEngine::new()), memory_accessor(ring, 1))
        .expect("Failed to build XOR store")
}

/// Wraps `inner` with chunked AES-256-GCM using `chunk_size`-byte chunks.
pub fn aes_store<S: ContentStore>(
    inner: S,
    ring: Arc<WrappingKeyRing>,
    chunk_size: usize,
) -> EncryptedContentStore<S> {
    let engine = ChunkedAesGcmEngine::new(chunk_size).expect("Invalid chunk size");
    EncryptedContentStore::new(inner, Arc::new(engine), memory_accessor(ring, 32))
        .expect("Failed to build AES store")
}

/// Deterministic test content of `len` bytes.
pub fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
