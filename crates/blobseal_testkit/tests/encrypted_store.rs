//! End-to-end behavior of the envelope-encrypted store.

use blobseal_core::{
    ByteRange, ContentError, ContentReference, ContentResult, ContentStore,
    EncryptedContentStore, MemoryContentStore, MemoryObjectClient, ObjectContentStore,
    WrappedDek, WrappedKeyStore, XorEngine,
};
use blobseal_testkit::prelude::*;
use std::io::Read;
use std::sync::Arc;

#[test]
fn hello_world_with_xor_engine() {
    init_tracing();
    let store = xor_store(MemoryContentStore::new(), key_ring("k1"));
    let reference = store.store_bytes(b"hello world").unwrap();

    assert_ne!(store.inner().raw(&reference).unwrap(), b"hello world");
    assert_eq!(store.read(&reference).unwrap().read_all().unwrap(), b"hello world");

    let hello = store.read_range(&reference, ByteRange::new(0, 4)).unwrap();
    assert_eq!(hello.size(), 5);
    assert_eq!(hello.read_all().unwrap(), b"hello");

    let world = store.read_range(&reference, ByteRange::new(6, 10)).unwrap();
    assert_eq!(world.size(), 5);
    assert_eq!(world.read_all().unwrap(), b"world");
}

#[test]
fn exhausted_readers_keep_returning_zero() {
    let xor = xor_store(MemoryContentStore::new(), key_ring("k1"));
    let aes = aes_store(MemoryContentStore::new(), key_ring("k1"), 4);
    let stores: [&dyn ContentStore; 2] = [&xor, &aes];
    for store in stores {
        let reference = store.store_bytes(b"hello world").unwrap();
        for mut reader in [
            store.read(&reference).unwrap(),
            store.read_range(&reference, ByteRange::new(6, 10)).unwrap(),
        ] {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert!(b"hello world".ends_with(&out));
            assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
            assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
        }
    }
}

#[test]
fn parsed_range_headers_drive_reads() {
    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 4);
    let reference = store.store_bytes(b"hello world").unwrap();

    let range = ByteRange::parse("bytes=6-").unwrap();
    assert_eq!(store.read_range(&reference, range).unwrap().read_all().unwrap(), b"world");

    let err = ByteRange::parse("bytes=-5").unwrap_err();
    assert!(err.is_range_not_satisfiable());
}

#[test]
fn tampered_ciphertext_fails_decryption() {
    init_tracing();
    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 16);
    let content = sample_content(100);
    let reference = store.store_bytes(&content).unwrap();

    let mut raw = store.inner().raw(&reference).unwrap();
    raw[40] ^= 0x80;
    assert!(store.inner().replace_raw(&reference, raw));

    let err = store.read(&reference).unwrap().read_all().unwrap_err();
    assert!(matches!(err, ContentError::Decryption { .. }), "got {err}");

    // Chunk 0 is intact, chunk 1 is not.
    let intact = store.read_range(&reference, ByteRange::new(0, 15)).unwrap();
    assert_eq!(intact.read_all().unwrap(), &content[..16]);
    let broken = store.read_range(&reference, ByteRange::new(16, 20)).unwrap();
    assert!(matches!(
        broken.read_all().unwrap_err(),
        ContentError::Decryption { .. }
    ));
}

#[test]
fn truncated_ciphertext_is_rejected() {
    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 16);
    let reference = store.store_bytes(&sample_content(64)).unwrap();

    let mut raw = store.inner().raw(&reference).unwrap();
    raw.truncate(raw.len() - 16);
    store.inner().replace_raw(&reference, raw);

    let err = match store.read(&reference) {
        Ok(reader) => reader.read_all().unwrap_err(),
        Err(e) => e,
    };
    assert!(matches!(err, ContentError::Decryption { .. }), "got {err}");
}

#[test]
fn missing_records_make_content_unreadable() {
    let store = xor_store(MemoryContentStore::new(), key_ring("k1"));
    let reference = store.store_bytes(b"orphan").unwrap();
    store.keys().forget(&reference).unwrap();

    let err = store.read(&reference).unwrap_err();
    assert!(err.is_unreadable(), "got {err}");
}

#[test]
fn partial_consumption_then_drop() {
    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 8);
    let reference = store.store_bytes(&sample_content(100)).unwrap();

    let mut reader = store.read(&reference).unwrap();
    let mut first = [0u8; 10];
    reader.read_exact(&mut first).unwrap();
    assert_eq!(first, sample_content(100)[..10]);
    drop(reader);

    // The store remains usable after an abandoned stream.
    assert_eq!(
        store.read(&reference).unwrap().read_all().unwrap(),
        sample_content(100)
    );
}

struct FailingRecords;

impl WrappedKeyStore for FailingRecords {
    fn put(&self, _reference: &ContentReference, _record: WrappedDek) -> ContentResult<()> {
        Err(ContentError::codec("record store offline"))
    }

    fn replace(&self, _reference: &ContentReference, _records: Vec<WrappedDek>) -> ContentResult<()> {
        Err(ContentError::codec("record store offline"))
    }

    fn get(&self, _reference: &ContentReference) -> ContentResult<Vec<WrappedDek>> {
        Ok(Vec::new())
    }

    fn remove(&self, _reference: &ContentReference) -> ContentResult<bool> {
        Ok(false)
    }
}

#[test]
fn failed_record_persist_removes_ciphertext() {
    init_tracing();
    let keys = accessor_with_records(key_ring("k1"), Arc::new(FailingRecords), 1);
    let store =
        EncryptedContentStore::new(MemoryContentStore::new(), Arc::new(XorEngine::new()), keys)
            .unwrap();

    let err = store.store_bytes(b"never visible").unwrap_err();
    assert!(matches!(err, ContentError::Codec { .. }));
    assert!(store.inner().is_empty());
}

#[test]
fn failing_source_stores_nothing() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upload aborted"))
        }
    }

    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 16);
    assert!(store.store(&mut Broken).is_err());
    assert!(store.inner().is_empty());
}

#[test]
fn unavailable_backend_is_unreadable() {
    let store = xor_store(
        ObjectContentStore::new(MemoryObjectClient::new(), "bucket"),
        key_ring("k1"),
    );
    let reference = store.store_bytes(b"remote").unwrap();

    store.inner().client().set_available(false);
    assert!(store.read(&reference).unwrap_err().is_unreadable());
    assert!(store
        .read_range(&reference, ByteRange::new(0, 1))
        .unwrap_err()
        .is_unreadable());

    store.inner().client().set_available(true);
    assert_eq!(store.read(&reference).unwrap().read_all().unwrap(), b"remote");
}

#[test]
fn every_object_gets_its_own_key() {
    let store = aes_store(MemoryContentStore::new(), key_ring("k1"), 16);
    let a = store.store_bytes(b"identical").unwrap();
    let b = store.store_bytes(b"identical").unwrap();
    assert_ne!(store.inner().raw(&a), store.inner().raw(&b));

    let records_a = store.keys().records_for(&a).unwrap();
    let records_b = store.keys().records_for(&b).unwrap();
    assert_eq!(records_a.len(), 1);
    assert_ne!(records_a[0].ciphertext(), records_b[0].ciphertext());
}
