//! Every store adapter, plain and encrypted, against the conformance suite.

use blobseal_core::{FileContentStore, MemoryContentStore, MemoryObjectClient, ObjectContentStore};
use blobseal_testkit::prelude::*;

fn object_store(client: MemoryObjectClient) -> ObjectContentStore<MemoryObjectClient> {
    ObjectContentStore::new(client, "conformance").with_prefix("blobs/")
}

#[test]
fn memory_store() {
    init_tracing();
    run_conformance_suite(&MemoryContentStore::new());
}

#[test]
fn file_store() {
    init_tracing();
    let store = TestFileStore::new();
    run_conformance_suite(&store.store);
}

#[test]
fn object_store_with_native_ranges() {
    init_tracing();
    run_conformance_suite(&object_store(MemoryObjectClient::new()));
}

#[test]
fn object_store_ignoring_ranges() {
    init_tracing();
    run_conformance_suite(&object_store(MemoryObjectClient::ignoring_ranges()));
}

#[test]
fn xor_over_memory() {
    init_tracing();
    run_conformance_suite(&xor_store(MemoryContentStore::new(), key_ring("k1")));
}

#[test]
fn aes_over_memory() {
    init_tracing();
    for chunk_size in [1, 7, 64, 1000, 4096] {
        run_conformance_suite(&aes_store(MemoryContentStore::new(), key_ring("k1"), chunk_size));
    }
}

#[test]
fn aes_over_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let inner = FileContentStore::open(dir.path()).unwrap();
    run_conformance_suite(&aes_store(inner, key_ring("k1"), 128));
}

#[test]
fn aes_over_object_store() {
    init_tracing();
    run_conformance_suite(&aes_store(
        object_store(MemoryObjectClient::new()),
        key_ring("k1"),
        100,
    ));
    run_conformance_suite(&aes_store(
        object_store(MemoryObjectClient::ignoring_ranges()),
        key_ring("k1"),
        100,
    ));
}

#[test]
fn xor_over_object_store() {
    init_tracing();
    run_conformance_suite(&xor_store(
        object_store(MemoryObjectClient::new()),
        key_ring("k1"),
    ));
}
