//! Conformance suite for content stores.
//!
//! Every [`ContentStore`] must pass these checks, whether it stores bytes
//! directly or encrypts them on the way through. Each check panics with a
//! descriptive message on failure.
//!
//! ## Usage
//!
//! ```rust
//! use blobseal_core::MemoryContentStore;
//! use blobseal_testkit::run_conformance_suite;
//!
//! run_conformance_suite(&MemoryContentStore::new());
//! ```

use crate::fixtures::sample_content;
use blobseal_core::{ByteRange, ContentReference, ContentStore};

const SUITE_LEN: usize = 1000;

/// Stores `content` and reads it back in full.
pub fn check_round_trip(store: &dyn ContentStore, content: &[u8]) {
    let reference = store.store_bytes(content).expect("Failed to store content");
    let reader = store.read(&reference).expect("Failed to read content");
    assert_eq!(reader.reference(), &reference);
    assert_eq!(reader.size(), content.len() as u64, "declared size mismatch");
    assert_eq!(
        reader.read_all().expect("Failed to drain reader"),
        content,
        "content mismatch"
    );
}

/// Reading an unknown reference must fail as unreadable.
pub fn check_unknown_reference(store: &dyn ContentStore) {
    let unknown = ContentReference::generate();
    let err = store.read(&unknown).expect_err("read of unknown reference succeeded");
    assert!(err.is_unreadable(), "unexpected error for unknown reference: {err}");

    let err = store
        .read_range(&unknown, ByteRange::new(0, 0))
        .expect_err("range read of unknown reference succeeded");
    assert!(err.is_unreadable(), "unexpected error for unknown reference: {err}");
}

/// A full read returns exactly the stored bytes.
pub fn check_full_read(store: &dyn ContentStore) {
    check_round_trip(store, &sample_content(SUITE_LEN));
}

fn assert_range(
    store: &dyn ContentStore,
    reference: &ContentReference,
    content: &[u8],
    start: u64,
    end: u64,
) {
    let reader = store
        .read_range(reference, ByteRange::new(start, end))
        .unwrap_or_else(|e| panic!("range {start}-{end} failed: {e}"));
    let last = usize::try_from(end).unwrap_or(usize::MAX).min(content.len() - 1);
    let expected = &content[start as usize..=last];
    assert_eq!(reader.size(), expected.len() as u64, "size of range {start}-{end}");
    assert_eq!(
        reader.read_all().unwrap_or_else(|e| panic!("draining range {start}-{end} failed: {e}")),
        expected,
        "bytes of range {start}-{end}"
    );
}

fn assert_not_satisfiable(store: &dyn ContentStore, reference: &ContentReference, range: ByteRange) {
    match store.read_range(reference, range) {
        Ok(_) => panic!("range {range} should not be satisfiable"),
        Err(e) => assert!(
            e.is_range_not_satisfiable(),
            "range {range} failed with the wrong error: {e}"
        ),
    }
}

/// Ranged reads at the start, middle and end, with a clamped end, and
/// rejection of ranges outside the object.
pub fn check_range_reads(store: &dyn ContentStore) {
    let content = sample_content(SUITE_LEN);
    let len = content.len() as u64;
    let reference = store.store_bytes(&content).expect("Failed to store content");

    assert_range(store, &reference, &content, 0, 0);
    assert_range(store, &reference, &content, 0, 99);
    assert_range(store, &reference, &content, 400, 599);
    assert_range(store, &reference, &content, len - 100, len - 1);
    assert_range(store, &reference, &content, len - 1, len - 1);
    assert_range(store, &reference, &content, 0, len - 1);

    // End beyond the object is clamped.
    assert_range(store, &reference, &content, len - 10, len + 500);
    assert_range(store, &reference, &content, 10, u64::MAX);

    assert_not_satisfiable(store, &reference, ByteRange::new(len, len + 10));
    assert_not_satisfiable(store, &reference, ByteRange::new(len + 1000, len + 2000));
    assert_not_satisfiable(store, &reference, ByteRange::new(50, 10));
}

/// Empty content round-trips and has no satisfiable range.
pub fn check_empty_content(store: &dyn ContentStore) {
    check_round_trip(store, &[]);

    let reference = store.store_bytes(&[]).expect("Failed to store empty content");
    assert_not_satisfiable(store, &reference, ByteRange::new(0, 0));
}

/// Delete removes the content and reports whether anything was removed.
pub fn check_delete(store: &dyn ContentStore) {
    let reference = store.store_bytes(b"short-lived").expect("Failed to store content");
    let other = store.store_bytes(b"survivor").expect("Failed to store content");

    assert!(store.delete(&reference).expect("Failed to delete"));
    assert!(!store.delete(&reference).expect("Failed to delete twice"));

    let err = store.read(&reference).expect_err("deleted content is still readable");
    assert!(err.is_unreadable(), "unexpected error for deleted content: {err}");
    assert_eq!(
        store.read(&other).expect("Failed to read survivor").read_all().expect("Failed to drain"),
        b"survivor"
    );
}

/// Runs every check against `store`.
pub fn run_conformance_suite(store: &dyn ContentStore) {
    check_round_trip(store, b"hello world");
    check_unknown_reference(store);
    check_full_read(store);
    check_range_reads(store);
    check_empty_content(store);
    check_delete(store);
}
