//! Property-based test generators using proptest.
//!
//! Provides strategies for generating content and ranges that stay within
//! the object they target.

use blobseal_core::ByteRange;
use proptest::prelude::*;

/// Strategy for arbitrary content, including empty content.
pub fn content_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for non-empty content.
pub fn non_empty_content_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

/// Strategy for a valid range inside an object of `len > 0` bytes.
///
/// Ends may overshoot the object by up to `len` bytes to exercise clamping.
pub fn range_within(len: u64) -> impl Strategy<Value = ByteRange> {
    (0..len).prop_flat_map(move |start| {
        (start..start + len + 1).prop_map(move |end| ByteRange::new(start, end))
    })
}

/// Strategy for non-empty content together with a range inside it.
pub fn content_and_range(max_len: usize) -> impl Strategy<Value = (Vec<u8>, ByteRange)> {
    non_empty_content_strategy(max_len).prop_flat_map(|content| {
        let len = content.len() as u64;
        (Just(content), range_within(len))
    })
}

/// Returns the bytes a range read of `content` must yield.
pub fn expected_slice(content: &[u8], range: ByteRange) -> &[u8] {
    let start = usize::try_from(range.start).unwrap_or(usize::MAX);
    let end = usize::try_from(range.end)
        .unwrap_or(usize::MAX)
        .min(content.len().saturating_sub(1));
    &content[start..=end]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_ranges_are_satisfiable((content, range) in content_and_range(64)) {
            prop_assert!(range.start <= range.end);
            prop_assert!(range.start < content.len() as u64);
            prop_assert!(!expected_slice(&content, range).is_empty());
        }
    }
}
