//! Content encryption engines.
//!
//! An engine turns a plaintext stream into a ciphertext stream under a
//! per-object DEK and back. Engines describe their framing through a
//! [`ChunkLayout`], which is all the range arithmetic needs to map a
//! plaintext range onto the ciphertext that covers it.
//!
//! ## Implementations
//!
//! - [`ChunkedAesGcmEngine`] - AES-256-GCM over fixed-size chunks
//! - [`XorEngine`] - single-byte XOR for tests only

mod aes;
mod xor;

pub use aes::{ChunkedAesGcmEngine, CHUNK_NONCE_SIZE, CHUNK_TAG_SIZE, DEFAULT_CHUNK_SIZE};
pub use xor::XorEngine;

use crate::content::ByteRange;
use crate::error::ContentResult;
use crate::keys::KeyBytes;
use std::io::{self, Read};

/// A boxed stream that may borrow from the caller.
pub type BoxedReader<'a> = Box<dyn Read + Send + 'a>;

/// Pluggable symmetric stream cipher.
///
/// Both directions take ownership of the DEK. The returned stream destroys
/// it when the stream reaches its end or is dropped.
pub trait ContentEncryptionEngine: Send + Sync {
    /// Short engine name for logs and descriptions.
    fn name(&self) -> &str;

    /// DEK length this engine requires.
    fn key_len(&self) -> usize;

    /// Framing of the ciphertext.
    fn layout(&self) -> ChunkLayout;

    /// Wraps `plaintext` in an encrypting stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the DEK is destroyed or has the wrong length.
    fn encrypt<'a>(&self, dek: KeyBytes, plaintext: BoxedReader<'a>)
        -> ContentResult<BoxedReader<'a>>;

    /// Wraps `ciphertext` in a decrypting stream.
    ///
    /// `span` says which chunk the ciphertext starts at and whether it runs
    /// to the end of the object.
    ///
    /// # Errors
    ///
    /// Returns an error if the DEK is destroyed or has the wrong length.
    /// Authentication failures surface while reading the stream.
    fn decrypt<'a>(
        &self,
        dek: KeyBytes,
        ciphertext: BoxedReader<'a>,
        span: StreamSpan,
    ) -> ContentResult<BoxedReader<'a>>;
}

/// Where a ciphertext stream sits within its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpan {
    /// Index of the first chunk in the stream.
    pub first_chunk: u64,
    /// Whether the stream runs to the end of the object, so the final chunk
    /// must be present.
    pub complete: bool,
}

impl StreamSpan {
    /// A stream covering the whole object.
    pub const WHOLE: Self = Self {
        first_chunk: 0,
        complete: true,
    };

    /// A stream starting at `first_chunk` that may end early.
    #[must_use]
    pub const fn partial(first_chunk: u64) -> Self {
        Self {
            first_chunk,
            complete: false,
        }
    }
}

/// How plaintext chunks map onto ciphertext chunks.
///
/// Every plaintext chunk of `chunk_len` bytes becomes a ciphertext chunk of
/// `chunk_len + overhead` bytes. With a non-zero overhead the last chunk is
/// always shorter than `chunk_len`, possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Plaintext bytes per chunk.
    pub chunk_len: u64,
    /// Ciphertext bytes added per chunk.
    pub overhead: u64,
}

impl ChunkLayout {
    /// Ciphertext bytes per full chunk.
    #[must_use]
    pub const fn stride(&self) -> u64 {
        self.chunk_len + self.overhead
    }

    /// Ciphertext length of `plaintext` bytes.
    #[must_use]
    pub const fn ciphertext_len(&self, plaintext: u64) -> u64 {
        if self.overhead == 0 {
            return plaintext;
        }
        plaintext + (plaintext / self.chunk_len + 1) * self.overhead
    }

    /// Plaintext length carried by `ciphertext` bytes.
    ///
    /// A `complete` object must end in a short final chunk; a partial span
    /// may also end on a chunk boundary. Returns `None` if the length cannot
    /// come from this layout.
    #[must_use]
    pub const fn plaintext_len(&self, ciphertext: u64, complete: bool) -> Option<u64> {
        if self.overhead == 0 {
            return Some(ciphertext);
        }
        let full = ciphertext / self.stride();
        let rem = ciphertext % self.stride();
        if rem == 0 && !complete {
            return Some(full * self.chunk_len);
        }
        if rem < self.overhead {
            return None;
        }
        Some(full * self.chunk_len + rem - self.overhead)
    }

    /// Extends a plaintext range to whole chunks.
    ///
    /// Returns the index of the first covered chunk and the ciphertext range
    /// holding every covered chunk. Open-ended ranges stay open-ended.
    #[must_use]
    pub fn cipher_range(&self, range: ByteRange) -> (u64, ByteRange) {
        let first_chunk = range.start / self.chunk_len;
        let start = first_chunk.saturating_mul(self.stride());
        let end = if range.is_open_ended() {
            u64::MAX
        } else {
            let last_chunk = range.end / self.chunk_len;
            (last_chunk + 1).saturating_mul(self.stride()) - 1
        };
        (first_chunk, ByteRange::new(start, end))
    }
}

/// Fills `buf` from `source` until it is full or the source ends.
pub(crate) fn read_full(source: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
