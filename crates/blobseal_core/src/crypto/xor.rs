//! Single-byte XOR engine for tests.
//!
//! Offers no confidentiality. It keeps ciphertext the same length as the
//! plaintext, which makes range behavior easy to reason about in tests.

use crate::crypto::{BoxedReader, ChunkLayout, ContentEncryptionEngine, StreamSpan};
use crate::error::{ContentError, ContentResult};
use crate::keys::KeyBytes;
use std::io::{self, Read};

/// XORs every byte with a one-byte DEK.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorEngine;

impl XorEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn stream<'a>(dek: KeyBytes, source: BoxedReader<'a>) -> ContentResult<BoxedReader<'a>> {
        let len = dek.key_len()?;
        if len != 1 {
            return Err(ContentError::config(format!(
                "xor engine needs a 1-byte key, got {len}"
            )));
        }
        Ok(Box::new(XorReader {
            dek,
            source,
            finished: false,
        }))
    }
}

impl ContentEncryptionEngine for XorEngine {
    fn name(&self) -> &str {
        "xor"
    }

    fn key_len(&self) -> usize {
        1
    }

    fn layout(&self) -> ChunkLayout {
        ChunkLayout {
            chunk_len: 1,
            overhead: 0,
        }
    }

    fn encrypt<'a>(
        &self,
        dek: KeyBytes,
        plaintext: BoxedReader<'a>,
    ) -> ContentResult<BoxedReader<'a>> {
        Self::stream(dek, plaintext)
    }

    fn decrypt<'a>(
        &self,
        dek: KeyBytes,
        ciphertext: BoxedReader<'a>,
        _span: StreamSpan,
    ) -> ContentResult<BoxedReader<'a>> {
        Self::stream(dek, ciphertext)
    }
}

struct XorReader<'a> {
    dek: KeyBytes,
    source: BoxedReader<'a>,
    finished: bool,
}

impl Read for XorReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let key = self
            .dek
            .with_bytes(|k| k[0])
            .map_err(ContentError::into_io)?;
        let n = self.source.read(buf)?;
        if n == 0 {
            self.finished = true;
            self.dek.destroy();
            return Ok(0);
        }
        for byte in &mut buf[..n] {
            *byte ^= key;
        }
        Ok(n)
    }
}
