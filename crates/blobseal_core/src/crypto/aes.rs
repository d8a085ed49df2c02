//! Chunked AES-256-GCM engine.
//!
//! ## Format
//!
//! Plaintext is cut into chunks of `chunk_len` bytes. Each chunk is sealed
//! separately: `ciphertext || tag (16 bytes)`. The nonce is never stored;
//! chunk `i` uses
//!
//! ```text
//! [0, 0, 0] || i as u64 big-endian || final flag (0 or 1)
//! ```
//!
//! The last chunk is always shorter than `chunk_len` and carries the final
//! flag, so an object whose length is a multiple of `chunk_len` ends in an
//! empty chunk. Reordering, truncation and appending all fail authentication.
//!
//! Every object has its own DEK, so counter nonces never repeat under a key.

use crate::config::StoreConfig;
use crate::crypto::{read_full, BoxedReader, ChunkLayout, ContentEncryptionEngine, StreamSpan};
use crate::error::{ContentError, ContentResult};
use crate::keys::KeyBytes;
use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use std::io::{self, Read};
use zeroize::Zeroizing;

/// Size of the implicit per-chunk nonce.
pub const CHUNK_NONCE_SIZE: usize = 12;
/// Size of the per-chunk authentication tag.
pub const CHUNK_TAG_SIZE: usize = 16;
/// Default plaintext chunk length (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const KEY_SIZE: usize = 32;

fn chunk_nonce(index: u64, last: bool) -> [u8; CHUNK_NONCE_SIZE] {
    let mut nonce = [0u8; CHUNK_NONCE_SIZE];
    nonce[3..11].copy_from_slice(&index.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// AES-256-GCM over fixed-size plaintext chunks.
#[derive(Debug, Clone)]
pub struct ChunkedAesGcmEngine {
    chunk_len: usize,
}

impl ChunkedAesGcmEngine {
    /// Creates an engine with the given plaintext chunk length.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_len` is zero.
    pub fn new(chunk_len: usize) -> ContentResult<Self> {
        if chunk_len == 0 {
            return Err(ContentError::config("chunk size must be positive"));
        }
        Ok(Self { chunk_len })
    }

    /// Creates an engine from the chunk size of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured chunk size is zero.
    pub fn from_config(config: &StoreConfig) -> ContentResult<Self> {
        Self::new(config.chunk_size)
    }

    /// Plaintext chunk length.
    #[must_use]
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    fn cipher(dek: &KeyBytes) -> ContentResult<Aes256Gcm> {
        let len = dek.key_len()?;
        if len != KEY_SIZE {
            return Err(ContentError::config(format!(
                "AES-256-GCM needs a {KEY_SIZE}-byte key, got {len}"
            )));
        }
        dek.with_bytes(Aes256Gcm::new_from_slice)?
            .map_err(|_| ContentError::config("invalid AES key length"))
    }
}

impl Default for ChunkedAesGcmEngine {
    fn default() -> Self {
        Self {
            chunk_len: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ContentEncryptionEngine for ChunkedAesGcmEngine {
    fn name(&self) -> &str {
        "aes-256-gcm-chunked"
    }

    fn key_len(&self) -> usize {
        KEY_SIZE
    }

    fn layout(&self) -> ChunkLayout {
        ChunkLayout {
            chunk_len: self.chunk_len as u64,
            overhead: CHUNK_TAG_SIZE as u64,
        }
    }

    fn encrypt<'a>(
        &self,
        dek: KeyBytes,
        plaintext: BoxedReader<'a>,
    ) -> ContentResult<BoxedReader<'a>> {
        let cipher = Self::cipher(&dek)?;
        Ok(Box::new(EncryptingReader {
            cipher,
            dek,
            source: plaintext,
            chunk_len: self.chunk_len,
            index: 0,
            chunk: Zeroizing::new(Vec::with_capacity(self.chunk_len + CHUNK_TAG_SIZE)),
            pos: 0,
            finished: false,
        }))
    }

    fn decrypt<'a>(
        &self,
        dek: KeyBytes,
        ciphertext: BoxedReader<'a>,
        span: StreamSpan,
    ) -> ContentResult<BoxedReader<'a>> {
        let cipher = Self::cipher(&dek)?;
        Ok(Box::new(DecryptingReader {
            cipher,
            dek,
            source: ciphertext,
            chunk_len: self.chunk_len,
            index: span.first_chunk,
            complete: span.complete,
            chunk: Zeroizing::new(Vec::with_capacity(self.chunk_len + CHUNK_TAG_SIZE)),
            pos: 0,
            state: DecryptState::Reading,
        }))
    }
}

/// Serves bytes of the current chunk buffer.
fn drain(chunk: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
    let n = (chunk.len() - *pos).min(buf.len());
    buf[..n].copy_from_slice(&chunk[*pos..*pos + n]);
    *pos += n;
    n
}

struct EncryptingReader<'a> {
    cipher: Aes256Gcm,
    dek: KeyBytes,
    source: BoxedReader<'a>,
    chunk_len: usize,
    index: u64,
    chunk: Zeroizing<Vec<u8>>,
    pos: usize,
    finished: bool,
}

impl EncryptingReader<'_> {
    fn seal_next(&mut self) -> io::Result<()> {
        self.chunk.resize(self.chunk_len, 0);
        let filled = read_full(&mut self.source, &mut self.chunk)?;
        self.chunk.truncate(filled);

        let last = filled < self.chunk_len;
        let nonce = chunk_nonce(self.index, last);
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut self.chunk[..])
            .map_err(|_| ContentError::encryption("chunk encryption failed").into_io())?;
        self.chunk.extend_from_slice(&tag);
        self.pos = 0;
        self.index += 1;

        if last {
            self.finished = true;
            self.dek.destroy();
        }
        Ok(())
    }
}

impl Read for EncryptingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.chunk.len() {
                return Ok(drain(&self.chunk, &mut self.pos, buf));
            }
            if self.finished {
                return Ok(0);
            }
            self.seal_next()?;
        }
    }
}

enum DecryptState {
    Reading,
    Done,
    Failed,
}

struct DecryptingReader<'a> {
    cipher: Aes256Gcm,
    dek: KeyBytes,
    source: BoxedReader<'a>,
    chunk_len: usize,
    index: u64,
    complete: bool,
    chunk: Zeroizing<Vec<u8>>,
    pos: usize,
    state: DecryptState,
}

impl DecryptingReader<'_> {
    fn fail(&mut self, message: String) -> io::Error {
        self.state = DecryptState::Failed;
        self.chunk.clear();
        self.pos = 0;
        self.dek.destroy();
        ContentError::decryption(message).into_io()
    }

    fn finish(&mut self) {
        self.state = DecryptState::Done;
        self.dek.destroy();
    }

    fn open_next(&mut self) -> io::Result<()> {
        let stride = self.chunk_len + CHUNK_TAG_SIZE;
        self.chunk.resize(stride, 0);
        let filled = match read_full(&mut self.source, &mut self.chunk) {
            Ok(filled) => filled,
            Err(e) => {
                self.state = DecryptState::Failed;
                self.chunk.clear();
                self.pos = 0;
                self.dek.destroy();
                return Err(e);
            }
        };
        self.chunk.truncate(filled);
        self.pos = 0;

        if filled == 0 && !self.complete {
            self.finish();
            return Ok(());
        }
        if filled < CHUNK_TAG_SIZE {
            let message = if filled == 0 {
                format!("missing final chunk after chunk {}", self.index)
            } else {
                format!("chunk {} truncated to {filled} bytes", self.index)
            };
            return Err(self.fail(message));
        }

        let last = filled < stride;
        let nonce = chunk_nonce(self.index, last);
        let body = filled - CHUNK_TAG_SIZE;
        let tag: Tag = Tag::clone_from_slice(&self.chunk[body..]);
        let opened = self.cipher.decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            &mut self.chunk[..body],
            &tag,
        );
        if opened.is_err() {
            let index = self.index;
            return Err(self.fail(format!("chunk {index} failed authentication")));
        }
        self.chunk.truncate(body);
        self.index += 1;

        if last {
            self.finish();
        }
        Ok(())
    }
}

impl Read for DecryptingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.chunk.len() {
                return Ok(drain(&self.chunk, &mut self.pos, buf));
            }
            match self.state {
                DecryptState::Reading => self.open_next()?,
                DecryptState::Done => return Ok(0),
                DecryptState::Failed => {
                    return Err(ContentError::decryption("stream already failed").into_io())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn engine() -> ChunkedAesGcmEngine {
        ChunkedAesGcmEngine::new(16).unwrap()
    }

    fn encrypt(engine: &ChunkedAesGcmEngine, dek: &KeyBytes, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        engine
            .encrypt(dek.clone(), Box::new(Cursor::new(plaintext.to_vec())))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn decrypt(
        engine: &ChunkedAesGcmEngine,
        dek: &KeyBytes,
        ciphertext: Vec<u8>,
        span: StreamSpan,
    ) -> ContentResult<Vec<u8>> {
        let mut out = Vec::new();
        engine
            .decrypt(dek.clone(), Box::new(Cursor::new(ciphertext)), span)?
            .read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn roundtrip_various_lengths() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        for len in [0usize, 1, 15, 16, 17, 32, 100] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ciphertext = encrypt(&engine, &dek, &plaintext);
            assert_eq!(
                ciphertext.len() as u64,
                engine.layout().ciphertext_len(len as u64)
            );
            assert_eq!(
                decrypt(&engine, &dek, ciphertext, StreamSpan::WHOLE).unwrap(),
                plaintext
            );
        }
    }

    #[test]
    fn tampered_chunk_fails() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let mut ciphertext = encrypt(&engine, &dek, b"the quick brown fox jumps");
        ciphertext[3] ^= 0x01;
        assert!(matches!(
            decrypt(&engine, &dek, ciphertext, StreamSpan::WHOLE),
            Err(ContentError::Decryption { .. })
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let engine = engine();
        let ciphertext = encrypt(&engine, &KeyBytes::generate(32), b"secret");
        assert!(matches!(
            decrypt(&engine, &KeyBytes::generate(32), ciphertext, StreamSpan::WHOLE),
            Err(ContentError::Decryption { .. })
        ));
    }

    #[test]
    fn dropped_final_chunk_is_detected() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let mut ciphertext = encrypt(&engine, &dek, &[7u8; 32]);
        // Exact multiple: two full chunks plus an empty final chunk.
        ciphertext.truncate(2 * 32);
        assert!(matches!(
            decrypt(&engine, &dek, ciphertext, StreamSpan::WHOLE),
            Err(ContentError::Decryption { .. })
        ));
    }

    #[test]
    fn truncated_chunk_is_detected() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let mut ciphertext = encrypt(&engine, &dek, &[7u8; 20]);
        ciphertext.truncate(32 + 3);
        assert!(decrypt(&engine, &dek, ciphertext, StreamSpan::WHOLE).is_err());
    }

    #[test]
    fn reordered_chunks_fail() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let ciphertext = encrypt(&engine, &dek, &[1u8; 40]);
        let mut swapped = ciphertext[32..64].to_vec();
        swapped.extend_from_slice(&ciphertext[..32]);
        swapped.extend_from_slice(&ciphertext[64..]);
        assert!(decrypt(&engine, &dek, swapped, StreamSpan::WHOLE).is_err());
    }

    #[test]
    fn partial_span_decrypts_middle_chunks() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let plaintext: Vec<u8> = (0..50u8).collect();
        let ciphertext = encrypt(&engine, &dek, &plaintext);

        let span = ciphertext[32..64].to_vec();
        assert_eq!(
            decrypt(&engine, &dek, span, StreamSpan::partial(1)).unwrap(),
            &plaintext[16..32]
        );

        let tail = ciphertext[64..].to_vec();
        assert_eq!(
            decrypt(&engine, &dek, tail, StreamSpan::partial(2)).unwrap(),
            &plaintext[32..]
        );
    }

    #[test]
    fn span_with_wrong_index_fails() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let ciphertext = encrypt(&engine, &dek, &[0u8; 50]);
        let span = ciphertext[32..64].to_vec();
        assert!(decrypt(&engine, &dek, span, StreamSpan::partial(0)).is_err());
    }

    #[test]
    fn decrypting_stream_destroys_key_at_end() {
        let engine = engine();
        let dek = KeyBytes::generate(32);
        let ciphertext = encrypt(&engine, &dek, b"abc");

        let owned = dek.clone();
        let handle = owned.get_bytes().unwrap();
        let mut stream = engine
            .decrypt(owned, Box::new(Cursor::new(ciphertext)), StreamSpan::WHOLE)
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert!(handle.is_zeroed());
    }

    #[test]
    fn rejects_wrong_key_length() {
        let engine = engine();
        assert!(engine
            .encrypt(KeyBytes::generate(16), Box::new(Cursor::new(Vec::new())))
            .is_err());
        assert!(ChunkedAesGcmEngine::new(0).is_err());
    }
}
