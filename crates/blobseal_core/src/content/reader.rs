//! Content accessors and readers.

use crate::content::ContentReference;
use crate::error::{ContentError, ContentResult};
use std::fmt;
use std::io::{self, Read};

/// A single-consumer byte stream.
pub type ByteStream = Box<dyn Read + Send>;

/// Read-only metadata about deliverable content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAccessor {
    reference: ContentReference,
    size: u64,
    description: String,
}

impl ContentAccessor {
    /// Creates an accessor.
    pub fn new(reference: ContentReference, size: u64, description: impl Into<String>) -> Self {
        Self {
            reference,
            size,
            description: description.into(),
        }
    }

    /// The reference this accessor describes.
    #[must_use]
    pub fn reference(&self) -> &ContentReference {
        &self.reference
    }

    /// Number of bytes the accompanying stream delivers.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Human-readable description, e.g. where the bytes come from.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A [`ContentAccessor`] plus the stream that delivers its bytes.
///
/// The stream yields exactly [`size`](ContentAccessor::size) bytes unless
/// the backend fails mid-read.
pub struct ContentReader {
    accessor: ContentAccessor,
    stream: ByteStream,
}

impl ContentReader {
    /// Creates a reader from metadata and a stream.
    pub fn new(accessor: ContentAccessor, stream: ByteStream) -> Self {
        Self { accessor, stream }
    }

    /// Returns the metadata of this reader.
    #[must_use]
    pub fn accessor(&self) -> &ContentAccessor {
        &self.accessor
    }

    /// Shortcut for `accessor().reference()`.
    #[must_use]
    pub fn reference(&self) -> &ContentReference {
        self.accessor.reference()
    }

    /// Shortcut for `accessor().size()`.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.accessor.size()
    }

    /// Splits the reader into metadata and stream.
    #[must_use]
    pub fn into_parts(self) -> (ContentAccessor, ByteStream) {
        (self.accessor, self.stream)
    }

    /// Drains the stream into memory.
    ///
    /// # Errors
    ///
    /// Returns the typed error carried by a failing stream, or
    /// [`ContentError::Unreadable`] if the stream ends early or runs long.
    pub fn read_all(mut self) -> ContentResult<Vec<u8>> {
        let expected = self.accessor.size;
        let mut buf = Vec::with_capacity(usize::try_from(expected).unwrap_or(0).min(1 << 20));
        self.stream.read_to_end(&mut buf).map_err(ContentError::from)?;
        if buf.len() as u64 != expected {
            return Err(ContentError::unreadable(
                &self.accessor.reference,
                format!("stream delivered {} of {expected} bytes", buf.len()),
            ));
        }
        Ok(buf)
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

/// Skips a prefix of a stream and then yields exactly `len` bytes.
///
/// Used where a stream covers more than the requested range: decrypted
/// chunk-aligned spans and backends that ignore range requests. An inner
/// stream that ends early fails with [`io::ErrorKind::UnexpectedEof`]
/// carrying [`ContentError::Unreadable`].
pub(crate) struct RangeWindow<R> {
    inner: R,
    reference: ContentReference,
    skip: u64,
    remaining: u64,
}

impl<R: Read> RangeWindow<R> {
    pub(crate) fn new(inner: R, reference: ContentReference, skip: u64, len: u64) -> Self {
        Self {
            inner,
            reference,
            skip,
            remaining: len,
        }
    }

    fn truncated(&self) -> io::Error {
        let error = ContentError::unreadable(
            &self.reference,
            format!("stream ended {} bytes early", self.skip + self.remaining),
        );
        io::Error::new(io::ErrorKind::UnexpectedEof, error)
    }
}

impl<R: Read> Read for RangeWindow<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if self.skip > 0 {
            let skipped = io::copy(&mut (&mut self.inner).take(self.skip), &mut io::sink())?;
            self.skip -= skipped;
            if self.skip > 0 {
                return Err(self.truncated());
            }
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(self.truncated());
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader")
            .field("accessor", &self.accessor)
            .finish_non_exhaustive()
    }
}
