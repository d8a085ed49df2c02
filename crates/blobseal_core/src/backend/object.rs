//! Object-storage content store.
//!
//! [`ObjectClient`] is the boundary to an S3-style service: put, ranged get
//! and delete of whole objects. [`ObjectContentStore`] maps the service's
//! answers and errors onto the [`ContentStore`] contract.

use crate::content::{
    declared_size, ByteRange, ByteStream, ContentAccessor, ContentRange, ContentReader,
    ContentReference, ContentStore, RangeWindow,
};
use crate::error::{ContentError, ContentResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by an object-storage client.
#[derive(Debug, Error)]
pub enum ObjectClientError {
    /// The object does not exist.
    #[error("no such key: {key}")]
    NoSuchKey {
        /// The missing key.
        key: String,
    },

    /// The requested range cannot be served.
    #[error("invalid range (object size {object_size:?})")]
    InvalidRange {
        /// Object length, if the service reported it.
        object_size: Option<u64>,
    },

    /// The service answered with an error status.
    #[error("service error {status}: {message}")]
    Service {
        /// Status code.
        status: u16,
        /// Service message.
        message: String,
    },

    /// Reading the upload body failed.
    #[error("upload body failed: {0}")]
    Body(#[source] io::Error),

    /// The service could not be reached.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

/// Answer to a get-object request.
pub struct ObjectResponse {
    /// Object bytes, or the served range of them.
    pub body: ByteStream,
    /// Length of `body`, if reported.
    pub content_length: Option<u64>,
    /// The `Content-Range` header value if a range was served.
    pub content_range: Option<String>,
}

/// Minimal blocking object-storage client.
pub trait ObjectClient: Send + Sync {
    /// Uploads `body` as `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails. No object is created then.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn Read + Send),
    ) -> Result<(), ObjectClientError>;

    /// Downloads `key`, restricted to `range` (a `Range` header value) if
    /// given. Services may ignore the range; they then omit `content_range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is missing or cannot be served.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<&str>,
    ) -> Result<ObjectResponse, ObjectClientError>;

    /// Deletes `key`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails.
    fn delete_object(&self, bucket: &str, key: &str) -> Result<bool, ObjectClientError>;
}

/// A content store on top of an [`ObjectClient`].
///
/// Objects are named `prefix + reference`.
#[derive(Debug)]
pub struct ObjectContentStore<C> {
    client: C,
    bucket: String,
    prefix: String,
}

impl<C: ObjectClient> ObjectContentStore<C> {
    /// Creates a store writing to `bucket` with no key prefix.
    pub fn new(client: C, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The bucket objects are written to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key(&self, reference: &ContentReference) -> String {
        format!("{}{}", self.prefix, reference)
    }

    fn describe(&self, key: &str) -> String {
        format!("object {}/{key}", self.bucket)
    }

    fn map_write_error(error: ObjectClientError) -> ContentError {
        match error {
            ObjectClientError::Body(err) => ContentError::from(err),
            other => ContentError::Io(io::Error::other(other)),
        }
    }

    fn map_read_error(
        reference: &ContentReference,
        range: Option<ByteRange>,
        error: ObjectClientError,
    ) -> ContentError {
        match error {
            ObjectClientError::NoSuchKey { .. } => ContentError::not_found(reference),
            ObjectClientError::InvalidRange { object_size } => match range {
                Some(range) => ContentError::range_not_satisfiable(range, object_size),
                None => ContentError::unreadable(reference, "service rejected a full read as a range"),
            },
            other => ContentError::unreadable(reference, other.to_string()),
        }
    }
}

impl<C: ObjectClient> ContentStore for ObjectContentStore<C> {
    fn store(&self, content: &mut (dyn Read + Send)) -> ContentResult<ContentReference> {
        let reference = ContentReference::generate();
        let key = self.key(&reference);
        self.client
            .put_object(&self.bucket, &key, content)
            .map_err(Self::map_write_error)?;
        debug!(%reference, bucket = %self.bucket, %key, "stored object");
        Ok(reference)
    }

    fn read(&self, reference: &ContentReference) -> ContentResult<ContentReader> {
        let key = self.key(reference);
        let response = self
            .client
            .get_object(&self.bucket, &key, None)
            .map_err(|e| Self::map_read_error(reference, None, e))?;

        let content_range = response
            .content_range
            .as_deref()
            .map(ContentRange::parse)
            .transpose()
            .map_err(|e| ContentError::unreadable(reference, e.to_string()))?;
        let size = declared_size(content_range.as_ref(), response.content_length)
            .ok_or_else(|| ContentError::unreadable(reference, "service reported no length"))?;

        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), size, self.describe(&key)),
            Box::new(RangeWindow::new(response.body, reference.clone(), 0, size)),
        ))
    }

    fn read_range(
        &self,
        reference: &ContentReference,
        range: ByteRange,
    ) -> ContentResult<ContentReader> {
        range.validate()?;
        let key = self.key(reference);
        let response = self
            .client
            .get_object(&self.bucket, &key, Some(&range.to_header()))
            .map_err(|e| Self::map_read_error(reference, Some(range), e))?;

        let Some(header) = response.content_range.as_deref() else {
            // The service ignored the range and sent the whole object.
            let total = response.content_length.ok_or_else(|| {
                ContentError::unreadable(reference, "service ignored the range and reported no length")
            })?;
            let resolved = range.resolve(total)?;
            warn!(%reference, %range, "object service ignored range request, discarding prefix");
            return Ok(ContentReader::new(
                ContentAccessor::new(
                    reference.clone(),
                    resolved.size(),
                    format!("{} {resolved}", self.describe(&key)),
                ),
                Box::new(RangeWindow::new(
                    response.body,
                    reference.clone(),
                    resolved.start,
                    resolved.size(),
                )),
            ));
        };

        let served = ContentRange::parse(header)
            .map_err(|e| ContentError::unreadable(reference, e.to_string()))?;
        let Some(served_range) = served.range else {
            return Err(ContentError::range_not_satisfiable(range, served.total));
        };
        // With a known total the service must serve up to the clamped end.
        let end_matches = match served.total {
            Some(total) => served_range.end == range.end.min(total.saturating_sub(1)),
            None => served_range.end <= range.end,
        };
        if served_range.start != range.start || !end_matches {
            return Err(ContentError::unreadable(
                reference,
                format!("requested {range} but service answered {served}"),
            ));
        }
        let size = declared_size(Some(&served), response.content_length)
            .ok_or_else(|| ContentError::unreadable(reference, "service reported no length"))?;

        Ok(ContentReader::new(
            ContentAccessor::new(
                reference.clone(),
                size,
                format!("{} {served_range}", self.describe(&key)),
            ),
            Box::new(RangeWindow::new(response.body, reference.clone(), 0, size)),
        ))
    }

    fn delete(&self, reference: &ContentReference) -> ContentResult<bool> {
        let key = self.key(reference);
        self.client
            .delete_object(&self.bucket, &key)
            .map_err(Self::map_write_error)
    }
}

/// In-memory object service for tests.
///
/// Can be told to ignore range requests, like some S3-compatible services
/// do, or to become unreachable.
#[derive(Debug)]
pub struct MemoryObjectClient {
    objects: RwLock<HashMap<(String, String), Arc<[u8]>>>,
    honor_ranges: bool,
    available: AtomicBool,
}

impl Default for MemoryObjectClient {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            honor_ranges: true,
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryObjectClient {
    /// Creates a client that serves ranges natively.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client that answers range requests with the whole object.
    #[must_use]
    pub fn ignoring_ranges() -> Self {
        Self {
            honor_ranges: false,
            ..Self::default()
        }
    }

    /// Makes every call fail with a transport error while `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    fn check_available(&self) -> Result<(), ObjectClientError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ObjectClientError::Transport {
                message: "connection refused".to_string(),
            })
        }
    }
}

impl ObjectClient for MemoryObjectClient {
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn Read + Send),
    ) -> Result<(), ObjectClientError> {
        self.check_available()?;
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).map_err(ObjectClientError::Body)?;
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), bytes.into());
        Ok(())
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<&str>,
    ) -> Result<ObjectResponse, ObjectClientError> {
        self.check_available()?;
        let bytes = self
            .objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectClientError::NoSuchKey {
                key: key.to_string(),
            })?;
        let total = bytes.len() as u64;

        let range = match range {
            Some(header) if self.honor_ranges => Some(ByteRange::parse(header).map_err(|e| {
                ObjectClientError::Service {
                    status: 400,
                    message: e.to_string(),
                }
            })?),
            _ => None,
        };
        let Some(range) = range else {
            return Ok(ObjectResponse {
                body: Box::new(Cursor::new(bytes)),
                content_length: Some(total),
                content_range: None,
            });
        };

        let resolved = range
            .resolve(total)
            .map_err(|_| ObjectClientError::InvalidRange {
                object_size: Some(total),
            })?;
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(resolved.start);
        Ok(ObjectResponse {
            body: Box::new(cursor.take(resolved.size())),
            content_length: Some(resolved.size()),
            content_range: Some(ContentRange::new(resolved, Some(total)).to_string()),
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<bool, ObjectClientError> {
        self.check_available()?;
        Ok(self
            .objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some())
    }
}
