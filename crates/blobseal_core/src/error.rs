//! Error types for content storage and key management.

use crate::content::{ByteRange, ContentReference};
use crate::keys::WrappingKeyId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for content operations.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors that can occur while storing, reading or decrypting content.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The reference is unknown to the backend.
    #[error("content not found: {reference}")]
    NotFound {
        /// The reference that was looked up.
        reference: ContentReference,
    },

    /// The backend is reachable but cannot produce the bytes.
    #[error("content unreadable: {reference}: {message}")]
    Unreadable {
        /// The reference that could not be served.
        reference: ContentReference,
        /// Description of the failure.
        message: String,
    },

    /// The byte range is malformed or lies outside the object.
    #[error("range not satisfiable: {range}{}", .length.map(|l| format!(" (length {l})")).unwrap_or_default())]
    RangeNotSatisfiable {
        /// The requested range.
        range: ByteRange,
        /// The object length, when known.
        length: Option<u64>,
    },

    /// A range request could not be parsed.
    #[error("malformed range: {header:?}")]
    MalformedRange {
        /// The offending request or response text.
        header: String,
    },

    /// No wrapping key could unwrap the data-encryption key.
    #[error(transparent)]
    Unwrap(#[from] UnwrapError),

    /// The DEK unwrapped but the ciphertext failed integrity or format checks.
    #[error("decryption failed: {message}")]
    Decryption {
        /// Description of the failure.
        message: String,
    },

    /// Encryption of a content stream failed.
    #[error("encryption failed: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// Key material was accessed after it was destroyed.
    #[error("key destroyed")]
    KeyDestroyed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Wrapped key records could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Components were combined with incompatible settings.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the mismatch.
        message: String,
    },
}

impl ContentError {
    /// Creates a not-found error.
    pub fn not_found(reference: &ContentReference) -> Self {
        Self::NotFound {
            reference: reference.clone(),
        }
    }

    /// Creates an unreadable-content error.
    pub fn unreadable(reference: &ContentReference, message: impl Into<String>) -> Self {
        Self::Unreadable {
            reference: reference.clone(),
            message: message.into(),
        }
    }

    /// Creates a range-not-satisfiable error.
    pub fn range_not_satisfiable(range: ByteRange, length: Option<u64>) -> Self {
        Self::RangeNotSatisfiable { range, length }
    }

    /// Creates a malformed-range error.
    pub fn malformed_range(header: impl Into<String>) -> Self {
        Self::MalformedRange {
            header: header.into(),
        }
    }

    /// Creates a decryption error.
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the content could not be served at all,
    /// whether because it is missing or because the backend failed.
    #[must_use]
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Unreadable { .. })
    }

    /// Returns true for range-not-satisfiable errors, including ranges
    /// that could not be parsed at all.
    #[must_use]
    pub fn is_range_not_satisfiable(&self) -> bool {
        matches!(
            self,
            Self::RangeNotSatisfiable { .. } | Self::MalformedRange { .. }
        )
    }

    /// Wraps this error into an [`io::Error`] so it can travel through a
    /// `Read` implementation. [`ContentError::from`] recovers it.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl From<io::Error> for ContentError {
    fn from(err: io::Error) -> Self {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<ContentError>())
        {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<ContentError>() {
                Ok(content) => *content,
                Err(inner) => Self::Io(io::Error::new(kind, inner)),
            },
            None => Self::Io(io::Error::from(kind)),
        }
    }
}

/// Why a single wrapping key failed to unwrap a DEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwrapReason {
    /// The key id is not (or no longer) in the key ring.
    UnknownKey,
    /// The wrapped bytes failed authentication under this key.
    Rejected,
    /// The unwrapped DEK has the wrong length for the engine.
    InvalidLength {
        /// Expected DEK length.
        expected: usize,
        /// Actual unwrapped length.
        actual: usize,
    },
    /// The wrapping key's own material was unavailable.
    KeyUnavailable,
}

impl fmt::Display for UnwrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => f.write_str("unknown wrapping key"),
            Self::Rejected => f.write_str("wrapped key rejected"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "unwrapped key has length {actual}, expected {expected}")
            }
            Self::KeyUnavailable => f.write_str("wrapping key material unavailable"),
        }
    }
}

/// Failure to unwrap a data-encryption key.
///
/// Aggregates own their children explicitly, so a chain of attempts can be
/// inspected after the fact with [`failed_key_ids`](Self::failed_key_ids).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnwrapError {
    /// A specific wrapping key could not unwrap the DEK.
    #[error("key unwrap failed for {key_id}: {reason}")]
    Key {
        /// The wrapping key that failed.
        key_id: WrappingKeyId,
        /// Why it failed.
        reason: UnwrapReason,
    },

    /// Every candidate failed.
    #[error("no wrapping key could unwrap the data key (tried {})", display_ids(.failures))]
    Aggregate {
        /// Individual failures in the order they were attempted.
        failures: Vec<UnwrapError>,
    },
}

impl UnwrapError {
    /// Creates a failure tagged with a single key.
    pub fn key(key_id: WrappingKeyId, reason: UnwrapReason) -> Self {
        Self::Key { key_id, reason }
    }

    /// Returns every failed wrapping key id, flattening nested aggregates
    /// depth-first in attempt order.
    #[must_use]
    pub fn failed_key_ids(&self) -> Vec<WrappingKeyId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<WrappingKeyId>) {
        match self {
            Self::Key { key_id, .. } => ids.push(key_id.clone()),
            Self::Aggregate { failures } => {
                for failure in failures {
                    failure.collect_ids(ids);
                }
            }
        }
    }

    /// Returns the leaf failures, flattened.
    #[must_use]
    pub fn leaves(&self) -> Vec<(&WrappingKeyId, &UnwrapReason)> {
        match self {
            Self::Key { key_id, reason } => vec![(key_id, reason)],
            Self::Aggregate { failures } => failures.iter().flat_map(Self::leaves).collect(),
        }
    }
}

fn display_ids(failures: &[UnwrapError]) -> String {
    let ids: Vec<String> = failures
        .iter()
        .flat_map(UnwrapError::failed_key_ids)
        .map(|id| id.to_string())
        .collect();
    if ids.is_empty() {
        "no keys".to_string()
    } else {
        ids.join(", ")
    }
}
