//! Wrapping key identifiers.

use crate::error::{ContentError, ContentResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a wrapping key id.
pub const MAX_KEY_ID_LEN: usize = 128;

/// Stable, human-inspectable identifier of one wrapping key (KEK).
///
/// Ids are printable ASCII without whitespace, e.g. `kek-2024-06`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WrappingKeyId(String);

impl WrappingKeyId {
    /// Creates an id.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::InvalidOperation`] if the id is empty, longer
    /// than [`MAX_KEY_ID_LEN`], or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> ContentResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_KEY_ID_LEN {
            return Err(ContentError::invalid_operation(format!(
                "wrapping key id must be 1..={MAX_KEY_ID_LEN} bytes, got {}",
                id.len()
            )));
        }
        if !id.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ContentError::invalid_operation(format!(
                "wrapping key id {id:?} must be printable ASCII"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id as bytes, used to bind wrapped keys to their KEK.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for WrappingKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WrappingKeyId {
    type Error = ContentError;

    fn try_from(id: String) -> ContentResult<Self> {
        Self::new(id)
    }
}

impl From<WrappingKeyId> for String {
    fn from(id: WrappingKeyId) -> Self {
        id.0
    }
}
