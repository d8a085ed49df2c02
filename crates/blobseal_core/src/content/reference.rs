//! Content references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, backend-scoped identifier of a stored blob.
///
/// References are issued by a backend on a successful store and never
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentReference(String);

impl ContentReference {
    /// Creates a reference from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh random reference.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the string form of the reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentReference {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_references_are_unique() {
        let a = ContentReference::generate();
        let b = ContentReference::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn display_matches_string_form() {
        let reference = ContentReference::new("blob-1");
        assert_eq!(reference.to_string(), "blob-1");
    }
}
