//! Domain newtypes with validation
//!
//! Resource identifiers and content hashes travel between the metadata tree,
//! the file cache and the remote service as opaque keys. Wrapping them keeps
//! the two from being swapped at call sites.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// ResourceId
// ============================================================================

/// Server-assigned identifier of a file or directory
///
/// Stable across renames and moves. The well-known local directories use
/// reserved identifiers in angle brackets (see [`crate::util`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new ResourceId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains control characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidResourceId(
                "Resource ID cannot be empty".to_string(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(DomainError::InvalidResourceId(format!(
                "Resource ID contains control characters: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Wraps a compile-time constant known to be valid
    ///
    /// Intended for reserved ids and test fixtures.
    pub fn from_static(id: &'static str) -> Self {
        debug_assert!(!id.is_empty() && !id.chars().any(char::is_control));
        Self(id.to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// Server-reported checksum of a file's content (MD5, lowercase hex)
///
/// Only emptiness and whitespace are validated: the cache treats the value
/// as an opaque version tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns error if the hash is empty or contains whitespace
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(DomainError::InvalidHash(
                "Content hash cannot be empty".to_string(),
            ));
        }
        if hash.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::InvalidHash(format!(
                "Content hash contains whitespace: {hash:?}"
            )));
        }
        Ok(Self(hash))
    }

    /// MD5 of `content`, the way the server computes it
    #[must_use]
    pub fn md5_of(content: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(content)))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
