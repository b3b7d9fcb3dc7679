//! Strong type definitions for chainlog.
//!
//! Identifiers are newtypes so a key id can never be passed where a stream
//! name or entry id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Maximum length of a key id, in bytes.
pub const MAX_KEY_ID_LEN: usize = 64;

/// Maximum length of an entry id, in bytes.
pub const MAX_ENTRY_ID_LEN: usize = 256;

/// Identifies the key that produced an entry's signature.
///
/// Recorded on every entry so verification can resolve the right public key
/// after the active signing key has been rotated.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Create a key id, rejecting empty or oversized values.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_KEY_ID_LEN || id.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidKeyId(id));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for KeyId {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Check a caller-supplied entry id.
pub fn validate_entry_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::InvalidId {
            id: id.to_string(),
            reason: "must not be empty",
        });
    }
    if id.len() > MAX_ENTRY_ID_LEN {
        return Err(CoreError::InvalidId {
            id: id.to_string(),
            reason: "longer than 256 bytes",
        });
    }
    Ok(())
}

/// An inclusive range of sequences within one stream.
///
/// `to: None` means "through the newest entry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl SequenceRange {
    /// The whole stream.
    pub const fn all() -> Self {
        Self { from: 0, to: None }
    }

    /// From `from` through the newest entry.
    pub const fn starting_at(from: u64) -> Self {
        Self { from, to: None }
    }

    /// From `from` through `to`, both inclusive.
    pub const fn between(from: u64, to: u64) -> Self {
        Self { from, to: Some(to) }
    }

    /// Whether a sequence falls inside the range.
    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.from && self.to.map_or(true, |to| sequence <= to)
    }

    /// Whether the range can contain no sequence at all.
    pub fn is_empty(&self) -> bool {
        matches!(self.to, Some(to) if to < self.from)
    }
}
