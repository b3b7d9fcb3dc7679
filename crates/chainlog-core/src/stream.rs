//! Stream: an independently chained partition of the ledger.
//!
//! Each stream name owns its own hash chain starting at sequence 0. The
//! [`ChainTip`] is a projection of the newest entry in a stream, kept so the
//! append path does not have to read the full entry to link the next one.

use serde::{Deserialize, Serialize};

use crate::crypto::Blake3Hash;
use crate::entry::{Entry, GENESIS_HASH};
use crate::error::CoreError;

/// Maximum length of a stream name, in bytes.
pub const MAX_STREAM_LEN: usize = 128;

/// Check a stream name.
///
/// Names are non-empty, at most 128 bytes, and restricted to ASCII
/// alphanumerics plus `.`, `_`, `:` and `-`.
pub fn validate_stream_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::InvalidStream {
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.len() > MAX_STREAM_LEN {
        return Err(CoreError::InvalidStream {
            name: name.to_string(),
            reason: "longer than 128 bytes",
        });
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-');
    if !name.chars().all(allowed) {
        return Err(CoreError::InvalidStream {
            name: name.to_string(),
            reason: "contains characters outside [A-Za-z0-9._:-]",
        });
    }
    Ok(())
}

/// The head of a stream's chain.
///
/// Always reconstructable from the highest-sequence entry; never authoritative
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// The stream this tip belongs to.
    pub stream: String,

    /// Sequence of the newest entry.
    pub last_sequence: u64,

    /// Hash of the newest entry.
    pub last_hash: Blake3Hash,

    /// Timestamp of the newest entry (Unix milliseconds).
    pub last_timestamp: i64,
}

impl ChainTip {
    /// Build the tip that an entry produces once it is the newest in its stream.
    pub fn of(entry: &Entry) -> Self {
        Self {
            stream: entry.stream.clone(),
            last_sequence: entry.sequence,
            last_hash: entry.hash,
            last_timestamp: entry.timestamp,
        }
    }

    /// The sequence the next entry must take.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }
}

/// Where the next entry of a stream links to.
///
/// An empty stream starts at sequence 0 with the genesis hash.
pub fn next_link(tip: Option<&ChainTip>) -> (u64, Blake3Hash) {
    match tip {
        Some(tip) => (tip.next_sequence(), tip.last_hash),
        None => (0, GENESIS_HASH),
    }
}
