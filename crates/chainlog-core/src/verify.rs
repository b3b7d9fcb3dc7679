//! Per-entry chain checks and the verification report.
//!
//! [`ChainCursor`] walks one stream in ascending sequence order. Each entry
//! is checked, in order, for:
//! 1. the expected next sequence (`SequenceGap`)
//! 2. a stored hash equal to the recomputed one (`HashMismatch`)
//! 3. a `prev_hash` equal to the predecessor's recomputed hash (`LinkageMismatch`)
//! 4. a signature valid under its `signer_key_id` (`SignatureInvalid`)
//!
//! The cursor does no I/O; the caller feeds it entries and resolved keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Blake3Hash, Ed25519PublicKey};
use crate::entry::{Entry, GENESIS_HASH};

/// Why a chain stopped verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakReason {
    /// The stored hash does not match the entry's content.
    HashMismatch,
    /// `prev_hash` does not match the predecessor's hash.
    LinkageMismatch,
    /// The signature does not verify, or the signing key is unknown.
    SignatureInvalid,
    /// An expected sequence is missing.
    SequenceGap,
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakReason::HashMismatch => "hash mismatch",
            BreakReason::LinkageMismatch => "linkage mismatch",
            BreakReason::SignatureInvalid => "signature invalid",
            BreakReason::SequenceGap => "sequence gap",
        };
        f.write_str(s)
    }
}

/// The first failing position of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    pub at: u64,
    pub reason: BreakReason,
}

/// Outcome of verifying a stream or a range of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// The stream that was verified.
    pub stream: String,

    /// First sequence of the verified range.
    pub from_sequence: u64,

    /// Highest sequence proven valid, if any.
    pub valid_through: Option<u64>,

    /// Sequence of the first failure, if any.
    pub broken_at: Option<u64>,

    /// Why the chain broke at `broken_at`.
    pub reason: Option<BreakReason>,

    /// Number of entries that passed every check.
    pub entries_checked: u64,

    /// The persisted tip disagreed with the newest verified entry.
    pub tip_mismatch: bool,
}

impl VerificationReport {
    /// Whether the chain itself verified without a break.
    pub fn is_valid(&self) -> bool {
        self.broken_at.is_none()
    }

    /// The break as a single value, if any.
    pub fn chain_break(&self) -> Option<ChainBreak> {
        match (self.broken_at, self.reason) {
            (Some(at), Some(reason)) => Some(ChainBreak { at, reason }),
            _ => None,
        }
    }
}

/// Incremental verifier for one stream.
#[derive(Debug, Clone)]
pub struct ChainCursor {
    stream: String,
    from_sequence: u64,
    expected_sequence: u64,
    prev_hash: Blake3Hash,
    valid_through: Option<u64>,
    checked: u64,
    failure: Option<ChainBreak>,
}

impl ChainCursor {
    /// Start at sequence 0, linked to the genesis hash.
    pub fn genesis(stream: impl Into<String>) -> Self {
        Self::resume(stream, 0, GENESIS_HASH)
    }

    /// Start at `from`, where `anchor` is the recomputed hash of entry `from - 1`.
    pub fn resume(stream: impl Into<String>, from: u64, anchor: Blake3Hash) -> Self {
        Self {
            stream: stream.into(),
            from_sequence: from,
            expected_sequence: from,
            prev_hash: anchor,
            valid_through: None,
            checked: 0,
            failure: None,
        }
    }

    /// The sequence the next entry must have.
    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    /// Whether the cursor already hit a failure.
    pub fn is_broken(&self) -> bool {
        self.failure.is_some()
    }

    /// Record a failure found outside the cursor, e.g. a missing anchor.
    pub fn fail(&mut self, at: u64, reason: BreakReason) {
        if self.failure.is_none() {
            self.failure = Some(ChainBreak { at, reason });
        }
    }

    /// Check the next entry.
    ///
    /// `key` is the public key resolved from the entry's `signer_key_id`, or
    /// `None` when the key is unknown. After the first failure every further
    /// call returns that failure unchanged.
    pub fn check(
        &mut self,
        entry: &Entry,
        key: Option<&Ed25519PublicKey>,
    ) -> Result<(), ChainBreak> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }

        if entry.sequence != self.expected_sequence {
            return Err(self.record(self.expected_sequence, BreakReason::SequenceGap));
        }

        let recomputed = match entry.recompute_hash() {
            Ok(hash) if hash == entry.hash => hash,
            _ => return Err(self.record(entry.sequence, BreakReason::HashMismatch)),
        };

        if entry.prev_hash != self.prev_hash {
            return Err(self.record(entry.sequence, BreakReason::LinkageMismatch));
        }

        let signed = key.map_or(false, |k| k.verify(recomputed.as_bytes(), &entry.signature));
        if !signed {
            return Err(self.record(entry.sequence, BreakReason::SignatureInvalid));
        }

        self.prev_hash = recomputed;
        self.valid_through = Some(entry.sequence);
        self.expected_sequence = entry.sequence + 1;
        self.checked += 1;
        Ok(())
    }

    /// The recomputed hash of the last entry that passed.
    pub fn last_hash(&self) -> Blake3Hash {
        self.prev_hash
    }

    /// Highest sequence proven valid so far.
    pub fn valid_through(&self) -> Option<u64> {
        self.valid_through
    }

    /// Close the walk and produce the report.
    pub fn finish(self) -> VerificationReport {
        VerificationReport {
            stream: self.stream,
            from_sequence: self.from_sequence,
            valid_through: self.valid_through,
            broken_at: self.failure.map(|f| f.at),
            reason: self.failure.map(|f| f.reason),
            entries_checked: self.checked,
            tip_mismatch: false,
        }
    }

    fn record(&mut self, at: u64, reason: BreakReason) -> ChainBreak {
        let failure = ChainBreak { at, reason };
        self.failure = Some(failure);
        failure
    }
}

/// Verify a complete, in-memory stream from genesis.
///
/// `resolve` maps a key id to its public key.
pub fn verify_entries<'a>(
    stream: &str,
    entries: impl IntoIterator<Item = &'a Entry>,
    resolve: impl Fn(&crate::types::KeyId) -> Option<Ed25519PublicKey>,
) -> VerificationReport {
    let mut cursor = ChainCursor::genesis(stream);
    for entry in entries {
        let key = resolve(&entry.signer_key_id);
        if cursor.check(entry, key.as_ref()).is_err() {
            break;
        }
    }
    cursor.finish()
}
