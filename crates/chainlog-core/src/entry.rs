//! Entry: one immutable, hash-linked, signed record within a stream.
//!
//! Entries are built in two steps. [`UnsignedEntry::link`] validates the
//! caller's [`Record`], assigns the next sequence from the chain tip and
//! computes the hash. Signing then turns it into an [`Entry`]. Once persisted
//! an entry is never modified.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, compute_hash};
use crate::crypto::{Blake3Hash, Ed25519Signature, Keypair};
use crate::error::CoreError;
use crate::stream::{next_link, validate_stream_name, ChainTip};
use crate::types::{validate_entry_id, KeyId};

/// The `prev_hash` of the first entry in every stream.
pub const GENESIS_HASH: Blake3Hash = Blake3Hash::ZERO;

/// What a caller appends: an id, opaque payload bytes and an optional
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Caller-supplied id, unique within the stream.
    pub id: String,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Advisory timestamp. Defaults to the wall clock at link time.
    pub timestamp: Option<i64>,
}

impl Record {
    /// A record carrying raw bytes.
    pub fn new(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            timestamp: None,
        }
    }

    /// A record carrying a JSON document in canonical form.
    pub fn json(id: impl Into<String>, value: &serde_json::Value) -> Result<Self, CoreError> {
        let payload = canonical_json(value)?;
        Ok(Self::new(id, payload))
    }

    /// Set the advisory timestamp (Unix milliseconds).
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate the record's id and payload size.
    pub fn validate(&self, max_payload_bytes: usize) -> Result<(), CoreError> {
        validate_entry_id(&self.id)?;
        if self.payload.len() > max_payload_bytes {
            return Err(CoreError::InvalidPayload(format!(
                "payload is {} bytes, limit is {}",
                self.payload.len(),
                max_payload_bytes
            )));
        }
        Ok(())
    }
}

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Caller-supplied id, unique within the stream.
    pub id: String,

    /// The stream this entry is chained in.
    pub stream: String,

    /// Gapless per-stream sequence starting at 0.
    pub sequence: u64,

    /// Unix milliseconds. Advisory only, not hashed.
    pub timestamp: i64,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Hash of the entry at `sequence - 1`, or [`GENESIS_HASH`].
    pub prev_hash: Blake3Hash,

    /// Blake3 over the canonical bytes of the hashed fields.
    pub hash: Blake3Hash,

    /// Ed25519 signature over the 32 hash bytes.
    pub signature: Ed25519Signature,

    /// The key that produced `signature`.
    pub signer_key_id: KeyId,
}

impl Entry {
    /// Recompute the hash from the entry's content.
    ///
    /// Verification always works from this value, never from the stored
    /// `hash` field alone.
    pub fn recompute_hash(&self) -> Result<Blake3Hash, CoreError> {
        compute_hash(&self.stream, self.sequence, &self.payload, &self.prev_hash)
    }

    /// Check if this is the first entry in its stream.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }

    /// The tip this entry produces.
    pub fn tip(&self) -> ChainTip {
        ChainTip::of(self)
    }

    /// Whether two entries carry the same chained content.
    ///
    /// Used to recognise an entry that was already committed by an earlier
    /// attempt; the signature is excluded since a retry may re-sign.
    pub fn same_content(&self, other: &Entry) -> bool {
        self.id == other.id
            && self.stream == other.stream
            && self.sequence == other.sequence
            && self.payload == other.payload
            && self.prev_hash == other.prev_hash
            && self.hash == other.hash
    }
}

/// An entry that is linked and hashed but not yet signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEntry {
    pub id: String,
    pub stream: String,
    pub sequence: u64,
    pub timestamp: i64,
    pub payload: Bytes,
    pub prev_hash: Blake3Hash,
    pub hash: Blake3Hash,
}

impl UnsignedEntry {
    /// Link a record onto the given tip and compute its hash.
    ///
    /// `now` supplies the timestamp when the record carries none.
    pub fn link(
        stream: &str,
        record: Record,
        tip: Option<&ChainTip>,
        now: i64,
    ) -> Result<Self, CoreError> {
        validate_stream_name(stream)?;
        validate_entry_id(&record.id)?;

        let (sequence, prev_hash) = next_link(tip);
        let hash = compute_hash(stream, sequence, &record.payload, &prev_hash)?;

        Ok(Self {
            id: record.id,
            stream: stream.to_string(),
            sequence,
            timestamp: record.timestamp.unwrap_or(now),
            payload: record.payload,
            prev_hash,
            hash,
        })
    }

    /// The tip this entry will produce once committed.
    pub fn tip(&self) -> ChainTip {
        ChainTip {
            stream: self.stream.clone(),
            last_sequence: self.sequence,
            last_hash: self.hash,
            last_timestamp: self.timestamp,
        }
    }

    /// Attach a signature produced elsewhere.
    pub fn with_signature(self, signature: Ed25519Signature, signer_key_id: KeyId) -> Entry {
        Entry {
            id: self.id,
            stream: self.stream,
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload: self.payload,
            prev_hash: self.prev_hash,
            hash: self.hash,
            signature,
            signer_key_id,
        }
    }

    /// Sign the hash with a local keypair.
    pub fn sign_with(self, keypair: &Keypair, key_id: KeyId) -> Entry {
        let signature = keypair.sign(self.hash.as_bytes());
        self.with_signature(signature, key_id)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key_id() -> KeyId {
        KeyId::new("k1").unwrap()
    }

    #[test]
    fn test_link_genesis() {
        let unsigned =
            UnsignedEntry::link("orders", Record::new("a", "A").at(10), None, 99).unwrap();

        assert_eq!(unsigned.sequence, 0);
        assert_eq!(unsigned.prev_hash, GENESIS_HASH);
        assert_eq!(unsigned.timestamp, 10);
        assert_eq!(
            unsigned.hash,
            compute_hash("orders", 0, b"A", &GENESIS_HASH).unwrap()
        );
    }

    #[test]
    fn test_link_follows_tip() {
        let keypair = Keypair::from_seed(&[7; 32]);
        let first = UnsignedEntry::link("orders", Record::new("a", "A"), None, 1)
            .unwrap()
            .sign_with(&keypair, key_id());

        let second =
            UnsignedEntry::link("orders", Record::new("b", "B"), Some(&first.tip()), 2).unwrap();

        assert_eq!(second.sequence, 1);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(second.timestamp, 2);
    }

    #[test]
    fn test_sign_with_signs_hash_bytes() {
        let keypair = Keypair::from_seed(&[7; 32]);
        let entry = UnsignedEntry::link("orders", Record::new("a", "A"), None, 1)
            .unwrap()
            .sign_with(&keypair, key_id());

        assert!(keypair
            .public_key()
            .verify(entry.hash.as_bytes(), &entry.signature));
        assert_eq!(entry.recompute_hash().unwrap(), entry.hash);
        assert!(entry.is_genesis());
    }

    #[test]
    fn test_link_rejects_bad_stream_and_id() {
        assert!(UnsignedEntry::link("bad stream", Record::new("a", "A"), None, 1).is_err());
        assert!(UnsignedEntry::link("orders", Record::new("", "A"), None, 1).is_err());
    }

    #[test]
    fn test_record_validate_payload_limit() {
        let record = Record::new("a", vec![0u8; 16]);
        assert!(record.validate(16).is_ok());
        assert!(matches!(
            record.validate(15),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_record_json_is_canonical() {
        let r1 = Record::json("a", &json!({"qty": 2, "sku": "x"})).unwrap();
        let r2 = Record::json("a", &json!({"sku": "x", "qty": 2})).unwrap();
        assert_eq!(r1.payload, r2.payload);
        assert!(Record::json("a", &json!({"price": 9.99})).is_err());
    }

    #[test]
    fn test_same_content_ignores_signature() {
        let unsigned = UnsignedEntry::link("orders", Record::new("a", "A"), None, 1).unwrap();
        let e1 = unsigned
            .clone()
            .sign_with(&Keypair::from_seed(&[1; 32]), key_id());
        let e2 = unsigned.with_signature(Ed25519Signature::ZERO, key_id());
        assert!(e1.same_content(&e2));
    }
}
