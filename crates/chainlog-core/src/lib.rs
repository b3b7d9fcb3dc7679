//! # chainlog core
//!
//! Pure primitives for chainlog: entries, canonical hashing, keys, and
//! per-entry chain checks.
//!
//! This crate contains no I/O, no storage, no async. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Entry`] - One immutable, hash-linked, signed record in a stream
//! - [`Record`] - What a caller appends before it is linked
//! - [`ChainTip`] - The head of a stream's chain
//! - [`KeyRing`] - Active and retired signing keys, addressed by [`KeyId`]
//! - [`ChainCursor`] / [`VerificationReport`] - Chain verification
//!
//! ## Canonicalization
//!
//! Entry hashes are Blake3 over deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod keys;
pub mod stream;
pub mod types;
pub mod verify;

pub use canonical::{canonical_entry_bytes, canonical_json, compute_hash};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use entry::{now_millis, Entry, Record, UnsignedEntry, GENESIS_HASH};
pub use error::CoreError;
pub use keys::KeyRing;
pub use stream::{next_link, validate_stream_name, ChainTip, MAX_STREAM_LEN};
pub use types::{validate_entry_id, KeyId, SequenceRange, MAX_ENTRY_ID_LEN};
pub use verify::{verify_entries, BreakReason, ChainBreak, ChainCursor, VerificationReport};
