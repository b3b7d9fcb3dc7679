//! # chainlog
//!
//! A tamper-evident, append-only ledger. Records are appended to named
//! streams; each becomes an entry that is hash-linked to its predecessor and
//! signed, so any later modification, removal, or reordering is detectable.
//!
//! ## Overview
//!
//! - **Entry**: Immutable. Hashed over deterministic CBOR with Blake3 and
//!   signed with Ed25519 by the active key.
//! - **Stream**: An independent chain. Sequences start at 0 and are gapless.
//! - **Tip**: The newest entry's sequence and hash, cached per stream.
//! - **Verification**: Recomputes hashes, linkage, and signatures and
//!   reports the first break. Broken streams are quarantined.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chainlog::{Ledger, LedgerConfig};
//! use chainlog::core::{KeyId, KeyRing, Record, SequenceRange};
//! use chainlog::store::SqliteStore;
//!
//! async fn example() {
//!     let keys = KeyRing::generate(KeyId::new("signer-1").unwrap());
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!     let ledger = Ledger::open(store, keys, LedgerConfig::new("orders-ledger"))
//!         .await
//!         .unwrap();
//!
//!     let entry = ledger
//!         .append("orders", Record::new("order-1", "created"))
//!         .await
//!         .unwrap();
//!     assert_eq!(entry.sequence, 0);
//!
//!     let report = ledger
//!         .verify_chain("orders", SequenceRange::all())
//!         .await
//!         .unwrap();
//!     assert!(report.is_valid());
//! }
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod ledger;
pub mod signer;
mod tip_cache;
mod verify;

pub use chainlog_core as core;
pub use chainlog_store as store;

pub use config::{LedgerConfig, RetryPolicy};
pub use error::{LedgerError, Result};
pub use hooks::{PostAppendHook, PreAppendHook};
pub use ledger::{AppendStage, EntryRef, Ledger};
pub use signer::{KeyProvider, SharedKeyRing};

// Re-export commonly used types
pub use chainlog_core::{
    BreakReason, ChainTip, Entry, KeyId, KeyRing, Record, SequenceRange, VerificationReport,
};
pub use chainlog_store::{CommitOutcome, EntryPage, EntryQuery, Store};
