//! # chainlog testkit
//!
//! Testing utilities for chainlog.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Canonical encodings pinned byte for byte
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A ready ledger, a failure-injecting store, and test hooks
//!
//! ## Golden Vectors
//!
//! ```rust
//! use chainlog_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hex) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, hex);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use chainlog_testkit::generators::{chain_from_params, ChainParams};
//!
//! proptest! {
//!     #[test]
//!     fn chain_links(params: ChainParams) {
//!         let entries = chain_from_params(&params);
//!         for pair in entries.windows(2) {
//!             prop_assert_eq!(pair[1].prev_hash, pair[0].hash);
//!         }
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use chainlog_testkit::TestLedger;
//!
//! let ledger = TestLedger::new().await;
//! let entries = ledger.append_all("orders", &["A", "B", "C"]).await;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    key_id, seeded_keyring, FlakyStore, MemoryLedger, RecordingHook, RejectEmpty, TestLedger,
};
pub use generators::{chain_from_params, ChainParams};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output from the chainlog crates.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chainlog=debug,chainlog_store=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
