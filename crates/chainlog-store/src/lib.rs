//! # chainlog store
//!
//! Storage port for chainlog. Provides a trait-based interface for entry
//! and tip persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`CommitOutcome`] - Result of an atomic entry + tip commit
//! - [`EntryQuery`] / [`EntryPage`] - Filtered, paginated reads
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chainlog_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let tip = store.get_tip("orders").await.unwrap();
//!     assert!(tip.is_none());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Insert-only**: entries are never updated; uniqueness on
//!   `(stream, sequence)` and `(stream, id)`
//! - **Optimistic commit**: a commit names the tip it linked against and
//!   fails with a tip conflict if storage has moved on
//! - **Idempotent retry**: re-committing an already persisted entry reports
//!   `AlreadyCommitted`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{ConflictKind, Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    compensating_commit, holds, same_position, CommitOutcome, EntryPage, EntryQuery, Store,
    DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
};
