//! Append hooks.
//!
//! Pre-append hooks run in registration order before the stream is locked
//! and may veto a record. Post-append hooks run after the entry is durable
//! and the lock is released; their failures are logged and never undo the
//! append.

use chainlog_core::{Entry, Record};

/// Inspects a record before it is linked.
pub trait PreAppendHook: Send + Sync {
    /// Name used in [`crate::LedgerError::Rejected`].
    fn name(&self) -> &str;

    /// Return `Err(reason)` to reject the record.
    fn before_append(&self, stream: &str, record: &Record) -> Result<(), String>;
}

/// Observes an entry once it is persisted.
pub trait PostAppendHook: Send + Sync {
    fn name(&self) -> &str;

    fn after_append(&self, entry: &Entry) -> anyhow::Result<()>;
}
