//! Error types for the ledger.

use chainlog_core::{BreakReason, CoreError};
use chainlog_store::{ConflictKind, StoreError};
use thiserror::Error;

/// Errors that can occur during ledger operations.
///
/// Every error from [`crate::Ledger::append`] leaves the stream's chain
/// exactly as it was before the call.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The record cannot be canonicalized or fails validation.
    #[error("{0}")]
    InvalidPayload(#[source] CoreError),

    /// A pre-append hook vetoed the record.
    #[error("rejected by {hook}: {reason}")]
    Rejected { hook: String, reason: String },

    /// The stream already holds an entry with this id.
    #[error("duplicate id {id:?} in stream {stream}")]
    DuplicateId { stream: String, id: String },

    /// The stream lock could not be acquired in time, or storage moved under
    /// the writer.
    #[error("concurrency conflict in stream {stream}: {detail}")]
    ConcurrencyConflict { stream: String, detail: String },

    /// The key provider could not produce a signature.
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// The storage port failed.
    #[error("storage failure: {source}")]
    StorageFailure {
        transient: bool,
        #[source]
        source: StoreError,
    },

    /// The stream's chain is broken; appends are blocked until released.
    #[error("chain integrity violation in stream {stream} at sequence {at}: {reason}")]
    ChainIntegrityViolation {
        stream: String,
        at: u64,
        reason: BreakReason,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A ledger invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::ConcurrencyConflict { .. } => true,
            LedgerError::StorageFailure { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<CoreError> for LedgerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownKey(_) | CoreError::KeyNotSigning(_) => {
                LedgerError::SigningFailure(err.to_string())
            }
            other => LedgerError::InvalidPayload(other),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                stream,
                kind: ConflictKind::Id(id),
            } => LedgerError::DuplicateId { stream, id },
            StoreError::Conflict { stream, kind } => LedgerError::ConcurrencyConflict {
                stream,
                detail: kind.to_string(),
            },
            other => LedgerError::StorageFailure {
                transient: other.is_transient(),
                source: other,
            },
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
