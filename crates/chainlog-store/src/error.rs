//! Error types for the store module.

use std::fmt;

use thiserror::Error;

/// What a write collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// An entry already exists at this sequence.
    Sequence(u64),
    /// An entry with this id already exists in the stream.
    Id(String),
    /// The persisted tip is not the one the writer linked against.
    Tip {
        expected: Option<u64>,
        actual: Option<u64>,
    },
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Sequence(seq) => write!(f, "sequence {} already taken", seq),
            ConflictKind::Id(id) => write!(f, "id {:?} already used", id),
            ConflictKind::Tip { expected, actual } => {
                write!(f, "tip moved: expected {:?}, found {:?}", expected, actual)
            }
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A uniqueness or optimistic-concurrency check failed.
    #[error("conflict in stream {stream}: {kind}")]
    Conflict { stream: String, kind: ConflictKind },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend is temporarily unable to serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The adapter itself failed (poisoned lock, lost worker thread).
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// SQLite `BUSY`/`LOCKED` and [`StoreError::Unavailable`] are transient;
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Whether this is an optimistic tip check failure.
    pub fn is_tip_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict {
                kind: ConflictKind::Tip { .. },
                ..
            }
        )
    }

    pub(crate) fn conflict(stream: &str, kind: ConflictKind) -> Self {
        StoreError::Conflict {
            stream: stream.to_string(),
            kind,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
