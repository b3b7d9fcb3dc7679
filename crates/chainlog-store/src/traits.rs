//! Store trait: the abstract interface for entry persistence.
//!
//! This trait keeps the ledger storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use chainlog_core::{ChainTip, Entry, SequenceRange};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConflictKind, Result, StoreError};

/// Page size used when a query does not set a limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Upper bound on a single query page.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// How a commit was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The entry (or batch) and its tip were written by this call.
    Committed,
    /// An earlier attempt already persisted the identical entry.
    AlreadyCommitted,
}

/// Filters for a read-only entry query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub stream: Option<String>,
    pub id: Option<String>,
    pub sequence: SequenceRange,
    /// Inclusive lower bound on the advisory timestamp.
    pub from_timestamp: Option<i64>,
    /// Inclusive upper bound on the advisory timestamp.
    pub to_timestamp: Option<i64>,
    /// `0` means [`DEFAULT_QUERY_LIMIT`].
    pub limit: usize,
    pub offset: usize,
}

impl EntryQuery {
    /// Query every entry of one stream.
    pub fn stream(stream: impl Into<String>) -> Self {
        Self {
            stream: Some(stream.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_sequence(mut self, range: SequenceRange) -> Self {
        self.sequence = range;
        self
    }

    pub fn with_timestamps(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.from_timestamp = from;
        self.to_timestamp = to;
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// The page size after defaulting and clamping.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        }
    }

    /// Whether an entry passes every filter. Ignores paging.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.stream.as_deref().map_or(true, |s| s == entry.stream)
            && self.id.as_deref().map_or(true, |id| id == entry.id)
            && self.sequence.contains(entry.sequence)
            && self.from_timestamp.map_or(true, |t| entry.timestamp >= t)
            && self.to_timestamp.map_or(true, |t| entry.timestamp <= t)
    }
}

/// One page of query results, ordered by stream then sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    /// Number of entries matching the filters, ignoring paging.
    pub total: u64,
    pub has_more: bool,
}

/// Whether two tips point at the same chain position.
///
/// Timestamps are advisory and not compared.
pub fn same_position(a: Option<&ChainTip>, b: Option<&ChainTip>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.stream == b.stream && a.last_sequence == b.last_sequence && a.last_hash == b.last_hash
        }
        _ => false,
    }
}

/// The Store trait: async interface for entry persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
///
/// # Design Notes
///
/// - **Insert-only**: entries are never updated or deleted through this
///   trait. The single exception is [`Store::revert_uncommitted_entry`],
///   which undoes an insert whose tip write failed.
/// - **Uniqueness**: `(stream, sequence)` and `(stream, id)` are unique.
/// - **Atomic commit**: [`Store::commit_entry`] writes an entry and its tip
///   together after checking the persisted tip. The default implementation
///   compensates with `insert_entry` / `put_tip` / `revert_uncommitted_entry`;
///   backends with transactions override it.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new entry.
    ///
    /// Fails with [`StoreError::Conflict`] when the sequence or the id is
    /// already taken in the stream.
    async fn insert_entry(&self, entry: &Entry) -> Result<()>;

    /// Get the entry with the highest sequence in a stream.
    async fn get_latest_entry(&self, stream: &str) -> Result<Option<Entry>>;

    /// Get an entry by its caller-supplied id.
    async fn get_entry_by_id(&self, stream: &str, id: &str) -> Result<Option<Entry>>;

    /// Get an entry by its position in a stream.
    async fn get_entry_by_sequence(&self, stream: &str, sequence: u64) -> Result<Option<Entry>>;

    /// List entries of a stream within `range`, ascending, at most `limit`.
    async fn list_entries(
        &self,
        stream: &str,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Entry>>;

    /// Filtered, paginated read across streams.
    async fn query_entries(&self, query: &EntryQuery) -> Result<EntryPage>;

    /// Undo the insert of an entry whose tip was never written.
    ///
    /// Only the compensating commit path calls this.
    async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Tip Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the persisted tip projection of a stream.
    async fn get_tip(&self, stream: &str) -> Result<Option<ChainTip>>;

    /// Write the tip projection of a stream.
    async fn put_tip(&self, tip: &ChainTip) -> Result<()>;

    /// List every stream that has entries or a tip.
    async fn list_streams(&self) -> Result<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Commit Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist an entry and its tip as one unit.
    ///
    /// `expected_tip` is the tip the entry was linked against. If the
    /// persisted tip differs the commit fails with a tip conflict, unless the
    /// persisted state already holds this exact entry, in which case the
    /// result is [`CommitOutcome::AlreadyCommitted`].
    async fn commit_entry(
        &self,
        entry: &Entry,
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        self.commit_batch(std::slice::from_ref(entry), expected_tip)
            .await
    }

    /// Persist a run of consecutive entries and the tip of the last one.
    ///
    /// Either all entries become visible with the new tip or none do.
    async fn commit_batch(
        &self,
        entries: &[Entry],
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        compensating_commit(self, entries, expected_tip).await
    }
}

#[async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    async fn insert_entry(&self, entry: &Entry) -> Result<()> {
        (**self).insert_entry(entry).await
    }

    async fn get_latest_entry(&self, stream: &str) -> Result<Option<Entry>> {
        (**self).get_latest_entry(stream).await
    }

    async fn get_entry_by_id(&self, stream: &str, id: &str) -> Result<Option<Entry>> {
        (**self).get_entry_by_id(stream, id).await
    }

    async fn get_entry_by_sequence(&self, stream: &str, sequence: u64) -> Result<Option<Entry>> {
        (**self).get_entry_by_sequence(stream, sequence).await
    }

    async fn list_entries(
        &self,
        stream: &str,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        (**self).list_entries(stream, range, limit).await
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<EntryPage> {
        (**self).query_entries(query).await
    }

    async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> Result<()> {
        (**self).revert_uncommitted_entry(stream, sequence).await
    }

    async fn get_tip(&self, stream: &str) -> Result<Option<ChainTip>> {
        (**self).get_tip(stream).await
    }

    async fn put_tip(&self, tip: &ChainTip) -> Result<()> {
        (**self).put_tip(tip).await
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        (**self).list_streams().await
    }

    async fn commit_entry(
        &self,
        entry: &Entry,
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        (**self).commit_entry(entry, expected_tip).await
    }

    async fn commit_batch(
        &self,
        entries: &[Entry],
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        (**self).commit_batch(entries, expected_tip).await
    }
}

/// Commit through `insert_entry`, `put_tip` and `revert_uncommitted_entry`.
///
/// The default [`Store::commit_batch`] for backends without transactions.
/// Inserted entries are reverted when a later insert or the tip write fails.
/// Entries left behind by an earlier attempt whose revert also failed are
/// accepted when their content matches.
pub async fn compensating_commit<S: Store + ?Sized>(
    store: &S,
    entries: &[Entry],
    expected_tip: Option<&ChainTip>,
) -> Result<CommitOutcome> {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return Ok(CommitOutcome::Committed);
    };
    let stream = first.stream.as_str();

    let current = store.get_tip(stream).await?;
    if !same_position(current.as_ref(), expected_tip) {
        if same_position(current.as_ref(), Some(&last.tip())) && holds_all(store, entries).await? {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        return Err(tip_conflict(stream, expected_tip, current.as_ref()));
    }

    let mut inserted: Vec<u64> = Vec::with_capacity(entries.len());
    let mut resumed = false;
    for entry in entries {
        let err = match store.insert_entry(entry).await {
            Ok(()) => {
                inserted.push(entry.sequence);
                continue;
            }
            Err(err) => err,
        };
        let leftover = matches!(
            err,
            StoreError::Conflict {
                kind: ConflictKind::Sequence(_),
                ..
            }
        ) && matches!(holds(store, entry).await, Ok(true));
        if leftover {
            resumed = true;
            continue;
        }
        revert_all(store, stream, &inserted).await;
        return Err(err);
    }

    if let Err(err) = store.put_tip(&last.tip()).await {
        revert_all(store, stream, &inserted).await;
        return Err(err);
    }

    Ok(if resumed && inserted.is_empty() {
        CommitOutcome::AlreadyCommitted
    } else {
        CommitOutcome::Committed
    })
}

/// Whether the store holds an entry with the same chained content.
pub async fn holds<S: Store + ?Sized>(store: &S, entry: &Entry) -> Result<bool> {
    Ok(store
        .get_entry_by_sequence(&entry.stream, entry.sequence)
        .await?
        .map_or(false, |stored| stored.same_content(entry)))
}

async fn holds_all<S: Store + ?Sized>(store: &S, entries: &[Entry]) -> Result<bool> {
    for entry in entries {
        if !holds(store, entry).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn revert_all<S: Store + ?Sized>(store: &S, stream: &str, sequences: &[u64]) {
    for &sequence in sequences.iter().rev() {
        if let Err(err) = store.revert_uncommitted_entry(stream, sequence).await {
            warn!(stream, sequence, error = %err, "failed to revert uncommitted entry");
        }
    }
}

pub(crate) fn tip_conflict(
    stream: &str,
    expected: Option<&ChainTip>,
    actual: Option<&ChainTip>,
) -> StoreError {
    StoreError::conflict(
        stream,
        ConflictKind::Tip {
            expected: expected.map(|t| t.last_sequence),
            actual: actual.map(|t| t.last_sequence),
        },
    )
}
