//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for chainlog. It uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//! Commits run in an `IMMEDIATE` transaction, so an entry and its tip are
//! written together or not at all.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use chainlog_core::{
    now_millis, Blake3Hash, ChainTip, Ed25519Signature, Entry, KeyId, SequenceRange,
};

use crate::error::{ConflictKind, Result, StoreError};
use crate::migration;
use crate::traits::{
    same_position, tip_conflict, CommitOutcome, EntryPage, EntryQuery, Store,
};

/// How long a connection waits on a locked database before reporting `BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTRY_COLUMNS: &str =
    "stream, sequence, id, timestamp, payload, prev_hash, hash, signature, signer_key_id";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file if needed, switches it to WAL journaling and runs
    /// migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        migration::migrate(&mut conn)?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Internal(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("spawn_blocking failed: {}", e)))?
    }
}

/// SQLite integers are signed; clamp open-ended bounds.
fn seq_param(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn fixed<const N: usize>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, format!("{}-byte blob", N), Type::Blob))
}

// Helper to convert a row selected with ENTRY_COLUMNS to an Entry
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let sequence: i64 = row.get(1)?;
    let payload: Vec<u8> = row.get(4)?;
    let key_id: String = row.get(8)?;
    let signer_key_id = KeyId::new(key_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Entry {
        stream: row.get(0)?,
        sequence: sequence as u64,
        id: row.get(2)?,
        timestamp: row.get(3)?,
        payload: Bytes::from(payload),
        prev_hash: Blake3Hash(fixed::<32>(row, 5)?),
        hash: Blake3Hash(fixed::<32>(row, 6)?),
        signature: Ed25519Signature(fixed::<64>(row, 7)?),
        signer_key_id,
    })
}

fn row_to_tip(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChainTip> {
    let last_sequence: i64 = row.get(1)?;
    Ok(ChainTip {
        stream: row.get(0)?,
        last_sequence: last_sequence as u64,
        last_hash: Blake3Hash(fixed::<32>(row, 2)?),
        last_timestamp: row.get(3)?,
    })
}

fn select_by_sequence(conn: &Connection, stream: &str, sequence: u64) -> Result<Option<Entry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE stream = ?1 AND sequence = ?2"),
        params![stream, seq_param(sequence)],
        row_to_entry,
    )
    .optional()
    .map_err(StoreError::from)
}

fn select_tip(conn: &Connection, stream: &str) -> Result<Option<ChainTip>> {
    conn.query_row(
        "SELECT stream, last_sequence, last_hash, last_timestamp FROM tips WHERE stream = ?1",
        params![stream],
        row_to_tip,
    )
    .optional()
    .map_err(StoreError::from)
}

fn write_tip(conn: &Connection, tip: &ChainTip) -> Result<()> {
    conn.execute(
        "INSERT INTO tips (stream, last_sequence, last_hash, last_timestamp, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(stream) DO UPDATE SET
            last_sequence = excluded.last_sequence,
            last_hash = excluded.last_hash,
            last_timestamp = excluded.last_timestamp,
            updated_at = excluded.updated_at",
        params![
            tip.stream,
            seq_param(tip.last_sequence),
            tip.last_hash.0.as_slice(),
            tip.last_timestamp,
            now_millis(),
        ],
    )?;
    Ok(())
}

fn write_entry(conn: &Connection, entry: &Entry) -> Result<()> {
    let taken_seq: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE stream = ?1 AND sequence = ?2)",
        params![entry.stream, seq_param(entry.sequence)],
        |row| row.get(0),
    )?;
    if taken_seq {
        return Err(StoreError::conflict(
            &entry.stream,
            ConflictKind::Sequence(entry.sequence),
        ));
    }

    let taken_id: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE stream = ?1 AND id = ?2)",
        params![entry.stream, entry.id],
        |row| row.get(0),
    )?;
    if taken_id {
        return Err(StoreError::conflict(
            &entry.stream,
            ConflictKind::Id(entry.id.clone()),
        ));
    }

    conn.execute(
        "INSERT INTO entries (
            stream, sequence, id, timestamp, payload, prev_hash, hash,
            signature, signer_key_id, inserted_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.stream,
            seq_param(entry.sequence),
            entry.id,
            entry.timestamp,
            entry.payload.as_ref(),
            entry.prev_hash.0.as_slice(),
            entry.hash.0.as_slice(),
            entry.signature.0.as_slice(),
            entry.signer_key_id.as_str(),
            now_millis(),
        ],
    )?;
    Ok(())
}

fn commit_in_tx(
    conn: &mut Connection,
    entries: &[Entry],
    expected_tip: Option<&ChainTip>,
) -> Result<CommitOutcome> {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return Ok(CommitOutcome::Committed);
    };
    let stream = first.stream.as_str();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = select_tip(&tx, stream)?;

    if !same_position(current.as_ref(), expected_tip) {
        if same_position(current.as_ref(), Some(&last.tip())) {
            let mut all_present = true;
            for entry in entries {
                let stored = select_by_sequence(&tx, &entry.stream, entry.sequence)?;
                if !stored.map_or(false, |s| s.same_content(entry)) {
                    all_present = false;
                    break;
                }
            }
            if all_present {
                return Ok(CommitOutcome::AlreadyCommitted);
            }
        }
        return Err(tip_conflict(stream, expected_tip, current.as_ref()));
    }

    // Dropping the transaction on error rolls every write back.
    for entry in entries {
        write_entry(&tx, entry)?;
    }
    write_tip(&tx, &last.tip())?;
    tx.commit()?;
    Ok(CommitOutcome::Committed)
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_entry(&self, entry: &Entry) -> Result<()> {
        let entry = entry.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            write_entry(&tx, &entry)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_latest_entry(&self, stream: &str) -> Result<Option<Entry>> {
        let stream = stream.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries WHERE stream = ?1
                     ORDER BY sequence DESC LIMIT 1"
                ),
                params![stream],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_entry_by_id(&self, stream: &str, id: &str) -> Result<Option<Entry>> {
        let stream = stream.to_string();
        let id = id.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE stream = ?1 AND id = ?2"),
                params![stream, id],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_entry_by_sequence(&self, stream: &str, sequence: u64) -> Result<Option<Entry>> {
        let stream = stream.to_string();
        self.run(move |conn| select_by_sequence(conn, &stream, sequence))
            .await
    }

    async fn list_entries(
        &self,
        stream: &str,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let stream = stream.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE stream = ?1 AND sequence >= ?2 AND sequence <= ?3
                 ORDER BY sequence LIMIT ?4"
            ))?;
            let entries = stmt
                .query_map(
                    params![
                        stream,
                        seq_param(range.from),
                        seq_param(range.to.unwrap_or(u64::MAX)),
                        seq_param(limit as u64),
                    ],
                    row_to_entry,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<EntryPage> {
        let query = query.clone();
        self.run(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<Value> = Vec::new();

            if let Some(stream) = &query.stream {
                clauses.push("stream = ?");
                args.push(Value::Text(stream.clone()));
            }
            if let Some(id) = &query.id {
                clauses.push("id = ?");
                args.push(Value::Text(id.clone()));
            }
            if query.sequence.from > 0 {
                clauses.push("sequence >= ?");
                args.push(Value::Integer(seq_param(query.sequence.from)));
            }
            if let Some(to) = query.sequence.to {
                clauses.push("sequence <= ?");
                args.push(Value::Integer(seq_param(to)));
            }
            if let Some(from) = query.from_timestamp {
                clauses.push("timestamp >= ?");
                args.push(Value::Integer(from));
            }
            if let Some(to) = query.to_timestamp {
                clauses.push("timestamp <= ?");
                args.push(Value::Integer(to));
            }

            let filter = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM entries{filter}"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )?;

            let limit = query.effective_limit();
            let mut page_args = args.clone();
            page_args.push(Value::Integer(limit as i64));
            page_args.push(Value::Integer(seq_param(query.offset as u64)));

            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries{filter}
                 ORDER BY stream, sequence LIMIT ? OFFSET ?"
            ))?;
            let entries = stmt
                .query_map(params_from_iter(page_args.iter()), row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let total = total as u64;
            let has_more = ((query.offset + entries.len()) as u64) < total;
            Ok(EntryPage {
                entries,
                total,
                has_more,
            })
        })
        .await
    }

    async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> Result<()> {
        let stream = stream.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM entries WHERE stream = ?1 AND sequence = ?2",
                params![stream, seq_param(sequence)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_tip(&self, stream: &str) -> Result<Option<ChainTip>> {
        let stream = stream.to_string();
        self.run(move |conn| select_tip(conn, &stream)).await
    }

    async fn put_tip(&self, tip: &ChainTip) -> Result<()> {
        let tip = tip.clone();
        self.run(move |conn| write_tip(conn, &tip)).await
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT stream FROM entries UNION SELECT stream FROM tips ORDER BY 1",
            )?;
            let streams = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(streams)
        })
        .await
    }

    async fn commit_entry(
        &self,
        entry: &Entry,
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        self.commit_batch(std::slice::from_ref(entry), expected_tip)
            .await
    }

    async fn commit_batch(
        &self,
        entries: &[Entry],
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        let entries = entries.to_vec();
        let expected_tip = expected_tip.cloned();
        self.run(move |conn| commit_in_tx(conn, &entries, expected_tip.as_ref()))
            .await
    }
}
