//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. Commits run under a
//! single write lock, so they are atomic.
//!
//! The `tamper_*` methods bypass the insert-only contract to simulate
//! out-of-band modification of storage in integrity tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use chainlog_core::{ChainTip, Entry, SequenceRange};

use crate::error::{ConflictKind, Result, StoreError};
use crate::traits::{
    same_position, tip_conflict, CommitOutcome, EntryPage, EntryQuery, Store,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Entries ordered by (stream, sequence).
    entries: BTreeMap<(String, u64), Entry>,

    /// Id index: (stream, id) -> sequence.
    ids: HashMap<(String, String), u64>,

    /// Persisted tip projections.
    tips: HashMap<String, ChainTip>,
}

impl MemoryStoreInner {
    fn insert(&mut self, entry: &Entry) -> Result<()> {
        let stream = entry.stream.as_str();
        if self.entries.contains_key(&(entry.stream.clone(), entry.sequence)) {
            return Err(StoreError::conflict(
                stream,
                ConflictKind::Sequence(entry.sequence),
            ));
        }
        if self.ids.contains_key(&(entry.stream.clone(), entry.id.clone())) {
            return Err(StoreError::conflict(stream, ConflictKind::Id(entry.id.clone())));
        }
        self.ids
            .insert((entry.stream.clone(), entry.id.clone()), entry.sequence);
        self.entries
            .insert((entry.stream.clone(), entry.sequence), entry.clone());
        Ok(())
    }

    fn remove(&mut self, stream: &str, sequence: u64) -> Option<Entry> {
        let removed = self.entries.remove(&(stream.to_string(), sequence))?;
        self.ids.remove(&(removed.stream.clone(), removed.id.clone()));
        Some(removed)
    }

    fn get(&self, stream: &str, sequence: u64) -> Option<&Entry> {
        self.entries.get(&(stream.to_string(), sequence))
    }

    fn stream_range(&self, stream: &str) -> impl DoubleEndedIterator<Item = &Entry> {
        let lo = (stream.to_string(), 0);
        let hi = (stream.to_string(), u64::MAX);
        self.entries.range(lo..=hi).map(|(_, e)| e)
    }

    fn commit(&mut self, entries: &[Entry], expected_tip: Option<&ChainTip>) -> Result<CommitOutcome> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Ok(CommitOutcome::Committed);
        };
        let stream = first.stream.as_str();
        let current = self.tips.get(stream);

        if !same_position(current, expected_tip) {
            let already = same_position(current, Some(&last.tip()))
                && entries.iter().all(|e| {
                    self.get(&e.stream, e.sequence)
                        .map_or(false, |stored| stored.same_content(e))
                });
            if already {
                return Ok(CommitOutcome::AlreadyCommitted);
            }
            return Err(tip_conflict(stream, expected_tip, current));
        }

        for (i, entry) in entries.iter().enumerate() {
            if let Err(err) = self.insert(entry) {
                for undo in entries[..i].iter().rev() {
                    self.remove(&undo.stream, undo.sequence);
                }
                return Err(err);
            }
        }
        self.tips.insert(stream.to_string(), last.tip());
        Ok(CommitOutcome::Committed)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Internal(format!("lock poisoned: {}", e)))
    }

    /// Overwrite the payload of a stored entry, leaving every other field.
    ///
    /// Returns false if no entry exists at that position.
    pub fn tamper_payload(&self, stream: &str, sequence: u64, payload: impl Into<Bytes>) -> bool {
        let Ok(mut inner) = self.write() else {
            return false;
        };
        match inner.entries.get_mut(&(stream.to_string(), sequence)) {
            Some(entry) => {
                entry.payload = payload.into();
                true
            }
            None => false,
        }
    }

    /// Delete a stored entry. The tip projection is left untouched.
    pub fn tamper_remove(&self, stream: &str, sequence: u64) -> Option<Entry> {
        self.write().ok()?.remove(stream, sequence)
    }

    /// Replace (or create) the entry at the given entry's position.
    pub fn tamper_replace(&self, entry: Entry) {
        if let Ok(mut inner) = self.write() {
            inner.remove(&entry.stream, entry.sequence);
            inner
                .ids
                .insert((entry.stream.clone(), entry.id.clone()), entry.sequence);
            inner
                .entries
                .insert((entry.stream.clone(), entry.sequence), entry);
        }
    }

    /// Drop the persisted tip of a stream.
    pub fn tamper_clear_tip(&self, stream: &str) -> Option<ChainTip> {
        self.write().ok()?.tips.remove(stream)
    }

    /// Number of entries across all streams.
    pub fn entry_count(&self) -> usize {
        self.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_entry(&self, entry: &Entry) -> Result<()> {
        self.write()?.insert(entry)
    }

    async fn get_latest_entry(&self, stream: &str) -> Result<Option<Entry>> {
        let inner = self.read()?;
        let latest = inner.stream_range(stream).next_back().cloned();
        Ok(latest)
    }

    async fn get_entry_by_id(&self, stream: &str, id: &str) -> Result<Option<Entry>> {
        let inner = self.read()?;
        Ok(inner
            .ids
            .get(&(stream.to_string(), id.to_string()))
            .and_then(|&seq| inner.get(stream, seq))
            .cloned())
    }

    async fn get_entry_by_sequence(&self, stream: &str, sequence: u64) -> Result<Option<Entry>> {
        Ok(self.read()?.get(stream, sequence).cloned())
    }

    async fn list_entries(
        &self,
        stream: &str,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let inner = self.read()?;
        let entries = inner
            .stream_range(stream)
            .filter(|e| range.contains(e.sequence))
            .take(limit)
            .cloned()
            .collect();
        Ok(entries)
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<EntryPage> {
        let inner = self.read()?;
        let matching: Vec<&Entry> = inner.entries.values().filter(|e| query.matches(e)).collect();

        let total = matching.len();
        let entries: Vec<Entry> = matching
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .cloned()
            .collect();
        let has_more = query.offset + entries.len() < total;

        Ok(EntryPage {
            entries,
            total: total as u64,
            has_more,
        })
    }

    async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> Result<()> {
        self.write()?.remove(stream, sequence);
        Ok(())
    }

    async fn get_tip(&self, stream: &str) -> Result<Option<ChainTip>> {
        Ok(self.read()?.tips.get(stream).cloned())
    }

    async fn put_tip(&self, tip: &ChainTip) -> Result<()> {
        self.write()?.tips.insert(tip.stream.clone(), tip.clone());
        Ok(())
    }

    async fn list_streams(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let streams: BTreeSet<String> = inner
            .entries
            .keys()
            .map(|(stream, _)| stream.clone())
            .chain(inner.tips.keys().cloned())
            .collect();
        Ok(streams.into_iter().collect())
    }

    async fn commit_entry(
        &self,
        entry: &Entry,
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        self.write()?.commit(std::slice::from_ref(entry), expected_tip)
    }

    async fn commit_batch(
        &self,
        entries: &[Entry],
        expected_tip: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        self.write()?.commit(entries, expected_tip)
    }
}
