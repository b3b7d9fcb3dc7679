//! The Ledger: append pipeline, reads, and tip cache ownership.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chainlog_core::{
    now_millis, validate_stream_name, ChainTip, Entry, Record, UnsignedEntry,
};
use chainlog_store::{CommitOutcome, EntryPage, EntryQuery, Store, StoreError};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::hooks::{PostAppendHook, PreAppendHook};
use crate::signer::KeyProvider;
use crate::tip_cache::TipCache;

/// Steps of one append attempt, named in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStage {
    Idle,
    Locked,
    TipResolved,
    Linked,
    Signed,
    Persisted,
    CacheUpdated,
    Done,
    Failed,
}

impl fmt::Display for AppendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppendStage::Idle => "idle",
            AppendStage::Locked => "locked",
            AppendStage::TipResolved => "tip_resolved",
            AppendStage::Linked => "linked",
            AppendStage::Signed => "signed",
            AppendStage::Persisted => "persisted",
            AppendStage::CacheUpdated => "cache_updated",
            AppendStage::Done => "done",
            AppendStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How [`Ledger::get_entry`] addresses an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef {
    Id(String),
    Sequence(u64),
}

impl From<u64> for EntryRef {
    fn from(sequence: u64) -> Self {
        EntryRef::Sequence(sequence)
    }
}

impl From<&str> for EntryRef {
    fn from(id: &str) -> Self {
        EntryRef::Id(id.to_string())
    }
}

impl From<String> for EntryRef {
    fn from(id: String) -> Self {
        EntryRef::Id(id)
    }
}

/// A tamper-evident, append-only ledger over a [`Store`].
///
/// Provides:
/// - Appending records to per-stream hash chains, signed by a [`KeyProvider`]
/// - Reading entries by id, sequence, or filtered query
/// - Verifying chains (see [`Ledger::verify_chain`])
///
/// Appends to one stream are serialized; different streams proceed
/// concurrently. Reads never take the append lock.
pub struct Ledger<S: Store, K: KeyProvider> {
    pub(crate) store: Arc<S>,
    pub(crate) keys: Arc<K>,
    pub(crate) config: LedgerConfig,
    pub(crate) tips: TipCache,
    pre_hooks: Vec<Arc<dyn PreAppendHook>>,
    post_hooks: Vec<Arc<dyn PostAppendHook>>,
}

impl<S: Store, K: KeyProvider> Ledger<S, K> {
    /// Open a ledger over a store.
    ///
    /// With `verify_on_open` every stream is verified first and the tip
    /// cache is seeded from the verified tips. Broken streams are
    /// quarantined, not fatal to opening.
    pub async fn open(store: S, keys: K, config: LedgerConfig) -> Result<Self> {
        config.validate()?;

        let ledger = Self {
            store: Arc::new(store),
            keys: Arc::new(keys),
            config,
            tips: TipCache::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        };

        if ledger.config.verify_on_open {
            let reports = ledger.verify_all().await?;
            let broken = reports.iter().filter(|r| !r.is_valid()).count();
            info!(
                ledger_id = %ledger.config.ledger_id,
                streams = reports.len(),
                broken,
                "opened ledger"
            );
        } else {
            info!(ledger_id = %ledger.config.ledger_id, "opened ledger without verification");
        }

        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Register a hook that runs before every append, after those already
    /// registered.
    pub fn add_pre_append_hook(&mut self, hook: Arc<dyn PreAppendHook>) {
        self.pre_hooks.push(hook);
    }

    /// Register a hook that runs after every successful append.
    pub fn add_post_append_hook(&mut self, hook: Arc<dyn PostAppendHook>) {
        self.post_hooks.push(hook);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a record to a stream, returning the persisted entry.
    pub async fn append(&self, stream: &str, record: Record) -> Result<Entry> {
        let entries = self.run_append(stream, vec![record]).await?;
        match <[Entry; 1]>::try_from(entries) {
            Ok([entry]) => Ok(entry),
            Err(entries) => Err(LedgerError::Internal(format!(
                "single append produced {} entries",
                entries.len()
            ))),
        }
    }

    /// Append several records under one lock hold.
    ///
    /// The records get consecutive sequences and are committed together:
    /// either all of them are persisted or none is.
    pub async fn append_batch(&self, stream: &str, records: Vec<Record>) -> Result<Vec<Entry>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.run_append(stream, records).await
    }

    async fn run_append(&self, stream: &str, records: Vec<Record>) -> Result<Vec<Entry>> {
        debug!(stream, records = records.len(), stage = %AppendStage::Idle, "append requested");

        validate_stream_name(stream)?;
        for record in &records {
            record.validate(self.config.max_payload_bytes)?;
        }
        for hook in &self.pre_hooks {
            for record in &records {
                hook.before_append(stream, record)
                    .map_err(|reason| LedgerError::Rejected {
                        hook: hook.name().to_string(),
                        reason,
                    })?;
            }
        }

        let entries = match self.locked_append(stream, records).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(stream, stage = %AppendStage::Failed, error = %err, "append failed");
                return Err(err);
            }
        };

        for entry in &entries {
            for hook in &self.post_hooks {
                if let Err(err) = hook.after_append(entry) {
                    warn!(
                        stream,
                        sequence = entry.sequence,
                        hook = hook.name(),
                        error = %err,
                        "post-append hook failed"
                    );
                }
            }
        }

        Ok(entries)
    }

    /// Everything between taking and releasing the stream lock.
    async fn locked_append(&self, stream: &str, records: Vec<Record>) -> Result<Vec<Entry>> {
        let slot = self.tips.slot(stream);
        let mut cached = tokio::time::timeout(self.config.lock_timeout, slot.lock())
            .await
            .map_err(|_| LedgerError::ConcurrencyConflict {
                stream: stream.to_string(),
                detail: format!("stream lock not acquired within {:?}", self.config.lock_timeout),
            })?;
        debug!(stream, stage = %AppendStage::Locked, "stream locked");

        if let Some(found) = self.tips.quarantined(stream) {
            return Err(LedgerError::ChainIntegrityViolation {
                stream: stream.to_string(),
                at: found.at,
                reason: found.reason,
            });
        }

        let expected = match cached.as_ref() {
            Some(tip) => {
                debug!(stream, sequence = tip.last_sequence, "tip cache hit");
                Some(tip.clone())
            }
            None => {
                let latest = self.storage(self.store.get_latest_entry(stream)).await?;
                debug!(stream, found = latest.is_some(), "tip cache miss, read from storage");
                let tip = latest.as_ref().map(Entry::tip);
                *cached = tip.clone();
                tip
            }
        };
        debug!(
            stream,
            sequence = expected.as_ref().map(|t| t.last_sequence),
            stage = %AppendStage::TipResolved,
            "tip resolved"
        );

        let now = now_millis();
        let mut entries = Vec::with_capacity(records.len());
        let mut link_to = expected.clone();
        for record in records {
            let unsigned = UnsignedEntry::link(stream, record, link_to.as_ref(), now)?;
            debug!(stream, sequence = unsigned.sequence, stage = %AppendStage::Linked, "entry linked");

            let entry = self.sign(unsigned).await?;
            debug!(
                stream,
                sequence = entry.sequence,
                key_id = %entry.signer_key_id,
                stage = %AppendStage::Signed,
                "entry signed"
            );

            link_to = Some(entry.tip());
            entries.push(entry);
        }

        match self.persist(stream, &entries, expected.as_ref()).await {
            Ok(outcome) => {
                debug!(stream, ?outcome, stage = %AppendStage::Persisted, "entries persisted");
            }
            Err(err) => {
                if matches!(err, LedgerError::ConcurrencyConflict { .. }) {
                    // Storage moved under the cached tip.
                    *cached = None;
                    warn!(stream, error = %err, "tip mismatch on commit, evicted cached tip");
                }
                return Err(err);
            }
        }

        *cached = link_to;
        debug!(stream, stage = %AppendStage::CacheUpdated, "tip cache updated");
        drop(cached);

        if let Some(last) = entries.last() {
            debug!(stream, sequence = last.sequence, stage = %AppendStage::Done, "append done");
        }
        Ok(entries)
    }

    async fn sign(&self, unsigned: UnsignedEntry) -> Result<Entry> {
        let limit = self.config.signing_timeout;
        let (key_id, signature) = tokio::time::timeout(limit, self.keys.sign_active(&unsigned.hash))
            .await
            .map_err(|_| LedgerError::SigningFailure(format!("key provider timed out after {:?}", limit)))?
            .map_err(|err| LedgerError::SigningFailure(err.to_string()))?;
        Ok(unsigned.with_signature(signature, key_id))
    }

    /// Commit with bounded retries on transient storage failures.
    async fn persist(
        &self,
        stream: &str,
        entries: &[Entry],
        expected: Option<&ChainTip>,
    ) -> Result<CommitOutcome> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            let result = match entries {
                [entry] => self.storage(self.store.commit_entry(entry, expected)).await,
                _ => self.storage(self.store.commit_batch(entries, expected)).await,
            };
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        stream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage failure, retrying commit"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Bound a storage call by `storage_timeout`.
    pub(crate) async fn storage<T>(
        &self,
        call: impl Future<Output = chainlog_store::Result<T>>,
    ) -> chainlog_store::Result<T> {
        bounded(self.config.storage_timeout, call).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an entry by id or sequence.
    pub async fn get_entry(&self, stream: &str, at: impl Into<EntryRef>) -> Result<Option<Entry>> {
        let found = match at.into() {
            EntryRef::Id(id) => self.storage(self.store.get_entry_by_id(stream, &id)).await?,
            EntryRef::Sequence(sequence) => {
                self.storage(self.store.get_entry_by_sequence(stream, sequence))
                    .await?
            }
        };
        Ok(found)
    }

    /// Filtered, paginated read across streams.
    pub async fn query_entries(&self, query: &EntryQuery) -> Result<EntryPage> {
        Ok(self.storage(self.store.query_entries(query)).await?)
    }

    /// List all known streams.
    pub async fn list_streams(&self) -> Result<Vec<String>> {
        Ok(self.storage(self.store.list_streams()).await?)
    }

    /// The current tip of a stream.
    ///
    /// Served from the cache when an append is not in flight, otherwise
    /// from the persisted tip projection.
    pub async fn tip(&self, stream: &str) -> Result<Option<ChainTip>> {
        if let Some(tip) = self.tips.peek(stream) {
            return Ok(Some(tip));
        }
        Ok(self.storage(self.store.get_tip(stream)).await?)
    }

    /// Drop the cached tip so the next append re-reads storage.
    pub async fn evict_tip(&self, stream: &str) {
        self.tips.evict(stream).await;
        debug!(stream, "evicted cached tip");
    }

    pub fn is_quarantined(&self, stream: &str) -> bool {
        self.tips.quarantined(stream).is_some()
    }

    /// Allow appends to a quarantined stream again.
    ///
    /// The cached tip is dropped so the next append starts from storage.
    pub async fn release_quarantine(&self, stream: &str) -> bool {
        let released = self.tips.release(stream);
        if released {
            self.tips.evict(stream).await;
            info!(stream, "released stream from quarantine");
        }
        released
    }
}

impl<S: Store, K: KeyProvider> fmt::Debug for Ledger<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("ledger_id", &self.config.ledger_id)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .finish_non_exhaustive()
    }
}

pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = chainlog_store::Result<T>>,
) -> chainlog_store::Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "storage call timed out after {:?}",
            limit
        ))),
    }
}
