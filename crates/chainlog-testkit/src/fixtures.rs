//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a ready-to-use ledger over an
//! in-memory store, a store wrapper that injects failures, and simple hooks.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainlog::{Ledger, LedgerConfig, PostAppendHook, PreAppendHook, SharedKeyRing};
use chainlog_core::{ChainTip, Entry, KeyId, KeyRing, Keypair, Record, SequenceRange};
use chainlog_store::{
    compensating_commit, CommitOutcome, EntryPage, EntryQuery, MemoryStore, Store, StoreError,
};

/// Build a key id, panicking on invalid input.
pub fn key_id(id: &str) -> KeyId {
    KeyId::new(id).expect("valid key id")
}

/// A key ring whose only key is derived from a fixed seed.
pub fn seeded_keyring(id: &str, seed: u8) -> KeyRing {
    KeyRing::new(key_id(id), Keypair::from_seed(&[seed; 32]))
}

/// The ledger type the fixtures produce.
pub type MemoryLedger = Ledger<Arc<MemoryStore>, SharedKeyRing>;

/// A ledger over a shared in-memory store with a rotatable key ring.
pub struct TestLedger {
    pub store: Arc<MemoryStore>,
    pub keys: SharedKeyRing,
    ledger: MemoryLedger,
}

impl TestLedger {
    /// Open a ledger with a deterministic key `k1` and default config.
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::new("test")).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let keys = SharedKeyRing::new(seeded_keyring("k1", 1));
        let ledger = Ledger::open(store.clone(), keys.clone(), config)
            .await
            .expect("open test ledger");
        Self { store, keys, ledger }
    }

    /// Open a second ledger instance over the same store and keys.
    ///
    /// The new instance starts with an empty tip cache and runs the
    /// configured open-time verification.
    pub async fn reopen(&self) -> MemoryLedger {
        Ledger::open(self.store.clone(), self.keys.clone(), self.ledger.config().clone())
            .await
            .expect("reopen test ledger")
    }

    /// Append one record per payload. Ids are `<stream>-<sequence>`.
    pub async fn append_all(&self, stream: &str, payloads: &[&str]) -> Vec<Entry> {
        let mut next = self
            .ledger
            .tip(stream)
            .await
            .expect("read tip")
            .map_or(0, |t| t.last_sequence + 1);
        let mut entries = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let record = Record::new(format!("{}-{}", stream, next), payload.to_string());
            entries.push(self.ledger.append(stream, record).await.expect("append"));
            next += 1;
        }
        entries
    }
}

impl Deref for TestLedger {
    type Target = MemoryLedger;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}

impl DerefMut for TestLedger {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ledger
    }
}

/// Take one unit from a fault counter, if any is left.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A [`MemoryStore`] wrapper that commits through the compensating path and
/// fails on demand.
///
/// Unlike [`MemoryStore`], writes are not atomic here: a commit is
/// `insert_entry`, then `put_tip`, with `revert_uncommitted_entry` on
/// failure, exactly like a backend without transactions.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    put_tip_failures: AtomicU32,
    put_tip_transient: AtomicBool,
    revert_failures: AtomicU32,
    lost_acks: AtomicU32,
    put_tip_calls: AtomicU32,
    list_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            put_tip_failures: AtomicU32::new(0),
            put_tip_transient: AtomicBool::new(true),
            revert_failures: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            put_tip_calls: AtomicU32::new(0),
            list_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Fail the next `times` tip writes.
    pub fn fail_put_tip(&self, times: u32, transient: bool) {
        self.put_tip_transient.store(transient, Ordering::SeqCst);
        self.put_tip_failures.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` reverts.
    pub fn fail_revert(&self, times: u32) {
        self.revert_failures.store(times, Ordering::SeqCst);
    }

    /// Let the next `times` commits persist but report a transient failure.
    pub fn lose_commit_ack(&self, times: u32) {
        self.lost_acks.store(times, Ordering::SeqCst);
    }

    /// Hold every `list_entries` result for `delay` after reading it, so
    /// writes can land between the read and its delivery.
    pub fn delay_list_entries(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// How many tip writes were attempted.
    pub fn put_tip_calls(&self) -> u32 {
        self.put_tip_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_entry(&self, entry: &Entry) -> chainlog_store::Result<()> {
        self.inner.insert_entry(entry).await
    }

    async fn get_latest_entry(&self, stream: &str) -> chainlog_store::Result<Option<Entry>> {
        self.inner.get_latest_entry(stream).await
    }

    async fn get_entry_by_id(&self, stream: &str, id: &str) -> chainlog_store::Result<Option<Entry>> {
        self.inner.get_entry_by_id(stream, id).await
    }

    async fn get_entry_by_sequence(
        &self,
        stream: &str,
        sequence: u64,
    ) -> chainlog_store::Result<Option<Entry>> {
        self.inner.get_entry_by_sequence(stream, sequence).await
    }

    async fn list_entries(
        &self,
        stream: &str,
        range: SequenceRange,
        limit: usize,
    ) -> chainlog_store::Result<Vec<Entry>> {
        let entries = self.inner.list_entries(stream, range, limit).await?;
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(entries)
    }

    async fn query_entries(&self, query: &EntryQuery) -> chainlog_store::Result<EntryPage> {
        self.inner.query_entries(query).await
    }

    async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> chainlog_store::Result<()> {
        if take(&self.revert_failures) {
            return Err(StoreError::Unavailable("injected revert failure".into()));
        }
        self.inner.revert_uncommitted_entry(stream, sequence).await
    }

    async fn get_tip(&self, stream: &str) -> chainlog_store::Result<Option<ChainTip>> {
        self.inner.get_tip(stream).await
    }

    async fn put_tip(&self, tip: &ChainTip) -> chainlog_store::Result<()> {
        self.put_tip_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.put_tip_failures) {
            return Err(if self.put_tip_transient.load(Ordering::SeqCst) {
                StoreError::Unavailable("injected tip write failure".into())
            } else {
                StoreError::Internal("injected tip write failure".into())
            });
        }
        self.inner.put_tip(tip).await
    }

    async fn list_streams(&self) -> chainlog_store::Result<Vec<String>> {
        self.inner.list_streams().await
    }

    async fn commit_batch(
        &self,
        entries: &[Entry],
        expected_tip: Option<&ChainTip>,
    ) -> chainlog_store::Result<CommitOutcome> {
        if take(&self.lost_acks) {
            self.inner.commit_batch(entries, expected_tip).await?;
            return Err(StoreError::Unavailable("commit acknowledgement lost".into()));
        }
        compensating_commit(self, entries, expected_tip).await
    }
}

/// Vetoes records whose payload is empty.
#[derive(Debug, Default)]
pub struct RejectEmpty;

impl PreAppendHook for RejectEmpty {
    fn name(&self) -> &str {
        "reject-empty"
    }

    fn before_append(&self, _stream: &str, record: &Record) -> Result<(), String> {
        if record.payload.is_empty() {
            return Err("payload is empty".to_string());
        }
        Ok(())
    }
}

/// Records every appended `(stream, sequence)`; optionally fails afterwards.
#[derive(Debug, Default)]
pub struct RecordingHook {
    seen: Mutex<Vec<(String, u64)>>,
    fail: bool,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook that records and then reports an error.
    pub fn failing() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn seen(&self) -> Vec<(String, u64)> {
        self.seen.lock().expect("hook lock").clone()
    }
}

impl PostAppendHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn after_append(&self, entry: &Entry) -> anyhow::Result<()> {
        self.seen
            .lock()
            .expect("hook lock")
            .push((entry.stream.clone(), entry.sequence));
        if self.fail {
            anyhow::bail!("recording hook configured to fail");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_appends_chain() {
        let ledger = TestLedger::new().await;
        let entries = ledger.append_all("orders", &["A", "B"]).await;

        assert_eq!(entries[0].id, "orders-0");
        assert_eq!(entries[1].id, "orders-1");
        assert_eq!(entries[1].prev_hash, entries[0].hash);
        assert_eq!(ledger.store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_seeded_keyrings_are_deterministic() {
        let a = seeded_keyring("k1", 7);
        let b = seeded_keyring("k1", 7);
        let c = seeded_keyring("k1", 8);
        assert_eq!(a.public_key(&key_id("k1")), b.public_key(&key_id("k1")));
        assert_ne!(a.public_key(&key_id("k1")), c.public_key(&key_id("k1")));
    }

    #[test]
    fn test_fault_counter_counts_down() {
        let counter = AtomicU32::new(2);
        assert!(take(&counter));
        assert!(take(&counter));
        assert!(!take(&counter));
    }
}
