//! Storage behavior: durability, compensating commits, retries, and queries.

use std::sync::Arc;
use std::time::Duration;

use chainlog::store::{MemoryStore, SqliteStore, Store};
use chainlog::{
    EntryQuery, Ledger, LedgerConfig, LedgerError, Record, RetryPolicy, SequenceRange,
};
use chainlog_testkit::{seeded_keyring, FlakyStore};

fn fast_retries(max_attempts: u32) -> LedgerConfig {
    LedgerConfig::new("test").retry(RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    })
}

async fn flaky_ledger(config: LedgerConfig) -> Ledger<FlakyStore, chainlog::KeyRing> {
    let store = FlakyStore::new(Arc::new(MemoryStore::new()));
    Ledger::open(store, seeded_keyring("k1", 1), config).await.unwrap()
}

#[tokio::test]
async fn sqlite_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        let ledger = Ledger::open(store, seeded_keyring("k1", 1), LedgerConfig::new("disk"))
            .await
            .unwrap();
        for (i, payload) in ["A", "B", "C"].iter().enumerate() {
            ledger
                .append("orders", Record::new(format!("o-{}", i), *payload))
                .await
                .unwrap();
        }
    }

    let store = SqliteStore::open(&path).unwrap();
    let ledger = Ledger::open(store, seeded_keyring("k1", 1), LedgerConfig::new("disk"))
        .await
        .unwrap();
    assert!(!ledger.is_quarantined("orders"));

    let report = ledger.verify_chain("orders", SequenceRange::all()).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.valid_through, Some(2));

    let next = ledger.append("orders", Record::new("o-3", "D")).await.unwrap();
    assert_eq!(next.sequence, 3);
    let prev = ledger.get_entry("orders", 2u64).await.unwrap().unwrap();
    assert_eq!(next.prev_hash, prev.hash);
}

#[tokio::test]
async fn sqlite_batch_and_duplicates() {
    let store = SqliteStore::open_memory().unwrap();
    let ledger = Ledger::open(store, seeded_keyring("k1", 1), LedgerConfig::new("mem"))
        .await
        .unwrap();

    ledger
        .append_batch("s", vec![Record::new("a", "1"), Record::new("b", "2")])
        .await
        .unwrap();

    let err = ledger
        .append_batch("s", vec![Record::new("c", "3"), Record::new("a", "4")])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateId { .. }));
    assert_eq!(ledger.get_entry("s", "c").await.unwrap(), None);
    assert_eq!(ledger.tip("s").await.unwrap().map(|t| t.last_sequence), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_appends() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("ledger.db")).unwrap();
    let ledger = Arc::new(
        Ledger::open(store, seeded_keyring("k1", 1), LedgerConfig::new("disk"))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let ledger = ledger.clone();
        let stream = if i % 2 == 0 { "even" } else { "odd" };
        handles.push(tokio::spawn(async move {
            ledger.append(stream, Record::new(format!("e-{}", i), "x")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for report in ledger.verify_all().await.unwrap() {
        assert!(report.is_valid());
        assert_eq!(report.valid_through, Some(7));
    }
}

#[tokio::test]
async fn failed_tip_write_reverts_entry() {
    let ledger = flaky_ledger(fast_retries(3)).await;
    ledger.store().fail_put_tip(1, false);

    let err = ledger
        .append("orders", Record::new("o-1", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure { transient: false, .. }));
    assert!(!err.is_retryable());

    // No partial entry is visible.
    assert_eq!(ledger.store().inner().entry_count(), 0);
    assert_eq!(ledger.store().get_tip("orders").await.unwrap(), None);

    let entry = ledger.append("orders", Record::new("o-1", "A")).await.unwrap();
    assert_eq!(entry.sequence, 0);
}

#[tokio::test]
async fn transient_tip_failure_is_retried() {
    let ledger = flaky_ledger(fast_retries(3)).await;
    ledger.store().fail_put_tip(1, true);

    let entry = ledger.append("orders", Record::new("o-1", "A")).await.unwrap();
    assert_eq!(entry.sequence, 0);
    assert_eq!(ledger.store().put_tip_calls(), 2);
    assert_eq!(ledger.store().inner().entry_count(), 1);
    assert!(ledger
        .verify_chain("orders", SequenceRange::all())
        .await
        .unwrap()
        .is_valid());
}

#[tokio::test]
async fn retries_are_bounded() {
    let ledger = flaky_ledger(fast_retries(3)).await;
    ledger.store().fail_put_tip(10, true);

    let err = ledger
        .append("orders", Record::new("o-1", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure { transient: true, .. }));
    assert!(err.is_retryable());
    assert_eq!(ledger.store().put_tip_calls(), 3);
    assert_eq!(ledger.store().inner().entry_count(), 0);
}

#[tokio::test]
async fn lost_acknowledgement_retry_is_idempotent() {
    let ledger = flaky_ledger(fast_retries(3)).await;
    ledger.append("orders", Record::new("o-0", "A")).await.unwrap();
    ledger.store().lose_commit_ack(1);

    let entry = ledger.append("orders", Record::new("o-1", "B")).await.unwrap();
    assert_eq!(entry.sequence, 1);

    // Persisted exactly once.
    assert_eq!(ledger.store().inner().entry_count(), 2);
    assert_eq!(ledger.get_entry("orders", 1u64).await.unwrap(), Some(entry.clone()));

    let next = ledger.append("orders", Record::new("o-2", "C")).await.unwrap();
    assert_eq!(next.prev_hash, entry.hash);
}

#[tokio::test]
async fn failed_batch_persists_nothing() {
    let ledger = flaky_ledger(fast_retries(1)).await;
    ledger.store().fail_put_tip(1, false);

    let err = ledger
        .append_batch(
            "orders",
            vec![Record::new("a", "1"), Record::new("b", "2"), Record::new("c", "3")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure { .. }));
    assert_eq!(ledger.store().inner().entry_count(), 0);
}

#[tokio::test]
async fn orphan_from_failed_revert_is_adopted_by_verification() {
    let ledger = flaky_ledger(fast_retries(1)).await;
    ledger.store().fail_put_tip(1, false);
    ledger.store().fail_revert(1);

    ledger
        .append("orders", Record::new("o-1", "A"))
        .await
        .unwrap_err();
    // The entry stayed behind without a tip.
    assert_eq!(ledger.store().inner().entry_count(), 1);
    assert_eq!(ledger.store().get_tip("orders").await.unwrap(), None);

    let report = ledger.verify_chain("orders", SequenceRange::all()).await.unwrap();
    assert!(report.is_valid());
    assert!(report.tip_mismatch);

    let next = ledger.append("orders", Record::new("o-2", "B")).await.unwrap();
    assert_eq!(next.sequence, 1);
}

#[tokio::test]
async fn query_filters_and_pages() {
    let store = SqliteStore::open_memory().unwrap();
    let ledger = Ledger::open(store, seeded_keyring("k1", 1), LedgerConfig::new("mem"))
        .await
        .unwrap();

    for i in 0..5i64 {
        ledger
            .append("a", Record::new(format!("a-{}", i), "x").at(1_000 + i))
            .await
            .unwrap();
    }
    ledger.append("b", Record::new("b-0", "y").at(1_002)).await.unwrap();

    let page = ledger
        .query_entries(&EntryQuery::stream("a").with_page(2, 0))
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert!(page.has_more);
    assert_eq!(page.entries.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1]);

    let last = ledger
        .query_entries(&EntryQuery::stream("a").with_page(2, 4))
        .await
        .unwrap();
    assert_eq!(last.entries.len(), 1);
    assert!(!last.has_more);

    let by_time = ledger
        .query_entries(&EntryQuery::default().with_timestamps(Some(1_002), Some(1_003)))
        .await
        .unwrap();
    let found: Vec<_> = by_time.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(found, vec!["a-2", "a-3", "b-0"]);

    let by_id = ledger
        .query_entries(&EntryQuery::stream("a").with_id("a-4"))
        .await
        .unwrap();
    assert_eq!(by_id.total, 1);
    assert_eq!(by_id.entries[0].sequence, 4);

    let by_range = ledger
        .query_entries(&EntryQuery::stream("a").with_sequence(SequenceRange::between(1, 2)))
        .await
        .unwrap();
    assert_eq!(by_range.total, 2);
}

#[tokio::test]
async fn storage_timeout_is_transient_failure() {
    struct Stalled(MemoryStore);

    #[async_trait::async_trait]
    impl Store for Stalled {
        async fn insert_entry(&self, entry: &chainlog::Entry) -> chainlog::store::Result<()> {
            self.0.insert_entry(entry).await
        }
        async fn get_latest_entry(&self, _stream: &str) -> chainlog::store::Result<Option<chainlog::Entry>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn get_entry_by_id(&self, stream: &str, id: &str) -> chainlog::store::Result<Option<chainlog::Entry>> {
            self.0.get_entry_by_id(stream, id).await
        }
        async fn get_entry_by_sequence(&self, stream: &str, sequence: u64) -> chainlog::store::Result<Option<chainlog::Entry>> {
            self.0.get_entry_by_sequence(stream, sequence).await
        }
        async fn list_entries(&self, stream: &str, range: SequenceRange, limit: usize) -> chainlog::store::Result<Vec<chainlog::Entry>> {
            self.0.list_entries(stream, range, limit).await
        }
        async fn query_entries(&self, query: &EntryQuery) -> chainlog::store::Result<chainlog::EntryPage> {
            self.0.query_entries(query).await
        }
        async fn revert_uncommitted_entry(&self, stream: &str, sequence: u64) -> chainlog::store::Result<()> {
            self.0.revert_uncommitted_entry(stream, sequence).await
        }
        async fn get_tip(&self, stream: &str) -> chainlog::store::Result<Option<chainlog::ChainTip>> {
            self.0.get_tip(stream).await
        }
        async fn put_tip(&self, tip: &chainlog::ChainTip) -> chainlog::store::Result<()> {
            self.0.put_tip(tip).await
        }
        async fn list_streams(&self) -> chainlog::store::Result<Vec<String>> {
            self.0.list_streams().await
        }
    }

    let config = LedgerConfig::new("slow").storage_timeout(Duration::from_millis(20));
    let ledger = Ledger::open(Stalled(MemoryStore::new()), seeded_keyring("k1", 1), config)
        .await
        .unwrap();

    let err = ledger
        .append("orders", Record::new("o-1", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure { transient: true, .. }));
}
