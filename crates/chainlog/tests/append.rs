//! Append pipeline behavior: linkage, concurrency, hooks, keys, and caching.

use std::collections::HashSet;
use std::sync::Arc;

use chainlog::core::{Keypair, GENESIS_HASH};
use chainlog::{BreakReason, LedgerConfig, LedgerError, Record, SequenceRange};
use chainlog_testkit::{init_tracing, key_id, RecordingHook, RejectEmpty, TestLedger};
use serde_json::json;

#[tokio::test]
async fn sequences_are_gapless_and_linked() {
    init_tracing();
    let ledger = TestLedger::new().await;
    let entries = ledger.append_all("orders", &["A", "B", "C", "D"]).await;

    assert_eq!(entries[0].prev_hash, GENESIS_HASH);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64);
        assert_eq!(entry.hash, entry.recompute_hash().unwrap());
    }
    for pair in entries.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
    }
}

#[tokio::test]
async fn streams_are_chained_independently() {
    let ledger = TestLedger::new().await;
    let a = ledger.append_all("a", &["1", "2"]).await;
    let b = ledger.append_all("b", &["1"]).await;

    assert_eq!(b[0].sequence, 0);
    assert_eq!(b[0].prev_hash, GENESIS_HASH);
    assert_eq!(a[1].sequence, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_to_one_stream_serialize() {
    let ledger = Arc::new(TestLedger::new().await);

    let mut handles = Vec::new();
    for i in 0..32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .append("orders", Record::new(format!("o-{}", i), format!("payload {}", i)))
                .await
        }));
    }

    let mut sequences = HashSet::new();
    for handle in handles {
        let entry = handle.await.unwrap().unwrap();
        assert!(sequences.insert(entry.sequence), "sequence {} assigned twice", entry.sequence);
    }
    assert_eq!(sequences, (0..32).collect::<HashSet<u64>>());

    let report = ledger.verify_chain("orders", SequenceRange::all()).await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.valid_through, Some(31));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_to_different_streams() {
    let ledger = Arc::new(TestLedger::new().await);

    let mut handles = Vec::new();
    for stream in ["a", "b", "c", "d"] {
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(stream, Record::new(format!("{}-{}", stream, i), "x"))
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for report in ledger.verify_all().await.unwrap() {
        assert!(report.is_valid(), "{:?}", report);
        assert_eq!(report.valid_through, Some(7));
    }
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let ledger = TestLedger::new().await;
    ledger.append("orders", Record::new("o-1", "A")).await.unwrap();

    let err = ledger
        .append("orders", Record::new("o-1", "B"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateId { ref id, .. } if id == "o-1"));

    // The chain is unchanged and the next append proceeds.
    assert_eq!(ledger.store.entry_count(), 1);
    let next = ledger.append("orders", Record::new("o-2", "B")).await.unwrap();
    assert_eq!(next.sequence, 1);
}

#[tokio::test]
async fn same_id_allowed_in_other_stream() {
    let ledger = TestLedger::new().await;
    ledger.append("a", Record::new("id", "A")).await.unwrap();
    ledger.append("b", Record::new("id", "A")).await.unwrap();
}

#[tokio::test]
async fn batch_append_is_consecutive() {
    let ledger = TestLedger::new().await;
    ledger.append_all("orders", &["A"]).await;

    let batch = ledger
        .append_batch(
            "orders",
            vec![Record::new("b-1", "B"), Record::new("b-2", "C"), Record::new("b-3", "D")],
        )
        .await
        .unwrap();

    assert_eq!(batch.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(batch[1].prev_hash, batch[0].hash);
    assert_eq!(ledger.tip("orders").await.unwrap(), Some(batch[2].tip()));
}

#[tokio::test]
async fn batch_with_duplicate_persists_nothing() {
    let ledger = TestLedger::new().await;
    let first = ledger.append_all("orders", &["A"]).await;

    let err = ledger
        .append_batch(
            "orders",
            vec![Record::new("fresh", "B"), Record::new("orders-0", "C")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateId { .. }));

    assert_eq!(ledger.store.entry_count(), 1);
    assert_eq!(ledger.tip("orders").await.unwrap(), Some(first[0].tip()));
    assert_eq!(ledger.get_entry("orders", "fresh").await.unwrap(), None);
}

#[tokio::test]
async fn pre_append_hook_vetoes_before_locking() {
    let mut ledger = TestLedger::new().await;
    ledger.add_pre_append_hook(Arc::new(RejectEmpty));

    let err = ledger.append("orders", Record::new("o-1", "")).await.unwrap_err();
    assert!(matches!(err, LedgerError::Rejected { ref hook, .. } if hook == "reject-empty"));
    assert_eq!(ledger.store.entry_count(), 0);

    ledger.append("orders", Record::new("o-1", "A")).await.unwrap();
}

#[tokio::test]
async fn post_append_hook_failure_is_not_rolled_back() {
    let mut ledger = TestLedger::new().await;
    let hook = Arc::new(RecordingHook::failing());
    ledger.add_post_append_hook(hook.clone());

    let entry = ledger.append("orders", Record::new("o-1", "A")).await.unwrap();
    assert_eq!(hook.seen(), vec![("orders".to_string(), 0)]);
    assert_eq!(ledger.get_entry("orders", 0u64).await.unwrap(), Some(entry));
}

#[tokio::test]
async fn post_append_hooks_see_every_batch_entry() {
    let mut ledger = TestLedger::new().await;
    let hook = Arc::new(RecordingHook::new());
    ledger.add_post_append_hook(hook.clone());

    ledger
        .append_batch("s", vec![Record::new("a", "1"), Record::new("b", "2")])
        .await
        .unwrap();
    assert_eq!(hook.seen(), vec![("s".to_string(), 0), ("s".to_string(), 1)]);
}

#[tokio::test]
async fn json_records_are_canonical() {
    let ledger = TestLedger::new().await;
    let record = Record::json("o-1", &json!({"b": 2, "a": {"d": null, "c": true}})).unwrap();
    let entry = ledger.append("orders", record).await.unwrap();
    assert_eq!(&entry.payload[..], br#"{"a":{"c":true,"d":null},"b":2}"#);

    assert!(Record::json("o-2", &json!({"price": 1.5})).is_err());
    assert!(Record::json("o-3", &json!("scalar")).is_err());
}

#[tokio::test]
async fn invalid_input_never_reaches_storage() {
    let ledger = TestLedger::with_config(LedgerConfig::new("test").max_payload_bytes(8)).await;

    for (stream, record) in [
        ("", Record::new("o-1", "A")),
        ("has space", Record::new("o-1", "A")),
        ("orders", Record::new("", "A")),
        ("orders", Record::new("o-1", "more than eight bytes")),
    ] {
        let err = ledger.append(stream, record).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPayload(_)), "{:?}", err);
    }
    assert_eq!(ledger.store.entry_count(), 0);
}

#[tokio::test]
async fn evicted_cache_resumes_from_storage() {
    let ledger = TestLedger::new().await;
    let before = ledger.append_all("orders", &["A", "B"]).await;

    ledger.evict_tip("orders").await;
    let after = ledger.append("orders", Record::new("o-c", "C")).await.unwrap();

    assert_eq!(after.sequence, 2);
    assert_eq!(after.prev_hash, before[1].hash);
}

#[tokio::test]
async fn stale_cache_surfaces_conflict_then_recovers() {
    let first = TestLedger::new().await;
    first.append_all("orders", &["A"]).await;

    let second = first.reopen().await;
    second.append("orders", Record::new("o-b", "B")).await.unwrap();

    // `first` still caches sequence 0 as the tip.
    let err = first
        .append("orders", Record::new("o-c", "C"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrencyConflict { .. }));
    assert!(err.is_retryable());

    let retried = first.append("orders", Record::new("o-c", "C")).await.unwrap();
    assert_eq!(retried.sequence, 2);
    assert!(first.verify_chain("orders", SequenceRange::all()).await.unwrap().is_valid());
}

#[tokio::test]
async fn rotated_keys_keep_old_entries_valid() {
    let ledger = TestLedger::new().await;
    let old = ledger.append_all("orders", &["A"]).await;

    ledger.keys.rotate(key_id("k2"), Keypair::from_seed(&[2; 32])).await.unwrap();
    let new = ledger.append("orders", Record::new("o-b", "B")).await.unwrap();

    assert_eq!(old[0].signer_key_id, key_id("k1"));
    assert_eq!(new.signer_key_id, key_id("k2"));

    let report = ledger.verify_chain("orders", SequenceRange::all()).await.unwrap();
    assert!(report.is_valid());

    // Retiring the old signing half keeps verification working.
    ledger.keys.retire_signing(&key_id("k1")).await.unwrap();
    let reopened = ledger.reopen().await;
    assert!(!reopened.is_quarantined("orders"));
}

#[tokio::test]
async fn retired_active_key_fails_signing() {
    let ledger = TestLedger::new().await;
    ledger.keys.retire_signing(&key_id("k1")).await.unwrap();

    let err = ledger
        .append("orders", Record::new("o-1", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SigningFailure(_)));
    assert_eq!(ledger.store.entry_count(), 0);
}

#[tokio::test]
async fn quarantined_stream_rejects_appends_until_released() {
    let ledger = TestLedger::new().await;
    ledger.append_all("orders", &["A", "B", "C"]).await;
    ledger.store.tamper_payload("orders", 1, "X");

    ledger.verify_chain("orders", SequenceRange::all()).await.unwrap();
    assert!(ledger.is_quarantined("orders"));

    let err = ledger
        .append("orders", Record::new("o-d", "D"))
        .await
        .unwrap_err();
    match err {
        LedgerError::ChainIntegrityViolation { stream, at, reason } => {
            assert_eq!(stream, "orders");
            assert_eq!(at, 1);
            assert_eq!(reason, BreakReason::HashMismatch);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Reads stay available.
    assert!(ledger.get_entry("orders", 2u64).await.unwrap().is_some());
    // Other streams are unaffected.
    ledger.append("other", Record::new("x", "1")).await.unwrap();

    assert!(ledger.release_quarantine("orders").await);
    assert!(!ledger.is_quarantined("orders"));
    let d = ledger.append("orders", Record::new("o-d", "D")).await.unwrap();
    assert_eq!(d.sequence, 3);
}
