//! Chain verification over storage.
//!
//! Walks a stream page by page with a [`ChainCursor`], so a long stream is
//! never loaded at once. Verification only reads entries. Its side effects
//! are on this ledger instance: a break evicts the stream's cached tip and
//! quarantines it. A tip projection that lags the entries is rebuilt from
//! them; one that runs ahead of them marks deleted entries and counts as a
//! break.

use chainlog_core::{
    BreakReason, ChainBreak, ChainCursor, ChainTip, Ed25519PublicKey, Entry, SequenceRange,
    VerificationReport, GENESIS_HASH,
};
use chainlog_store::{same_position, Store};
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::signer::KeyProvider;

impl<S: Store, K: KeyProvider> Ledger<S, K> {
    /// Verify a stream's chain over `range`.
    ///
    /// A broken chain is reported, not returned as an error; errors mean the
    /// walk itself could not run (storage or key provider failure).
    pub async fn verify_chain(&self, stream: &str, range: SequenceRange) -> Result<VerificationReport> {
        let (mut report, last) = self.walk(stream, range).await?;

        let full_scan = range.from == 0 && range.to.is_none();
        if full_scan && report.is_valid() {
            match self.reconcile_tip(stream, last).await? {
                TipCheck::Consistent => {}
                TipCheck::Rebuilt => report.tip_mismatch = true,
                TipCheck::Missing(found) => {
                    report.tip_mismatch = true;
                    report.valid_through = report.valid_through.min(found.at.checked_sub(1));
                    report.broken_at = Some(found.at);
                    report.reason = Some(found.reason);
                }
            }
        }

        if let Some(found) = report.chain_break() {
            self.tips.evict(stream).await;
            self.tips.quarantine(stream, found);
            error!(
                stream,
                sequence = found.at,
                reason = %found.reason,
                valid_through = report.valid_through,
                "chain integrity violation, stream quarantined"
            );
            return Ok(report);
        }

        debug!(
            stream,
            from = report.from_sequence,
            valid_through = report.valid_through,
            checked = report.entries_checked,
            "chain verified"
        );
        Ok(report)
    }

    /// Verify every stream from genesis.
    pub async fn verify_all(&self) -> Result<Vec<VerificationReport>> {
        let streams = self.storage(self.store.list_streams()).await?;
        let mut reports = Vec::with_capacity(streams.len());
        for stream in streams {
            reports.push(self.verify_chain(&stream, SequenceRange::all()).await?);
        }
        Ok(reports)
    }

    /// Run the cursor over storage. Returns the report and the tip of the
    /// last entry that passed.
    async fn walk(
        &self,
        stream: &str,
        range: SequenceRange,
    ) -> Result<(VerificationReport, Option<ChainTip>)> {
        let mut cursor = match range.from {
            0 => ChainCursor::genesis(stream),
            from => {
                let anchor = self
                    .storage(self.store.get_entry_by_sequence(stream, from - 1))
                    .await?;
                match anchor.map(|e| e.recompute_hash()) {
                    Some(Ok(hash)) => ChainCursor::resume(stream, from, hash),
                    Some(Err(_)) => {
                        let mut cursor = ChainCursor::resume(stream, from, GENESIS_HASH);
                        cursor.fail(from - 1, BreakReason::HashMismatch);
                        return Ok((cursor.finish(), None));
                    }
                    None => {
                        let mut cursor = ChainCursor::resume(stream, from, GENESIS_HASH);
                        cursor.fail(from - 1, BreakReason::SequenceGap);
                        return Ok((cursor.finish(), None));
                    }
                }
            }
        };

        if range.is_empty() {
            return Ok((cursor.finish(), None));
        }

        let page_size = self.config.verify_page_size;
        let mut last: Option<ChainTip> = None;
        loop {
            let page_range = SequenceRange {
                from: cursor.expected_sequence(),
                to: range.to,
            };
            let page = self
                .storage(self.store.list_entries(stream, page_range, page_size))
                .await?;

            for entry in &page {
                let key = self.resolve_key(entry).await?;
                if cursor.check(entry, key.as_ref()).is_err() {
                    return Ok((cursor.finish(), last));
                }
                last = Some(entry.tip());
            }

            let reached_end = range.to.map_or(false, |to| cursor.expected_sequence() > to);
            if page.len() < page_size || reached_end {
                break;
            }
        }

        Ok((cursor.finish(), last))
    }

    async fn resolve_key(&self, entry: &Entry) -> Result<Option<Ed25519PublicKey>> {
        let limit = self.config.signing_timeout;
        tokio::time::timeout(limit, self.keys.resolve_public_key(&entry.signer_key_id))
            .await
            .map_err(|_| {
                LedgerError::SigningFailure(format!(
                    "key provider timed out after {:?} resolving {}",
                    limit, entry.signer_key_id
                ))
            })
    }

    /// Compare the persisted tip projection with the stored entries, under
    /// the stream lock.
    ///
    /// The walk ran without the lock, so entries appended since then are
    /// judged by re-reading the latest entry here. The projection is only
    /// ever moved forward, and only onto the entry the walk verified.
    async fn reconcile_tip(&self, stream: &str, verified: Option<ChainTip>) -> Result<TipCheck> {
        let slot = self.tips.slot(stream);
        let mut cached = slot.lock().await;

        let persisted = self.storage(self.store.get_tip(stream)).await?;
        let latest = self
            .storage(self.store.get_latest_entry(stream))
            .await?
            .map(|e| e.tip());

        if same_position(persisted.as_ref(), latest.as_ref()) {
            if cached.is_none() {
                *cached = latest;
            }
            return Ok(TipCheck::Consistent);
        }

        let persisted_seq = persisted.as_ref().map(|t| t.last_sequence);
        let latest_seq = latest.as_ref().map(|t| t.last_sequence);
        warn!(
            stream,
            persisted = persisted_seq,
            latest = latest_seq,
            verified = verified.as_ref().map(|t| t.last_sequence),
            "tip projection disagrees with entries"
        );

        match (persisted_seq, latest_seq) {
            // The projection names entries that are gone.
            (Some(tip), found) if found.map_or(true, |seq| seq < tip) => {
                Ok(TipCheck::Missing(ChainBreak {
                    at: found.map_or(0, |seq| seq + 1),
                    reason: BreakReason::SequenceGap,
                }))
            }
            // Same position, different hash: the newest entry was replaced.
            (Some(tip), Some(seq)) if seq == tip => Ok(TipCheck::Missing(ChainBreak {
                at: seq,
                reason: BreakReason::HashMismatch,
            })),
            // Entries past the projection, e.g. left by a failed revert.
            _ => match latest {
                Some(tip) if same_position(Some(&tip), verified.as_ref()) => {
                    self.storage(self.store.put_tip(&tip)).await?;
                    info!(stream, sequence = tip.last_sequence, "rebuilt tip projection from entries");
                    *cached = Some(tip);
                    Ok(TipCheck::Rebuilt)
                }
                // Not yet verified; left for the next scan.
                _ => Ok(TipCheck::Consistent),
            },
        }
    }
}

/// How the persisted tip projection relates to the stored entries.
enum TipCheck {
    Consistent,
    Rebuilt,
    Missing(ChainBreak),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chainlog_core::{KeyId, KeyRing, Record};
    use chainlog_store::MemoryStore;

    async fn ledger_with_page(page: usize) -> Ledger<MemoryStore, KeyRing> {
        let keys = KeyRing::generate(KeyId::new("k1").unwrap());
        let config = LedgerConfig::new("test").verify_page_size(page);
        Ledger::open(MemoryStore::new(), keys, config).await.unwrap()
    }

    async fn append_n(ledger: &Ledger<MemoryStore, KeyRing>, stream: &str, n: u64) {
        for i in 0..n {
            ledger
                .append(stream, Record::new(format!("e-{}", i), format!("payload {}", i)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_stream_is_valid() {
        let ledger = ledger_with_page(4).await;
        let report = ledger.verify_chain("nothing", SequenceRange::all()).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.valid_through, None);
        assert_eq!(report.entries_checked, 0);
        assert!(!report.tip_mismatch);
    }

    #[tokio::test]
    async fn test_walk_crosses_page_boundaries() {
        let ledger = ledger_with_page(3).await;
        append_n(&ledger, "s", 10).await;

        let report = ledger.verify_chain("s", SequenceRange::all()).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.valid_through, Some(9));
        assert_eq!(report.entries_checked, 10);
    }

    #[tokio::test]
    async fn test_ranged_verification_anchors_on_predecessor() {
        let ledger = ledger_with_page(2).await;
        append_n(&ledger, "s", 6).await;

        let report = ledger
            .verify_chain("s", SequenceRange::between(2, 4))
            .await
            .unwrap();
        assert!(report.is_valid());
        assert_eq!(report.from_sequence, 2);
        assert_eq!(report.valid_through, Some(4));
        assert_eq!(report.entries_checked, 3);
    }

    #[tokio::test]
    async fn test_missing_anchor_is_gap() {
        let ledger = ledger_with_page(8).await;
        append_n(&ledger, "s", 4).await;
        ledger.store().tamper_remove("s", 1);

        let report = ledger
            .verify_chain("s", SequenceRange::starting_at(2))
            .await
            .unwrap();
        assert_eq!(report.broken_at, Some(1));
        assert_eq!(report.reason, Some(BreakReason::SequenceGap));
        assert_eq!(report.entries_checked, 0);
        assert!(ledger.is_quarantined("s"));
    }

    #[tokio::test]
    async fn test_stale_tip_projection_is_rebuilt() {
        let ledger = ledger_with_page(8).await;
        append_n(&ledger, "s", 3).await;
        ledger.store().tamper_clear_tip("s");

        let report = ledger.verify_chain("s", SequenceRange::all()).await.unwrap();
        assert!(report.is_valid());
        assert!(report.tip_mismatch);
        assert!(!ledger.is_quarantined("s"));

        let tip = ledger.store().get_tip("s").await.unwrap().unwrap();
        assert_eq!(tip.last_sequence, 2);

        // Appends continue from the rebuilt tip.
        let next = ledger.append("s", Record::new("e-3", "more")).await.unwrap();
        assert_eq!(next.sequence, 3);
    }
}
