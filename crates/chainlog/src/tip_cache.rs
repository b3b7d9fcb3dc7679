//! Per-stream tip cache and append locks.
//!
//! Each stream gets one slot: a `tokio::sync::Mutex<Option<ChainTip>>`.
//! Holding the slot's lock is what makes an append exclusive for its stream,
//! and the cached tip inside it is only ever read or replaced by the lock
//! holder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chainlog_core::{ChainBreak, ChainTip};

/// One stream's append lock and the tip it protects.
pub(crate) type TipSlot = Arc<tokio::sync::Mutex<Option<ChainTip>>>;

#[derive(Debug, Default)]
pub(crate) struct TipCache {
    slots: Mutex<HashMap<String, TipSlot>>,
    /// Streams with a detected break, and where it is.
    quarantined: Mutex<HashMap<String, ChainBreak>>,
}

impl TipCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The slot for a stream, created empty on first use.
    pub(crate) fn slot(&self, stream: &str) -> TipSlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(stream.to_string()).or_default().clone()
    }

    /// The cached tip, if the slot is not locked by an append right now.
    pub(crate) fn peek(&self, stream: &str) -> Option<ChainTip> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(stream)?.clone()
        };
        let cached = slot.try_lock().ok()?;
        cached.clone()
    }

    /// Drop the cached tip, waiting for any in-flight append.
    pub(crate) async fn evict(&self, stream: &str) {
        let slot = self.slot(stream);
        *slot.lock().await = None;
    }

    pub(crate) fn quarantine(&self, stream: &str, at: ChainBreak) {
        self.quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.to_string(), at);
    }

    pub(crate) fn quarantined(&self, stream: &str) -> Option<ChainBreak> {
        self.quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .copied()
    }

    /// Lift the quarantine; returns whether the stream was quarantined.
    pub(crate) fn release(&self, stream: &str) -> bool {
        self.quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream)
            .is_some()
    }
}
