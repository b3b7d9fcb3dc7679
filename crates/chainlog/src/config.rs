//! Ledger configuration.

use std::time::Duration;

use crate::error::{LedgerError, Result};

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Configuration for a [`crate::Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Names this ledger instance in logs.
    pub ledger_id: String,
    /// Verify every stream when the ledger is opened.
    pub verify_on_open: bool,
    /// How long an append waits for its stream's lock.
    pub lock_timeout: Duration,
    /// Bound on a single storage call.
    pub storage_timeout: Duration,
    /// Bound on a single key provider call.
    pub signing_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_payload_bytes: usize,
    /// Entries fetched per storage read during verification.
    pub verify_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: "default".to_string(),
            verify_on_open: true,
            lock_timeout: Duration::from_secs(5),
            storage_timeout: Duration::from_secs(10),
            signing_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            max_payload_bytes: 1024 * 1024,
            verify_page_size: 256,
        }
    }
}

impl LedgerConfig {
    pub fn new(ledger_id: impl Into<String>) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            ..Self::default()
        }
    }

    pub fn verify_on_open(mut self, enabled: bool) -> Self {
        self.verify_on_open = enabled;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    pub fn verify_page_size(mut self, size: usize) -> Self {
        self.verify_page_size = size;
        self
    }

    /// Check the configuration for values the ledger cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LedgerError::Config(msg.to_string()));

        if self.ledger_id.trim().is_empty() {
            return invalid("ledger_id must not be empty");
        }
        if self.lock_timeout.is_zero()
            || self.storage_timeout.is_zero()
            || self.signing_timeout.is_zero()
        {
            return invalid("timeouts must be non-zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return invalid("retry.max_backoff must not be below retry.initial_backoff");
        }
        if self.max_payload_bytes == 0 {
            return invalid("max_payload_bytes must be non-zero");
        }
        if self.verify_page_size == 0 {
            return invalid("verify_page_size must be non-zero");
        }
        Ok(())
    }
}
