//! Per-account sequence number coordination.
//!
//! Every ledger-mutating call for one signing account goes through
//! [`NonceCoordinator::submit`]. The coordinator holds a FIFO lock for the whole
//! acquire -> assign -> submit -> release window, so two callers can never be handed
//! the same sequence number and the cache never advances out of order.

use crate::error::PlanError;
use crate::ledger::{BlockTag, LedgerClient};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NonceConfig {
    /// A cached next-nonce younger than this is handed out without asking the ledger.
    pub cache_ttl_ms: u64,
    /// Pause held after a successful submission before the next caller proceeds.
    pub release_delay_ms: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 1_500,
            release_delay_ms: 0,
        }
    }
}

impl NonceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

#[derive(Debug, Default)]
struct NonceCache {
    next: Option<u64>,
    refreshed_at: Option<Instant>,
}

impl NonceCache {
    fn fresh_next(&self, ttl: Duration) -> Option<u64> {
        match (self.next, self.refreshed_at) {
            (Some(next), Some(at)) if at.elapsed() < ttl => Some(next),
            _ => None,
        }
    }

    fn advance_past(&mut self, used: u64) {
        self.next = Some(used + 1);
        self.refreshed_at = Some(Instant::now());
    }

    fn invalidate(&mut self) {
        self.next = None;
        self.refreshed_at = None;
    }
}

/// Diagnostic view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceSnapshot {
    pub next: Option<u64>,
    pub age: Option<Duration>,
}

/// Serializes sequence-number assignment for one signing account.
///
/// Build one per account at process start and share it by `Arc` with every caller
/// that issues mutating calls for that account. State survives across plan runs.
pub struct NonceCoordinator {
    account: String,
    ledger: Arc<dyn LedgerClient>,
    config: NonceConfig,
    cache: Mutex<NonceCache>,
}

impl NonceCoordinator {
    pub fn new(account: impl Into<String>, ledger: Arc<dyn LedgerClient>, config: NonceConfig) -> Self {
        Self {
            account: account.into(),
            ledger,
            config,
            cache: Mutex::new(NonceCache::default()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn config(&self) -> &NonceConfig {
        &self.config
    }

    /// Assign the next sequence number and run `submit` with it while holding the
    /// ticket.
    ///
    /// On success the cache advances past the used number. On any error, including
    /// failures unrelated to sequencing, the cache is dropped so the next caller
    /// re-reads the pending sequence number from the ledger.
    pub async fn submit<T, F, Fut>(&self, submit: F) -> Result<T, PlanError>
    where
        F: FnOnce(u64) -> Fut + Send,
        Fut: Future<Output = Result<T, PlanError>> + Send,
        T: Send,
    {
        let mut cache = self.cache.lock().await;

        let nonce = match cache.fresh_next(self.config.cache_ttl()) {
            Some(next) => next,
            None => match self
                .ledger
                .next_sequence_number(&self.account, BlockTag::Pending)
                .await
            {
                Ok(next) => {
                    tracing::debug!(account = %self.account, next, "nonce cache reseeded from ledger");
                    next
                }
                Err(err) => {
                    cache.invalidate();
                    return Err(PlanError::Nonce(format!(
                        "failed to read pending sequence number for {}: {}",
                        self.account, err
                    )));
                }
            },
        };

        match submit(nonce).await {
            Ok(value) => {
                cache.advance_past(nonce);
                let delay = self.config.release_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(value)
            }
            Err(err) => {
                cache.invalidate();
                tracing::warn!(
                    account = %self.account,
                    nonce,
                    error = %err,
                    "submission failed; nonce cache invalidated"
                );
                Err(err)
            }
        }
    }

    /// Drop the cached sequence number.
    pub async fn invalidate(&self) {
        self.cache.lock().await.invalidate();
    }

    pub async fn snapshot(&self) -> NonceSnapshot {
        let cache = self.cache.lock().await;
        NonceSnapshot {
            next: cache.next,
            age: cache.refreshed_at.map(|at| at.elapsed()),
        }
    }
}

impl std::fmt::Debug for NonceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceCoordinator")
            .field("account", &self.account)
            .field("config", &self.config)
            .finish()
    }
}
