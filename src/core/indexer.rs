/// Indexer subscriber
///
/// Pulls events off a bus subscription and writes them to the event store, one at a
/// time. A write that still fails after the retry policy is spent is logged and the
/// event is dropped, so a bad store never stalls the subscription.

use crate::bus::Subscription;
use crate::config::IndexerConfig;
use crate::core::Event;
use crate::db::EventStore;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often a store write is attempted before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after that
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt 2 waits `backoff`, attempt 3 twice that, ...
        let doublings = attempt.saturating_sub(2).min(16);
        self.backoff.saturating_mul(1 << doublings)
    }
}

impl From<&IndexerConfig> for RetryPolicy {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Counters reported when the indexer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerStats {
    pub indexed: u64,
    pub failed: u64,
}

pub struct Indexer {
    store: Arc<dyn EventStore>,
    retry: RetryPolicy,
}

impl Indexer {
    pub fn new(store: Arc<dyn EventStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Consume `subscription` until it closes or `cancel` fires
    pub async fn run(&self, mut subscription: Subscription, cancel: CancellationToken) -> IndexerStats {
        let mut stats = IndexerStats::default();
        info!("indexer started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.next() => match event {
                    Some(event) => event,
                    None => {
                        warn!("bus subscription closed");
                        break;
                    }
                },
            };

            match self.index_with_retry(&event).await {
                Ok(id) => {
                    stats.indexed += 1;
                    debug!(id, command = %event.command, "indexed");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(command = %event.command, error = %e, "dropping event, store write failed");
                }
            }
        }

        info!(indexed = stats.indexed, failed = stats.failed, "indexer stopped");
        stats
    }

    pub async fn index_with_retry(&self, event: &Event) -> Result<i64> {
        let mut attempt = 1;
        loop {
            match self.store.index(event).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    warn!(attempt, ?delay, error = %e, "store write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
