//! Main, delayed and dead-letter lanes over a shared [`Store`].
//!
//! Key layout: `<name>` (main list, push-left/pop-right), `<name>:delayed`
//! (sorted set scored by ready-at millis), `<name>:dlq` (list).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::model::QueueItem;
use crate::store::{now_millis, Store, StoreError, StoreResult};

/// How often `dequeue_blocking` re-checks an empty main lane.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("refusing to clear queue {0} in production")]
    ClearRefused(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub main_size: usize,
    pub delayed_size: usize,
    pub total_pending: usize,
    pub dead_letter_size: usize,
}

/// Outcome of a best-effort batch enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Process numbers that reached the main lane.
    pub queued: Vec<String>,
    pub failed: usize,
}

pub struct DurableQueue {
    store: Arc<dyn Store>,
    name: String,
    delayed_key: String,
    dlq_key: String,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn Store>, name: impl Into<String>) -> Self {
        let name = name.into();
        DurableQueue {
            store,
            delayed_key: format!("{}:delayed", name),
            dlq_key: format!("{}:dlq", name),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push every item onto the main lane. A failing item is logged and
    /// counted; the rest of the batch still goes through.
    pub async fn enqueue_many(&self, items: Vec<QueueItem>) -> EnqueueReport {
        let mut report = EnqueueReport::default();
        for item in items {
            let result = match serde_json::to_string(&item) {
                Ok(raw) => self.store.lpush(&self.name, &raw).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => report.queued.push(item.process_number().to_string()),
                Err(e) => {
                    warn!(queue = %self.name, process_number = %item.process_number(), error = %e, "Enqueue failed");
                    report.failed += 1;
                }
            }
        }
        debug!(queue = %self.name, queued = report.queued.len(), failed = report.failed, "Batch enqueued");
        report
    }

    /// Pop the oldest item, waiting up to `timeout` for one to appear.
    ///
    /// Items coming back from the dead-letter lane get a fresh retry budget.
    /// Entries that no longer deserialize are moved to the dead-letter lane
    /// untouched.
    pub async fn dequeue_blocking(&self, timeout: Duration) -> StoreResult<Option<QueueItem>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(raw) = self.store.rpop(&self.name).await? {
                match serde_json::from_str::<QueueItem>(&raw) {
                    Ok(mut item) => {
                        if item.dlq_reason.take().is_some() {
                            item.dlq_timestamp = None;
                            item.retry_count = 0;
                        }
                        return Ok(Some(item));
                    }
                    Err(e) => {
                        error!(queue = %self.name, error = %e, "Undecodable queue entry, moving to dead-letter lane");
                        self.store.lpush(&self.dlq_key, &raw).await?;
                        continue;
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Put an item back for another attempt: straight onto the main lane, or
    /// into the delayed lane until `delay` has passed.
    pub async fn requeue(&self, item: &mut QueueItem, delay: Option<Duration>) -> StoreResult<()> {
        item.retry_count += 1;
        item.requeued_at = Some(Utc::now());
        let raw = serde_json::to_string(item)?;
        match delay.filter(|d| !d.is_zero()) {
            Some(d) => {
                let ready_at = now_millis().saturating_add(d.as_millis() as i64);
                self.store.zadd(&self.delayed_key, &raw, ready_at).await?;
                debug!(queue = %self.name, process_number = %item.process_number(), delay_ms = d.as_millis() as u64, "Requeued with delay");
            }
            None => {
                self.store.lpush(&self.name, &raw).await?;
                debug!(queue = %self.name, process_number = %item.process_number(), "Requeued");
            }
        }
        Ok(())
    }

    /// Move every delayed item whose ready time has passed to the main lane.
    pub async fn promote_due(&self) -> StoreResult<usize> {
        self.promote_due_at(now_millis()).await
    }

    pub async fn promote_due_at(&self, now_ms: i64) -> StoreResult<usize> {
        let moved = self
            .store
            .promote_due(&self.delayed_key, &self.name, now_ms)
            .await?;
        if moved > 0 {
            debug!(queue = %self.name, moved, "Promoted delayed items");
        }
        Ok(moved)
    }

    pub async fn dead_letter(&self, item: &mut QueueItem, reason: &str) -> StoreResult<()> {
        item.last_error = Some(reason.to_string());
        item.dlq_reason = Some(reason.to_string());
        item.dlq_timestamp = Some(Utc::now());
        let raw = serde_json::to_string(item)?;
        self.store.lpush(&self.dlq_key, &raw).await?;
        error!(
            queue = %self.name,
            process_number = %item.process_number(),
            retry_count = item.retry_count,
            reason,
            "Moved to dead-letter lane"
        );
        Ok(())
    }

    /// Up to `limit` dead-lettered items, oldest first.
    pub async fn dead_letters(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        let raw = self.store.lrange_tail(&self.dlq_key, limit).await?;
        Ok(raw
            .iter()
            .filter_map(|r| match serde_json::from_str(r) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "Skipping undecodable dead letter");
                    None
                }
            })
            .collect())
    }

    /// Move up to `limit` dead letters, oldest first, back onto the main lane.
    pub async fn requeue_dead_letters(&self, limit: usize) -> StoreResult<usize> {
        let mut moved = 0;
        while moved < limit {
            if self.store.rpoplpush(&self.dlq_key, &self.name).await?.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(queue = %self.name, moved, "Requeued dead letters");
        }
        Ok(moved)
    }

    pub async fn stats(&self) -> StoreResult<QueueStats> {
        let main_size = self.store.llen(&self.name).await?;
        let delayed_size = self.store.zcard(&self.delayed_key).await?;
        let dead_letter_size = self.store.llen(&self.dlq_key).await?;
        Ok(QueueStats {
            main_size,
            delayed_size,
            total_pending: main_size + delayed_size,
            dead_letter_size,
        })
    }

    /// Drop all three lanes. Refused in production.
    pub async fn clear(&self, production: bool) -> Result<(), QueueError> {
        if production {
            return Err(QueueError::ClearRefused(self.name.clone()));
        }
        self.store.del(&self.name).await?;
        self.store.del(&self.delayed_key).await?;
        self.store.del(&self.dlq_key).await?;
        warn!(queue = %self.name, "Queue cleared");
        Ok(())
    }
}
