//! Delivery worker: drains the queue into the publications API.
//!
//! | outcome            | action                                           |
//! |--------------------|--------------------------------------------------|
//! | 2xx                | ack                                              |
//! | 400 / 401          | ack and log, never retried                       |
//! | 429                | sleep `retryAfter` (capped), retry in place      |
//! | 5xx / network      | delayed requeue with `base × 2^retry_count`      |
//! | retries exhausted  | dead-letter lane with the last reason            |

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::delivery::{classify, DeliveryClient, DeliveryOutcome};
use crate::model::{ApiPublication, PublicationStatus, QueueItem, SourceLabels};
use crate::queue::DurableQueue;
use crate::store::StoreResult;

/// Consecutive store failures tolerated by [`Worker::run`] before giving up.
const MAX_STORE_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub delivered: u64,
    pub dropped: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// What one step did with the item it dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    Delivered,
    Dropped,
    Requeued,
    DeadLettered,
    Idle,
}

pub struct Worker {
    queue: Arc<DurableQueue>,
    client: Arc<dyn DeliveryClient>,
    settings: WorkerSettings,
    labels: SourceLabels,
    batch_size: Option<usize>,
    last_request: Option<Instant>,
    stop: Option<watch::Receiver<bool>>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        queue: Arc<DurableQueue>,
        client: Arc<dyn DeliveryClient>,
        settings: WorkerSettings,
        labels: SourceLabels,
    ) -> Self {
        Worker {
            queue,
            client,
            settings,
            labels,
            batch_size: None,
            last_request: None,
            stop: None,
            stats: WorkerStats::default(),
        }
    }

    /// Deliver through the batch endpoint, `size` items per request.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size.max(1));
        self
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Loop until `stop` flips to true. An in-flight request always finishes;
    /// a rate-limit wait does not, its item goes back to the delayed lane.
    ///
    /// Store errors back off and retry; only a run of consecutive failures is
    /// returned to the caller.
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> StoreResult<WorkerStats> {
        info!(queue = %self.queue.name(), "Worker started");
        self.stop = Some(stop);
        let mut failures = 0;
        while !self.stopping() {
            let step = match self.batch_size {
                Some(size) => self.run_batch_once(size).await.map(|_| ()),
                None => self.run_once().await.map(|_| ()),
            };
            match step {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_STORE_FAILURES {
                        error!(error = %e, failures, "Store unavailable, stopping worker");
                        self.stop = None;
                        return Err(e);
                    }
                    warn!(error = %e, failures, "Store error, backing off");
                    let backoff = self.settings.poll_timeout();
                    self.pause(backoff).await;
                }
            }
        }
        self.stop = None;
        info!(
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            retried = self.stats.retried,
            dead_lettered = self.stats.dead_lettered,
            "Worker stopped"
        );
        Ok(self.stats)
    }

    /// One promotion sweep, one dequeue, one delivery.
    pub async fn run_once(&mut self) -> StoreResult<WorkerAction> {
        self.queue.promote_due().await?;
        match self.queue.dequeue_blocking(self.settings.poll_timeout()).await? {
            Some(mut item) => self.deliver(&mut item).await,
            None => Ok(WorkerAction::Idle),
        }
    }

    /// Dequeue up to `size` items and send them in one batch request.
    ///
    /// When the batch as a whole is refused the items are retried one by one,
    /// so a single bad record cannot sink the rest.
    pub async fn run_batch_once(&mut self, size: usize) -> StoreResult<Vec<WorkerAction>> {
        self.queue.promote_due().await?;
        let mut items = Vec::new();
        let mut wait = self.settings.poll_timeout();
        while items.len() < size.max(1) {
            match self.queue.dequeue_blocking(wait).await? {
                Some(item) => items.push(item),
                None => break,
            }
            wait = Duration::ZERO;
        }
        if items.is_empty() {
            return Ok(vec![WorkerAction::Idle]);
        }

        for item in &mut items {
            mark_sent(item);
        }
        let payloads: Vec<ApiPublication> = items
            .iter()
            .map(|item| ApiPublication::from_publication(&item.publication, &self.labels))
            .collect();
        self.pace().await;
        let outcome = match self.client.submit_batch(&payloads).await {
            Ok(resp) => self.classify(resp.status, &resp.body),
            Err(e) => DeliveryOutcome::Transient {
                reason: e.to_string(),
            },
        };

        let mut actions = Vec::with_capacity(items.len());
        match outcome {
            DeliveryOutcome::Delivered => {
                info!(count = items.len(), "Batch delivered");
                self.stats.delivered += items.len() as u64;
                actions.resize(items.len(), WorkerAction::Delivered);
            }
            DeliveryOutcome::Transient { reason } => {
                warn!(count = items.len(), reason = %reason, "Batch delivery failed");
                for mut item in items {
                    actions.push(self.retry_later(&mut item, &reason).await?);
                }
            }
            other => {
                if let DeliveryOutcome::RateLimited { retry_after } = other {
                    warn!(retry_after_secs = retry_after.as_secs_f64(), "Batch rate limited, waiting");
                    if !self.pause(retry_after).await {
                        for mut item in items {
                            self.queue.requeue(&mut item, Some(retry_after)).await?;
                            self.stats.retried += 1;
                            actions.push(WorkerAction::Requeued);
                        }
                        return Ok(actions);
                    }
                } else {
                    warn!(count = items.len(), outcome = ?other, "Batch refused, delivering items one by one");
                }
                for mut item in items {
                    actions.push(self.deliver(&mut item).await?);
                }
            }
        }
        Ok(actions)
    }

    async fn deliver(&mut self, item: &mut QueueItem) -> StoreResult<WorkerAction> {
        mark_sent(item);
        let payload = ApiPublication::from_publication(&item.publication, &self.labels);
        loop {
            self.pace().await;
            let outcome = match self.client.submit(&payload).await {
                Ok(resp) => self.classify(resp.status, &resp.body),
                Err(e) => DeliveryOutcome::Transient {
                    reason: e.to_string(),
                },
            };

            match outcome {
                DeliveryOutcome::Delivered => {
                    info!(process_number = %item.process_number(), "Delivered");
                    self.stats.delivered += 1;
                    return Ok(WorkerAction::Delivered);
                }
                DeliveryOutcome::Rejected { errors } => {
                    let body = serde_json::to_string(&payload).unwrap_or_default();
                    error!(
                        process_number = %item.process_number(),
                        errors = %errors,
                        payload = %body,
                        "Delivery API rejected publication, dropping"
                    );
                    self.stats.dropped += 1;
                    return Ok(WorkerAction::Dropped);
                }
                DeliveryOutcome::Unauthorized => {
                    error!(
                        process_number = %item.process_number(),
                        "Delivery API refused credentials, check api.key and api.key_header; dropping"
                    );
                    self.stats.dropped += 1;
                    return Ok(WorkerAction::Dropped);
                }
                DeliveryOutcome::RateLimited { retry_after } => {
                    let reason = format!("rate limited, retry after {}s", retry_after.as_secs());
                    if item.retry_count >= self.settings.max_retries {
                        self.queue.dead_letter(item, &reason).await?;
                        self.stats.dead_lettered += 1;
                        return Ok(WorkerAction::DeadLettered);
                    }
                    warn!(
                        process_number = %item.process_number(),
                        retry_after_secs = retry_after.as_secs_f64(),
                        "Rate limited, waiting before retrying"
                    );
                    item.last_error = Some(reason);
                    self.stats.retried += 1;
                    if !self.pause(retry_after).await {
                        info!(process_number = %item.process_number(), "Stopping, parking rate-limited item");
                        self.queue.requeue(item, Some(retry_after)).await?;
                        return Ok(WorkerAction::Requeued);
                    }
                    item.retry_count += 1;
                }
                DeliveryOutcome::Transient { reason } => {
                    return self.retry_later(item, &reason).await;
                }
            }
        }
    }

    /// Requeue through the delayed lane, or dead-letter once the retry
    /// budget is spent.
    async fn retry_later(&mut self, item: &mut QueueItem, reason: &str) -> StoreResult<WorkerAction> {
        if item.retry_count >= self.settings.max_retries {
            self.queue.dead_letter(item, reason).await?;
            self.stats.dead_lettered += 1;
            return Ok(WorkerAction::DeadLettered);
        }
        let delay = self.settings.backoff(item.retry_count);
        warn!(
            process_number = %item.process_number(),
            retry_count = item.retry_count,
            delay_secs = delay.as_secs_f64(),
            reason,
            "Delivery failed, requeueing"
        );
        item.last_error = Some(reason.to_string());
        self.queue.requeue(item, Some(delay)).await?;
        self.stats.retried += 1;
        Ok(WorkerAction::Requeued)
    }

    /// Keep at least `min_request_interval` between requests.
    async fn pace(&mut self) {
        let min = self.settings.min_request_interval();
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < min {
                tokio::time::sleep(min - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Sleep for `duration`, returning early with `false` when the stop
    /// signal flips. Without a stop signal this is a plain sleep.
    async fn pause(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let Some(stop) = self.stop.as_mut() else {
            tokio::time::sleep_until(deadline).await;
            return true;
        };
        loop {
            if *stop.borrow() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = stop.changed() => {
                    if changed.is_err() {
                        // Sender gone, nobody can stop us any more.
                        tokio::time::sleep_until(deadline).await;
                        return true;
                    }
                }
            }
        }
    }

    fn stopping(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    fn classify(&self, status: u16, body: &str) -> DeliveryOutcome {
        classify(
            status,
            body,
            self.settings.default_retry_after(),
            self.settings.max_retry_after(),
        )
    }
}

/// Outbound payloads carry `SENT`; retries of an already sent item keep it.
fn mark_sent(item: &mut QueueItem) {
    match item.publication.status.advance(PublicationStatus::Sent) {
        Ok(status) => item.publication.status = status,
        Err(e) => debug!(process_number = %item.process_number(), error = %e, "Status unchanged"),
    }
}
