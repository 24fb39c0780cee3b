use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::dedup::DedupCache;
use crate::fetch::PageFetcher;
use crate::merger::ContentMerger;
use crate::model::{ExtractionMethod, QueueItem, SourcePage};
use crate::parser::extract::ExtractContext;
use crate::parser::parse_publications;
use crate::queue::DurableQueue;
use crate::store::{Store, StoreResult};
use crate::validator::{RejectReason, Validation, Validator};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub pages: usize,
    pub found: usize,
    pub validated: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
    pub duplicates: usize,
    pub queued: usize,
    pub enqueue_failures: usize,
    pub merged: usize,
}

impl RunStats {
    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn absorb(&mut self, other: &RunStats) {
        self.pages += other.pages;
        self.found += other.found;
        self.validated += other.validated;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(*reason).or_default() += n;
        }
        self.duplicates += other.duplicates;
        self.queued += other.queued;
        self.enqueue_failures += other.enqueue_failures;
        self.merged += other.merged;
    }
}

/// Page text in, queued publications out: merge → parse → validate → dedup → enqueue.
pub struct Producer {
    merger: ContentMerger,
    validator: Validator,
    dedup: DedupCache,
    queue: Arc<DurableQueue>,
    required_terms: Vec<String>,
    defendant_name: String,
    availability_date: DateTime<Utc>,
    /// Process numbers queued since `begin_run`.
    queued_this_run: HashSet<String>,
}

impl Producer {
    pub fn new(
        merger: ContentMerger,
        validator: Validator,
        dedup: DedupCache,
        queue: Arc<DurableQueue>,
        required_terms: Vec<String>,
        defendant_name: String,
    ) -> Self {
        Producer {
            merger,
            validator,
            dedup,
            queue,
            required_terms,
            defendant_name,
            availability_date: Utc::now(),
            queued_this_run: HashSet::new(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn Store>,
    ) -> Self {
        let terms = settings.extraction.required_terms.clone();
        let merger = ContentMerger::new(fetcher, settings.merger.clone(), terms.clone());
        let dedup = DedupCache::new(
            store.clone(),
            settings.store.dedup_key.clone(),
            settings.store.dedup_ttl(),
        );
        let queue = Arc::new(DurableQueue::new(store, settings.store.queue_name.clone()));
        Producer::new(
            merger,
            Validator::new(terms.clone()),
            dedup,
            queue,
            terms,
            settings.extraction.defendant_name.clone(),
        )
    }

    /// Edition date used when a record carries no `Disponibilização` date.
    pub fn with_availability_date(mut self, date: DateTime<Utc>) -> Self {
        self.availability_date = date;
        self
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    /// Process a whole run of pages in order.
    pub async fn run(&mut self, pages: &[SourcePage]) -> StoreResult<RunStats> {
        self.begin_run().await?;
        let mut stats = RunStats::default();
        for page in pages {
            stats.absorb(&self.process_page(page).await);
        }
        info!(
            pages = stats.pages,
            found = stats.found,
            validated = stats.validated,
            rejected = stats.total_rejected(),
            duplicates = stats.duplicates,
            queued = stats.queued,
            enqueue_failures = stats.enqueue_failures,
            merged = stats.merged,
            "Ingestion run finished"
        );
        Ok(stats)
    }

    /// Reset per-run state and make sure the store answers.
    pub async fn begin_run(&mut self) -> StoreResult<()> {
        self.merger.reset();
        self.queued_this_run.clear();
        let stats = self.queue.stats().await?;
        debug!(queue = %self.queue.name(), pending = stats.total_pending, "Starting ingestion run");
        Ok(())
    }

    pub async fn process_page(&mut self, page: &SourcePage) -> RunStats {
        let mut stats = RunStats {
            pages: 1,
            ..Default::default()
        };
        let segments = self.merger.prepare(page).await;

        let mut batch = Vec::new();
        let mut in_batch = HashSet::new();
        for segment in segments {
            if segment.method == ExtractionMethod::Merged {
                stats.merged += 1;
            }
            let ctx = ExtractContext {
                source_url: &page.url,
                availability_date: self.availability_date,
                defendant_name: &self.defendant_name,
                method: segment.method,
            };
            for publication in parse_publications(&segment.text, &self.required_terms, &ctx) {
                stats.found += 1;
                if let Validation::Invalid(reason) = self.validator.validate(&publication) {
                    debug!(process_number = %publication.process_number, reason = %reason, "Rejected");
                    *stats.rejected.entry(reason).or_default() += 1;
                    continue;
                }
                stats.validated += 1;

                let id = publication.process_number.clone();
                // The head of this record was queued from the previous page with
                // truncated text; the merged version replaces it downstream.
                let completes_fragment =
                    segment.method == ExtractionMethod::Merged && self.queued_this_run.contains(&id);
                if completes_fragment {
                    info!(process_number = %id, "Queueing complete text of a record split across pages");
                }
                if in_batch.contains(&id) || (!completes_fragment && self.dedup.is_member(&id).await) {
                    debug!(process_number = %id, "Already queued, skipping");
                    stats.duplicates += 1;
                    continue;
                }
                in_batch.insert(id);
                batch.push(QueueItem::new(publication));
            }
        }

        if batch.is_empty() {
            return stats;
        }
        let report = self.queue.enqueue_many(batch).await;
        stats.queued = report.queued.len();
        stats.enqueue_failures = report.failed;
        for id in &report.queued {
            if let Err(e) = self.dedup.add(id).await {
                warn!(process_number = %id, error = %e, "Could not record in dedup set");
            }
        }
        self.queued_this_run.extend(report.queued);
        info!(url = %page.url, found = stats.found, queued = stats.queued, "Page processed");
        stats
    }
}
