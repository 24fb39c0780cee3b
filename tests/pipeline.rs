use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gazette_ingest::config::{Settings, WorkerSettings};
use gazette_ingest::delivery::{DeliveryClient, DeliveryError, DeliveryResponse};
use gazette_ingest::fetch::{FetchError, PageFetcher};
use gazette_ingest::model::{ApiPublication, SourcePage};
use gazette_ingest::producer::Producer;
use gazette_ingest::queue::DurableQueue;
use gazette_ingest::store::{MemoryStore, SqliteStore, Store};
use gazette_ingest::worker::{Worker, WorkerAction};

const PAGE_URL: &str = "https://dje.example/cdje/consultaSimples.do?cdCaderno=12&nuSeqpagina=";

struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        Err(FetchError::Network(format!("{} unreachable", url)))
    }
}

/// Answers with a scripted status sequence, then 201, and keeps every payload.
#[derive(Default)]
struct RecordingApi {
    statuses: Mutex<VecDeque<u16>>,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl RecordingApi {
    fn with_statuses(statuses: &[u16]) -> Self {
        RecordingApi {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for RecordingApi {
    async fn submit(&self, publication: &ApiPublication) -> Result<DeliveryResponse, DeliveryError> {
        self.payloads
            .lock()
            .unwrap()
            .push(serde_json::to_value(publication).unwrap());
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(201);
        Ok(DeliveryResponse::new(status, "{}"))
    }

    async fn submit_batch(
        &self,
        publications: &[ApiPublication],
    ) -> Result<DeliveryResponse, DeliveryError> {
        for p in publications {
            self.payloads.lock().unwrap().push(serde_json::to_value(p).unwrap());
        }
        Ok(DeliveryResponse::new(201, "{}"))
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.extraction.required_terms = vec!["RPV".to_string()];
    settings.worker = WorkerSettings {
        poll_timeout_ms: 0,
        min_request_interval_ms: 0,
        max_retries: 3,
        backoff_base_ms: 0,
        default_retry_after_secs: 1,
        max_retry_after_secs: 600,
    };
    settings
}

fn worker(settings: &Settings, store: Arc<dyn Store>, api: Arc<RecordingApi>) -> (Worker, Arc<DurableQueue>) {
    let queue = Arc::new(DurableQueue::new(store, settings.store.queue_name.clone()));
    let worker = Worker::new(
        queue.clone(),
        api,
        settings.worker.clone(),
        settings.extraction.labels(),
    );
    (worker, queue)
}

fn fixture_pages() -> Vec<SourcePage> {
    (1..=2)
        .map(|n| SourcePage {
            url: format!("{}{}", PAGE_URL, n),
            text: std::fs::read_to_string(format!("tests/fixtures/page_{:04}.txt", n)).unwrap(),
        })
        .collect()
}

#[tokio::test]
async fn single_record_is_extracted_queued_and_delivered() {
    let settings = settings();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut producer = Producer::from_settings(&settings, Arc::new(OfflineFetcher), store.clone());

    let page = SourcePage {
        url: format!("{}1", PAGE_URL),
        text: "Processo 0013168-70.2024.8.26.0053 - Autor: Maria da Silva - Expeça-se RPV no valor de R$ 15.000,00"
            .to_string(),
    };
    let run = producer.run(&[page]).await.unwrap();
    assert_eq!((run.found, run.validated, run.queued), (1, 1, 1));

    let api = Arc::new(RecordingApi::default());
    let (mut worker, queue) = worker(&settings, store, api.clone());
    assert_eq!(worker.run_once().await.unwrap(), WorkerAction::Delivered);

    let stats = worker.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped + stats.dead_lettered, 0);
    assert_eq!(queue.stats().await.unwrap().total_pending, 0);

    let sent = api.payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["process_number"], "0013168-70.2024.8.26.0053");
    assert_eq!(sent[0]["grossValue"], 1_500_000);
    assert_eq!(sent[0]["authors"][0], "Maria da Silva");
    assert_eq!(sent[0]["status"], "SENT");
}

#[tokio::test]
async fn split_record_reaches_the_api_whole() {
    let settings = settings();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut producer = Producer::from_settings(&settings, Arc::new(OfflineFetcher), store.clone());
    let run = producer.run(&fixture_pages()).await.unwrap();
    assert_eq!(run.merged, 1);
    assert_eq!(run.queued, 4);

    let api = Arc::new(RecordingApi::default());
    let (mut worker, _) = worker(&settings, store, api.clone());
    while worker.run_once().await.unwrap() != WorkerAction::Idle {}
    assert_eq!(worker.stats().delivered, 4);

    let sent = api.payloads();
    let merged = sent
        .iter()
        .find(|p| p["process_number"] == "0004321-09.2023.8.26.0053")
        .unwrap();
    assert_eq!(merged["extractionMetadata"]["merged"], true);
    assert_eq!(merged["extractionMetadata"]["method"], "merged");
    assert_eq!(merged["grossValue"], 2_240_010);
    assert_eq!(merged["attorneyFees"], 224_001);
    assert_eq!(merged["authors"][0], "Roberta Alves Costa");
}

#[tokio::test]
async fn dead_letter_can_be_requeued_and_delivered() {
    let settings = settings();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut producer = Producer::from_settings(&settings, Arc::new(OfflineFetcher), store.clone());
    let page = SourcePage {
        url: format!("{}1", PAGE_URL),
        text: "Processo 0013168-70.2024.8.26.0053 - Autor: Maria da Silva - Expeça-se RPV".to_string(),
    };
    producer.run(&[page]).await.unwrap();

    let api = Arc::new(RecordingApi::with_statuses(&[500, 502, 503, 500]));
    let (mut worker, queue) = worker(&settings, store, api.clone());
    while worker.run_once().await.unwrap() != WorkerAction::Idle {}
    assert_eq!(worker.stats().dead_lettered, 1);

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead[0].retry_count, 3);
    assert_eq!(dead[0].dlq_reason.as_deref(), Some("HTTP 500"));

    assert_eq!(queue.requeue_dead_letters(10).await.unwrap(), 1);
    assert_eq!(worker.run_once().await.unwrap(), WorkerAction::Delivered);
    assert_eq!(api.payloads().len(), 5);
    assert_eq!(queue.stats().await.unwrap().dead_letter_size, 0);
}

#[tokio::test]
async fn producer_and_worker_share_a_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gazette.sqlite");
    let settings = settings();

    let producer_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
    let mut producer = Producer::from_settings(&settings, Arc::new(OfflineFetcher), producer_store);
    assert_eq!(producer.run(&fixture_pages()).await.unwrap().queued, 4);

    let worker_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
    let api = Arc::new(RecordingApi::default());
    let (mut worker, queue) = worker(&settings, worker_store, api.clone());
    assert_eq!(queue.stats().await.unwrap().main_size, 4);
    while worker.run_once().await.unwrap() != WorkerAction::Idle {}
    assert_eq!(api.payloads().len(), 4);
}
