use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use gazette_ingest::config::Settings;
use gazette_ingest::delivery::HttpDeliveryClient;
use gazette_ingest::fetch::{page_number, page_url, PageFetcher, SpiderPageFetcher};
use gazette_ingest::model::{ExtractionMethod, SourcePage};
use gazette_ingest::parser::extract::ExtractContext;
use gazette_ingest::parser::parse_publications;
use gazette_ingest::producer::{Producer, RunStats};
use gazette_ingest::queue::DurableQueue;
use gazette_ingest::store::{MemoryStore, SqliteStore, Store};
use gazette_ingest::validator::Validator;
use gazette_ingest::worker::Worker;

#[derive(Parser)]
#[command(name = "gazette_ingest", about = "Judicial gazette ingestion pipeline")]
struct Cli {
    /// Settings file (default: gazette.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Backing store for the queue and dedup set
    #[arg(long, global = true, value_enum, default_value = "sqlite")]
    store: StoreKind,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Sqlite,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch consecutive gazette pages and queue the publications found
    Ingest {
        /// URL of the first page (must carry the page sequence parameter)
        #[arg(long)]
        url: String,
        /// Number of pages to fetch
        #[arg(short = 'n', long, default_value = "1")]
        pages: u32,
    },
    /// Dry-run extraction over local text files, one JSON line per publication
    Extract {
        files: Vec<PathBuf>,
    },
    /// Deliver queued publications until Ctrl-C
    Work {
        /// Process a single item and exit
        #[arg(long)]
        once: bool,
        /// Use the batch endpoint with this many items per request
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Queue sizes
    Stats,
    /// Inspect or requeue dead-lettered items
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Drop every lane of the queue (refused in production)
    Clear,
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead letters, oldest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Move dead letters back to the main lane with a fresh retry budget
    Requeue {
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Ingest { url, pages } => {
            let store = open_store(cli.store, &settings)?;
            let fetcher: Arc<dyn PageFetcher> = Arc::new(SpiderPageFetcher::new(
                &settings.scraper.spider_api_key,
                Duration::from_secs(settings.scraper.fetch_timeout_secs),
            )?);
            let stats = ingest(&settings, fetcher, store, &url, pages).await?;
            print_run_stats(&stats);
            Ok(())
        }
        Commands::Extract { files } => {
            if files.is_empty() {
                bail!("No input files given");
            }
            extract_files(&settings, &files)
        }
        Commands::Work { once, batch } => {
            let store = open_store(cli.store, &settings)?;
            let queue = Arc::new(DurableQueue::new(store, settings.store.queue_name.clone()));
            let client = Arc::new(HttpDeliveryClient::new(&settings.api)?);
            let mut worker = Worker::new(
                queue,
                client,
                settings.worker.clone(),
                settings.extraction.labels(),
            );
            if once {
                match batch {
                    Some(size) => {
                        let actions = worker.run_batch_once(size).await?;
                        println!("{:?}", actions);
                    }
                    None => println!("{:?}", worker.run_once().await?),
                }
            } else {
                if let Some(size) = batch {
                    worker = worker.with_batch_size(size);
                }
                let (tx, rx) = tokio::sync::watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        println!("\nStopping after the current delivery...");
                        let _ = tx.send(true);
                    }
                });
                let stats = worker.run(rx).await.context("Worker stopped on store failure")?;
                println!(
                    "Delivered {}, dropped {}, retried {}, dead-lettered {}.",
                    stats.delivered, stats.dropped, stats.retried, stats.dead_lettered
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let queue = open_queue(cli.store, &settings)?;
            let s = queue.stats().await?;
            println!("Queue:       {}", queue.name());
            println!("Main:        {}", s.main_size);
            println!("Delayed:     {}", s.delayed_size);
            println!("Pending:     {}", s.total_pending);
            println!("Dead letter: {}", s.dead_letter_size);
            Ok(())
        }
        Commands::Dlq { action } => {
            let queue = open_queue(cli.store, &settings)?;
            match action {
                DlqAction::List { limit } => {
                    let items = queue.dead_letters(limit).await?;
                    if items.is_empty() {
                        println!("Dead-letter lane is empty.");
                        return Ok(());
                    }
                    println!("{:<25} | {:>7} | {:<24} | {}", "Process", "Retries", "Failed at", "Reason");
                    println!("{}", "-".repeat(90));
                    for item in &items {
                        let at = item
                            .dlq_timestamp
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "-".into());
                        println!(
                            "{:<25} | {:>7} | {:<24} | {}",
                            item.process_number(),
                            item.retry_count,
                            at,
                            item.dlq_reason.as_deref().unwrap_or("-")
                        );
                    }
                    println!("\n{} dead letters shown", items.len());
                }
                DlqAction::Requeue { limit } => {
                    let moved = queue.requeue_dead_letters(limit).await?;
                    println!("Requeued {} dead letters.", moved);
                }
            }
            Ok(())
        }
        Commands::Clear => {
            let queue = open_queue(cli.store, &settings)?;
            queue.clear(settings.is_production()).await?;
            println!("Cleared queue {}.", queue.name());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(kind: StoreKind, settings: &Settings) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match kind {
        StoreKind::Sqlite => Arc::new(
            SqliteStore::open(&settings.store.path)
                .with_context(|| format!("Failed to open store at {}", settings.store.path))?,
        ),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    })
}

fn open_queue(kind: StoreKind, settings: &Settings) -> anyhow::Result<DurableQueue> {
    let store = open_store(kind, settings)?;
    Ok(DurableQueue::new(store, settings.store.queue_name.clone()))
}

async fn ingest(
    settings: &Settings,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn Store>,
    first_url: &str,
    pages: u32,
) -> anyhow::Result<RunStats> {
    use indicatif::{ProgressBar, ProgressStyle};

    let param = &settings.merger.page_param;
    let first = page_number(first_url, param)
        .with_context(|| format!("URL has no {} parameter: {}", param, first_url))?;

    let mut producer = Producer::from_settings(settings, fetcher.clone(), store);
    producer.begin_run().await.context("Store unavailable")?;

    let pb = ProgressBar::new(pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut stats = RunStats::default();
    let mut fetch_errors = 0;
    for n in first..first.saturating_add(pages) {
        let Some(url) = page_url(first_url, param, n) else {
            break;
        };
        match fetcher.fetch_page(&url).await {
            Ok(text) => {
                let page_stats = producer.process_page(&SourcePage { url, text }).await;
                stats.absorb(&page_stats);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Skipping page");
                fetch_errors += 1;
            }
        }
        pb.set_message(format!("{} queued", stats.queued));
        pb.inc(1);
    }
    pb.finish_and_clear();

    if fetch_errors > 0 {
        println!("{} pages could not be fetched.", fetch_errors);
    }
    Ok(stats)
}

fn extract_files(settings: &Settings, files: &[PathBuf]) -> anyhow::Result<()> {
    use rayon::prelude::*;

    let validator = Validator::new(settings.extraction.required_terms.clone());
    let now = Utc::now();
    let results: Vec<anyhow::Result<Vec<String>>> = files
        .par_iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let source = path.display().to_string();
            let ctx = ExtractContext {
                source_url: &source,
                availability_date: now,
                defendant_name: &settings.extraction.defendant_name,
                method: ExtractionMethod::Direct,
            };
            let lines = parse_publications(&text, &settings.extraction.required_terms, &ctx)
                .into_iter()
                .map(|p| {
                    let (valid, reason) = validator.validate(&p).into_parts();
                    serde_json::json!({
                        "file": source,
                        "valid": valid,
                        "reason": reason,
                        "publication": p,
                    })
                    .to_string()
                })
                .collect();
            Ok(lines)
        })
        .collect();

    for result in results {
        match result {
            Ok(lines) => lines.iter().for_each(|l| println!("{}", l)),
            Err(e) => warn!("{:#}", e),
        }
    }
    Ok(())
}

fn print_run_stats(stats: &RunStats) {
    println!(
        "Pages {} | found {} | validated {} | duplicates {} | queued {} | enqueue failures {} | merged {}",
        stats.pages,
        stats.found,
        stats.validated,
        stats.duplicates,
        stats.queued,
        stats.enqueue_failures,
        stats.merged
    );
    for (reason, n) in &stats.rejected {
        println!("  rejected {:<24} {}", reason.as_str(), n);
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
