use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::model::SourceLabels;

pub const DEFAULT_CONFIG_FILE: &str = "gazette.toml";
pub const DEFAULT_DEFENDANT: &str = "Instituto Nacional do Seguro Social - INSS";

/// Runtime settings, layered defaults < TOML file < `GAZETTE_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: String,
    pub store: StoreSettings,
    pub api: ApiSettings,
    pub worker: WorkerSettings,
    pub extraction: ExtractionSettings,
    pub merger: MergerSettings,
    pub scraper: ScraperSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            environment: "development".to_string(),
            store: StoreSettings::default(),
            api: ApiSettings::default(),
            worker: WorkerSettings::default(),
            extraction: ExtractionSettings::default(),
            merger: MergerSettings::default(),
            scraper: ScraperSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings. A missing default file is fine; a missing explicit file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix("GAZETTE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("extraction.required_terms")
                .try_parsing(true),
        );
        let settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: String,
    pub queue_name: String,
    pub dedup_key: String,
    pub dedup_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            path: "data/gazette.sqlite".to_string(),
            queue_name: "publications".to_string(),
            dedup_key: "publications:seen".to_string(),
            dedup_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl StoreSettings {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub key: String,
    pub key_header: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: "http://localhost:3000".to_string(),
            key: String::new(),
            key_header: "X-API-Key".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub poll_timeout_ms: u64,
    pub min_request_interval_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub default_retry_after_secs: u64,
    /// Ceiling on any server-supplied `retryAfter`.
    pub max_retry_after_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            poll_timeout_ms: 1_000,
            min_request_interval_ms: 1_000,
            max_retries: 3,
            backoff_base_ms: 2_000,
            default_retry_after_secs: 60,
            max_retry_after_secs: 600,
        }
    }
}

impl WorkerSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs).min(self.max_retry_after())
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    /// `base × 2^attempt`, saturating.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub required_terms: Vec<String>,
    pub defendant_name: String,
    pub scraping_source: String,
    pub caderno: String,
    pub instancia: String,
    pub local: String,
    pub parte: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        ExtractionSettings {
            required_terms: vec!["RPV".to_string(), "pagamento pelo INSS".to_string()],
            defendant_name: DEFAULT_DEFENDANT.to_string(),
            scraping_source: "DJE-SP".to_string(),
            caderno: "3".to_string(),
            instancia: "1".to_string(),
            local: "Capital".to_string(),
            parte: "1".to_string(),
        }
    }
}

impl ExtractionSettings {
    pub fn labels(&self) -> SourceLabels {
        SourceLabels {
            scraping_source: self.scraping_source.clone(),
            caderno: self.caderno.clone(),
            instancia: self.instancia.clone(),
            local: self.local.clone(),
            parte: self.parte.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergerSettings {
    pub page_param: String,
    pub separator: String,
    pub cache_capacity: usize,
}

impl Default for MergerSettings {
    fn default() -> Self {
        MergerSettings {
            page_param: "nuSeqpagina".to_string(),
            separator: "\n".to_string(),
            cache_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub spider_api_key: String,
    pub fetch_timeout_secs: u64,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        ScraperSettings {
            spider_api_key: String::new(),
            fetch_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backoff_doubles() {
        let w = WorkerSettings {
            backoff_base_ms: 500,
            ..Default::default()
        };
        assert_eq!(w.backoff(0), Duration::from_millis(500));
        assert_eq!(w.backoff(1), Duration::from_millis(1000));
        assert_eq!(w.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "environment = \"production\"\n[worker]\nmax_retries = 5\n[extraction]\nrequired_terms = [\"RPV\", \"precatório\"]"
        )
        .unwrap();
        let s = Settings::load(Some(file.path())).unwrap();
        assert!(s.is_production());
        assert_eq!(s.worker.max_retries, 5);
        assert_eq!(s.worker.backoff_base_ms, 2_000);
        assert_eq!(s.extraction.required_terms, vec!["RPV", "precatório"]);
        assert_eq!(s.store.queue_name, "publications");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/gazette.toml"))).is_err());
    }
}
