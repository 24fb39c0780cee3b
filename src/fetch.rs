use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("page fetch failed: {0}")]
    Network(String),
    #[error("no content for {0}")]
    Empty(String),
    #[error("page fetcher misconfigured: {0}")]
    Config(String),
}

/// Returns the rendered text of one gazette page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

/// Page sequence number carried in `param` of the page URL.
pub fn page_number(url: &str, param: &str) -> Option<u32> {
    let url = Url::parse(url).ok()?;
    let number = url
        .query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| value.parse().ok());
    number
}

/// Same URL with `param` rewritten to `page`; other query pairs keep their order.
pub fn page_url(url: &str, param: &str, page: u32) -> Option<String> {
    let mut url = Url::parse(url).ok()?;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if !pairs.iter().any(|(key, _)| key == param) {
        return None;
    }
    let page = page.to_string();
    url.query_pairs_mut().clear().extend_pairs(pairs.iter().map(|(key, value)| {
        let value = if key == param { &page } else { value };
        (key.as_str(), value.as_str())
    }));
    Some(url.to_string())
}

/// Page fetcher backed by spider.cloud, returning markdown without images.
pub struct SpiderPageFetcher {
    spider: Spider,
    timeout: Duration,
}

impl SpiderPageFetcher {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        if api_key.is_empty() {
            return Err(FetchError::Config("spider API key is empty".to_string()));
        }
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| FetchError::Config(format!("failed to create Spider client: {}", e)))?;
        Ok(SpiderPageFetcher { spider, timeout })
    }

    async fn scrape_once(&self, url: &str) -> Result<String, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
            ..Default::default()
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.spider.scrape_url(url, Some(params), "application/json"),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.timeout))?
        .map_err(|e| FetchError::Network(e.to_string()))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };

        parsed
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(strip_images)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| FetchError::Empty(url.to_string()))
    }
}

#[async_trait]
impl PageFetcher for SpiderPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.scrape_once(url).await {
                Ok(text) => {
                    debug!(url, chars = text.len(), "Fetched page");
                    return Ok(text);
                }
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Fetch failed for {} (attempt {}/{}), backing off {:.1}s: {}",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(e: &FetchError) -> bool {
    match e {
        FetchError::Network(msg) => {
            msg.contains("429")
                || msg.contains("rate")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
        }
        FetchError::Timeout(_) => true,
        _ => false,
    }
}

/// Remove markdown image syntax: ![alt](url) and [![alt](url)](link)
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}
