use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DeliveryClient, DeliveryError, DeliveryResponse};
use crate::config::ApiSettings;
use crate::model::ApiPublication;

const PUBLICATIONS_PATH: &str = "/api/scraper/publications";

/// Delivery client for the publications API, authenticated by a static key header.
#[derive(Clone)]
pub struct HttpDeliveryClient {
    client: Client,
    base_url: String,
}

impl HttpDeliveryClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, DeliveryError> {
        if settings.key.is_empty() {
            warn!("API key is empty, the delivery API will likely answer 401");
        }
        let name = HeaderName::from_bytes(settings.key_header.as_bytes())
            .map_err(|e| DeliveryError::Config(format!("invalid header name {:?}: {}", settings.key_header, e)))?;
        let mut value = HeaderValue::from_str(&settings.key)
            .map_err(|e| DeliveryError::Config(format!("invalid API key: {}", e)))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(name, value);

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DeliveryError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(HttpDeliveryClient {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn single_url(&self) -> String {
        format!("{}{}", self.base_url, PUBLICATIONS_PATH)
    }

    pub fn batch_url(&self) -> String {
        format!("{}{}/batch", self.base_url, PUBLICATIONS_PATH)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<DeliveryResponse, DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        debug!(url, status, "Delivery API responded");
        Ok(DeliveryResponse { status, body })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn submit(&self, publication: &ApiPublication) -> Result<DeliveryResponse, DeliveryError> {
        self.post(&self.single_url(), publication).await
    }

    async fn submit_batch(
        &self,
        publications: &[ApiPublication],
    ) -> Result<DeliveryResponse, DeliveryError> {
        self.post(&self.batch_url(), publications).await
    }
}

fn transport_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else if e.is_connect() {
        DeliveryError::Connect(e.to_string())
    } else {
        DeliveryError::Request(e.to_string())
    }
}
