//! Downstream API delivery: the client seam and response classification.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ApiPublication;

pub use http::HttpDeliveryClient;

/// Transport-level failures. HTTP error statuses are not errors here; they
/// come back as a [`DeliveryResponse`] and go through [`classify`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery request timed out")]
    Timeout,
    #[error("could not reach delivery API: {0}")]
    Connect(String),
    #[error("delivery request failed: {0}")]
    Request(String),
    #[error("delivery client misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

impl DeliveryResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        DeliveryResponse {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn submit(&self, publication: &ApiPublication) -> Result<DeliveryResponse, DeliveryError>;
    async fn submit_batch(
        &self,
        publications: &[ApiPublication],
    ) -> Result<DeliveryResponse, DeliveryError>;
}

/// What a response means for the item that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Payload refused as invalid; retrying cannot help.
    Rejected { errors: String },
    Unauthorized,
    RateLimited { retry_after: Duration },
    Transient { reason: String },
}

impl DeliveryOutcome {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryOutcome::Rejected { .. } | DeliveryOutcome::Unauthorized)
    }
}

/// Map an HTTP status and body to an outcome.
///
/// 400/422 are payload rejections, 401/403 are credential problems, 429
/// carries `retryAfter` seconds in the body, capped at `max_retry_after`.
/// Everything else that is not 2xx is worth retrying.
pub fn classify(
    status: u16,
    body: &str,
    default_retry_after: Duration,
    max_retry_after: Duration,
) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Delivered,
        400 | 422 => DeliveryOutcome::Rejected {
            errors: field_errors(body),
        },
        401 | 403 => DeliveryOutcome::Unauthorized,
        429 => DeliveryOutcome::RateLimited {
            retry_after: retry_after(body)
                .unwrap_or(default_retry_after)
                .min(max_retry_after),
        },
        _ => DeliveryOutcome::Transient {
            reason: format!("HTTP {}", status),
        },
    }
}

fn parse_body(body: &str) -> Option<serde_json::Value> {
    serde_json::from_str(body).ok()
}

/// `retryAfter` from a 429 body, as a number or a numeric string.
fn retry_after(body: &str) -> Option<Duration> {
    let value = parse_body(body)?;
    let field = value.get("retryAfter")?;
    let secs = field
        .as_f64()
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    if secs == 0.0 {
        return Some(Duration::ZERO);
    }
    // Too large for a Duration: treat as "as long as allowed".
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Server-reported field errors, or the raw body when it has none.
fn field_errors(body: &str) -> String {
    parse_body(body)
        .and_then(|v| {
            ["errors", "details", "message"]
                .iter()
                .find_map(|k| v.get(*k).cloned())
        })
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(600);

    #[test]
    fn success_statuses() {
        assert_eq!(classify(201, "{}", DEFAULT, MAX), DeliveryOutcome::Delivered);
        assert_eq!(classify(200, "", DEFAULT, MAX), DeliveryOutcome::Delivered);
    }

    #[test]
    fn validation_errors_are_permanent() {
        let outcome = classify(
            400,
            r#"{"errors":[{"field":"authors","message":"required"}]}"#,
            DEFAULT,
            MAX,
        );
        assert!(outcome.is_permanent());
        match outcome {
            DeliveryOutcome::Rejected { errors } => assert!(errors.contains("authors")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify(400, "bad", DEFAULT, MAX),
            DeliveryOutcome::Rejected { errors: "bad".into() }
        );
        assert_eq!(classify(401, "", DEFAULT, MAX), DeliveryOutcome::Unauthorized);
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        assert_eq!(
            classify(429, r#"{"retryAfter":5}"#, DEFAULT, MAX),
            DeliveryOutcome::RateLimited { retry_after: Duration::from_secs(5) }
        );
        assert_eq!(
            classify(429, r#"{"retryAfter":"2"}"#, DEFAULT, MAX),
            DeliveryOutcome::RateLimited { retry_after: Duration::from_secs(2) }
        );
        assert_eq!(
            classify(429, "Too Many Requests", DEFAULT, MAX),
            DeliveryOutcome::RateLimited { retry_after: DEFAULT }
        );
    }

    #[test]
    fn huge_retry_after_is_capped() {
        for body in [r#"{"retryAfter":1e30}"#, r#"{"retryAfter":"1e300"}"#, r#"{"retryAfter":"inf"}"#] {
            assert_eq!(
                classify(429, body, DEFAULT, MAX),
                DeliveryOutcome::RateLimited { retry_after: MAX }
            );
        }
        assert_eq!(
            classify(429, r#"{"retryAfter":900}"#, DEFAULT, MAX),
            DeliveryOutcome::RateLimited { retry_after: MAX }
        );
        assert_eq!(
            classify(429, r#"{"retryAfter":-3}"#, DEFAULT, MAX),
            DeliveryOutcome::RateLimited { retry_after: DEFAULT }
        );
        assert_eq!(
            classify(429, "", Duration::from_secs(3600), MAX),
            DeliveryOutcome::RateLimited { retry_after: MAX }
        );
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(
            classify(503, "", DEFAULT, MAX),
            DeliveryOutcome::Transient { reason: "HTTP 503".into() }
        );
        assert!(!classify(500, "", DEFAULT, MAX).is_permanent());
    }
}
