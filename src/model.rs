use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a publication. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublicationStatus {
    New,
    Read,
    Sent,
    Done,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::New => "NEW",
            PublicationStatus::Read => "READ",
            PublicationStatus::Sent => "SENT",
            PublicationStatus::Done => "DONE",
        }
    }

    /// Move to `next`, refusing anything that is not strictly forward.
    pub fn advance(self, next: PublicationStatus) -> Result<PublicationStatus, StatusTransition> {
        if next > self {
            Ok(next)
        } else {
            Err(StatusTransition { from: self, to: next })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("status cannot move from {} to {}", from.as_str(), to.as_str())]
pub struct StatusTransition {
    pub from: PublicationStatus,
    pub to: PublicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lawyer {
    pub name: String,
    /// Registration number normalized as `digits/UF`.
    pub registration_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Parsed from a single page.
    Direct,
    /// Parsed from text stitched across two pages.
    Merged,
    /// A merge was attempted but rejected; parsed from the current page only.
    MergeFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source_url: String,
    pub method: ExtractionMethod,
    pub confidence: f32,
    pub merged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub process_number: String,
    pub publication_date: Option<NaiveDate>,
    pub availability_date: DateTime<Utc>,
    pub authors: Vec<String>,
    pub defendant: String,
    pub lawyers: Vec<Lawyer>,
    pub gross_value: Option<i64>,
    pub net_value: Option<i64>,
    pub interest_value: Option<i64>,
    pub attorney_fees: Option<i64>,
    pub content: String,
    pub status: PublicationStatus,
    pub extraction_metadata: ExtractionMetadata,
}

/// Which monetary slot an amount belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyField {
    Gross,
    Net,
    Interest,
    AttorneyFees,
}

impl Publication {
    /// Store an amount in cents. Negative amounts leave the field unset.
    pub fn set_money(&mut self, field: MoneyField, cents: Option<i64>) {
        let value = cents.filter(|c| *c >= 0);
        match field {
            MoneyField::Gross => self.gross_value = value,
            MoneyField::Net => self.net_value = value,
            MoneyField::Interest => self.interest_value = value,
            MoneyField::AttorneyFees => self.attorney_fees = value,
        }
    }

    pub fn money(&self, field: MoneyField) -> Option<i64> {
        match field {
            MoneyField::Gross => self.gross_value,
            MoneyField::Net => self.net_value,
            MoneyField::Interest => self.interest_value,
            MoneyField::AttorneyFees => self.attorney_fees,
        }
    }
}

/// A rendered gazette page handed to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    pub url: String,
    pub text: String,
}

/// Queue envelope around a serialized publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub publication: Publication,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_timestamp: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(publication: Publication) -> Self {
        QueueItem {
            publication,
            retry_count: 0,
            enqueued_at: Utc::now(),
            requeued_at: None,
            last_error: None,
            dlq_reason: None,
            dlq_timestamp: None,
        }
    }

    pub fn process_number(&self) -> &str {
        &self.publication.process_number
    }
}

/// Outbound lawyer shape for the delivery API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiLawyer {
    pub name: String,
    pub oab: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiExtractionMetadata {
    pub source_url: String,
    pub method: ExtractionMethod,
    pub confidence: f32,
    pub merged: bool,
}

/// Source labels attached to every outbound publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLabels {
    pub scraping_source: String,
    pub caderno: String,
    pub instancia: String,
    pub local: String,
    pub parte: String,
}

/// JSON body posted to the delivery API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPublication {
    #[serde(rename = "process_number")]
    pub process_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    pub availability_date: String,
    pub authors: Vec<String>,
    pub defendant: String,
    pub lawyers: Vec<ApiLawyer>,
    pub gross_value: Option<i64>,
    pub net_value: Option<i64>,
    pub interest_value: Option<i64>,
    pub attorney_fees: Option<i64>,
    pub content: String,
    pub status: PublicationStatus,
    pub scraping_source: String,
    pub caderno: String,
    pub instancia: String,
    pub local: String,
    pub parte: String,
    pub extraction_metadata: ApiExtractionMetadata,
}

impl ApiPublication {
    pub fn from_publication(p: &Publication, labels: &SourceLabels) -> Self {
        ApiPublication {
            process_number: p.process_number.clone(),
            publication_date: p.publication_date.map(|d| d.format("%Y-%m-%d").to_string()),
            availability_date: p
                .availability_date
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            authors: p.authors.clone(),
            defendant: p.defendant.clone(),
            lawyers: p
                .lawyers
                .iter()
                .map(|l| ApiLawyer {
                    name: l.name.clone(),
                    oab: l.registration_number.clone(),
                })
                .collect(),
            gross_value: p.gross_value,
            net_value: p.net_value,
            interest_value: p.interest_value,
            attorney_fees: p.attorney_fees,
            content: p.content.clone(),
            status: p.status,
            scraping_source: labels.scraping_source.clone(),
            caderno: labels.caderno.clone(),
            instancia: labels.instancia.clone(),
            local: labels.local.clone(),
            parte: labels.parte.clone(),
            extraction_metadata: ApiExtractionMetadata {
                source_url: p.extraction_metadata.source_url.clone(),
                method: p.extraction_metadata.method,
                confidence: p.extraction_metadata.confidence,
                merged: p.extraction_metadata.merged,
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_publication(process_number: &str) -> Publication {
    use chrono::TimeZone;
    Publication {
        process_number: process_number.to_string(),
        publication_date: None,
        availability_date: Utc.with_ymd_and_hms(2024, 10, 3, 0, 0, 0).unwrap(),
        authors: vec!["Maria da Silva".to_string()],
        defendant: "Instituto Nacional do Seguro Social - INSS".to_string(),
        lawyers: vec![],
        gross_value: Some(1_500_000),
        net_value: None,
        interest_value: None,
        attorney_fees: None,
        content: format!("Processo {} - RPV", process_number),
        status: PublicationStatus::New,
        extraction_metadata: ExtractionMetadata {
            source_url: "https://dje.example/cdje?nuSeqpagina=2".to_string(),
            method: ExtractionMethod::Direct,
            confidence: 0.5,
            merged: false,
        },
    }
}
