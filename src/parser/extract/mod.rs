pub mod authors;
pub mod dates;
pub mod lawyers;
pub mod money;
pub mod names;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Utc};
use regex::Regex;

use crate::model::{ExtractionMetadata, ExtractionMethod, Publication, PublicationStatus};

/// Merge fallbacks never score above this.
pub const LOW_CONFIDENCE: f32 = 0.3;

/// Social-security jurisdiction markers for the defendant screen.
static JURISDICTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\binss\b|instituto nacional do seguro social|previdenci[áa]ri|acident[áa]ri|benef[íi]cio",
    )
    .unwrap()
});

/// Free-text identifier after `Processo` when there is no CNJ number.
static FREE_PROCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bprocesso\s+(?:n[º°o]\.?\s*)?([^\s,;]+)").unwrap());

/// Everything the extractor needs besides the text itself.
#[derive(Debug, Clone)]
pub struct ExtractContext<'a> {
    pub source_url: &'a str,
    pub availability_date: DateTime<Utc>,
    pub defendant_name: &'a str,
    pub method: ExtractionMethod,
}

/// Build one publication from a single record's text.
pub fn extract_publication(
    text: &str,
    process_number: Option<&str>,
    ctx: &ExtractContext<'_>,
) -> Publication {
    let process_number = process_number
        .map(str::to_string)
        .or_else(|| {
            FREE_PROCESS_RE
                .captures(text)
                .map(|c| c[1].trim_end_matches('.').to_string())
        })
        .unwrap_or_default();

    let availability_date = dates::availability_date(text)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(ctx.availability_date);

    let defendant = if JURISDICTION_RE.is_match(text) {
        ctx.defendant_name.to_string()
    } else {
        String::new()
    };

    let mut publication = Publication {
        process_number,
        publication_date: dates::publication_date(text),
        availability_date,
        authors: authors::extract(text, ctx.defendant_name),
        defendant,
        lawyers: lawyers::extract(text),
        gross_value: None,
        net_value: None,
        interest_value: None,
        attorney_fees: None,
        content: text.to_string(),
        status: PublicationStatus::New,
        extraction_metadata: ExtractionMetadata {
            source_url: ctx.source_url.to_string(),
            method: ctx.method,
            confidence: 0.0,
            merged: ctx.method == ExtractionMethod::Merged,
        },
    };
    money::apply(&mut publication, text);

    let mut confidence = confidence(&publication);
    if ctx.method == ExtractionMethod::MergeFallback {
        confidence = confidence.min(LOW_CONFIDENCE);
    }
    publication.extraction_metadata.confidence = confidence;
    publication
}

/// Fraction of optional fields populated. Diagnostic only.
pub fn confidence(p: &Publication) -> f32 {
    let populated = [
        p.publication_date.is_some(),
        !p.lawyers.is_empty(),
        !p.defendant.is_empty(),
        p.gross_value.is_some(),
        p.net_value.is_some(),
        p.interest_value.is_some(),
        p.attorney_fees.is_some(),
    ];
    let hits = populated.iter().filter(|x| **x).count();
    hits as f32 / populated.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DEFENDANT;
    use chrono::TimeZone;

    fn ctx(method: ExtractionMethod) -> ExtractContext<'static> {
        ExtractContext {
            source_url: "https://dje.example/cdje?nuSeqpagina=5",
            availability_date: Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap(),
            defendant_name: DEFAULT_DEFENDANT,
            method,
        }
    }

    #[test]
    fn full_record() {
        let text = "Processo 0013168-70.2024.8.26.0053 - Procedimento Comum Cível - MARIA DA SILVA - \
                    Instituto Nacional do Seguro Social - INSS - Vistos. Expeça-se RPV do valor principal \
                    de R$ 11.608,32 e honorários de R$ 1.160,83. Disponibilização: 03/10/2024. \
                    ADV: JOÃO DA SILVA (OAB 123456/SP)";
        let p = extract_publication(text, Some("0013168-70.2024.8.26.0053"), &ctx(ExtractionMethod::Direct));
        assert_eq!(p.process_number, "0013168-70.2024.8.26.0053");
        assert_eq!(p.authors, vec!["Maria da Silva"]);
        assert_eq!(p.defendant, DEFAULT_DEFENDANT);
        assert_eq!(p.gross_value, Some(1_160_832));
        assert_eq!(p.attorney_fees, Some(116_083));
        assert_eq!(p.lawyers.len(), 1);
        assert_eq!(p.availability_date, Utc.with_ymd_and_hms(2024, 10, 3, 0, 0, 0).unwrap());
        assert_eq!(p.status, PublicationStatus::New);
        assert!((p.extraction_metadata.confidence - 4.0 / 7.0).abs() < 1e-6);
    }

    #[test]
    fn defendant_blank_outside_jurisdiction() {
        let text = "Processo 0013168-70.2024.8.26.0053 - Autor: Carlos Souza Lima - Município de São Paulo";
        let p = extract_publication(text, Some("0013168-70.2024.8.26.0053"), &ctx(ExtractionMethod::Direct));
        assert!(p.defendant.is_empty());
        assert_eq!(p.availability_date, ctx(ExtractionMethod::Direct).availability_date);
    }

    #[test]
    fn free_text_process_number() {
        let p = extract_publication("Processo nº 123/2024 - RPV", None, &ctx(ExtractionMethod::Direct));
        assert_eq!(p.process_number, "123/2024");
    }

    #[test]
    fn merge_fallback_is_low_confidence() {
        let text = "Processo 0013168-70.2024.8.26.0053 INSS Publicação: 04/10/2024 R$ 1,00 juros R$ 2,00 \
                    líquido R$ 3,00 honorários R$ 4,00 ADV: JOÃO DA SILVA (OAB 1234/SP)";
        let p = extract_publication(text, None, &ctx(ExtractionMethod::MergeFallback));
        assert!(p.extraction_metadata.confidence <= LOW_CONFIDENCE);
        assert!(!p.extraction_metadata.merged);
    }
}
