use std::sync::LazyLock;

use regex::Regex;

use super::names::{looks_like_name, title_case};

/// `Autor: NAME`, `Requerente - NAME`, `Exequentes: NAME`.
static ROLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:autor(?:a|es|as)?|requerentes?|exequentes?)\s*[:\-–]\s*([^\n;:()\-–]+)")
        .unwrap()
});

static VISTOS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bvistos\b").unwrap());

static DASH_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[-–]\s+").unwrap());

/// Role words that end a captured name when no punctuation does.
static STOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s(?:executad|requerid|réu\b|ré\b|vistos\b|adv\b|advogad|interessad|e\s+outros\b)")
        .unwrap()
});

/// Authors by role keyword first, then the `- NAME - Vistos` idiom.
/// Names matching the defendant are dropped; the rest are trimmed, title-cased
/// and deduplicated in order of appearance.
pub fn extract(text: &str, defendant_name: &str) -> Vec<String> {
    let by_role = dedup(
        ROLE_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| clean(m.as_str()))
            .filter(|name| !is_defendant(name, defendant_name)),
    );
    if !by_role.is_empty() {
        return by_role;
    }

    dedup(
        VISTOS_RE
            .find_iter(text)
            .filter_map(|m| dash_idiom(&text[..m.start()], defendant_name)),
    )
}

/// Walk `… - Classe - Assunto - NAME - INSS - ` backwards from `Vistos`,
/// skipping defendant segments, and take the first name-shaped one.
fn dash_idiom(before: &str, defendant_name: &str) -> Option<String> {
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let segment = before[line_start..].trim_end();
    let segment = segment
        .strip_suffix('-')
        .or_else(|| segment.strip_suffix('–'))?;
    let parts: Vec<&str> = DASH_SPLIT_RE.split(segment).map(str::trim).collect();
    parts
        .into_iter()
        .rev()
        .filter(|s| !s.is_empty())
        .find(|s| !is_defendant(s, defendant_name))
        .filter(|s| looks_like_name(s))
        .map(title_case)
}

fn clean(raw: &str) -> Option<String> {
    let candidate = match STOP_RE.find(raw) {
        Some(m) => &raw[..m.start()],
        None => raw,
    };
    let candidate = candidate
        .split(". ")
        .next()
        .and_then(|s| s.split(',').next())
        .unwrap_or_default()
        .trim()
        .trim_end_matches('.')
        .trim();
    if looks_like_name(candidate) {
        Some(title_case(candidate))
    } else {
        None
    }
}

pub fn is_defendant(name: &str, defendant_name: &str) -> bool {
    let lower = name.to_lowercase();
    let lower = lower.trim();
    if lower.is_empty() {
        return false;
    }
    let defendant = defendant_name.to_lowercase();
    lower == "inss"
        || lower.contains("instituto nacional do seguro social")
        || (!defendant.is_empty() && lower.contains(&defendant))
        || (lower.split_whitespace().count() >= 2 && defendant.contains(lower))
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DEFENDANT;

    #[test]
    fn role_keywords() {
        let text = "Exequente: JOSÉ DOS SANTOS - Executado: Instituto Nacional do Seguro Social - INSS";
        assert_eq!(extract(text, DEFAULT_DEFENDANT), vec!["José dos Santos"]);
    }

    #[test]
    fn role_keyword_without_punctuation_stop() {
        let text = "Requerente: Ana Paula Lima Requerido: INSS";
        assert_eq!(extract(text, DEFAULT_DEFENDANT), vec!["Ana Paula Lima"]);
    }

    #[test]
    fn dash_vistos_idiom_skips_defendant() {
        let text = "Processo 0013168-70.2024.8.26.0053 - Cumprimento de Sentença contra a Fazenda Pública - \
                    Aposentadoria por Invalidez - MARIA DA SILVA - Instituto Nacional do Seguro Social - INSS - Vistos.";
        assert_eq!(extract(text, DEFAULT_DEFENDANT), vec!["Maria da Silva"]);
    }

    #[test]
    fn deduplicates_case_insensitively() {
        let text = "Autor: MARIA DA SILVA. Intime-se. Autora: Maria da Silva.";
        assert_eq!(extract(text, DEFAULT_DEFENDANT), vec!["Maria da Silva"]);
    }

    #[test]
    fn defendant_is_never_an_author() {
        let text = "Autor: Instituto Nacional do Seguro Social";
        assert!(extract(text, DEFAULT_DEFENDANT).is_empty());
    }

    #[test]
    fn nothing_to_find() {
        assert!(extract("Intime-se a parte para manifestação.", DEFAULT_DEFENDANT).is_empty());
    }
}
