use std::sync::LazyLock;

use regex::Regex;

use super::names::trailing_name;
use crate::model::Lawyer;

/// `NAME (OAB 123.456/SP)` / `NAME (OAB: 123456-A/SP)`
static PAREN_NUM_UF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([^\n(),;]{3,120}?)\s*\(\s*OAB[\s:]*(?:n[º°o]\.?\s*)?(\d[\d.]{1,8}(?:-?[A-Za-z])?)\s*/\s*([A-Za-z]{2})\s*\)",
    )
    .unwrap()
});

/// `NAME (OAB/SP 123.456)`
static PAREN_UF_NUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([^\n(),;]{3,120}?)\s*\(\s*OAB\s*/\s*([A-Za-z]{2})\s*(?:n[º°o]\.?\s*)?(\d[\d.]{1,8}(?:-?[A-Za-z])?)\s*\)",
    )
    .unwrap()
});

/// Signature form without parentheses: `NAME - OAB/SP nº 123.456`.
static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([^\n(),;\-–]{3,120}?)\s*[-–,]\s*OAB\s*/?\s*([A-Za-z]{2})\s*(?:n[º°o]\.?\s*)?(\d[\d.]{1,8}(?:-?[A-Za-z])?)",
    )
    .unwrap()
});

/// Signatures cluster in the last part of a publication.
const TAIL_FRACTION: f32 = 0.3;

/// Lawyers named before a parenthesised OAB marker anywhere in the text,
/// then signature-style markers in the tail. Deduplicated by registration.
pub fn extract(text: &str) -> Vec<Lawyer> {
    let mut lawyers: Vec<Lawyer> = Vec::new();

    for caps in PAREN_NUM_UF_RE.captures_iter(text) {
        push(&mut lawyers, &caps[1], &caps[2], &caps[3]);
    }
    for caps in PAREN_UF_NUM_RE.captures_iter(text) {
        push(&mut lawyers, &caps[1], &caps[3], &caps[2]);
    }
    for caps in SIGNATURE_RE.captures_iter(tail(text)) {
        push(&mut lawyers, &caps[1], &caps[3], &caps[2]);
    }

    lawyers
}

fn push(lawyers: &mut Vec<Lawyer>, raw_name: &str, number: &str, uf: &str) {
    let Some(name) = trailing_name(raw_name) else {
        return;
    };
    let registration_number = normalize_registration(number, uf);
    if lawyers
        .iter()
        .any(|l| l.registration_number == registration_number)
    {
        return;
    }
    lawyers.push(Lawyer {
        name,
        registration_number,
    });
}

/// "123.456", "sp" -> "123456/SP"
pub fn normalize_registration(number: &str, uf: &str) -> String {
    let number: String = number
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("{}/{}", number, uf.to_ascii_uppercase())
}

fn tail(text: &str) -> &str {
    let total = text.chars().count();
    let skip = total - ((total as f32 * TAIL_FRACTION).ceil() as usize).min(total);
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_lawyers() {
        let text = "ADV: JOÃO DA SILVA (OAB 123456/SP), MARIA SOUZA LIMA (OAB 654.321/SP)";
        let lawyers = extract(text);
        assert_eq!(lawyers.len(), 2);
        assert_eq!(lawyers[0].name, "João da Silva");
        assert_eq!(lawyers[0].registration_number, "123456/SP");
        assert_eq!(lawyers[1].name, "Maria Souza Lima");
        assert_eq!(lawyers[1].registration_number, "654321/SP");
    }

    #[test]
    fn uf_first_marker() {
        let lawyers = extract("Intime-se o Dr. Carlos Alberto Nunes (OAB/SP 98.765).");
        assert_eq!(lawyers.len(), 1);
        assert_eq!(lawyers[0].name, "Carlos Alberto Nunes");
        assert_eq!(lawyers[0].registration_number, "98765/SP");
    }

    #[test]
    fn dedup_by_registration_not_name() {
        let text = "ADV: JOÃO DA SILVA (OAB 123456/SP). Ciência a João Silva (OAB 123.456/SP). \
                    ADV: JOÃO DA SILVA (OAB 222222/RJ)";
        let lawyers = extract(text);
        assert_eq!(lawyers.len(), 2);
        assert_eq!(lawyers[1].registration_number, "222222/RJ");
    }

    #[test]
    fn signature_in_tail() {
        let body = "Vistos. ".repeat(40);
        let text = format!("{}São Paulo, 3 de outubro de 2024.\nPedro Henrique Alves - OAB/SP nº 111.222", body);
        let lawyers = extract(&text);
        assert_eq!(lawyers.len(), 1);
        assert_eq!(lawyers[0].name, "Pedro Henrique Alves");
        assert_eq!(lawyers[0].registration_number, "111222/SP");
    }

    #[test]
    fn signature_outside_tail_is_ignored() {
        let text = format!("Pedro Henrique Alves - OAB/SP 111.222\n{}", "Intime-se. ".repeat(40));
        assert!(extract(&text).is_empty());
    }
}
