use std::sync::LazyLock;

use regex::Regex;

use crate::model::{MoneyField, Publication};

/// `R$` followed by a pt-BR amount; a minus sign may sit on either side of the marker.
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-)?R\$\s*(-\s*)?(\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?)").unwrap()
});

/// How far before the currency marker a category keyword may sit.
const KEYWORD_WINDOW: usize = 80;

/// How far after the amount a trailing keyword may sit, as in
/// "R$ 500,00 a título de honorários". Cut short by punctuation or the next amount.
const TRAILING_WINDOW: usize = 40;

/// Keywords per category. The keyword nearest to the amount wins; a keyword
/// before the amount beats one after it.
const CATEGORIES: &[(MoneyField, &[&str])] = &[
    (MoneyField::AttorneyFees, &["honorários", "honorarios", "sucumbência", "sucumbencia"]),
    (MoneyField::Interest, &["juros"]),
    (MoneyField::Net, &["líquido", "liquido"]),
    (
        MoneyField::Gross,
        &["principal", "bruto", "valor total", "total de", "montante", "importância", "importancia"],
    ),
];

/// Parse a pt-BR amount (`.` thousands, `,` decimal) into integer cents.
///
/// Accepts an optional `R$` prefix and a leading minus. Returns `None` for
/// anything malformed; negatives come back negative so callers can discard them.
pub fn parse_brl_cents(raw: &str) -> Option<i64> {
    let mut s = raw.trim();
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_prefix("R$") {
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest.trim_start();
    }
    if s.is_empty() {
        return None;
    }

    let (int_part, frac_part) = match s.split_once(',') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if frac_part.len() > 2 || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Thousands groups must be exactly three digits.
    let mut groups = int_part.split('.');
    let head = groups.next()?;
    if head.is_empty() || !head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits = head.to_string();
    for g in groups {
        if g.len() != 3 || !g.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.push_str(g);
    }

    let units: i64 = digits.parse().ok()?;
    let cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };
    let total = units.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}

/// An amount found in text, with the category its nearest keyword implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    pub field: Option<MoneyField>,
    pub cents: Option<i64>,
}

pub fn find_amounts(text: &str) -> Vec<Amount> {
    AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(3)?.as_str();
            let negative = caps.get(1).is_some() || caps.get(2).is_some();
            let cents = parse_brl_cents(number).map(|c| if negative { -c } else { c });
            Some(Amount {
                field: categorize(&text[..whole.start()], &text[whole.end()..]),
                cents,
            })
        })
        .collect()
}

fn categorize(before: &str, after: &str) -> Option<MoneyField> {
    let window = tail_chars(before, KEYWORD_WINDOW).to_lowercase();
    let preceding = CATEGORIES
        .iter()
        .filter_map(|(field, keywords)| {
            keywords
                .iter()
                .filter_map(|kw| window.rfind(kw))
                .max()
                .map(|pos| (pos, *field))
        })
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, field)| field);
    preceding.or_else(|| trailing_category(after))
}

fn trailing_category(after: &str) -> Option<MoneyField> {
    let window = head_chars(after, TRAILING_WINDOW);
    let end = window
        .find(|c: char| matches!(c, ',' | ';' | '.' | '(' | '\n'))
        .unwrap_or(window.len());
    let clause = &window[..end];
    let clause = match clause.find("R$") {
        Some(next_amount) => &clause[..next_amount],
        None => clause,
    }
    .to_lowercase();
    CATEGORIES
        .iter()
        .filter_map(|(field, keywords)| {
            keywords
                .iter()
                .filter_map(|kw| clause.find(kw))
                .min()
                .map(|pos| (pos, *field))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, field)| field)
}

fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Fill the four monetary fields. First labeled amount per field wins; an
/// unlabeled amount fills the gross value when nothing labeled did.
pub fn apply(publication: &mut Publication, text: &str) {
    let amounts = find_amounts(text);
    let mut unlabeled: Option<i64> = None;

    for amount in &amounts {
        match amount.field {
            Some(field) => {
                if publication.money(field).is_none() {
                    publication.set_money(field, amount.cents);
                }
            }
            None => {
                if unlabeled.is_none() {
                    unlabeled = amount.cents.filter(|c| *c >= 0);
                }
            }
        }
    }

    if publication.gross_value.is_none() {
        publication.set_money(MoneyField::Gross, unlabeled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thousands_and_decimals() {
        assert_eq!(parse_brl_cents("R$ 11.608,32"), Some(1_160_832));
        assert_eq!(parse_brl_cents("15.000,00"), Some(1_500_000));
        assert_eq!(parse_brl_cents("1.234.567,8"), Some(123_456_780));
        assert_eq!(parse_brl_cents("250"), Some(25_000));
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(parse_brl_cents("R$ "), None);
        assert_eq!(parse_brl_cents("1.23,00"), None);
        assert_eq!(parse_brl_cents("12,345"), None);
        assert_eq!(parse_brl_cents("abc"), None);
    }

    #[test]
    fn negative_parses_negative() {
        assert_eq!(parse_brl_cents("-R$ 10,00"), Some(-1000));
        assert_eq!(parse_brl_cents("R$ -10,00"), Some(-1000));
    }

    #[test]
    fn categorizes_by_nearest_keyword() {
        let text = "valor principal de R$ 10.000,00, juros de mora de R$ 1.200,50 \
                    e honorários advocatícios de R$ 500,00, totalizando líquido R$ 11.700,50";
        let amounts = find_amounts(text);
        assert_eq!(amounts.len(), 4);
        assert_eq!(amounts[0].field, Some(MoneyField::Gross));
        assert_eq!(amounts[1].field, Some(MoneyField::Interest));
        assert_eq!(amounts[1].cents, Some(120_050));
        assert_eq!(amounts[2].field, Some(MoneyField::AttorneyFees));
        assert_eq!(amounts[3].field, Some(MoneyField::Net));
    }

    #[test]
    fn keyword_after_the_amount_labels_it() {
        let amounts = find_amounts("arbitro R$ 500,00 a título de honorários advocatícios");
        assert_eq!(amounts[0].field, Some(MoneyField::AttorneyFees));

        let mut p = crate::model::sample_publication("0013168-70.2024.8.26.0053");
        p.gross_value = None;
        apply(&mut p, "Expeça-se RPV de R$ 9.000,00 e R$ 500,00 a título de honorários.");
        assert_eq!(p.gross_value, Some(900_000));
        assert_eq!(p.attorney_fees, Some(50_000));
    }

    #[test]
    fn trailing_keyword_stops_at_punctuation_and_next_amount() {
        let amounts = find_amounts("R$ 10.000,00, juros de mora de R$ 1.200,50");
        assert_eq!(amounts[0].field, None);
        assert_eq!(amounts[1].field, Some(MoneyField::Interest));

        let amounts = find_amounts("R$ 10.000,00 e R$ 800,00 de honorários");
        assert_eq!(amounts[0].field, None);
        assert_eq!(amounts[1].field, Some(MoneyField::AttorneyFees));
    }

    #[test]
    fn unlabeled_amount_becomes_gross() {
        let mut p = crate::model::sample_publication("0013168-70.2024.8.26.0053");
        p.gross_value = None;
        apply(&mut p, "Processo 0013168-70.2024.8.26.0053 ... RPV ... R$ 15.000,00");
        assert_eq!(p.gross_value, Some(1_500_000));
    }

    #[test]
    fn negative_amount_leaves_field_unset() {
        let mut p = crate::model::sample_publication("0013168-70.2024.8.26.0053");
        p.gross_value = None;
        apply(&mut p, "valor líquido de -R$ 300,00");
        assert_eq!(p.net_value, None);
        assert_eq!(p.gross_value, None);
    }
}
