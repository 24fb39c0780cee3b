use std::sync::LazyLock;

use regex::Regex;

/// CNJ process number: NNNNNNN-DD.AAAA.J.TR.OOOO
pub static PROCESS_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}").unwrap());

/// A process number that opens a record: at line start or after a `Processo` marker.
static RECORD_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)(?:^[ \t]*|\bprocesso\s+(?:digital\s+)?(?:n[º°o]\.?\s*)?)(\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4})",
    )
    .unwrap()
});

/// One record's slice of a text block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBlock<'a> {
    pub process_number: Option<&'a str>,
    pub text: &'a str,
}

/// Split a text block into records delimited by process-number markers.
///
/// Repeated markers for the same number stay inside one record. Text before
/// the first marker belongs to a record that started elsewhere and is dropped.
/// A block without any marker comes back whole, with whatever CNJ number it
/// mentions (if any).
pub fn split_records(text: &str) -> Vec<RecordBlock<'_>> {
    let mut starts: Vec<(usize, &str)> = Vec::new();
    for caps in RECORD_MARKER_RE.captures_iter(text) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if starts.last().is_some_and(|(_, n)| *n == number.as_str()) {
            continue;
        }
        let start = whole.start() + leading_ws(whole.as_str());
        starts.push((start, number.as_str()));
    }

    if starts.is_empty() {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        return vec![RecordBlock {
            process_number: first_process_number(text),
            text,
        }];
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, (start, number))| {
            let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
            RecordBlock {
                process_number: Some(*number),
                text: text[*start..end].trim(),
            }
        })
        .collect()
}

/// Byte offsets where records open, including their `Processo` prefix.
pub fn record_offsets(text: &str) -> Vec<usize> {
    RECORD_MARKER_RE
        .find_iter(text)
        .map(|m| m.start() + leading_ws(m.as_str()))
        .collect()
}

/// Start of the first record on a page, falling back to the first bare CNJ number.
pub fn first_record_offset(text: &str) -> Option<usize> {
    record_offsets(text)
        .first()
        .copied()
        .or_else(|| first_process_offset(text))
}

/// Start of the last record on a page, falling back to the last bare CNJ number.
pub fn last_record_offset(text: &str) -> Option<usize> {
    record_offsets(text)
        .last()
        .copied()
        .or_else(|| last_process_offset(text))
}

pub fn first_process_number(text: &str) -> Option<&str> {
    PROCESS_NUMBER_RE.find(text).map(|m| m.as_str())
}

/// Byte offset of the first CNJ number in `text`.
pub fn first_process_offset(text: &str) -> Option<usize> {
    PROCESS_NUMBER_RE.find(text).map(|m| m.start())
}

/// Byte offset of the last CNJ number in `text`.
pub fn last_process_offset(text: &str) -> Option<usize> {
    PROCESS_NUMBER_RE.find_iter(text).last().map(|m| m.start())
}

pub fn is_process_number(s: &str) -> bool {
    PROCESS_NUMBER_RE
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}
