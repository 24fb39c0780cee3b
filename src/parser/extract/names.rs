/// Lowercase connectors allowed inside Portuguese personal names.
const PARTICLES: &[&str] = &["da", "de", "do", "das", "dos", "e", "d'"];

const HONORIFICS: &[&str] = &[
    "dr.", "dra.", "dr", "dra", "sr.", "sra.", "adv", "advs", "advogado", "advogada", "advogados",
];

pub fn is_particle(word: &str) -> bool {
    PARTICLES.contains(&word.to_lowercase().as_str())
}

/// "MARIA DA SILVA" -> "Maria da Silva".
pub fn title_case(name: &str) -> String {
    name.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && is_particle(&lower) {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

/// Every word is capitalized or a particle, no digits, at least two words.
pub fn looks_like_name(candidate: &str) -> bool {
    let words: Vec<&str> = candidate.split_whitespace().collect();
    if words.len() < 2 || candidate.chars().count() > 120 {
        return false;
    }
    if candidate.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    is_capitalized(words[0])
        && words.iter().all(|w| {
            is_capitalized(w) || is_particle(w)
        })
        && words
            .iter()
            .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '.'))
}

/// Keep the trailing run of name-like words, dropping lead-in prose and honorifics.
///
/// "Manifeste o Dr. Fulano de Tal" -> "Fulano de Tal".
pub fn trailing_name(raw: &str) -> Option<String> {
    let raw = raw.rsplit(':').next().unwrap_or(raw);
    let words: Vec<&str> = raw
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == ',' || c == ';' || c == ':'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut start = words.len();
    while start > 0 {
        let w = words[start - 1];
        if is_capitalized(w) || is_particle(w) {
            start -= 1;
        } else {
            break;
        }
    }
    // A name never starts with a particle.
    while start < words.len() && is_particle(words[start]) {
        start += 1;
    }
    while start < words.len() && HONORIFICS.contains(&words[start].to_lowercase().as_str()) {
        start += 1;
    }

    let name = words[start..].join(" ");
    let name = name.trim_end_matches('.').trim();
    if looks_like_name(name) {
        Some(title_case(name))
    } else {
        None
    }
}
