pub mod blocks;
pub mod extract;

use crate::model::Publication;
use extract::ExtractContext;

/// Case-insensitive check for any configured trigger term.
pub fn contains_required_term(text: &str, terms: &[String]) -> bool {
    let lower = text.to_lowercase();
    terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .any(|t| lower.contains(&t.to_lowercase()))
}

/// Text block → zero or more publication candidates.
///
/// Records without a process number are kept only when they mention a
/// trigger term; anything else is noise and yields nothing.
pub fn parse_publications(
    text: &str,
    required_terms: &[String],
    ctx: &ExtractContext<'_>,
) -> Vec<Publication> {
    blocks::split_records(text)
        .into_iter()
        .filter(|block| {
            block.process_number.is_some() || contains_required_term(block.text, required_terms)
        })
        .map(|block| extract::extract_publication(block.text, block.process_number, ctx))
        .collect()
}
