use serde::Serialize;

use crate::model::Publication;
use crate::parser::blocks::is_process_number;
use crate::parser::contains_required_term;

/// Why a candidate was kept out of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyAuthors,
    EmptyContent,
    InvalidProcessNumber,
    MissingRequiredTerm,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyAuthors => "empty_authors",
            RejectReason::EmptyContent => "empty_content",
            RejectReason::InvalidProcessNumber => "invalid_process_number",
            RejectReason::MissingRequiredTerm => "missing_required_term",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(RejectReason),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// `(is_valid, reason)`.
    pub fn into_parts(self) -> (bool, Option<RejectReason>) {
        match self {
            Validation::Valid => (true, None),
            Validation::Invalid(reason) => (false, Some(reason)),
        }
    }
}

/// Last gate before queueing. Checks run in a fixed order and the first
/// failure is reported.
#[derive(Debug, Clone)]
pub struct Validator {
    required_terms: Vec<String>,
}

impl Validator {
    pub fn new(required_terms: Vec<String>) -> Self {
        Validator { required_terms }
    }

    pub fn validate(&self, p: &Publication) -> Validation {
        if p.authors.is_empty() {
            return Validation::Invalid(RejectReason::EmptyAuthors);
        }
        if p.content.trim().is_empty() {
            return Validation::Invalid(RejectReason::EmptyContent);
        }
        if !is_process_number(&p.process_number) {
            return Validation::Invalid(RejectReason::InvalidProcessNumber);
        }
        let any_configured = self.required_terms.iter().any(|t| !t.trim().is_empty());
        if any_configured && !contains_required_term(&p.content, &self.required_terms) {
            return Validation::Invalid(RejectReason::MissingRequiredTerm);
        }
        Validation::Valid
    }
}
