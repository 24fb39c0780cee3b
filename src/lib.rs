//! Judicial-gazette ingestion: page text is merged across page breaks, parsed
//! into publications, validated, deduplicated and queued; a worker drains the
//! queue into the publications API.

pub mod config;
pub mod dedup;
pub mod delivery;
pub mod fetch;
pub mod merger;
pub mod model;
pub mod parser;
pub mod producer;
pub mod queue;
pub mod store;
pub mod validator;
pub mod worker;
