//! Shared key-value store holding the queue lanes and the dedup set.
//!
//! Every method is one atomic store command, so producers and workers in
//! different processes coordinate without application-level locks.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Redis-shaped primitives: lists, score-ordered sets and TTL'd sets.
///
/// Lists are double-ended; `lpush` adds at the head, `rpop`/`rpush` work on
/// the tail, so `lpush` + `rpop` is FIFO.
#[async_trait]
pub trait Store: Send + Sync {
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn rpop(&self, key: &str) -> StoreResult<Option<String>>;
    /// Pop the tail of `src` and push it onto the head of `dst` in one step.
    async fn rpoplpush(&self, src: &str, dst: &str) -> StoreResult<Option<String>>;
    async fn llen(&self, key: &str) -> StoreResult<usize>;
    /// Up to `limit` values starting from the tail (oldest first).
    async fn lrange_tail(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// Insert or rescore a member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()>;
    async fn zcard(&self, key: &str) -> StoreResult<usize>;
    /// Members with their scores, lowest score first.
    async fn zrange(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, i64)>>;
    /// Move every member of `zkey` with score ≤ `now` to the tail of `list`,
    /// leaving the earliest-due member at the very tail. Returns how many moved.
    async fn promote_due(&self, zkey: &str, list: &str, now: i64) -> StoreResult<usize>;

    /// Add to a set and refresh the whole key's expiry to `ttl` from now.
    async fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()>;
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn del(&self, key: &str) -> StoreResult<()>;
}

/// Milliseconds since the epoch, the score unit of the delayed lane.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
