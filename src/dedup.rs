use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{Store, StoreResult};

/// Set of process numbers already queued within the TTL window, shared by
/// every producer through the store.
pub struct DedupCache {
    store: Arc<dyn Store>,
    key: String,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>, ttl: Duration) -> Self {
        DedupCache {
            store,
            key: key.into(),
            ttl,
        }
    }

    /// Record `id` as seen and push the set's expiry out to a full TTL.
    pub async fn add(&self, id: &str) -> StoreResult<()> {
        self.store.sadd_with_ttl(&self.key, id, self.ttl).await
    }

    /// Has `id` been seen? Store failures count as "not seen".
    pub async fn is_member(&self, id: &str) -> bool {
        match self.store.sismember(&self.key, id).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(process_number = %id, error = %e, "Dedup check failed, treating as unseen");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl Store for DownStore {
        async fn lpush(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(down())
        }
        async fn rpush(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(down())
        }
        async fn rpop(&self, _: &str) -> StoreResult<Option<String>> {
            Err(down())
        }
        async fn rpoplpush(&self, _: &str, _: &str) -> StoreResult<Option<String>> {
            Err(down())
        }
        async fn llen(&self, _: &str) -> StoreResult<usize> {
            Err(down())
        }
        async fn lrange_tail(&self, _: &str, _: usize) -> StoreResult<Vec<String>> {
            Err(down())
        }
        async fn zadd(&self, _: &str, _: &str, _: i64) -> StoreResult<()> {
            Err(down())
        }
        async fn zcard(&self, _: &str) -> StoreResult<usize> {
            Err(down())
        }
        async fn zrange(&self, _: &str, _: usize) -> StoreResult<Vec<(String, i64)>> {
            Err(down())
        }
        async fn promote_due(&self, _: &str, _: &str, _: i64) -> StoreResult<usize> {
            Err(down())
        }
        async fn sadd_with_ttl(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
            Err(down())
        }
        async fn sismember(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn del(&self, _: &str) -> StoreResult<()> {
            Err(down())
        }
    }

    fn down() -> StoreError {
        StoreError::Unavailable("connection refused".into())
    }

    #[tokio::test]
    async fn remembers_added_ids() {
        let dedup = DedupCache::new(Arc::new(MemoryStore::new()), "seen", Duration::from_secs(60));
        assert!(!dedup.is_member("0013168-70.2024.8.26.0053").await);
        dedup.add("0013168-70.2024.8.26.0053").await.unwrap();
        assert!(dedup.is_member("0013168-70.2024.8.26.0053").await);
    }

    #[tokio::test]
    async fn unreachable_store_fails_open() {
        let dedup = DedupCache::new(Arc::new(DownStore), "seen", Duration::from_secs(60));
        assert!(!dedup.is_member("0013168-70.2024.8.26.0053").await);
        assert!(dedup.add("0013168-70.2024.8.26.0053").await.is_err());
    }
}
