use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{now_millis, Store, StoreResult};

#[derive(Debug, Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
    sets: HashMap<String, HashSet<String>>,
    expiries: HashMap<String, i64>,
}

impl State {
    fn evict_if_expired(&mut self, key: &str, now: i64) {
        if self.expiries.get(key).is_some_and(|at| *at <= now) {
            self.remove(key);
        }
    }

    fn remove(&mut self, key: &str) {
        self.lists.remove(key);
        self.zsets.remove(key);
        self.sets.remove(key);
        self.expiries.remove(key);
    }

    /// Sorted by score, ties broken by member.
    fn sorted(&self, key: &str) -> Vec<(String, i64)> {
        let mut members: Vec<(String, i64)> = self
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

/// Process-local store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state.lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        let value = state.lists.get_mut(src).and_then(VecDeque::pop_back);
        if let Some(v) = &value {
            state
                .lists
                .entry(dst.to_string())
                .or_default()
                .push_front(v.clone());
        }
        Ok(value)
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn lrange_tail(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|l| l.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let state = self.state.lock().await;
        Ok(state.zsets.get(key).map_or(0, HashMap::len))
    }

    async fn zrange(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        let state = self.state.lock().await;
        Ok(state.sorted(key).into_iter().take(limit).collect())
    }

    async fn promote_due(&self, zkey: &str, list: &str, now: i64) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let due: Vec<String> = state
            .sorted(zkey)
            .into_iter()
            .take_while(|(_, score)| *score <= now)
            .map(|(member, _)| member)
            .collect();
        if due.is_empty() {
            return Ok(0);
        }
        if let Some(z) = state.zsets.get_mut(zkey) {
            for member in &due {
                z.remove(member);
            }
        }
        let target = state.lists.entry(list.to_string()).or_default();
        for member in due.iter().rev() {
            target.push_back(member.clone());
        }
        Ok(due.len())
    }

    async fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let now = now_millis();
        let mut state = self.state.lock().await;
        state.evict_if_expired(key, now);
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        state
            .expiries
            .insert(key.to_string(), now + ttl.as_millis() as i64);
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = now_millis();
        let mut state = self.state.lock().await;
        state.evict_if_expired(key, now);
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.state.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_behave_like_deques() {
        let store = MemoryStore::new();
        store.lpush("q", "a").await.unwrap();
        store.lpush("q", "b").await.unwrap();
        store.rpush("q", "c").await.unwrap();
        assert_eq!(store.lrange_tail("q", 2).await.unwrap(), vec!["c", "a"]);
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.rpoplpush("q", "dlq").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.llen("q").await.unwrap(), 1);
        assert_eq!(store.llen("dlq").await.unwrap(), 1);
        assert_eq!(store.rpoplpush("empty", "dlq").await.unwrap(), None);
    }

    #[tokio::test]
    async fn promotion_is_ordered_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", "second", 20).await.unwrap();
        store.zadd("z", "first", 10).await.unwrap();
        store.zadd("z", "future", 99).await.unwrap();
        assert_eq!(store.promote_due("z", "q", 50).await.unwrap(), 2);
        assert_eq!(store.lrange_tail("q", 10).await.unwrap(), vec!["first", "second"]);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_set_is_empty() {
        let store = MemoryStore::new();
        store.sadd_with_ttl("s", "x", Duration::ZERO).await.unwrap();
        assert!(!store.sismember("s", "x").await.unwrap());
        store.sadd_with_ttl("s", "y", Duration::from_secs(60)).await.unwrap();
        assert!(store.sismember("s", "y").await.unwrap());
        store.del("s").await.unwrap();
        assert!(!store.sismember("s", "y").await.unwrap());
    }
}
