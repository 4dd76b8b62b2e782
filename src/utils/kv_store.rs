use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvStoreError {
    #[error("stored value is not a counter: {0}")]
    NotACounter(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Keyed store with optional expiry. Backs per-process counters in tests and
/// single-instance deployments; multi-instance deployments swap in a shared backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), KvStoreError>;

    async fn delete(&self, key: &str) -> Result<bool, KvStoreError>;

    /// Atomically adds one to a counter, creating it with `ttl` when absent or expired.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, KvStoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries; called periodically from a background task.
    pub fn retain_live(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), KvStoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvStoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, KvStoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: Some(now + ttl),
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = Some(now + ttl);
        }
        let current = entry
            .value
            .parse::<u64>()
            .map_err(|_| KvStoreError::NotACounter(key.to_string()))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }
}
