use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::warn;
use uuid::Uuid;

use crate::utils::kv_store::{KeyValueStore, KvStoreError};

/// Fixed-window per-tenant limiter over a [`KeyValueStore`].
#[derive(Clone)]
pub struct TenantRateLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: u64,
    window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after_seconds: u64 },
}

impl TenantRateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window: window.max(Duration::from_secs(1)),
        }
    }

    pub async fn check(&self, scope: &str, tenant_id: Uuid) -> Result<RateDecision, KvStoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_at(scope, tenant_id, now).await
    }

    async fn check_at(
        &self,
        scope: &str,
        tenant_id: Uuid,
        now_secs: u64,
    ) -> Result<RateDecision, KvStoreError> {
        let window_secs = self.window.as_secs();
        let bucket = now_secs / window_secs;
        let key = format!("ratelimit:{scope}:{tenant_id}:{bucket}");

        let count = self.store.increment(&key, self.window).await?;
        if count > self.limit {
            let retry_after_seconds = window_secs - (now_secs % window_secs);
            warn!(%tenant_id, scope, count, limit = self.limit, "tenant rate limit exceeded");
            return Ok(RateDecision::Limited {
                retry_after_seconds,
            });
        }
        Ok(RateDecision::Allowed {
            remaining: self.limit - count,
        })
    }
}
