use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{
    billing_event_repository::BillingEventRepository, tenant_repository::TenantRepository,
};
use crate::models::{
    billing_event::{ApplyOutcome, BillingAuditEntry, BillingEventWrite},
    tenant::{LocalSubscriptionUpdate, TenantSubscription},
};

#[derive(Default)]
struct MockState {
    tenants: HashMap<Uuid, TenantSubscription>,
    events: Vec<BillingAuditEntry>,
}

/// In-memory stand-in for both repositories. Clones share the same state, so a
/// test can hand one clone to `AppState` and inspect another.
#[derive(Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<MockState>>,
    pub should_fail: bool,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn tenant(&self, tenant_id: Uuid) -> Option<TenantSubscription> {
        self.state.lock().unwrap().tenants.get(&tenant_id).cloned()
    }

    pub fn events(&self) -> Vec<BillingAuditEntry> {
        self.state.lock().unwrap().events.clone()
    }

    /// Applies `f` to a stored tenant, bumping its version like a concurrent writer would.
    pub fn touch_tenant(&self, tenant_id: Uuid, f: impl FnOnce(&mut TenantSubscription)) {
        let mut state = self.state.lock().unwrap();
        if let Some(tenant) = state.tenants.get_mut(&tenant_id) {
            f(tenant);
            tenant.version += 1;
        }
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }

    fn find_where(
        &self,
        pred: impl Fn(&TenantSubscription) -> bool,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.tenants.values().find(|t| pred(t)).cloned())
    }
}

#[async_trait]
impl TenantRepository for MockDb {
    async fn find_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.find_where(|t| t.tenant_id == tenant_id)
    }

    async fn find_tenant_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.find_where(|t| t.billing_customer_id.as_deref() == Some(customer_id))
    }

    async fn find_tenant_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.find_where(|t| t.billing_subscription_id.as_deref() == Some(subscription_id))
    }

    async fn ensure_tenant(
        &self,
        tenant_id: Uuid,
        email: Option<&str>,
    ) -> Result<TenantSubscription, sqlx::Error> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let tenant = state.tenants.entry(tenant_id).or_insert_with(|| {
            TenantSubscription::new_default(
                tenant_id,
                email.map(str::to_string),
                OffsetDateTime::now_utc(),
            )
        });
        if tenant.email.is_none() {
            tenant.email = email.map(str::to_string);
        }
        Ok(tenant.clone())
    }

    async fn link_billing_customer(
        &self,
        tenant_id: Uuid,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let Some(tenant) = state.tenants.get_mut(&tenant_id) else {
            return Ok(None);
        };
        if tenant.billing_customer_id.is_none() {
            tenant.billing_customer_id = Some(customer_id.to_string());
        }
        Ok(tenant.billing_customer_id.clone())
    }

    async fn set_tester(
        &self,
        tenant_id: Uuid,
        is_tester: bool,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.tenants.get_mut(&tenant_id).map(|tenant| {
            tenant.is_tester = is_tester;
            tenant.updated_at = OffsetDateTime::now_utc();
            tenant.clone()
        }))
    }

    async fn apply_local_update(
        &self,
        tenant_id: Uuid,
        expected_version: i64,
        update: &LocalSubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        match state.tenants.get_mut(&tenant_id) {
            Some(tenant) if tenant.version == expected_version => {
                tenant.status = update.status;
                tenant.cancel_at_period_end = update.cancel_at_period_end;
                tenant.version += 1;
                tenant.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BillingEventRepository for MockDb {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .any(|e| e.external_event_id == event_id))
    }

    async fn apply_billing_event(
        &self,
        write: &BillingEventWrite,
    ) -> Result<ApplyOutcome, sqlx::Error> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if state
            .events
            .iter()
            .any(|e| e.external_event_id == write.audit.external_event_id)
        {
            return Ok(ApplyOutcome::Duplicate);
        }

        let now = OffsetDateTime::now_utc();
        let mutation = &write.mutation;
        let mut applied = true;
        if let Some(tenant) = state.tenants.get_mut(&write.audit.tenant_id) {
            if let Some(customer_id) = &mutation.link_customer_id {
                if tenant.billing_customer_id.is_none() {
                    tenant.billing_customer_id = Some(customer_id.clone());
                }
            }
            if mutation.changes_state() {
                let fresh = tenant
                    .synced_at
                    .map_or(true, |synced| synced <= write.event_created);
                if fresh {
                    if let Some(id) = &mutation.subscription_id {
                        tenant.billing_subscription_id = Some(id.clone());
                    }
                    if let Some(plan) = mutation.plan {
                        tenant.plan = plan;
                    }
                    if let Some(status) = mutation.status {
                        tenant.status = status;
                    }
                    if let Some(end) = mutation.current_period_end {
                        tenant.current_period_end = Some(end);
                    }
                    if let Some(flag) = mutation.cancel_at_period_end {
                        tenant.cancel_at_period_end = flag;
                    }
                    tenant.version += 1;
                    tenant.synced_at = Some(write.event_created);
                    tenant.updated_at = now;
                } else {
                    applied = false;
                }
            }
        } else if mutation.changes_state() {
            applied = false;
        }

        let id = state.events.len() as i64 + 1;
        state.events.push(BillingAuditEntry {
            id,
            tenant_id: write.audit.tenant_id,
            event_type: write.audit.event_type,
            external_event_id: write.audit.external_event_id.clone(),
            external_subscription_id: write.audit.external_subscription_id.clone(),
            metadata: write.audit.metadata.clone(),
            state_applied: applied,
            recorded_at: now,
        });

        Ok(if applied {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Stale
        })
    }

    async fn list_events_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BillingAuditEntry>, sqlx::Error> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
