use async_trait::async_trait;
use uuid::Uuid;

use crate::models::tenant::{LocalSubscriptionUpdate, TenantSubscription};

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_tenant(&self, tenant_id: Uuid)
        -> Result<Option<TenantSubscription>, sqlx::Error>;

    async fn find_tenant_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error>;

    async fn find_tenant_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error>;

    /// Inserts the signup default (basic/active) unless a record already exists,
    /// and returns the stored record either way.
    async fn ensure_tenant(
        &self,
        tenant_id: Uuid,
        email: Option<&str>,
    ) -> Result<TenantSubscription, sqlx::Error>;

    /// Stores the billing customer id if none is stored yet. Returns the id that
    /// ends up on the record, or `None` when the tenant does not exist.
    async fn link_billing_customer(
        &self,
        tenant_id: Uuid,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error>;

    async fn set_tester(
        &self,
        tenant_id: Uuid,
        is_tester: bool,
    ) -> Result<Option<TenantSubscription>, sqlx::Error>;

    /// Writes `update` only if the record is still at `expected_version`.
    async fn apply_local_update(
        &self,
        tenant_id: Uuid,
        expected_version: i64,
        update: &LocalSubscriptionUpdate,
    ) -> Result<bool, sqlx::Error>;
}
