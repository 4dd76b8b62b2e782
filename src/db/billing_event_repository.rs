use async_trait::async_trait;
use uuid::Uuid;

use crate::models::billing_event::{ApplyOutcome, BillingAuditEntry, BillingEventWrite};

#[async_trait]
pub trait BillingEventRepository: Send + Sync {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error>;

    /// Deduplicates on the external event id, applies the mutation unless a newer
    /// provider state is stored, and appends the audit entry. All or nothing.
    async fn apply_billing_event(
        &self,
        write: &BillingEventWrite,
    ) -> Result<ApplyOutcome, sqlx::Error>;

    async fn list_events_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BillingAuditEntry>, sqlx::Error>;
}
