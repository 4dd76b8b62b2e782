use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::{Plan, SubscriptionStatus};

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "tenant_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Creator,
    Admin,
}

/// Subscription record kept on the `creators` table, one per tenant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct TenantSubscription {
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub role: TenantRole,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub is_tester: bool,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    /// Bumped on every subscription-state write.
    pub version: i64,
    /// Provider timestamp of the last webhook state that was applied.
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TenantSubscription {
    /// Default record created at signup.
    pub fn new_default(tenant_id: Uuid, email: Option<String>, now: OffsetDateTime) -> Self {
        Self {
            tenant_id,
            email,
            role: TenantRole::Creator,
            plan: Plan::Basic,
            status: SubscriptionStatus::Active,
            is_tester: false,
            billing_customer_id: None,
            billing_subscription_id: None,
            current_period_end: None,
            cancel_at_period_end: false,
            version: 0,
            synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, TenantRole::Admin)
    }
}

/// Fields the cancel/reactivate calls write ahead of webhook confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSubscriptionUpdate {
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
}
