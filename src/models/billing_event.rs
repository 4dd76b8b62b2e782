use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::{Plan, SubscriptionStatus};

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[sqlx(type_name = "subscription_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    PaymentSucceeded,
    PaymentFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SubscriptionCreated => "subscription_created",
            AuditEventType::SubscriptionUpdated => "subscription_updated",
            AuditEventType::SubscriptionCancelled => "subscription_cancelled",
            AuditEventType::PaymentSucceeded => "payment_succeeded",
            AuditEventType::PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row written for every processed lifecycle event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct BillingAuditEntry {
    pub id: i64,
    pub tenant_id: Uuid,
    pub event_type: AuditEventType,
    pub external_event_id: String,
    pub external_subscription_id: Option<String>,
    pub metadata: Value,
    pub state_applied: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub tenant_id: Uuid,
    pub event_type: AuditEventType,
    pub external_event_id: String,
    pub external_subscription_id: Option<String>,
    pub metadata: Value,
}

/// State changes a single webhook event asks for. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionMutation {
    /// Stored only when the record has no customer yet; never ordering-guarded.
    pub link_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub plan: Option<Plan>,
    pub status: Option<SubscriptionStatus>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
}

impl SubscriptionMutation {
    pub fn changes_state(&self) -> bool {
        self.subscription_id.is_some()
            || self.plan.is_some()
            || self.status.is_some()
            || self.current_period_end.is_some()
            || self.cancel_at_period_end.is_some()
    }
}

/// Everything one webhook event writes, applied in a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingEventWrite {
    pub audit: NewAuditEntry,
    pub mutation: SubscriptionMutation,
    /// Provider `created` timestamp of the event.
    pub event_created: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// Audited, but a newer provider state was already stored.
    Stale,
    Duplicate,
}
