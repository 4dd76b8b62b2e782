use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PriceCatalog;
use crate::db::{
    billing_event_repository::BillingEventRepository, tenant_repository::TenantRepository,
};
use crate::models::{
    billing_event::{
        ApplyOutcome, AuditEventType, BillingEventWrite, NewAuditEntry, SubscriptionMutation,
    },
    plan::SubscriptionStatus,
    tenant::TenantSubscription,
};
use crate::services::stripe::StripeEvent;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("checkout session carries no tenant id")]
    MissingUserId,
    #[error("no tenant matches {0}")]
    TenantNotFound(String),
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingUserId => "MISSING_USER_ID",
            WebhookError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            WebhookError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            WebhookError::Database(_) => "DATABASE_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Applied,
    /// Audited only; the stored state is newer than the event.
    Stale,
    Duplicate,
    /// Event type or shape this processor does not act on.
    Ignored,
}

impl From<ApplyOutcome> for ProcessOutcome {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied => ProcessOutcome::Applied,
            ApplyOutcome::Stale => ProcessOutcome::Stale,
            ApplyOutcome::Duplicate => ProcessOutcome::Duplicate,
        }
    }
}

const SUBSCRIPTION_CREATED: &str = "customer.subscription.created";

struct ResolvedTenant {
    tenant: TenantSubscription,
    /// False when matched through the customer id or metadata fallback.
    by_subscription: bool,
}

// Small helper: nested json lookup
fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

/// Provider references are either a bare id or an expanded object with an `id`.
fn extract_ref<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    let v = jget(val, path)?;
    v.as_str()
        .or_else(|| v.get("id").and_then(|id| id.as_str()))
        .filter(|s| !s.is_empty())
}

fn extract_uuid(val: &Value, path: &[&str]) -> Option<Uuid> {
    extract_str(val, path).and_then(|s| Uuid::parse_str(s).ok())
}

fn extract_timestamp(val: &Value, path: &[&str]) -> Option<OffsetDateTime> {
    jget(val, path)?
        .as_i64()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

fn invoice_subscription_id(invoice: &Value) -> Option<&str> {
    extract_ref(invoice, &["subscription"]).or_else(|| {
        extract_ref(
            invoice,
            &["parent", "subscription_details", "subscription"],
        )
    })
}

fn invoice_metadata_tenant(invoice: &Value) -> Option<Uuid> {
    extract_uuid(invoice, &["subscription_details", "metadata", "tenant_id"]).or_else(|| {
        extract_uuid(
            invoice,
            &["parent", "subscription_details", "metadata", "tenant_id"],
        )
    })
}

fn failure_message(invoice: &Value) -> Option<&str> {
    extract_str(invoice, &["last_finalization_error", "message"])
        .or_else(|| extract_str(invoice, &["last_payment_error", "message"]))
}

/// Applies verified billing-provider events to the tenant store.
pub struct WebhookProcessor {
    tenants: Arc<dyn TenantRepository>,
    events: Arc<dyn BillingEventRepository>,
    prices: PriceCatalog,
}

impl WebhookProcessor {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        events: Arc<dyn BillingEventRepository>,
        prices: PriceCatalog,
    ) -> Self {
        Self {
            tenants,
            events,
            prices,
        }
    }

    pub async fn process(&self, event: &StripeEvent) -> Result<ProcessOutcome, WebhookError> {
        if self.events.has_processed_event(&event.id).await? {
            info!(event_id = %event.id, event_type = %event.r#type, "duplicate webhook delivery");
            return Ok(ProcessOutcome::Duplicate);
        }

        let write = match event.r#type.as_str() {
            "checkout.session.completed" => {
                self.checkout_completed(event, Self::object(event)?).await?
            }
            SUBSCRIPTION_CREATED => {
                self.subscription_changed(
                    event,
                    Self::object(event)?,
                    AuditEventType::SubscriptionCreated,
                )
                .await?
            }
            "customer.subscription.updated" => {
                self.subscription_changed(
                    event,
                    Self::object(event)?,
                    AuditEventType::SubscriptionUpdated,
                )
                .await?
            }
            "customer.subscription.deleted" => {
                Some(self.subscription_deleted(event, Self::object(event)?).await?)
            }
            "invoice.payment_succeeded" => self.invoice_paid(event, Self::object(event)?).await?,
            "invoice.payment_failed" => self.invoice_failed(event, Self::object(event)?).await?,
            other => {
                info!(event_id = %event.id, event_type = other, "ignoring unhandled webhook event");
                None
            }
        };

        let Some(write) = write else {
            return Ok(ProcessOutcome::Ignored);
        };

        let outcome = self.events.apply_billing_event(&write).await?;
        match outcome {
            ApplyOutcome::Applied => info!(
                event_id = %event.id,
                event_type = %event.r#type,
                tenant_id = %write.audit.tenant_id,
                "webhook event applied"
            ),
            ApplyOutcome::Stale => info!(
                event_id = %event.id,
                event_type = %event.r#type,
                tenant_id = %write.audit.tenant_id,
                "webhook event older than stored state; audited only"
            ),
            ApplyOutcome::Duplicate => info!(
                event_id = %event.id,
                "webhook event committed concurrently by another delivery"
            ),
        }
        Ok(outcome.into())
    }

    fn object(event: &StripeEvent) -> Result<&Value, WebhookError> {
        jget(&event.payload, &["data", "object"])
            .ok_or_else(|| WebhookError::MalformedPayload("missing data.object".into()))
    }

    fn event_created(event: &StripeEvent) -> Result<OffsetDateTime, WebhookError> {
        OffsetDateTime::from_unix_timestamp(event.created)
            .map_err(|e| WebhookError::MalformedPayload(format!("event created: {e}")))
    }

    async fn checkout_completed(
        &self,
        event: &StripeEvent,
        session: &Value,
    ) -> Result<Option<BillingEventWrite>, WebhookError> {
        if extract_str(session, &["mode"]) != Some("subscription") {
            info!(event_id = %event.id, "ignoring non-subscription checkout session");
            return Ok(None);
        }

        let raw_tenant = extract_str(session, &["metadata", "tenant_id"])
            .or_else(|| extract_str(session, &["metadata", "userId"]))
            .or_else(|| extract_str(session, &["client_reference_id"]))
            .filter(|s| !s.is_empty());
        let Some(raw_tenant) = raw_tenant else {
            warn!(event_id = %event.id, "checkout completion without tenant id");
            return Err(WebhookError::MissingUserId);
        };
        let tenant_id = Uuid::parse_str(raw_tenant).map_err(|_| {
            WebhookError::MalformedPayload(format!("tenant id {raw_tenant} is not a uuid"))
        })?;

        if self.tenants.find_tenant(tenant_id).await?.is_none() {
            warn!(event_id = %event.id, %tenant_id, "checkout completion for unknown tenant");
            return Err(WebhookError::TenantNotFound(format!("tenant {tenant_id}")));
        }

        let customer_id = extract_ref(session, &["customer"]);
        let subscription_id = extract_ref(session, &["subscription"]);

        Ok(Some(BillingEventWrite {
            audit: NewAuditEntry {
                tenant_id,
                event_type: AuditEventType::SubscriptionCreated,
                external_event_id: event.id.clone(),
                external_subscription_id: subscription_id.map(str::to_string),
                metadata: json!({
                    "session_id": extract_str(session, &["id"]),
                    "customer_id": customer_id,
                    "amount_total": jget(session, &["amount_total"]),
                    "currency": extract_str(session, &["currency"]),
                    "source": "checkout.session.completed",
                }),
            },
            mutation: SubscriptionMutation {
                link_customer_id: customer_id.map(str::to_string),
                ..Default::default()
            },
            event_created: Self::event_created(event)?,
        }))
    }

    /// Subscription id first, then customer id, then the tenant id stamped into
    /// subscription metadata at checkout.
    async fn resolve_tenant(
        &self,
        event: &StripeEvent,
        subscription_id: Option<&str>,
        customer_id: Option<&str>,
        metadata_tenant: Option<Uuid>,
    ) -> Result<ResolvedTenant, WebhookError> {
        if let Some(subscription_id) = subscription_id {
            if let Some(tenant) = self
                .tenants
                .find_tenant_by_subscription_id(subscription_id)
                .await?
            {
                return Ok(ResolvedTenant {
                    tenant,
                    by_subscription: true,
                });
            }
        }
        if let Some(customer_id) = customer_id {
            if let Some(tenant) = self.tenants.find_tenant_by_customer_id(customer_id).await? {
                return Ok(ResolvedTenant {
                    tenant,
                    by_subscription: false,
                });
            }
        }
        if let Some(tenant_id) = metadata_tenant {
            if let Some(tenant) = self.tenants.find_tenant(tenant_id).await? {
                return Ok(ResolvedTenant {
                    tenant,
                    by_subscription: false,
                });
            }
        }

        warn!(
            event_id = %event.id,
            event_type = %event.r#type,
            subscription_id,
            customer_id,
            "no tenant matches webhook event"
        );
        Err(WebhookError::TenantNotFound(format!(
            "subscription {} / customer {}",
            subscription_id.unwrap_or("-"),
            customer_id.unwrap_or("-")
        )))
    }

    /// Only the creation event may attach a subscription through the customer
    /// or metadata fallback. Any other event whose subscription is not the one
    /// on record is audited without touching state.
    fn scoped_mutation(
        event: &StripeEvent,
        resolved: &ResolvedTenant,
        subscription_id: &str,
        mutation: SubscriptionMutation,
    ) -> SubscriptionMutation {
        if resolved.by_subscription || event.r#type == SUBSCRIPTION_CREATED {
            return mutation;
        }
        warn!(
            event_id = %event.id,
            event_type = %event.r#type,
            tenant_id = %resolved.tenant.tenant_id,
            subscription_id,
            stored_subscription_id = resolved.tenant.billing_subscription_id.as_deref(),
            "event for a subscription not on record; audited only"
        );
        SubscriptionMutation::default()
    }

    async fn subscription_changed(
        &self,
        event: &StripeEvent,
        subscription: &Value,
        event_type: AuditEventType,
    ) -> Result<Option<BillingEventWrite>, WebhookError> {
        let subscription_id = extract_str(subscription, &["id"])
            .ok_or_else(|| WebhookError::MalformedPayload("subscription has no id".into()))?;
        let customer_id = extract_ref(subscription, &["customer"]);
        let resolved = self
            .resolve_tenant(
                event,
                Some(subscription_id),
                customer_id,
                extract_uuid(subscription, &["metadata", "tenant_id"]),
            )
            .await?;
        let tenant = &resolved.tenant;

        let provider_status = extract_str(subscription, &["status"]);
        let status = provider_status.map(SubscriptionStatus::from_provider);
        let first_item = jget(subscription, &["items", "data"]).and_then(|items| items.get(0));
        let price_id = first_item.and_then(|item| extract_str(item, &["price", "id"]));
        let plan = price_id.and_then(|price| self.prices.plan_for_price(price));
        if let (Some(price), None) = (price_id, plan) {
            warn!(
                event_id = %event.id,
                tenant_id = %tenant.tenant_id,
                price_id = price,
                "subscription price is not in the configured catalog; keeping stored plan"
            );
        }
        // Newer API versions report the period on the subscription item.
        let current_period_end = extract_timestamp(subscription, &["current_period_end"])
            .or_else(|| first_item.and_then(|item| extract_timestamp(item, &["current_period_end"])));
        let cancel_at_period_end = jget(subscription, &["cancel_at_period_end"])
            .and_then(|v| v.as_bool());

        Ok(Some(BillingEventWrite {
            audit: NewAuditEntry {
                tenant_id: tenant.tenant_id,
                event_type,
                external_event_id: event.id.clone(),
                external_subscription_id: Some(subscription_id.to_string()),
                metadata: json!({
                    "customer_id": customer_id,
                    "status": provider_status,
                    "price_id": price_id,
                    "plan": plan.map(|p| p.as_str()),
                    "current_period_end": jget(subscription, &["current_period_end"]),
                    "cancel_at_period_end": cancel_at_period_end,
                }),
            },
            mutation: Self::scoped_mutation(
                event,
                &resolved,
                subscription_id,
                SubscriptionMutation {
                    link_customer_id: customer_id.map(str::to_string),
                    subscription_id: Some(subscription_id.to_string()),
                    plan,
                    status,
                    current_period_end,
                    cancel_at_period_end,
                },
            ),
            event_created: Self::event_created(event)?,
        }))
    }

    async fn subscription_deleted(
        &self,
        event: &StripeEvent,
        subscription: &Value,
    ) -> Result<BillingEventWrite, WebhookError> {
        let subscription_id = extract_str(subscription, &["id"])
            .ok_or_else(|| WebhookError::MalformedPayload("subscription has no id".into()))?;
        let customer_id = extract_ref(subscription, &["customer"]);
        let resolved = self
            .resolve_tenant(
                event,
                Some(subscription_id),
                customer_id,
                extract_uuid(subscription, &["metadata", "tenant_id"]),
            )
            .await?;
        let tenant = &resolved.tenant;

        // The subscription id stays on the record for history.
        Ok(BillingEventWrite {
            audit: NewAuditEntry {
                tenant_id: tenant.tenant_id,
                event_type: AuditEventType::SubscriptionCancelled,
                external_event_id: event.id.clone(),
                external_subscription_id: Some(subscription_id.to_string()),
                metadata: json!({
                    "customer_id": customer_id,
                    "reason": extract_str(subscription, &["cancellation_details", "reason"]),
                    "feedback": extract_str(subscription, &["cancellation_details", "feedback"]),
                    "canceled_at": jget(subscription, &["canceled_at"]),
                }),
            },
            mutation: Self::scoped_mutation(
                event,
                &resolved,
                subscription_id,
                SubscriptionMutation {
                    link_customer_id: customer_id.map(str::to_string),
                    subscription_id: Some(subscription_id.to_string()),
                    status: Some(SubscriptionStatus::Cancelled),
                    cancel_at_period_end: Some(false),
                    ..Default::default()
                },
            ),
            event_created: Self::event_created(event)?,
        })
    }

    async fn invoice_paid(
        &self,
        event: &StripeEvent,
        invoice: &Value,
    ) -> Result<Option<BillingEventWrite>, WebhookError> {
        let Some(subscription_id) = invoice_subscription_id(invoice) else {
            info!(event_id = %event.id, "invoice without subscription; nothing to record");
            return Ok(None);
        };
        let customer_id = extract_ref(invoice, &["customer"]);
        let resolved = self
            .resolve_tenant(
                event,
                Some(subscription_id),
                customer_id,
                invoice_metadata_tenant(invoice),
            )
            .await?;
        let tenant = &resolved.tenant;

        Ok(Some(BillingEventWrite {
            audit: NewAuditEntry {
                tenant_id: tenant.tenant_id,
                event_type: AuditEventType::PaymentSucceeded,
                external_event_id: event.id.clone(),
                external_subscription_id: Some(subscription_id.to_string()),
                metadata: json!({
                    "invoice_id": extract_str(invoice, &["id"]),
                    "customer_id": customer_id,
                    "amount_paid": jget(invoice, &["amount_paid"]),
                    "currency": extract_str(invoice, &["currency"]),
                    "billing_reason": extract_str(invoice, &["billing_reason"]),
                }),
            },
            mutation: Self::scoped_mutation(
                event,
                &resolved,
                subscription_id,
                SubscriptionMutation {
                    link_customer_id: customer_id.map(str::to_string),
                    ..Default::default()
                },
            ),
            event_created: Self::event_created(event)?,
        }))
    }

    async fn invoice_failed(
        &self,
        event: &StripeEvent,
        invoice: &Value,
    ) -> Result<Option<BillingEventWrite>, WebhookError> {
        let Some(subscription_id) = invoice_subscription_id(invoice) else {
            info!(event_id = %event.id, "failed invoice without subscription; nothing to record");
            return Ok(None);
        };
        let customer_id = extract_ref(invoice, &["customer"]);
        let resolved = self
            .resolve_tenant(
                event,
                Some(subscription_id),
                customer_id,
                invoice_metadata_tenant(invoice),
            )
            .await?;
        let tenant = &resolved.tenant;

        Ok(Some(BillingEventWrite {
            audit: NewAuditEntry {
                tenant_id: tenant.tenant_id,
                event_type: AuditEventType::PaymentFailed,
                external_event_id: event.id.clone(),
                external_subscription_id: Some(subscription_id.to_string()),
                metadata: json!({
                    "invoice_id": extract_str(invoice, &["id"]),
                    "customer_id": customer_id,
                    "attempt_count": jget(invoice, &["attempt_count"]),
                    "next_payment_attempt": jget(invoice, &["next_payment_attempt"]),
                    "amount_due": jget(invoice, &["amount_due"]),
                    "currency": extract_str(invoice, &["currency"]),
                    "failure_message": failure_message(invoice),
                }),
            },
            mutation: Self::scoped_mutation(
                event,
                &resolved,
                subscription_id,
                SubscriptionMutation {
                    link_customer_id: customer_id.map(str::to_string),
                    subscription_id: Some(subscription_id.to_string()),
                    status: Some(SubscriptionStatus::PastDue),
                    ..Default::default()
                },
            ),
            event_created: Self::event_created(event)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::models::plan::{FeatureTier, Plan};
    use crate::utils::plan_limits::{evaluate_feature_access, SubscriptionState};

    const T0: i64 = 1_700_000_000;

    fn prices() -> PriceCatalog {
        PriceCatalog {
            basic: "price_basic".into(),
            pro: "price_pro".into(),
        }
    }

    fn processor(db: &MockDb) -> WebhookProcessor {
        WebhookProcessor::new(Arc::new(db.clone()), Arc::new(db.clone()), prices())
    }

    fn event(id: &str, ty: &str, created: i64, object: Value) -> StripeEvent {
        StripeEvent {
            id: id.into(),
            r#type: ty.into(),
            created,
            payload: json!({ "id": id, "type": ty, "created": created, "data": { "object": object } }),
        }
    }

    fn subscription(status: &str, price: &str) -> Value {
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": status,
            "cancel_at_period_end": false,
            "current_period_end": T0 + 30 * 86_400,
            "items": { "data": [ { "price": { "id": price } } ] },
        })
    }

    async fn tenant_with_customer(db: &MockDb) -> Uuid {
        let tenant_id = Uuid::new_v4();
        db.ensure_tenant(tenant_id, Some("agency@example.com"))
            .await
            .unwrap();
        db.link_billing_customer(tenant_id, "cus_1").await.unwrap();
        tenant_id
    }

    /// Tenant already holding `sub_1` on `cus_1`.
    async fn subscribed_tenant(db: &MockDb) -> Uuid {
        let tenant_id = tenant_with_customer(db).await;
        db.touch_tenant(tenant_id, |t| t.billing_subscription_id = Some("sub_1".into()));
        tenant_id
    }

    #[tokio::test]
    async fn checkout_completion_audits_and_links_customer() {
        let db = MockDb::new();
        let tenant_id = Uuid::new_v4();
        db.ensure_tenant(tenant_id, None).await.unwrap();

        let evt = event(
            "evt_checkout",
            "checkout.session.completed",
            T0,
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "customer": "cus_9",
                "subscription": "sub_9",
                "amount_total": 4900,
                "currency": "usd",
                "metadata": { "tenant_id": tenant_id.to_string() },
            }),
        );
        let outcome = processor(&db).process(&evt).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied);

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.billing_customer_id.as_deref(), Some("cus_9"));
        // Plan and status are left to the subscription events.
        assert_eq!(tenant.plan, Plan::Basic);
        assert_eq!(tenant.billing_subscription_id, None);

        let events = db.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::SubscriptionCreated);
        assert_eq!(events[0].metadata["session_id"], "cs_1");
        assert_eq!(events[0].metadata["amount_total"], 4900);
    }

    #[tokio::test]
    async fn checkout_falls_back_to_user_id_and_client_reference() {
        let db = MockDb::new();
        let tenant_id = Uuid::new_v4();
        db.ensure_tenant(tenant_id, None).await.unwrap();
        let p = processor(&db);

        let legacy = event(
            "evt_a",
            "checkout.session.completed",
            T0,
            json!({ "mode": "subscription", "metadata": { "userId": tenant_id.to_string() } }),
        );
        assert_eq!(p.process(&legacy).await.unwrap(), ProcessOutcome::Applied);

        let reference = event(
            "evt_b",
            "checkout.session.completed",
            T0,
            json!({ "mode": "subscription", "client_reference_id": tenant_id.to_string() }),
        );
        assert_eq!(p.process(&reference).await.unwrap(), ProcessOutcome::Applied);
        assert_eq!(db.events().len(), 2);
    }

    #[tokio::test]
    async fn checkout_without_tenant_fails_with_missing_user_id() {
        let db = MockDb::new();
        let evt = event(
            "evt_checkout",
            "checkout.session.completed",
            T0,
            json!({ "mode": "subscription", "metadata": {} }),
        );
        let err = processor(&db).process(&evt).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_USER_ID");
        assert!(db.events().is_empty());
    }

    #[tokio::test]
    async fn checkout_for_unknown_tenant_fails() {
        let db = MockDb::new();
        let evt = event(
            "evt_checkout",
            "checkout.session.completed",
            T0,
            json!({ "mode": "subscription", "metadata": { "tenant_id": Uuid::new_v4().to_string() } }),
        );
        let err = processor(&db).process(&evt).await.unwrap_err();
        assert_eq!(err.code(), "TENANT_NOT_FOUND");
    }

    #[tokio::test]
    async fn payment_mode_checkout_is_ignored() {
        let db = MockDb::new();
        let evt = event(
            "evt_checkout",
            "checkout.session.completed",
            T0,
            json!({ "mode": "payment" }),
        );
        assert_eq!(
            processor(&db).process(&evt).await.unwrap(),
            ProcessOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn subscription_created_resolves_by_customer_and_stores_both_ids() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;

        let evt = event(
            "evt_created",
            "customer.subscription.created",
            T0,
            subscription("active", "price_pro"),
        );
        assert_eq!(
            processor(&db).process(&evt).await.unwrap(),
            ProcessOutcome::Applied
        );

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(tenant.billing_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(tenant.plan, Plan::Pro);
        assert_eq!(tenant.status, SubscriptionStatus::Active);
        assert_eq!(
            tenant.current_period_end.map(|t| t.unix_timestamp()),
            Some(T0 + 30 * 86_400)
        );
    }

    #[tokio::test]
    async fn subscription_created_falls_back_to_metadata_tenant() {
        let db = MockDb::new();
        let tenant_id = Uuid::new_v4();
        db.ensure_tenant(tenant_id, None).await.unwrap();

        let mut sub = subscription("trialing", "price_basic");
        sub["customer"] = json!("cus_new");
        sub["metadata"] = json!({ "tenant_id": tenant_id.to_string() });
        let evt = event("evt_created", "customer.subscription.created", T0, sub);
        processor(&db).process(&evt).await.unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.billing_customer_id.as_deref(), Some("cus_new"));
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(tenant.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn subscription_event_for_unknown_tenant_fails() {
        let db = MockDb::new();
        let evt = event(
            "evt_updated",
            "customer.subscription.updated",
            T0,
            subscription("active", "price_pro"),
        );
        let err = processor(&db).process(&evt).await.unwrap_err();
        assert!(matches!(err, WebhookError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn subscription_updated_records_cancel_flag() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;
        let p = processor(&db);
        p.process(&event(
            "evt_1",
            "customer.subscription.created",
            T0,
            subscription("active", "price_pro"),
        ))
        .await
        .unwrap();

        let mut sub = subscription("active", "price_pro");
        sub["cancel_at_period_end"] = json!(true);
        p.process(&event("evt_2", "customer.subscription.updated", T0 + 10, sub))
            .await
            .unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert!(tenant.cancel_at_period_end);
        let events = db.events();
        assert_eq!(events[1].event_type, AuditEventType::SubscriptionUpdated);
        assert_eq!(events[1].metadata["cancel_at_period_end"], true);
    }

    #[tokio::test]
    async fn unknown_price_keeps_stored_plan() {
        let db = MockDb::new();
        let tenant_id = subscribed_tenant(&db).await;
        processor(&db)
            .process(&event(
                "evt_1",
                "customer.subscription.updated",
                T0,
                subscription("past_due", "price_legacy"),
            ))
            .await
            .unwrap();
        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.plan, Plan::Basic);
        assert_eq!(tenant.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn subscription_deleted_cancels_and_revokes_access() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;
        let p = processor(&db);
        p.process(&event(
            "evt_1",
            "customer.subscription.created",
            T0,
            subscription("active", "price_basic"),
        ))
        .await
        .unwrap();

        let mut sub = subscription("canceled", "price_basic");
        sub["cancellation_details"] = json!({ "reason": "cancellation_requested" });
        p.process(&event("evt_2", "customer.subscription.deleted", T0 + 60, sub))
            .await
            .unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.status, SubscriptionStatus::Cancelled);
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_1"));
        assert!(!evaluate_feature_access(
            &SubscriptionState::from(&tenant),
            FeatureTier::Basic
        ));
        let events = db.events();
        assert_eq!(events[1].event_type, AuditEventType::SubscriptionCancelled);
        assert_eq!(events[1].metadata["reason"], "cancellation_requested");
    }

    #[tokio::test]
    async fn replaying_an_event_is_a_no_op() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;
        let p = processor(&db);
        let evt = event(
            "evt_1",
            "customer.subscription.created",
            T0,
            subscription("active", "price_pro"),
        );

        assert_eq!(p.process(&evt).await.unwrap(), ProcessOutcome::Applied);
        let after_first = db.tenant(tenant_id).unwrap();
        assert_eq!(p.process(&evt).await.unwrap(), ProcessOutcome::Duplicate);

        assert_eq!(db.tenant(tenant_id).unwrap(), after_first);
        assert_eq!(db.events().len(), 1);
    }

    #[tokio::test]
    async fn out_of_order_events_do_not_regress_state() {
        let db = MockDb::new();
        let tenant_id = subscribed_tenant(&db).await;
        let p = processor(&db);

        p.process(&event(
            "evt_new",
            "customer.subscription.updated",
            T0 + 100,
            subscription("active", "price_pro"),
        ))
        .await
        .unwrap();
        let outcome = p
            .process(&event(
                "evt_old",
                "customer.subscription.updated",
                T0,
                subscription("past_due", "price_basic"),
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Stale);
        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.status, SubscriptionStatus::Active);
        assert_eq!(tenant.plan, Plan::Pro);
        assert_eq!(db.events().len(), 2);
    }

    #[tokio::test]
    async fn invoice_without_subscription_is_ignored() {
        let db = MockDb::new();
        let p = processor(&db);
        for ty in ["invoice.payment_succeeded", "invoice.payment_failed"] {
            let evt = event("evt_inv", ty, T0, json!({ "id": "in_1", "customer": "cus_1" }));
            assert_eq!(p.process(&evt).await.unwrap(), ProcessOutcome::Ignored);
        }
        assert!(db.events().is_empty());
    }

    #[tokio::test]
    async fn payment_succeeded_only_audits() {
        let db = MockDb::new();
        let tenant_id = subscribed_tenant(&db).await;
        let before = db.tenant(tenant_id).unwrap();
        let evt = event(
            "evt_paid",
            "invoice.payment_succeeded",
            T0,
            json!({
                "id": "in_1",
                "customer": "cus_1",
                "parent": { "subscription_details": { "subscription": "sub_1" } },
                "amount_paid": 4900,
            }),
        );
        assert_eq!(
            processor(&db).process(&evt).await.unwrap(),
            ProcessOutcome::Applied
        );
        let after = db.tenant(tenant_id).unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.version, before.version);
        assert_eq!(db.events()[0].event_type, AuditEventType::PaymentSucceeded);
        assert_eq!(
            db.events()[0].external_subscription_id.as_deref(),
            Some("sub_1")
        );
    }

    #[tokio::test]
    async fn payment_failed_marks_past_due_with_retry_metadata() {
        let db = MockDb::new();
        let tenant_id = subscribed_tenant(&db).await;
        let evt = event(
            "evt_failed",
            "invoice.payment_failed",
            T0,
            json!({
                "id": "in_1",
                "customer": "cus_1",
                "subscription": { "id": "sub_1" },
                "attempt_count": 2,
                "next_payment_attempt": T0 + 86_400,
                "amount_due": 4900,
                "last_finalization_error": { "message": "card declined" },
            }),
        );
        processor(&db).process(&evt).await.unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.status, SubscriptionStatus::PastDue);
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_1"));
        let audit = &db.events()[0];
        assert_eq!(audit.event_type, AuditEventType::PaymentFailed);
        assert_eq!(audit.metadata["attempt_count"], 2);
        assert_eq!(audit.metadata["failure_message"], "card declined");
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let db = MockDb::new();
        let evt = event("evt_x", "customer.created", T0, json!({ "id": "cus_1" }));
        assert_eq!(
            processor(&db).process(&evt).await.unwrap(),
            ProcessOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn unknown_event_types_need_no_data_object() {
        let db = MockDb::new();
        let evt = StripeEvent {
            id: "evt_ping".into(),
            r#type: "account.application.deauthorized".into(),
            created: T0,
            payload: json!({ "id": "evt_ping", "type": "account.application.deauthorized" }),
        };
        assert_eq!(
            processor(&db).process(&evt).await.unwrap(),
            ProcessOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn events_for_a_replaced_subscription_do_not_touch_state() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;
        let p = processor(&db);

        let mut current = subscription("active", "price_pro");
        current["id"] = json!("sub_new");
        p.process(&event("evt_new", SUBSCRIPTION_CREATED, 1_000, current))
            .await
            .unwrap();

        let mut old = subscription("canceled", "price_basic");
        old["id"] = json!("sub_old");
        let outcome = p
            .process(&event("evt_old_deleted", "customer.subscription.deleted", 2_000, old))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied);

        let failed = event(
            "evt_old_invoice",
            "invoice.payment_failed",
            3_000,
            json!({ "id": "in_old", "customer": "cus_1", "subscription": "sub_old" }),
        );
        p.process(&failed).await.unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.status, SubscriptionStatus::Active);
        assert_eq!(tenant.plan, Plan::Pro);
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_new"));

        let events = db.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].event_type, AuditEventType::SubscriptionCancelled);
        assert_eq!(events[1].external_subscription_id.as_deref(), Some("sub_old"));
        assert_eq!(events[2].event_type, AuditEventType::PaymentFailed);
    }

    #[tokio::test]
    async fn creation_event_may_replace_the_stored_subscription() {
        let db = MockDb::new();
        let tenant_id = subscribed_tenant(&db).await;

        let mut upgraded = subscription("active", "price_pro");
        upgraded["id"] = json!("sub_2");
        processor(&db)
            .process(&event("evt_up", SUBSCRIPTION_CREATED, T0, upgraded))
            .await
            .unwrap();

        let tenant = db.tenant(tenant_id).unwrap();
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_2"));
        assert_eq!(tenant.plan, Plan::Pro);
    }

    #[tokio::test]
    async fn update_before_creation_is_audited_only() {
        let db = MockDb::new();
        let tenant_id = tenant_with_customer(&db).await;
        let before = db.tenant(tenant_id).unwrap();

        processor(&db)
            .process(&event(
                "evt_early",
                "customer.subscription.updated",
                T0,
                subscription("past_due", "price_pro"),
            ))
            .await
            .unwrap();

        assert_eq!(db.tenant(tenant_id).unwrap(), before);
        assert_eq!(db.events().len(), 1);
    }

    #[tokio::test]
    async fn checkout_metadata_resolves_the_same_tenant() {
        use crate::services::checkout::{CheckoutRequest, CheckoutService};
        use crate::services::stripe::MockStripeService;

        let db = MockDb::new();
        let tenant_id = Uuid::new_v4();
        db.ensure_tenant(tenant_id, Some("agency@example.com"))
            .await
            .unwrap();
        let stripe = MockStripeService::new();
        let checkout = CheckoutService::new(
            Arc::new(db.clone()),
            Arc::new(stripe.clone()),
            prices(),
        );
        checkout
            .create_checkout_session(CheckoutRequest {
                tenant_id,
                email: None,
                price_id: "price_pro".into(),
                success_url: "https://app.test/ok".into(),
                cancel_url: "https://app.test/cancel".into(),
            })
            .await
            .unwrap();
        let sent = stripe.last_create_requests.lock().unwrap()[0].clone();

        // Fresh store: only the echoed metadata can identify the tenant.
        let replica = MockDb::new();
        replica.ensure_tenant(tenant_id, None).await.unwrap();
        let p = processor(&replica);

        let completed = event(
            "evt_cs",
            "checkout.session.completed",
            T0,
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "customer": sent.customer,
                "subscription": "sub_rt",
                "metadata": sent.metadata,
            }),
        );
        assert_eq!(p.process(&completed).await.unwrap(), ProcessOutcome::Applied);
        assert_eq!(replica.events()[0].tenant_id, tenant_id);

        let mut sub = subscription("active", "price_pro");
        sub["id"] = json!("sub_rt");
        sub["customer"] = json!("cus_unrelated");
        sub["metadata"] = json!(sent.subscription_metadata);
        assert_eq!(
            p.process(&event("evt_sub", SUBSCRIPTION_CREATED, T0 + 1, sub))
                .await
                .unwrap(),
            ProcessOutcome::Applied
        );

        let tenant = replica.tenant(tenant_id).unwrap();
        assert_eq!(tenant.billing_subscription_id.as_deref(), Some("sub_rt"));
        assert_eq!(tenant.plan, Plan::Pro);
        assert_eq!(replica.events()[1].tenant_id, tenant_id);
    }

    #[tokio::test]
    async fn missing_data_object_is_malformed() {
        let db = MockDb::new();
        let evt = StripeEvent {
            id: "evt_bad".into(),
            r#type: "customer.subscription.updated".into(),
            created: T0,
            payload: json!({ "id": "evt_bad" }),
        };
        let err = processor(&db).process(&evt).await.unwrap_err();
        assert_eq!(err.code(), "MALFORMED_PAYLOAD");
    }

    #[tokio::test]
    async fn database_failures_surface_as_errors() {
        let db = MockDb::failing();
        let evt = event(
            "evt_1",
            "customer.subscription.updated",
            T0,
            subscription("active", "price_pro"),
        );
        let err = processor(&db).process(&evt).await.unwrap_err();
        assert!(matches!(err, WebhookError::Database(_)));
    }
}
