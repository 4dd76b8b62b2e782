use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PriceCatalog;
use crate::db::tenant_repository::TenantRepository;
use crate::models::{
    plan::SubscriptionStatus,
    tenant::{LocalSubscriptionUpdate, TenantSubscription},
};
use crate::services::stripe::{CreateCheckoutSessionRequest, StripeService, StripeServiceError};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invalid price ID")]
    InvalidPriceId,
    #[error("Tenant not found")]
    TenantNotFound,
    #[error("No billing customer on file")]
    CustomerNotFound,
    #[error("No active subscription")]
    NoSubscription,
    #[error("Subscription is fully cancelled; start a new checkout")]
    NotReactivatable,
    #[error("{message}")]
    Provider {
        message: String,
        provider_code: Option<String>,
        status: Option<u16>,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl BillingError {
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidPriceId => "INVALID_PRICE_ID",
            BillingError::TenantNotFound => "TENANT_NOT_FOUND",
            BillingError::CustomerNotFound => "CUSTOMER_NOT_FOUND",
            BillingError::NoSubscription => "SUBSCRIPTION_NOT_FOUND",
            BillingError::NotReactivatable => "SUBSCRIPTION_NOT_REACTIVATABLE",
            BillingError::Provider { .. } => "BILLING_PROVIDER_ERROR",
            BillingError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<StripeServiceError> for BillingError {
    fn from(err: StripeServiceError) -> Self {
        match err {
            StripeServiceError::Api {
                message,
                code,
                status,
            } => BillingError::Provider {
                message,
                provider_code: code,
                status,
            },
            other => BillingError::Provider {
                message: other.to_string(),
                provider_code: None,
                status: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
}

/// Result of a cancel or reactivate call as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionChange {
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    /// False when a webhook updated the record first and the local write was skipped.
    pub local_state_updated: bool,
}

/// Issues hosted checkout and portal sessions and drives cancel/reactivate.
pub struct CheckoutService {
    tenants: Arc<dyn TenantRepository>,
    stripe: Arc<dyn StripeService>,
    prices: PriceCatalog,
}

impl CheckoutService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        stripe: Arc<dyn StripeService>,
        prices: PriceCatalog,
    ) -> Self {
        Self {
            tenants,
            stripe,
            prices,
        }
    }

    async fn load_tenant(&self, tenant_id: Uuid) -> Result<TenantSubscription, BillingError> {
        self.tenants
            .find_tenant(tenant_id)
            .await?
            .ok_or(BillingError::TenantNotFound)
    }

    /// Returns the stored billing customer, creating and linking one if absent.
    async fn ensure_customer(
        &self,
        tenant: &TenantSubscription,
        email: Option<&str>,
    ) -> Result<String, BillingError> {
        if let Some(existing) = &tenant.billing_customer_id {
            return Ok(existing.clone());
        }

        let email = email.or(tenant.email.as_deref());
        let created = self.stripe.create_customer(email, tenant.tenant_id).await?;
        let stored = self
            .tenants
            .link_billing_customer(tenant.tenant_id, &created)
            .await?
            .ok_or(BillingError::TenantNotFound)?;
        if stored != created {
            warn!(
                tenant_id = %tenant.tenant_id,
                created = %created,
                stored = %stored,
                "billing customer linked concurrently; using stored customer"
            );
        }
        Ok(stored)
    }

    pub async fn create_checkout_session(
        &self,
        req: CheckoutRequest,
    ) -> Result<IssuedCheckoutSession, BillingError> {
        if !self.prices.contains(&req.price_id) {
            warn!(tenant_id = %req.tenant_id, price_id = %req.price_id, "rejected unknown price id");
            return Err(BillingError::InvalidPriceId);
        }

        let tenant = self.load_tenant(req.tenant_id).await?;
        let customer = self.ensure_customer(&tenant, req.email.as_deref()).await?;

        let tenant_meta: BTreeMap<String, String> =
            [("tenant_id".to_string(), req.tenant_id.to_string())]
                .into_iter()
                .collect();
        let session = self
            .stripe
            .create_checkout_session(CreateCheckoutSessionRequest {
                success_url: req.success_url,
                cancel_url: req.cancel_url,
                price_id: req.price_id,
                quantity: 1,
                customer,
                client_reference_id: Some(req.tenant_id.to_string()),
                metadata: tenant_meta.clone(),
                subscription_metadata: tenant_meta,
            })
            .await?;

        info!(tenant_id = %req.tenant_id, session_id = %session.id, "checkout session created");
        Ok(IssuedCheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    pub async fn create_customer_portal_session(
        &self,
        tenant_id: Uuid,
        return_url: &str,
    ) -> Result<String, BillingError> {
        let tenant = self.load_tenant(tenant_id).await?;
        let customer = tenant
            .billing_customer_id
            .ok_or(BillingError::CustomerNotFound)?;
        let session = self
            .stripe
            .create_portal_session(&customer, return_url)
            .await?;
        Ok(session.url)
    }

    pub async fn cancel_subscription(
        &self,
        tenant_id: Uuid,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionChange, BillingError> {
        let tenant = self.load_tenant(tenant_id).await?;
        let subscription_id = match (&tenant.billing_subscription_id, tenant.status) {
            (Some(id), status) if status != SubscriptionStatus::Cancelled => id.clone(),
            _ => return Err(BillingError::NoSubscription),
        };

        let update = if cancel_at_period_end {
            let info = self
                .stripe
                .set_subscription_cancel_at_period_end(&subscription_id, true)
                .await?;
            LocalSubscriptionUpdate {
                status: SubscriptionStatus::from_provider(&info.status),
                cancel_at_period_end: info.cancel_at_period_end,
            }
        } else {
            self.stripe
                .cancel_subscription_immediately(&subscription_id)
                .await?;
            LocalSubscriptionUpdate {
                status: SubscriptionStatus::Cancelled,
                cancel_at_period_end: false,
            }
        };

        self.write_optimistic(&tenant, update).await
    }

    pub async fn reactivate_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<SubscriptionChange, BillingError> {
        let tenant = self.load_tenant(tenant_id).await?;
        let Some(subscription_id) = tenant.billing_subscription_id.clone() else {
            return Err(BillingError::NoSubscription);
        };
        if tenant.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::NotReactivatable);
        }

        let info = self
            .stripe
            .set_subscription_cancel_at_period_end(&subscription_id, false)
            .await?;
        let update = LocalSubscriptionUpdate {
            status: SubscriptionStatus::from_provider(&info.status),
            cancel_at_period_end: info.cancel_at_period_end,
        };

        self.write_optimistic(&tenant, update).await
    }

    /// Local write ahead of the webhook. Skipped if the record moved since it was read.
    async fn write_optimistic(
        &self,
        tenant: &TenantSubscription,
        update: LocalSubscriptionUpdate,
    ) -> Result<SubscriptionChange, BillingError> {
        let applied = self
            .tenants
            .apply_local_update(tenant.tenant_id, tenant.version, &update)
            .await?;
        if !applied {
            info!(
                tenant_id = %tenant.tenant_id,
                "subscription record changed during provider call; keeping webhook state"
            );
        }
        Ok(SubscriptionChange {
            status: update.status,
            cancel_at_period_end: update.cancel_at_period_end,
            local_state_updated: applied,
        })
    }
}
