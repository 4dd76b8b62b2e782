use tracing::{error, warn};
use uuid::Uuid;

use crate::db::tenant_repository::TenantRepository;
use crate::utils::plan_limits::{evaluate_feature_access_str, SubscriptionState};

/// Loads the tenant and evaluates `tier`. Unknown tenants, unknown tiers and
/// store failures all answer `false`.
pub async fn has_feature_access(
    tenants: &dyn TenantRepository,
    tenant_id: Uuid,
    tier: &str,
) -> bool {
    match tenants.find_tenant(tenant_id).await {
        Ok(Some(record)) => evaluate_feature_access_str(&SubscriptionState::from(&record), tier),
        Ok(None) => {
            warn!(%tenant_id, tier, "feature check for unknown tenant");
            false
        }
        Err(err) => {
            error!(?err, %tenant_id, tier, "failed to load tenant for feature check");
            false
        }
    }
}
