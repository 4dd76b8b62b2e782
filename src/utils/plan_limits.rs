use serde::{Deserialize, Serialize};

use crate::models::{
    plan::{FeatureTier, Plan, SubscriptionStatus},
    tenant::TenantSubscription,
};

/// Marker for "no cap" in numeric limits.
pub const UNLIMITED: i32 = -1;

/// The three fields access decisions are made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub is_tester: bool,
}

impl SubscriptionState {
    pub fn new(plan: Plan, status: SubscriptionStatus, is_tester: bool) -> Self {
        Self {
            plan,
            status,
            is_tester,
        }
    }

    /// Plan used for access checks; testers always count as pro.
    pub fn effective_plan(&self) -> Plan {
        if self.is_tester {
            Plan::Pro
        } else {
            self.plan
        }
    }

    /// Status used for access checks; testers always count as active.
    pub fn effective_status(&self) -> SubscriptionStatus {
        if self.is_tester {
            SubscriptionStatus::Active
        } else {
            self.status
        }
    }

    pub fn has_active_subscription(&self) -> bool {
        self.effective_status().is_active()
    }
}

impl From<&TenantSubscription> for SubscriptionState {
    fn from(record: &TenantSubscription) -> Self {
        Self::new(record.plan, record.status, record.is_tester)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub max_projects: i32,
    pub max_clients: i32,
    pub max_chatbots: i32,
    pub analytics_access: bool,
    pub custom_branding: bool,
    pub api_access: bool,
}

impl PlanLimits {
    pub const NONE: PlanLimits = PlanLimits {
        max_projects: 0,
        max_clients: 0,
        max_chatbots: 0,
        analytics_access: false,
        custom_branding: false,
        api_access: false,
    };

    pub const BASIC: PlanLimits = PlanLimits {
        max_projects: 1,
        max_clients: 1,
        max_chatbots: 0,
        analytics_access: false,
        custom_branding: false,
        api_access: false,
    };

    pub const PRO: PlanLimits = PlanLimits {
        max_projects: UNLIMITED,
        max_clients: UNLIMITED,
        max_chatbots: 5,
        analytics_access: true,
        custom_branding: true,
        api_access: true,
    };

    pub const TESTER: PlanLimits = PlanLimits {
        max_projects: UNLIMITED,
        max_clients: UNLIMITED,
        max_chatbots: UNLIMITED,
        analytics_access: true,
        custom_branding: true,
        api_access: true,
    };

    /// Limits a plan grants while its subscription is in good standing.
    pub fn for_plan(plan: Plan) -> PlanLimits {
        match plan {
            Plan::Basic => PlanLimits::BASIC,
            Plan::Pro => PlanLimits::PRO,
            Plan::None => PlanLimits::NONE,
        }
    }
}

pub fn resolve_limits(state: &SubscriptionState) -> PlanLimits {
    if state.is_tester {
        return PlanLimits::TESTER;
    }
    if !state.status.is_active() {
        return PlanLimits::NONE;
    }
    PlanLimits::for_plan(state.plan)
}

pub fn evaluate_feature_access(state: &SubscriptionState, tier: FeatureTier) -> bool {
    if state.is_tester {
        return true;
    }
    if !state.status.is_active() {
        return false;
    }
    match tier {
        FeatureTier::Basic => matches!(state.plan, Plan::Basic | Plan::Pro),
        FeatureTier::Pro => matches!(state.plan, Plan::Pro),
    }
}

/// String-level variant for callers holding an unvalidated tier name.
/// Tiers outside the known set never grant access.
pub fn evaluate_feature_access_str(state: &SubscriptionState, tier: &str) -> bool {
    tier.parse::<FeatureTier>()
        .map(|tier| evaluate_feature_access(state, tier))
        .unwrap_or(false)
}
