//! Tier Entitlements and Feature Gating

use crate::model::{Subscription, SubscriptionStatus, SubscriptionTier, Tenant};
use crate::ports::AuthzRemote;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Seat limit meaning "no limit" (top tier, platform operators)
pub const UNLIMITED_SEATS: u32 = u32::MAX;

/// CRM features that can be entitled
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CrmFeature {
    /// Contact and lead records
    ContactManagement,
    /// Sales pipelines and opportunity boards
    SalesPipelines,
    /// Outbound email campaigns
    EmailCampaigns,
    /// Trigger-based workflow automation
    WorkflowAutomation,
    /// Tenant-defined custom roles
    CustomRoles,
    /// Public API access
    ApiAccess,
    /// White-label branding
    WhiteLabel,
    /// Priority support channel
    PrioritySupport,
}

impl CrmFeature {
    /// Every feature
    pub fn all() -> BTreeSet<CrmFeature> {
        [
            Self::ContactManagement,
            Self::SalesPipelines,
            Self::EmailCampaigns,
            Self::WorkflowAutomation,
            Self::CustomRoles,
            Self::ApiAccess,
            Self::WhiteLabel,
            Self::PrioritySupport,
        ]
        .into_iter()
        .collect()
    }
}

/// Feature, seat and trial rights derived from a subscription tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlements {
    /// Effective tier
    pub tier: SubscriptionTier,
    /// Seat limit; [`UNLIMITED_SEATS`] for the top tier
    pub seat_limit: u32,
    /// Entitled features
    pub features: BTreeSet<CrmFeature>,
    /// Subscription status is `trialing`
    pub is_trialing: bool,
    /// Whole days left in the trial, floored at zero
    pub trial_days_left: u32,
}

impl Entitlements {
    /// Fixed mapping from tier to features and seats
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        let (seat_limit, features) = match tier {
            SubscriptionTier::Starter => (
                3,
                [CrmFeature::ContactManagement, CrmFeature::SalesPipelines]
                    .into_iter()
                    .collect(),
            ),
            SubscriptionTier::Business => (
                25,
                [
                    CrmFeature::ContactManagement,
                    CrmFeature::SalesPipelines,
                    CrmFeature::EmailCampaigns,
                    CrmFeature::WorkflowAutomation,
                    CrmFeature::CustomRoles,
                    CrmFeature::ApiAccess,
                ]
                .into_iter()
                .collect(),
            ),
            SubscriptionTier::Agency => (UNLIMITED_SEATS, CrmFeature::all()),
        };
        Self {
            tier,
            seat_limit,
            features,
            is_trialing: false,
            trial_days_left: 0,
        }
    }

    /// Entitlements from a stored subscription record
    pub fn for_subscription(subscription: &Subscription) -> Self {
        let mut ent = Self::for_tier(subscription.tier);
        ent.is_trialing = subscription.status == SubscriptionStatus::Trialing;
        if ent.is_trialing {
            ent.trial_days_left = subscription
                .trial_end
                .map(|end| {
                    let secs = (end - Utc::now()).num_seconds();
                    if secs <= 0 {
                        0
                    } else {
                        // round up to the nearest whole day
                        ((secs + 86_399) / 86_400) as u32
                    }
                })
                .unwrap_or(0);
        }
        ent
    }

    /// God-mode entitlements for platform operators: unbounded, all features,
    /// regardless of any stored subscription.
    pub fn operator() -> Self {
        Self {
            tier: SubscriptionTier::Agency,
            seat_limit: UNLIMITED_SEATS,
            features: CrmFeature::all(),
            is_trialing: false,
            trial_days_left: 0,
        }
    }

    /// Whether a feature is entitled
    pub fn has_feature(&self, feature: CrmFeature) -> bool {
        self.features.contains(&feature)
    }

    /// Seat quota check against current occupancy
    pub fn check_seats(&self, occupied: u32) -> Result<(), SeatQuotaError> {
        if occupied >= self.seat_limit {
            Err(SeatQuotaError::Exceeded {
                limit: self.seat_limit,
                occupied,
            })
        } else {
            Ok(())
        }
    }
}

/// Seat quota violation
#[derive(Debug, thiserror::Error)]
pub enum SeatQuotaError {
    /// Occupancy at or past the tier's seat limit
    #[error("seat limit reached: limit {limit}, occupied {occupied}")]
    Exceeded {
        /// Tier seat limit
        limit: u32,
        /// Seats currently occupied
        occupied: u32,
    },
}

/// Derives entitlements for the selected tenant, keyed only by its
/// subscription record.
pub struct EntitlementEngine {
    remote: Arc<dyn AuthzRemote>,
}

impl EntitlementEngine {
    /// Engine over a remote port
    pub fn new(remote: Arc<dyn AuthzRemote>) -> Self {
        Self { remote }
    }

    /// Resolve entitlements for `tenant`. Platform operators always get the
    /// unbounded all-features tier.
    pub async fn entitlements(&self, tenant: &Tenant, is_platform_operator: bool) -> Entitlements {
        if is_platform_operator {
            return Entitlements::operator();
        }
        match self.remote.get_subscription(tenant.id).await {
            Ok(Some(subscription)) => Entitlements::for_subscription(&subscription),
            Ok(None) => Entitlements::for_tier(tenant.tier),
            Err(err) => {
                tracing::warn!(tenant_id = %tenant.id, %err, "subscription fetch failed, using tenant tier");
                Entitlements::for_tier(tenant.tier)
            }
        }
    }

    /// Whether the tenant's subscription grants access at all
    /// (`active` and `trialing` both count).
    pub async fn has_active_subscription(&self, tenant: &Tenant, is_platform_operator: bool) -> bool {
        if is_platform_operator {
            return true;
        }
        match self.remote.get_subscription(tenant.id).await {
            Ok(Some(subscription)) => subscription.has_access(),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(tenant_id = %tenant.id, %err, "subscription fetch failed");
                false
            }
        }
    }
}
