//! Access Validation - tiered fallback against the remote authorization service
//!
//! Three tiers, each narrowing the accuracy of the result. A tier that errors
//! is logged and falls through to the next; a tier that answers (grant or
//! deny) ends the chain. Only total exhaustion denies by default.

use crate::model::{InvitationStatus, MemberRole};
use crate::ports::AuthzRemote;
use crm_common::{TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one validation tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// Tier answered: access granted with this role
    Granted {
        /// Resolved role
        role: MemberRole,
    },
    /// Tier answered: access refused
    Denied {
        /// Refusal reason
        reason: String,
    },
    /// Tier could not answer; fall through
    Inconclusive,
}

/// Final validation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether access is granted
    pub granted: bool,
    /// Resolved role when granted
    pub role: Option<MemberRole>,
    /// Refusal reason when denied
    pub reason: Option<String>,
}

impl AccessDecision {
    /// Granting decision with a resolved role
    pub fn grant(role: MemberRole) -> Self {
        Self {
            granted: true,
            role: Some(role),
            reason: None,
        }
    }

    /// Denying decision with a reason
    pub fn deny(reason: &str) -> Self {
        Self {
            granted: false,
            role: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// "Can session S act on tenant T", resolved through the fallback chain
pub struct AccessValidator {
    remote: Arc<dyn AuthzRemote>,
}

impl AccessValidator {
    /// Validator over a remote port
    pub fn new(remote: Arc<dyn AuthzRemote>) -> Self {
        Self { remote }
    }

    /// Run the three tiers in order. Sequential, no retries within a tier.
    pub async fn validate(&self, user_id: UserId, tenant_id: TenantId) -> AccessDecision {
        let mut outcome = self.enhanced_check(user_id, tenant_id).await;
        if outcome == TierOutcome::Inconclusive {
            outcome = self.direct_membership_check(user_id, tenant_id).await;
        }
        if outcome == TierOutcome::Inconclusive {
            outcome = self.existence_check(user_id, tenant_id).await;
        }

        match outcome {
            TierOutcome::Granted { role } => AccessDecision::grant(role),
            TierOutcome::Denied { reason } => AccessDecision::deny(&reason),
            TierOutcome::Inconclusive => AccessDecision::deny("all validation tiers exhausted"),
        }
    }

    /// Tier 1: single call validating tenant active-status and membership
    /// status, returning the resolved role.
    async fn enhanced_check(&self, user_id: UserId, tenant_id: TenantId) -> TierOutcome {
        match self.remote.validate_access(user_id, tenant_id).await {
            Ok(decision) if decision.granted => TierOutcome::Granted {
                role: decision.role.unwrap_or(MemberRole::Member),
            },
            Ok(decision) => TierOutcome::Denied {
                reason: decision.reason.unwrap_or_else(|| "access refused".to_string()),
            },
            Err(err) => {
                tracing::warn!(%user_id, %tenant_id, %err, "enhanced access check unavailable, falling back");
                TierOutcome::Inconclusive
            }
        }
    }

    /// Tier 2: direct membership fetch; an active invitation suffices.
    async fn direct_membership_check(&self, user_id: UserId, tenant_id: TenantId) -> TierOutcome {
        match self.remote.get_membership(user_id, tenant_id).await {
            Ok(Some(m)) if m.invitation_status == InvitationStatus::Active => {
                TierOutcome::Granted { role: m.role }
            }
            Ok(Some(_)) => TierOutcome::Denied {
                reason: "invitation not active".to_string(),
            },
            Ok(None) => TierOutcome::Denied {
                reason: "no membership".to_string(),
            },
            Err(err) => {
                tracing::warn!(%user_id, %tenant_id, %err, "membership check unavailable, falling back");
                TierOutcome::Inconclusive
            }
        }
    }

    /// Tier 3: last resort, no status filter; existence alone implies access.
    async fn existence_check(&self, user_id: UserId, tenant_id: TenantId) -> TierOutcome {
        match self.remote.get_membership_any_status(user_id, tenant_id).await {
            Ok(Some(_)) => TierOutcome::Granted {
                role: MemberRole::Member,
            },
            Ok(None) => TierOutcome::Denied {
                reason: "no membership".to_string(),
            },
            Err(err) => {
                tracing::warn!(%user_id, %tenant_id, %err, "existence check unavailable");
                TierOutcome::Inconclusive
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Membership, SubscriptionTier, Tenant};
    use crate::ports::InMemoryAuthz;
    use chrono::Utc;
    use uuid::Uuid;

    fn seeded(status: InvitationStatus, role: MemberRole) -> (Arc<InMemoryAuthz>, UserId, TenantId) {
        let remote = Arc::new(InMemoryAuthz::new());
        let user = Uuid::new_v4();
        let tenant = Tenant::new("Acme", "acme", SubscriptionTier::Business);
        let tenant_id = tenant.id;
        remote.add_tenant(tenant);
        remote.add_membership(Membership {
            user_id: user,
            tenant_id,
            role,
            invitation_status: status,
            joined_at: Utc::now(),
        });
        (remote, user, tenant_id)
    }

    #[tokio::test]
    async fn test_enhanced_check_grants_with_role() {
        let (remote, user, tenant) = seeded(InvitationStatus::Active, MemberRole::Admin);
        let validator = AccessValidator::new(remote);

        let decision = validator.validate(user, tenant).await;
        assert!(decision.granted);
        assert_eq!(decision.role, Some(MemberRole::Admin));
    }

    #[tokio::test]
    async fn test_tier1_error_falls_through_to_membership() {
        // Scenario: enhanced check errors, direct membership has an active invitation
        let (remote, user, tenant) = seeded(InvitationStatus::Active, MemberRole::Owner);
        remote.fail_op("validate_access");
        let validator = AccessValidator::new(remote);

        let decision = validator.validate(user, tenant).await;
        assert!(decision.granted);
        assert_eq!(decision.role, Some(MemberRole::Owner));
    }

    #[tokio::test]
    async fn test_tier2_error_falls_through_to_existence() {
        let (remote, user, tenant) = seeded(InvitationStatus::Pending, MemberRole::Admin);
        remote.fail_op("validate_access");
        remote.fail_op("get_membership");
        let validator = AccessValidator::new(remote);

        // Existence alone implies access; role narrows to member
        let decision = validator.validate(user, tenant).await;
        assert!(decision.granted);
        assert_eq!(decision.role, Some(MemberRole::Member));
    }

    #[tokio::test]
    async fn test_all_tiers_exhausted_denies() {
        let (remote, user, tenant) = seeded(InvitationStatus::Active, MemberRole::Member);
        remote.fail_op("validate_access");
        remote.fail_op("get_membership");
        remote.fail_op("get_membership_any_status");
        let validator = AccessValidator::new(remote);

        let decision = validator.validate(user, tenant).await;
        assert!(!decision.granted);
        assert!(decision.reason.is_some());
    }

    #[tokio::test]
    async fn test_definitive_deny_does_not_fall_through() {
        // Tier 1 reachable and answering "no membership": tiers 2/3 must not
        // resurrect access.
        let remote = Arc::new(InMemoryAuthz::new());
        let tenant = Tenant::new("Acme", "acme", SubscriptionTier::Starter);
        let tenant_id = tenant.id;
        remote.add_tenant(tenant);
        let validator = AccessValidator::new(remote);

        let decision = validator.validate(Uuid::new_v4(), tenant_id).await;
        assert!(!decision.granted);
        assert_eq!(decision.reason.as_deref(), Some("no membership"));
    }

    #[tokio::test]
    async fn test_inactive_tenant_denied_by_enhanced_check() {
        let (remote, user, tenant_id) = seeded(InvitationStatus::Active, MemberRole::Member);
        // Soft-delete the tenant upstream
        let t = remote.get_tenant(tenant_id).await.unwrap().unwrap();
        remote.add_tenant(Tenant {
            deleted_at: Some(Utc::now()),
            ..t
        });
        let validator = AccessValidator::new(remote);

        let decision = validator.validate(user, tenant_id).await;
        assert!(!decision.granted);
    }
}
