//! Tenant Data Model

use chrono::{DateTime, Utc};
use crm_common::{TenantId, UserId, DEMO_TENANT_ID, PERMISSION_KEYS, PERM_BILLING_MANAGE, SECTION_BILLING, SECTION_KEYS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tenant (agency workspace)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant ID
    pub id: TenantId,
    /// Display name
    pub name: String,
    /// URL-safe slug
    pub slug: String,
    /// Subscription tier recorded on the tenant itself
    pub tier: SubscriptionTier,
    /// Active flag
    pub active: bool,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    /// Create new tenant
    pub fn new(name: &str, slug: &str, tier: SubscriptionTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            tier,
            active: true,
            deleted_at: None,
        }
    }

    /// The virtual demo tenant: fixed well-known ID, session-memory only,
    /// never persisted to the remote authorization service.
    pub fn demo() -> Self {
        Self {
            id: DEMO_TENANT_ID,
            name: "Demo Agency".to_string(),
            slug: "demo".to_string(),
            tier: SubscriptionTier::Agency,
            active: true,
            deleted_at: None,
        }
    }

    /// Whether this is the virtual demo tenant
    pub fn is_demo(&self) -> bool {
        self.id == DEMO_TENANT_ID
    }

    /// Active and not soft-deleted
    pub fn is_selectable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

/// Coarse membership role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Full access, including billing
    Owner,
    /// Full access except billing management
    Admin,
    /// Access governed by custom roles and overrides
    Member,
}

impl MemberRole {
    /// Role name as stored upstream
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// Invitation status on a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    /// Invitation accepted; membership live
    Active,
    /// Invited, not yet accepted
    Pending,
    /// Invitation withdrawn
    Revoked,
}

/// (user, tenant) membership edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    /// Member's user ID
    pub user_id: UserId,
    /// Tenant the membership grants access to
    pub tenant_id: TenantId,
    /// Coarse role
    pub role: MemberRole,
    /// Invitation status
    pub invitation_status: InvitationStatus,
    /// When the membership was created
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// Synthetic admin membership for the demo tenant.
    ///
    /// Exists only in session memory; the demo tenant carries no real
    /// access-control risk beyond the session itself.
    pub fn synthetic_demo(user_id: UserId) -> Self {
        Self {
            user_id,
            tenant_id: DEMO_TENANT_ID,
            role: MemberRole::Admin,
            invitation_status: InvitationStatus::Active,
            joined_at: Utc::now(),
        }
    }
}

/// Global role template: a reusable named bundle of grants, tenant-independent.
/// Immutable from the tenant's perspective; only copyable into a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTemplate {
    /// Template ID
    pub id: Uuid,
    /// Template name
    pub name: String,
    /// Permission-key grants
    pub permissions: HashMap<String, bool>,
    /// Section-key grants
    pub section_access: HashMap<String, bool>,
}

/// Tenant-owned custom role, possibly derived from a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRole {
    /// Role ID
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Role name
    pub name: String,
    /// Display color
    pub color: Option<String>,
    /// Permission-key grants
    pub permissions: HashMap<String, bool>,
    /// Section-key grants
    pub section_access: HashMap<String, bool>,
    /// Template this role was copied from, if any
    pub template_id: Option<Uuid>,
}

impl CustomRole {
    /// Create an empty role owned by `tenant_id`
    pub fn new(tenant_id: TenantId, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            color: None,
            permissions: HashMap::new(),
            section_access: HashMap::new(),
            template_id: None,
        }
    }

    /// Copy a global template into a tenant
    pub fn from_template(tenant_id: TenantId, template: &RoleTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: template.name.clone(),
            color: None,
            permissions: template.permissions.clone(),
            section_access: template.section_access.clone(),
            template_id: Some(template.id),
        }
    }

    /// Grant or deny a permission key on this role
    pub fn set_permission(&mut self, key: &str, allowed: bool) -> &mut Self {
        self.permissions.insert(key.to_string(), allowed);
        self
    }

    /// Grant or deny a section key on this role
    pub fn set_section(&mut self, key: &str, allowed: bool) -> &mut Self {
        self.section_access.insert(key.to_string(), allowed);
        self
    }
}

/// (member, custom role) assignment edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Member's user ID
    pub user_id: UserId,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Assigned custom role
    pub role_id: Uuid,
}

/// Per-member, per-key exception; outranks any role-derived value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOverride {
    /// Member's user ID
    pub user_id: UserId,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Permission or section key
    pub key: String,
    /// Forced value
    pub allowed: bool,
    /// Optional audit reason
    pub reason: Option<String>,
}

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// Entry tier
    Starter,
    /// Mid tier
    Business,
    /// Top tier; unbounded seats
    Agency,
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current
    Active,
    /// In trial window
    Trialing,
    /// Payment failed, grace period
    PastDue,
    /// Terminated
    Canceled,
    /// Checkout never completed
    Incomplete,
}

/// Tenant-owned subscription record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Purchased tier
    pub tier: SubscriptionTier,
    /// Status
    pub status: SubscriptionStatus,
    /// Trial window end, when trialing
    pub trial_end: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Both `active` and `trialing` count as having access
    pub fn has_access(&self) -> bool {
        matches!(self.status, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// Derived permission state for one (user, tenant) pair.
/// Recomputed on every tenant switch and explicit refresh; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermissions {
    /// Fine-grained permission key → allowed
    pub permissions: HashMap<String, bool>,
    /// Section key → accessible
    pub section_access: HashMap<String, bool>,
    /// Coarse role the resolution was computed for
    pub role: MemberRole,
}

impl EffectivePermissions {
    /// Full-catalog grant (owner bypass)
    pub fn full_access(role: MemberRole) -> Self {
        Self {
            permissions: PERMISSION_KEYS.iter().map(|k| (k.to_string(), true)).collect(),
            section_access: SECTION_KEYS.iter().map(|k| (k.to_string(), true)).collect(),
            role,
        }
    }

    /// Admin bypass: everything except billing management and the billing section
    pub fn admin_access() -> Self {
        let mut eff = Self::full_access(MemberRole::Admin);
        eff.permissions.insert(PERM_BILLING_MANAGE.to_string(), false);
        eff.section_access.insert(SECTION_BILLING.to_string(), false);
        eff
    }

    /// Whether a permission key resolves true
    pub fn allows(&self, key: &str) -> bool {
        self.permissions.get(key).copied().unwrap_or(false)
    }

    /// Whether a section resolves accessible
    pub fn can_access_section(&self, key: &str) -> bool {
        self.section_access.get(key).copied().unwrap_or(false)
    }
}
