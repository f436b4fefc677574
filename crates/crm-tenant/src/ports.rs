//! Ports - Remote Authorization Service boundary and local selection cache
//!
//! The core never persists tenants, memberships, roles or overrides itself;
//! it reads them through [`AuthzRemote`] and caches only the current
//! selection locally. The cache is advisory: the remote per-user preference
//! record is the single source of truth.

use crate::access::AccessDecision;
use crate::model::{
    CustomRole, EffectivePermissions, InvitationStatus, Membership, PermissionOverride,
    RoleAssignment, RoleTemplate, Subscription, Tenant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crm_common::{ContextId, TenantId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Remote call result type
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote authorization service errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Endpoint unreachable or errored
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// Record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed response
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Remote Authorization Service port.
///
/// Abstract operation names from the service contract; exact transport is out
/// of scope. Every call can fail independently, which is what the tiered
/// access validator and the list-retrieval fallback are built around.
#[async_trait]
pub trait AuthzRemote: Send + Sync {
    /// Enriched tenant listing for a user (preferred form)
    async fn list_tenants_for_user(&self, user_id: UserId) -> RemoteResult<Vec<Tenant>>;

    /// Membership listing (fallback form, paired with [`Self::get_tenants_by_ids`])
    async fn list_memberships_for_user(&self, user_id: UserId) -> RemoteResult<Vec<Membership>>;

    /// Tenant details for a set of IDs
    async fn get_tenants_by_ids(&self, ids: &[TenantId]) -> RemoteResult<Vec<Tenant>>;

    /// Single tenant details
    async fn get_tenant(&self, tenant_id: TenantId) -> RemoteResult<Option<Tenant>>;

    /// Enhanced access check: tenant active-status, membership status and
    /// resolved role in one call
    async fn validate_access(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<AccessDecision>;

    /// Direct membership fetch
    async fn get_membership(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Option<Membership>>;

    /// Membership fetch with no status filter (last-resort existence check)
    async fn get_membership_any_status(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Option<Membership>>;

    /// Persisted tenant preference for a user
    async fn get_current_tenant_preference(&self, user_id: UserId) -> RemoteResult<Option<TenantId>>;

    /// Upstream preference write (best-effort from the session's perspective)
    async fn set_current_tenant_preference(&self, user_id: UserId, tenant_id: Option<TenantId>) -> RemoteResult<()>;

    /// Custom roles owned by a tenant
    async fn get_custom_roles_for_tenant(&self, tenant_id: TenantId) -> RemoteResult<Vec<CustomRole>>;

    /// Global role templates
    async fn get_role_templates(&self) -> RemoteResult<Vec<RoleTemplate>>;

    /// Role assignments for a member
    async fn get_role_assignments(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Vec<RoleAssignment>>;

    /// Permission overrides for a member
    async fn get_permission_overrides(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Vec<PermissionOverride>>;

    /// Server-computed effective permissions (shortcut; the resolver computes
    /// the equivalent locally when this is unavailable)
    async fn get_effective_permissions(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<EffectivePermissions>;

    /// Subscription record for a tenant
    async fn get_subscription(&self, tenant_id: TenantId) -> RemoteResult<Option<Subscription>>;
}

/// The single locally persisted selection record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSelection {
    /// Selected tenant ID
    pub id: TenantId,
    /// Tenant display name
    pub name: String,
    /// Tenant slug
    pub slug: String,
    /// Context that completed the selection
    pub selecting_context_id: ContextId,
    /// When the selection completed
    pub timestamp: DateTime<Utc>,
}

/// Local non-authoritative cache port.
///
/// Survives reload but not cross-device; readers treat it as advisory.
/// Also holds the demo-mode toggle scoped to platform operators.
pub trait SelectionCache: Send + Sync {
    /// Read the cached selection
    fn load_selection(&self) -> Option<CachedSelection>;

    /// Write the cached selection
    fn store_selection(&self, selection: &CachedSelection);

    /// Drop the cached selection
    fn clear_selection(&self);

    /// Demo-mode toggle state
    fn demo_enabled(&self) -> bool;

    /// Flip the demo-mode toggle
    fn set_demo_enabled(&self, enabled: bool);
}

/// In-memory selection cache (for testing and embedded hosts)
pub struct InMemorySelectionCache {
    selection: RwLock<Option<CachedSelection>>,
    demo: AtomicBool,
}

impl InMemorySelectionCache {
    /// Empty cache, demo mode off
    pub fn new() -> Self {
        Self {
            selection: RwLock::new(None),
            demo: AtomicBool::new(false),
        }
    }
}

impl Default for InMemorySelectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionCache for InMemorySelectionCache {
    fn load_selection(&self) -> Option<CachedSelection> {
        self.selection.read().clone()
    }

    fn store_selection(&self, selection: &CachedSelection) {
        *self.selection.write() = Some(selection.clone());
    }

    fn clear_selection(&self) {
        *self.selection.write() = None;
    }

    fn demo_enabled(&self) -> bool {
        self.demo.load(Ordering::Relaxed)
    }

    fn set_demo_enabled(&self, enabled: bool) {
        self.demo.store(enabled, Ordering::Relaxed);
    }
}

/// In-memory authorization service (for testing and development).
///
/// Individual operations can be forced to fail, hang or lag, which is how
/// the fallback tiers, the load-failure paths and load interleavings are
/// exercised.
pub struct InMemoryAuthz {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    memberships: RwLock<Vec<Membership>>,
    custom_roles: RwLock<Vec<CustomRole>>,
    templates: RwLock<Vec<RoleTemplate>>,
    assignments: RwLock<Vec<RoleAssignment>>,
    overrides: RwLock<Vec<PermissionOverride>>,
    subscriptions: RwLock<HashMap<TenantId, Subscription>>,
    preferences: RwLock<HashMap<UserId, TenantId>>,
    effective: RwLock<HashMap<(UserId, TenantId), EffectivePermissions>>,
    failing: RwLock<HashSet<&'static str>>,
    hanging: RwLock<HashSet<&'static str>>,
    delays: RwLock<HashMap<&'static str, Duration>>,
}

impl InMemoryAuthz {
    /// Empty service
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            memberships: RwLock::new(Vec::new()),
            custom_roles: RwLock::new(Vec::new()),
            templates: RwLock::new(Vec::new()),
            assignments: RwLock::new(Vec::new()),
            overrides: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
            effective: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            hanging: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a tenant
    pub fn add_tenant(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id, tenant);
    }

    /// Seed a membership
    pub fn add_membership(&self, membership: Membership) {
        self.memberships.write().push(membership);
    }

    /// Seed a custom role
    pub fn add_custom_role(&self, role: CustomRole) {
        self.custom_roles.write().push(role);
    }

    /// Seed a global template
    pub fn add_template(&self, template: RoleTemplate) {
        self.templates.write().push(template);
    }

    /// Seed a role assignment
    pub fn add_assignment(&self, assignment: RoleAssignment) {
        self.assignments.write().push(assignment);
    }

    /// Seed a permission override
    pub fn add_override(&self, ov: PermissionOverride) {
        self.overrides.write().push(ov);
    }

    /// Seed a subscription record
    pub fn set_subscription(&self, subscription: Subscription) {
        self.subscriptions.write().insert(subscription.tenant_id, subscription);
    }

    /// Seed a server-computed permission set
    pub fn set_effective(&self, user_id: UserId, tenant_id: TenantId, eff: EffectivePermissions) {
        self.effective.write().insert((user_id, tenant_id), eff);
    }

    /// Force an operation to error
    pub fn fail_op(&self, op: &'static str) {
        self.failing.write().insert(op);
    }

    /// Restore an operation
    pub fn restore_op(&self, op: &str) {
        self.failing.write().remove(op);
        self.hanging.write().remove(op);
        self.delays.write().remove(op);
    }

    /// Force an operation to never resolve
    pub fn hang_op(&self, op: &'static str) {
        self.hanging.write().insert(op);
    }

    /// Make an operation wait `delay` before answering
    pub fn delay_op(&self, op: &'static str, delay: Duration) {
        self.delays.write().insert(op, delay);
    }

    /// Number of preference writes recorded for `user_id`
    pub fn preference_of(&self, user_id: UserId) -> Option<TenantId> {
        self.preferences.read().get(&user_id).copied()
    }

    async fn gate(&self, op: &'static str) -> RemoteResult<()> {
        if self.hanging.read().contains(op) {
            std::future::pending::<()>().await;
        }
        let delay = self.delays.read().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.read().contains(op) {
            return Err(RemoteError::Unavailable(op.to_string()));
        }
        Ok(())
    }

    fn find_membership(&self, user_id: UserId, tenant_id: TenantId) -> Option<Membership> {
        self.memberships
            .read()
            .iter()
            .find(|m| m.user_id == user_id && m.tenant_id == tenant_id)
            .cloned()
    }
}

impl Default for InMemoryAuthz {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthzRemote for InMemoryAuthz {
    async fn list_tenants_for_user(&self, user_id: UserId) -> RemoteResult<Vec<Tenant>> {
        self.gate("list_tenants_for_user").await?;
        let memberships = self.memberships.read();
        let tenants = self.tenants.read();
        Ok(memberships
            .iter()
            .filter(|m| m.user_id == user_id && m.invitation_status == InvitationStatus::Active)
            .filter_map(|m| tenants.get(&m.tenant_id).cloned())
            .collect())
    }

    async fn list_memberships_for_user(&self, user_id: UserId) -> RemoteResult<Vec<Membership>> {
        self.gate("list_memberships_for_user").await?;
        Ok(self
            .memberships
            .read()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_tenants_by_ids(&self, ids: &[TenantId]) -> RemoteResult<Vec<Tenant>> {
        self.gate("get_tenants_by_ids").await?;
        let tenants = self.tenants.read();
        Ok(ids.iter().filter_map(|id| tenants.get(id).cloned()).collect())
    }

    async fn get_tenant(&self, tenant_id: TenantId) -> RemoteResult<Option<Tenant>> {
        self.gate("get_tenant").await?;
        Ok(self.tenants.read().get(&tenant_id).cloned())
    }

    async fn validate_access(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<AccessDecision> {
        self.gate("validate_access").await?;
        let tenant = self.tenants.read().get(&tenant_id).cloned();
        let tenant = match tenant {
            Some(t) if t.is_selectable() => t,
            Some(_) => return Ok(AccessDecision::deny("tenant inactive")),
            None => return Ok(AccessDecision::deny("tenant not found")),
        };
        match self.find_membership(user_id, tenant.id) {
            Some(m) if m.invitation_status == InvitationStatus::Active => {
                Ok(AccessDecision::grant(m.role))
            }
            Some(_) => Ok(AccessDecision::deny("invitation not active")),
            None => Ok(AccessDecision::deny("no membership")),
        }
    }

    async fn get_membership(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Option<Membership>> {
        self.gate("get_membership").await?;
        Ok(self.find_membership(user_id, tenant_id))
    }

    async fn get_membership_any_status(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Option<Membership>> {
        self.gate("get_membership_any_status").await?;
        Ok(self.find_membership(user_id, tenant_id))
    }

    async fn get_current_tenant_preference(&self, user_id: UserId) -> RemoteResult<Option<TenantId>> {
        self.gate("get_current_tenant_preference").await?;
        Ok(self.preferences.read().get(&user_id).copied())
    }

    async fn set_current_tenant_preference(&self, user_id: UserId, tenant_id: Option<TenantId>) -> RemoteResult<()> {
        self.gate("set_current_tenant_preference").await?;
        let mut prefs = self.preferences.write();
        match tenant_id {
            Some(id) => {
                prefs.insert(user_id, id);
            }
            None => {
                prefs.remove(&user_id);
            }
        }
        Ok(())
    }

    async fn get_custom_roles_for_tenant(&self, tenant_id: TenantId) -> RemoteResult<Vec<CustomRole>> {
        self.gate("get_custom_roles_for_tenant").await?;
        Ok(self
            .custom_roles
            .read()
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_role_templates(&self) -> RemoteResult<Vec<RoleTemplate>> {
        self.gate("get_role_templates").await?;
        Ok(self.templates.read().clone())
    }

    async fn get_role_assignments(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Vec<RoleAssignment>> {
        self.gate("get_role_assignments").await?;
        Ok(self
            .assignments
            .read()
            .iter()
            .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_permission_overrides(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<Vec<PermissionOverride>> {
        self.gate("get_permission_overrides").await?;
        Ok(self
            .overrides
            .read()
            .iter()
            .filter(|o| o.user_id == user_id && o.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_effective_permissions(&self, user_id: UserId, tenant_id: TenantId) -> RemoteResult<EffectivePermissions> {
        self.gate("get_effective_permissions").await?;
        self.effective
            .read()
            .get(&(user_id, tenant_id))
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable("no server-computed permissions".to_string()))
    }

    async fn get_subscription(&self, tenant_id: TenantId) -> RemoteResult<Option<Subscription>> {
        self.gate("get_subscription").await?;
        Ok(self.subscriptions.read().get(&tenant_id).cloned())
    }
}
