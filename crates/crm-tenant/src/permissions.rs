//! Effective Permission Resolution
//!
//! Four layers, highest precedence first: coarse-role bypass, explicit
//! per-member overrides, union-OR across assigned custom roles, default
//! false. Section access follows the same precedence over the section
//! catalog. The server-computed shortcut is preferred; local computation is
//! the fallback when it is unavailable.

use crate::error::{SessionError, SessionResult};
use crate::model::{CustomRole, EffectivePermissions, MemberRole, PermissionOverride, RoleTemplate};
use crate::ports::AuthzRemote;
use crm_common::{is_permission_key, is_section_key, TenantId, UserId, DEMO_TENANT_ID, PERMISSION_KEYS, SECTION_KEYS};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Computes the effective permission set for a (user, tenant) pair
pub struct PermissionResolver {
    remote: Arc<dyn AuthzRemote>,
}

impl PermissionResolver {
    /// Resolver over a remote port
    pub fn new(remote: Arc<dyn AuthzRemote>) -> Self {
        Self { remote }
    }

    /// Resolve the effective permission set.
    ///
    /// `role` is the member's coarse role in the tenant, already established
    /// by access validation.
    pub async fn resolve(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: MemberRole,
    ) -> SessionResult<EffectivePermissions> {
        // The demo tenant never touches the remote service
        if tenant_id == DEMO_TENANT_ID {
            return Ok(EffectivePermissions::full_access(role));
        }

        match role {
            MemberRole::Owner => return Ok(EffectivePermissions::full_access(MemberRole::Owner)),
            MemberRole::Admin => return Ok(EffectivePermissions::admin_access()),
            MemberRole::Member => {}
        }

        match self.remote.get_effective_permissions(user_id, tenant_id).await {
            Ok(effective) => Ok(effective),
            Err(err) => {
                tracing::warn!(%user_id, %tenant_id, %err, "server-computed permissions unavailable, computing locally");
                self.resolve_locally(user_id, tenant_id).await
            }
        }
    }

    /// Local equivalent of the server shortcut, from role, template and
    /// override queries
    async fn resolve_locally(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> SessionResult<EffectivePermissions> {
        let roles = self
            .remote
            .get_custom_roles_for_tenant(tenant_id)
            .await
            .map_err(|e| SessionError::PermissionFetchFailed(e.to_string()))?;
        let assignments = self
            .remote
            .get_role_assignments(user_id, tenant_id)
            .await
            .map_err(|e| SessionError::PermissionFetchFailed(e.to_string()))?;
        let overrides = self
            .remote
            .get_permission_overrides(user_id, tenant_id)
            .await
            .map_err(|e| SessionError::PermissionFetchFailed(e.to_string()))?;

        let assigned: HashSet<_> = assignments.iter().map(|a| a.role_id).collect();
        let held: Vec<CustomRole> = roles
            .into_iter()
            .filter(|r| assigned.contains(&r.id))
            .collect();

        // Template queries only matter for derived roles
        let templates = if held.iter().any(|r| r.template_id.is_some()) {
            self.remote
                .get_role_templates()
                .await
                .map_err(|e| SessionError::PermissionFetchFailed(e.to_string()))?
        } else {
            Vec::new()
        };
        let held: Vec<CustomRole> = held
            .into_iter()
            .map(|r| with_template_defaults(r, &templates))
            .collect();

        Ok(compute_effective(&held, &overrides))
    }
}

/// A role derived from a template inherits the template's grants for keys it
/// does not set itself; the role's own entries shadow the template.
fn with_template_defaults(mut role: CustomRole, templates: &[RoleTemplate]) -> CustomRole {
    let template = match role
        .template_id
        .and_then(|id| templates.iter().find(|t| t.id == id))
    {
        Some(template) => template,
        None => return role,
    };
    for (key, allowed) in &template.permissions {
        role.permissions.entry(key.clone()).or_insert(*allowed);
    }
    for (key, allowed) in &template.section_access {
        role.section_access.entry(key.clone()).or_insert(*allowed);
    }
    role
}

/// Pure resolution over already-fetched role and override data
fn compute_effective(held: &[CustomRole], overrides: &[PermissionOverride]) -> EffectivePermissions {
    let override_map: HashMap<&str, bool> = overrides
        .iter()
        .map(|o| (o.key.as_str(), o.allowed))
        .collect();

    let mut permissions = HashMap::new();
    for key in PERMISSION_KEYS {
        let value = match override_map.get(key) {
            Some(&forced) => forced,
            // any assigned role granting the key wins
            None => held.iter().any(|r| r.permissions.get(*key) == Some(&true)),
        };
        permissions.insert(key.to_string(), value);
    }

    let mut section_access = HashMap::new();
    for key in SECTION_KEYS {
        let value = match override_map.get(key) {
            Some(&forced) => forced,
            None => held.iter().any(|r| r.section_access.get(*key) == Some(&true)),
        };
        section_access.insert(key.to_string(), value);
    }

    // Overrides on keys outside the catalogs are ignored, but log them so a
    // stale key in upstream data is visible.
    for o in overrides {
        if !is_permission_key(&o.key) && !is_section_key(&o.key) {
            tracing::debug!(key = %o.key, "override targets unknown key, ignored");
        }
    }

    EffectivePermissions {
        permissions,
        section_access,
        role: MemberRole::Member,
    }
}
