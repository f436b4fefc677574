//! Tenant Session - selection state machine and cross-tab orchestration
//!
//! ```text
//! Unselected ──▶ Loading ──▶ Selected ──▶ SwitchingPending ──▶ Selected
//!                   │
//!                   └──▶ Failed (hard load ceiling)
//! ```
//!
//! The session is a constructed service object: dependencies are injected,
//! `init()` starts it, `dispose()` ends it. The host calls `init()` once its
//! prerequisites are ready and `refresh()` when readiness changes; until
//! then the session sits in `Loading`.

use crate::access::AccessValidator;
use crate::entitlements::{EntitlementEngine, Entitlements};
use crate::error::{SessionError, SessionResult};
use crate::model::{EffectivePermissions, MemberRole, Membership, Tenant};
use crate::ports::{AuthzRemote, CachedSelection, SelectionCache};
use crate::permissions::PermissionResolver;
use crate::tabs::{LeaseBoard, TabMutex, TENANT_SELECTION_LOCK};
use chrono::Utc;
use crm_common::{ContextId, TenantId, UserId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on a session load; past it the session fails terminally
/// instead of spinning.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a tenant switch waits for the cross-tab lease
const SELECTION_MUTEX_TIMEOUT: Duration = Duration::from_secs(10);

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No tenant selected
    Unselected,
    /// Load sequence in flight (or not yet started)
    Loading,
    /// Exactly one tenant current
    Selected,
    /// A switch is in flight on top of an existing selection
    SwitchingPending,
    /// Load ceiling exceeded; terminal until the host retries
    Failed,
}

/// Authenticated identity the session acts for
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// User ID
    pub user_id: UserId,
    /// Platform-operator capability, resolved once at authentication time.
    /// Gates demo-mode injection and the god-mode entitlement override.
    pub is_platform_operator: bool,
}

/// How a switch attempt ended when it did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Selection committed
    Completed,
    /// Lease not acquired; another context is handling it. Not an error.
    Contended,
    /// A newer load superseded this attempt; result discarded
    Superseded,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    tenants: Vec<Tenant>,
    current: Option<Tenant>,
    membership: Option<Membership>,
    permissions: Option<EffectivePermissions>,
    entitlements: Option<Entitlements>,
    load_failed: bool,
}

/// Top-level state holder for one execution context.
///
/// Composes the access validator, permission resolver and entitlement engine;
/// guards real tenant switches with the cross-tab mutex.
pub struct TenantSession {
    identity: Option<SessionIdentity>,
    remote: Arc<dyn AuthzRemote>,
    cache: Arc<dyn SelectionCache>,
    mutex: TabMutex,
    validator: AccessValidator,
    resolver: PermissionResolver,
    engine: EntitlementEngine,
    state: RwLock<SessionState>,
    load_attempt: AtomicU64,
    disposed: AtomicBool,
}

impl TenantSession {
    /// Build a session for one execution context.
    ///
    /// `identity` is `None` when no authenticated identity is present.
    pub fn new(
        identity: Option<SessionIdentity>,
        remote: Arc<dyn AuthzRemote>,
        cache: Arc<dyn SelectionCache>,
        board: Arc<dyn LeaseBoard>,
    ) -> Self {
        Self {
            identity,
            remote: remote.clone(),
            cache,
            mutex: TabMutex::new(board, ContextId::generate()),
            validator: AccessValidator::new(remote.clone()),
            resolver: PermissionResolver::new(remote.clone()),
            engine: EntitlementEngine::new(remote),
            state: RwLock::new(SessionState {
                phase: SessionPhase::Loading,
                tenants: Vec::new(),
                current: None,
                membership: None,
                permissions: None,
                entitlements: None,
                load_failed: false,
            }),
            load_attempt: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Identity of this execution context
    pub fn context_id(&self) -> &ContextId {
        self.mutex.context_id()
    }

    /// Run the initial load sequence under the hard 20s ceiling.
    pub async fn init(&self) -> SessionResult<()> {
        match tokio::time::timeout(LOAD_TIMEOUT, self.load()).await {
            Ok(result) => result,
            Err(_) => {
                self.state.write().phase = SessionPhase::Failed;
                Err(SessionError::LoadTimeout)
            }
        }
    }

    /// Re-run the load sequence (readiness change, demo toggle flip,
    /// explicit retry after failure).
    pub async fn refresh(&self) -> SessionResult<()> {
        self.init().await
    }

    /// End the session: release any held lease and stop reacting.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.mutex.release(TENANT_SELECTION_LOCK);
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    /// Available tenants (demo tenant included when injected)
    pub fn tenants(&self) -> Vec<Tenant> {
        self.state.read().tenants.clone()
    }

    /// The current tenant, once selected
    pub fn current_tenant(&self) -> Option<Tenant> {
        self.state.read().current.clone()
    }

    /// Membership backing the current selection
    pub fn membership(&self) -> Option<Membership> {
        self.state.read().membership.clone()
    }

    /// Effective permissions for the current selection
    pub fn permissions(&self) -> Option<EffectivePermissions> {
        self.state.read().permissions.clone()
    }

    /// Entitlements for the current selection
    pub fn entitlements(&self) -> Option<Entitlements> {
        self.state.read().entitlements.clone()
    }

    /// Whether the last list retrieval failed. Distinct from "zero tenants":
    /// UI must not prompt workspace creation while this is set.
    pub fn load_failed(&self) -> bool {
        self.state.read().load_failed
    }

    /// True only when we know for sure the user has no workspace
    pub fn needs_workspace(&self) -> bool {
        let state = self.state.read();
        self.identity.is_some()
            && !state.load_failed
            && state.tenants.is_empty()
            && state.phase == SessionPhase::Unselected
    }

    /// Flip the demo-mode toggle. Only meaningful for platform operators;
    /// takes effect on the next `refresh()`.
    pub fn set_demo_enabled(&self, enabled: bool) {
        self.cache.set_demo_enabled(enabled);
    }

    /// Switch to a tenant from the current list.
    ///
    /// Denial or failure leaves the previous selection intact. A contended
    /// lease abandons the switch silently.
    pub async fn switch_to(&self, tenant_id: TenantId) -> SessionResult<SwitchOutcome> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(SwitchOutcome::Superseded);
        }
        if self.identity.is_none() {
            return Err(SessionError::AuthenticationRequired);
        }

        let tenant = {
            let state = self.state.read();
            state.tenants.iter().find(|t| t.id == tenant_id).cloned()
        }
        .ok_or(SessionError::TenantNotFound(tenant_id))?;

        let had_selection = {
            let mut state = self.state.write();
            let had = state.current.is_some();
            if had {
                state.phase = SessionPhase::SwitchingPending;
            }
            had
        };

        let result = self.select_tenant(tenant, None).await;

        // Any outcome other than a committed switch restores the prior phase
        if !matches!(result, Ok(SwitchOutcome::Completed)) {
            let mut state = self.state.write();
            state.phase = if had_selection {
                SessionPhase::Selected
            } else {
                SessionPhase::Unselected
            };
        }
        result
    }

    /// The full load sequence: list retrieval, demo injection, selection.
    async fn load(&self) -> SessionResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => {
                let mut state = self.state.write();
                state.phase = SessionPhase::Unselected;
                state.tenants.clear();
                state.load_failed = false;
                return Ok(());
            }
        };

        {
            let mut state = self.state.write();
            if state.current.is_none() {
                state.phase = SessionPhase::Loading;
            }
        }
        let attempt = self.load_attempt.fetch_add(1, Ordering::SeqCst) + 1;

        let mut tenants = match self.fetch_tenant_list(identity.user_id).await {
            Ok(tenants) => tenants,
            Err(err) => {
                if self.is_stale(attempt) {
                    return Ok(());
                }
                tracing::warn!(%err, "tenant list retrieval failed");
                let mut state = self.state.write();
                state.load_failed = true;
                state.tenants.clear();
                if state.current.is_none() {
                    state.phase = SessionPhase::Unselected;
                }
                return Ok(());
            }
        };

        let demo_on = self.cache.demo_enabled() && identity.is_platform_operator;
        if demo_on {
            tenants.insert(0, Tenant::demo());
        }

        if self.is_stale(attempt) {
            return Ok(());
        }

        let previous_was_demo = {
            let mut state = self.state.write();
            state.tenants = tenants.clone();
            state.load_failed = false;
            state.current.as_ref().map(|t| t.is_demo()).unwrap_or(false)
        };

        if tenants.is_empty() {
            let mut state = self.state.write();
            state.phase = SessionPhase::Unselected;
            state.current = None;
            state.membership = None;
            state.permissions = None;
            state.entitlements = None;
            return Ok(());
        }

        let target = self
            .pick_target(&tenants, demo_on, previous_was_demo, identity.user_id)
            .await;

        let result = self.select_tenant(target, Some(attempt)).await;
        if result.is_err() {
            // Initial selection failed; settle the phase so the UI is not
            // left on a spinner.
            let mut state = self.state.write();
            state.phase = if state.current.is_some() {
                SessionPhase::Selected
            } else {
                SessionPhase::Unselected
            };
        }
        result.map(|_| ())
    }

    /// Selection priority: demo-flag transitions first, then the persisted
    /// preference, then the first tenant.
    async fn pick_target(
        &self,
        tenants: &[Tenant],
        demo_on: bool,
        previous_was_demo: bool,
        user_id: UserId,
    ) -> Tenant {
        if !demo_on && previous_was_demo {
            if let Some(t) = tenants.iter().find(|t| !t.is_demo()) {
                return t.clone();
            }
        }
        if demo_on {
            if let Some(t) = tenants.iter().find(|t| t.is_demo()) {
                return t.clone();
            }
        }
        match self.remote.get_current_tenant_preference(user_id).await {
            Ok(Some(preferred)) => {
                if let Some(t) = tenants.iter().find(|t| t.id == preferred) {
                    return t.clone();
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(%err, "tenant preference unavailable, using first tenant");
            }
        }
        tenants[0].clone()
    }

    /// Enriched listing first; two-step membership-then-details fallback.
    async fn fetch_tenant_list(&self, user_id: UserId) -> SessionResult<Vec<Tenant>> {
        match self.remote.list_tenants_for_user(user_id).await {
            Ok(tenants) => return Ok(tenants),
            Err(err) => {
                tracing::warn!(%err, "enriched tenant listing failed, falling back to memberships");
            }
        }

        let memberships = self
            .remote
            .list_memberships_for_user(user_id)
            .await
            .map_err(|e| SessionError::LoadFailed(e.to_string()))?;
        let ids: Vec<TenantId> = memberships
            .iter()
            .filter(|m| m.invitation_status == crate::model::InvitationStatus::Active)
            .map(|m| m.tenant_id)
            .collect();
        self.remote
            .get_tenants_by_ids(&ids)
            .await
            .map_err(|e| SessionError::LoadFailed(e.to_string()))
    }

    /// Select one tenant. Demo selection bypasses validator and mutex; real
    /// selection runs the guarded switch.
    async fn select_tenant(
        &self,
        tenant: Tenant,
        load_attempt: Option<u64>,
    ) -> SessionResult<SwitchOutcome> {
        let identity = self
            .identity
            .clone()
            .ok_or(SessionError::AuthenticationRequired)?;

        if tenant.is_demo() {
            self.commit_demo_selection(&identity, tenant).await;
            return Ok(SwitchOutcome::Completed);
        }

        if !self
            .mutex
            .acquire(TENANT_SELECTION_LOCK, SELECTION_MUTEX_TIMEOUT)
            .await
        {
            tracing::debug!(tenant_id = %tenant.id, "selection lease contended, abandoning switch");
            return Ok(SwitchOutcome::Contended);
        }
        let result = self.guarded_switch(&identity, tenant, load_attempt).await;
        self.mutex.release(TENANT_SELECTION_LOCK);
        result
    }

    /// Critical section of a real tenant switch: validate, fetch details,
    /// recompute, commit locally, then sync upstream best-effort.
    async fn guarded_switch(
        &self,
        identity: &SessionIdentity,
        tenant: Tenant,
        load_attempt: Option<u64>,
    ) -> SessionResult<SwitchOutcome> {
        let decision = self.validator.validate(identity.user_id, tenant.id).await;
        if !decision.granted {
            return Err(SessionError::AccessDenied(
                decision.reason.unwrap_or_else(|| "access refused".to_string()),
            ));
        }
        let role = decision.role.unwrap_or(MemberRole::Member);

        let tenant = match self.remote.get_tenant(tenant.id).await {
            Ok(Some(details)) if details.is_selectable() => details,
            Ok(_) => return Err(SessionError::TenantNotFound(tenant.id)),
            Err(err) => {
                // Details endpoint down; the listed copy already passed the
                // access check, keep it if it is selectable.
                tracing::warn!(tenant_id = %tenant.id, %err, "tenant detail fetch failed, using listed record");
                if tenant.is_selectable() {
                    tenant
                } else {
                    return Err(SessionError::TenantNotFound(tenant.id));
                }
            }
        };

        let membership = Membership {
            user_id: identity.user_id,
            tenant_id: tenant.id,
            role,
            invitation_status: crate::model::InvitationStatus::Active,
            joined_at: Utc::now(),
        };
        let permissions = self
            .resolver
            .resolve(identity.user_id, tenant.id, role)
            .await?;
        let entitlements = self
            .engine
            .entitlements(&tenant, identity.is_platform_operator)
            .await;

        if let Some(attempt) = load_attempt {
            if self.is_stale(attempt) {
                return Ok(SwitchOutcome::Superseded);
            }
        }

        // Phase 1: commit local state synchronously
        self.commit_selection(tenant.clone(), membership, permissions, entitlements);

        // Phase 2: detached best-effort upstream sync; never rolled back
        let remote = self.remote.clone();
        let user_id = identity.user_id;
        let tenant_id = tenant.id;
        tokio::spawn(async move {
            if let Err(err) = remote
                .set_current_tenant_preference(user_id, Some(tenant_id))
                .await
            {
                tracing::warn!(%user_id, %tenant_id, %err, "preference sync-back failed");
            }
        });

        Ok(SwitchOutcome::Completed)
    }

    /// Demo selection: synthesized admin membership, no remote calls, no
    /// upstream persistence.
    async fn commit_demo_selection(&self, identity: &SessionIdentity, tenant: Tenant) {
        let membership = Membership::synthetic_demo(identity.user_id);
        let permissions = EffectivePermissions::full_access(MemberRole::Admin);
        let entitlements = Entitlements::operator();
        self.commit_selection(tenant, membership, permissions, entitlements);
    }

    fn commit_selection(
        &self,
        tenant: Tenant,
        membership: Membership,
        permissions: EffectivePermissions,
        entitlements: Entitlements,
    ) {
        self.cache.store_selection(&CachedSelection {
            id: tenant.id,
            name: tenant.name.clone(),
            slug: tenant.slug.clone(),
            selecting_context_id: self.mutex.context_id().clone(),
            timestamp: Utc::now(),
        });
        let mut state = self.state.write();
        state.current = Some(tenant);
        state.membership = Some(membership);
        state.permissions = Some(permissions);
        state.entitlements = Some(entitlements);
        state.phase = SessionPhase::Selected;
        state.load_failed = false;
    }

    fn is_stale(&self, attempt: u64) -> bool {
        self.load_attempt.load(Ordering::SeqCst) != attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CustomRole, InvitationStatus, PermissionOverride, RoleAssignment, SubscriptionTier,
    };
    use crate::ports::{InMemoryAuthz, InMemorySelectionCache};
    use crate::tabs::InMemoryLeaseBoard;
    use crm_common::DEMO_TENANT_ID;
    use uuid::Uuid;

    struct Harness {
        remote: Arc<InMemoryAuthz>,
        cache: Arc<InMemorySelectionCache>,
        board: Arc<InMemoryLeaseBoard>,
        user: UserId,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                remote: Arc::new(InMemoryAuthz::new()),
                cache: Arc::new(InMemorySelectionCache::new()),
                board: Arc::new(InMemoryLeaseBoard::new()),
                user: Uuid::new_v4(),
            }
        }

        fn add_tenant(&self, name: &str, role: MemberRole) -> TenantId {
            let tenant = Tenant::new(name, &name.to_lowercase(), SubscriptionTier::Business);
            let id = tenant.id;
            self.remote.add_tenant(tenant);
            self.remote.add_membership(Membership {
                user_id: self.user,
                tenant_id: id,
                role,
                invitation_status: InvitationStatus::Active,
                joined_at: Utc::now(),
            });
            id
        }

        fn session(&self, operator: bool) -> TenantSession {
            TenantSession::new(
                Some(SessionIdentity {
                    user_id: self.user,
                    is_platform_operator: operator,
                }),
                self.remote.clone(),
                self.cache.clone(),
                self.board.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_initial_load_selects_first_tenant() {
        // Scenario A, first half: no persisted preference, first tenant wins
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Owner);
        let _t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = h.session(false);

        session.init().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Selected);
        assert_eq!(session.current_tenant().unwrap().id, t1);
        assert_eq!(session.membership().unwrap().role, MemberRole::Owner);
        // Owner bypass: everything allowed, billing included
        assert!(session.permissions().unwrap().allows("billing.manage"));
        // Local cache written by this context
        let cached = h.cache.load_selection().unwrap();
        assert_eq!(cached.id, t1);
        assert_eq!(&cached.selecting_context_id, session.context_id());
    }

    #[tokio::test]
    async fn test_switch_applies_override_over_role() {
        // Scenario A, second half: override P=true beats role P=false
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Owner);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let mut role = CustomRole::new(t2, "Restricted");
        role.set_permission("pipelines.edit", false);
        let role_id = role.id;
        h.remote.add_custom_role(role);
        h.remote.add_assignment(RoleAssignment {
            user_id: h.user,
            tenant_id: t2,
            role_id,
        });
        h.remote.add_override(PermissionOverride {
            user_id: h.user,
            tenant_id: t2,
            key: "pipelines.edit".to_string(),
            allowed: true,
            reason: None,
        });
        let session = h.session(false);
        session.init().await.unwrap();
        assert_eq!(session.current_tenant().unwrap().id, t1);

        let outcome = session.switch_to(t2).await.unwrap();
        assert_eq!(outcome, SwitchOutcome::Completed);
        assert_eq!(session.current_tenant().unwrap().id, t2);
        assert!(session.permissions().unwrap().allows("pipelines.edit"));
    }

    #[tokio::test]
    async fn test_demo_injected_only_for_operator_with_flag() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        h.cache.set_demo_enabled(true);

        // Flag on, not an operator: no demo tenant
        let plain = h.session(false);
        plain.init().await.unwrap();
        assert!(!plain.tenants().iter().any(|t| t.is_demo()));

        // Flag on, operator: demo tenant present and selected
        let operator = h.session(true);
        operator.init().await.unwrap();
        assert!(operator.tenants().iter().any(|t| t.is_demo()));
        assert!(operator.current_tenant().unwrap().is_demo());

        // Flag off, operator: absent again
        h.cache.set_demo_enabled(false);
        operator.refresh().await.unwrap();
        assert!(!operator.tenants().iter().any(|t| t.is_demo()));
    }

    #[tokio::test]
    async fn test_demo_selection_bypasses_remote_and_persistence() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        h.cache.set_demo_enabled(true);
        // Even a dead validator cannot stop a demo selection
        h.remote.fail_op("validate_access");
        h.remote.fail_op("get_membership");
        h.remote.fail_op("get_membership_any_status");
        let session = h.session(true);

        session.init().await.unwrap();
        let current = session.current_tenant().unwrap();
        assert_eq!(current.id, DEMO_TENANT_ID);
        assert_eq!(session.membership().unwrap().role, MemberRole::Admin);
        // Never persisted upstream
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.remote.preference_of(h.user), None);
    }

    #[tokio::test]
    async fn test_demo_flag_disabled_picks_first_real_tenant() {
        // Scenario B: current is demo, flag flips off, next load picks T3
        let h = Harness::new();
        let t3 = h.add_tenant("Gamma", MemberRole::Member);
        let _t4 = h.add_tenant("Delta", MemberRole::Member);
        h.cache.set_demo_enabled(true);
        let session = h.session(true);
        session.init().await.unwrap();
        assert!(session.current_tenant().unwrap().is_demo());

        session.set_demo_enabled(false);
        session.refresh().await.unwrap();
        assert_eq!(session.current_tenant().unwrap().id, t3);
    }

    #[tokio::test]
    async fn test_persisted_preference_honored() {
        let h = Harness::new();
        let _t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        h.remote
            .set_current_tenant_preference(h.user, Some(t2))
            .await
            .unwrap();
        let session = h.session(false);

        session.init().await.unwrap();
        assert_eq!(session.current_tenant().unwrap().id, t2);
    }

    #[tokio::test]
    async fn test_load_failure_sets_flag_not_workspace_prompt() {
        // Scenario D: list retrieval fails entirely
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        h.remote.fail_op("list_tenants_for_user");
        h.remote.fail_op("list_memberships_for_user");
        let session = h.session(false);

        session.init().await.unwrap();
        assert!(session.load_failed());
        assert!(session.tenants().is_empty());
        assert!(!session.needs_workspace());
        assert_eq!(session.phase(), SessionPhase::Unselected);
    }

    #[tokio::test]
    async fn test_fallback_listing_via_memberships() {
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Member);
        // Enriched listing down, two-step fallback carries the load
        h.remote.fail_op("list_tenants_for_user");
        let session = h.session(false);

        session.init().await.unwrap();
        assert!(!session.load_failed());
        assert_eq!(session.current_tenant().unwrap().id, t1);
    }

    #[tokio::test]
    async fn test_zero_tenants_prompts_workspace_creation() {
        let h = Harness::new();
        let session = h.session(false);

        session.init().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Unselected);
        assert!(!session.load_failed());
        assert!(session.needs_workspace());
    }

    #[tokio::test]
    async fn test_no_identity_means_unselected() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        let session = TenantSession::new(
            None,
            h.remote.clone(),
            h.cache.clone(),
            h.board.clone(),
        );

        session.init().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Unselected);
        assert!(session.tenants().is_empty());
        assert!(session.switch_to(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_lease_abandons_switch() {
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();
        assert_eq!(session.current_tenant().unwrap().id, t1);

        // Another context holds the selection lease
        let other = TabMutex::new(h.board.clone(), ContextId::from("other-tab"));
        assert!(other.acquire(TENANT_SELECTION_LOCK, Duration::from_millis(50)).await);

        let outcome = session.switch_to(t2).await.unwrap();
        assert_eq!(outcome, SwitchOutcome::Contended);
        // Unchanged selection, no error
        assert_eq!(session.current_tenant().unwrap().id, t1);
        assert_eq!(session.phase(), SessionPhase::Selected);
    }

    #[tokio::test]
    async fn test_denied_switch_keeps_previous_tenant() {
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();

        // Deactivate T2 upstream; every validation tier will refuse it
        let mut beta = h.remote.get_tenant(t2).await.unwrap().unwrap();
        beta.active = false;
        h.remote.add_tenant(beta);
        h.remote.fail_op("get_membership");
        h.remote.fail_op("get_membership_any_status");

        let err = session.switch_to(t2).await.unwrap_err();
        assert!(matches!(err, SessionError::AccessDenied(_)));
        assert_eq!(session.current_tenant().unwrap().id, t1);
        assert_eq!(session.phase(), SessionPhase::Selected);
    }

    #[tokio::test]
    async fn test_switch_syncs_preference_best_effort() {
        let h = Harness::new();
        let _t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();

        session.switch_to(t2).await.unwrap();
        // Detached write lands shortly after the local commit
        for _ in 0..50 {
            if h.remote.preference_of(h.user) == Some(t2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.remote.preference_of(h.user), Some(t2));
    }

    #[tokio::test]
    async fn test_preference_sync_failure_keeps_local_commit() {
        let h = Harness::new();
        let _t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();

        h.remote.fail_op("set_current_tenant_preference");
        let outcome = session.switch_to(t2).await.unwrap();
        assert_eq!(outcome, SwitchOutcome::Completed);
        assert_eq!(session.current_tenant().unwrap().id, t2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_ceiling_fails_instead_of_spinning() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        h.remote.hang_op("list_tenants_for_user");
        h.remote.hang_op("list_memberships_for_user");
        let session = h.session(false);

        let err = session.init().await.unwrap_err();
        assert!(matches!(err, SessionError::LoadTimeout));
        assert_eq!(session.phase(), SessionPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_load_discards_stale_attempt() {
        let h = Harness::new();
        let _t1 = h.add_tenant("Alpha", MemberRole::Member);
        let t2 = h.add_tenant("Beta", MemberRole::Member);
        let session = Arc::new(h.session(false));

        // First load stalls mid-switch toward Alpha
        h.remote.delay_op("validate_access", Duration::from_millis(100));
        let first = tokio::spawn({
            let session = session.clone();
            async move { session.init().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A newer load starts and commits Beta while the first is parked
        h.remote.restore_op("validate_access");
        h.remote
            .set_current_tenant_preference(h.user, Some(t2))
            .await
            .unwrap();
        session.refresh().await.unwrap();
        first.await.unwrap().unwrap();

        // The outdated attempt's Alpha result was discarded, not committed
        assert_eq!(session.current_tenant().unwrap().id, t2);
        assert_eq!(session.phase(), SessionPhase::Selected);
    }

    #[tokio::test]
    async fn test_switch_after_dispose_is_superseded() {
        let h = Harness::new();
        let t1 = h.add_tenant("Alpha", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();

        session.dispose();
        let outcome = session.switch_to(t1).await.unwrap();
        assert_eq!(outcome, SwitchOutcome::Superseded);
    }

    #[tokio::test]
    async fn test_exactly_one_current_after_init() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        h.add_tenant("Beta", MemberRole::Member);
        h.add_tenant("Gamma", MemberRole::Member);
        let session = h.session(false);

        session.init().await.unwrap();
        assert_ne!(session.phase(), SessionPhase::Loading);
        // One current tenant, and it is drawn from the list
        let current = session.current_tenant().unwrap();
        assert!(session.tenants().iter().any(|t| t.id == current.id));
    }

    #[tokio::test]
    async fn test_dispose_releases_lease() {
        let h = Harness::new();
        h.add_tenant("Alpha", MemberRole::Member);
        let session = h.session(false);
        session.init().await.unwrap();

        // Simulate a lease left behind mid-switch
        assert!(session.mutex.acquire(TENANT_SELECTION_LOCK, Duration::from_millis(50)).await);
        session.dispose();

        let other = TabMutex::new(h.board.clone(), ContextId::from("other-tab"));
        assert!(other.acquire(TENANT_SELECTION_LOCK, Duration::from_millis(50)).await);
    }
}
