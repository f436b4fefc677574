//! Multi-Tenant Session Core (MTSC)
//!
//! Tenant selection and permission resolution for the OpenCRM dashboard:
//! which agency workspace is current, what the session holder may do in it,
//! and keeping that consistent across browser tabs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        TENANT SESSION                               │
//! │   Unselected → Loading → Selected → SwitchingPending → Selected     │
//! │                                                                     │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────────┐   │
//! │  │  TabMutex  │  │   Access   │  │ Permission │  │ Entitlement  │   │
//! │  │ TTL leases │  │ Validator  │  │  Resolver  │  │   Engine     │   │
//! │  │ cross-tab  │  │ 3 tiers    │  │ 4 layers   │  │ tier → flags │   │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └──────┬───────┘   │
//! └────────┼───────────────┼───────────────┼────────────────┼───────────┘
//!          │               │               │                │
//!   ┌──────▼──────┐ ┌──────▼───────────────▼────────────────▼─────────┐
//!   │ Lease board │ │        Remote Authorization Service port        │
//!   │ (pluggable) │ │  tenants · memberships · roles · subscriptions  │
//!   └─────────────┘ └─────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod access;
pub mod entitlements;
pub mod error;
pub mod model;
pub mod permissions;
pub mod ports;
pub mod session;
pub mod tabs;

pub use access::{AccessDecision, AccessValidator, TierOutcome};
pub use entitlements::{CrmFeature, EntitlementEngine, Entitlements, SeatQuotaError, UNLIMITED_SEATS};
pub use error::{SessionError, SessionResult};
pub use model::{
    CustomRole, EffectivePermissions, InvitationStatus, MemberRole, Membership,
    PermissionOverride, RoleAssignment, RoleTemplate, Subscription, SubscriptionStatus,
    SubscriptionTier, Tenant,
};
pub use ports::{AuthzRemote, CachedSelection, RemoteError, RemoteResult, SelectionCache};
pub use permissions::PermissionResolver;
pub use session::{SessionIdentity, SessionPhase, SwitchOutcome, TenantSession};
pub use tabs::{LeaseBoard, TabMutex, TENANT_SELECTION_LOCK};
