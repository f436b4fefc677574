//! Identifier types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant (agency workspace) ID
pub type TenantId = Uuid;

/// User ID
pub type UserId = Uuid;

/// Well-known ID of the virtual demo tenant.
///
/// Never persisted upstream; recognizable by every component so the demo
/// workspace can bypass remote access checks.
pub const DEMO_TENANT_ID: TenantId = Uuid::from_u128(0x00de_a0de_a0de_a0de_a0de_a0de_a0de_0001);

/// Identity of one execution context (a browser tab or embedded host).
///
/// Each context gets a fresh ID at construction; cross-tab lease records are
/// tagged with it so a context can tell its own leases from foreign ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh context identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
