//! Session error taxonomy
//!
//! Mutex non-acquisition is deliberately absent: it is routine multi-tab
//! behavior and surfaces as a [`crate::session::SwitchOutcome`], not an error.

use crm_common::TenantId;

/// Session result type
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the tenant session
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No authenticated identity for an operation that needs one
    #[error("authentication required")]
    AuthenticationRequired,

    /// All access-validation tiers exhausted or access refused
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Tenant missing, inactive or soft-deleted
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    /// Neither the server shortcut nor local computation could produce
    /// effective permissions
    #[error("permission fetch failed: {0}")]
    PermissionFetchFailed(String),

    /// Tenant list retrieval failed (distinct from "zero tenants")
    #[error("tenant list load failed: {0}")]
    LoadFailed(String),

    /// Hard session-load ceiling exceeded
    #[error("session load timed out")]
    LoadTimeout,
}
