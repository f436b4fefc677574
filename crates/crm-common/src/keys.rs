//! Permission and section key catalogs
//!
//! The catalogs are the closed universe the permission resolver enumerates
//! when a coarse role (owner/admin) bypasses per-key resolution: a bypass
//! produces a full map over these keys, not a wildcard.

/// Fine-grained permission keys
pub const PERMISSION_KEYS: &[&str] = &[
    "contacts.view",
    "contacts.edit",
    "contacts.delete",
    "leads.view",
    "leads.edit",
    "pipelines.view",
    "pipelines.edit",
    "campaigns.view",
    "campaigns.send",
    "reports.view",
    "team.manage",
    "roles.manage",
    "settings.manage",
    "billing.manage",
];

/// The designated billing-management key.
///
/// Admins resolve every permission key true except this one.
pub const PERM_BILLING_MANAGE: &str = "billing.manage";

/// Page-level section keys
pub const SECTION_KEYS: &[&str] = &[
    "dashboard",
    "contacts",
    "pipelines",
    "campaigns",
    "reports",
    "settings",
    "billing",
];

/// The billing section; gated for admins the same way [`PERM_BILLING_MANAGE`] is.
pub const SECTION_BILLING: &str = "billing";

/// Whether `key` is a known permission key
pub fn is_permission_key(key: &str) -> bool {
    PERMISSION_KEYS.contains(&key)
}

/// Whether `key` is a known section key
pub fn is_section_key(key: &str) -> bool {
    SECTION_KEYS.contains(&key)
}
