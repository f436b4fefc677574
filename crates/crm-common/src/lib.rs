//! OpenCRM Common - Shared types for the multi-tenant CRM core
//!
//! This crate provides the primitives every other crate agrees on:
//! - Identifier types (tenants, users, execution contexts)
//! - The canonical permission-key and section-key catalogs

#![warn(missing_docs)]

pub mod ids;
pub mod keys;

pub use ids::*;
pub use keys::*;
