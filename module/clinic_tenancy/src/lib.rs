//! Tenant scoping and hierarchical rate limiting (spec §4.2, §4.3).
//!
//! Three independent axum middlewares, meant to be layered in this order
//! on tenant-scoped routes: [`tenant_id::require_tenant_id`] (resolves and
//! validates `X-Tenant-ID`), then a rate-limit check against
//! [`rate_limit::HierarchicalRateLimiter`], then (mobile routes only)
//! [`owner_guard::require_owner`].

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod owner_guard;

#[cfg(feature = "enabled")]
pub mod rate_limit;

#[cfg(feature = "enabled")]
pub mod tenant_id;
