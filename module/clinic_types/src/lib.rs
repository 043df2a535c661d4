//! Shared domain types for the clinic core
//!
//! This crate provides the foundational types used across every clinic
//! module: validated entity identifiers ([`ids`]), the domain entities
//! themselves ([`domain`]), and the closed error taxonomy ([`error`]) that
//! every fallible operation in the workspace resolves to.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod ids;

#[cfg(feature = "enabled")]
pub mod domain;

#[cfg(feature = "enabled")]
pub mod error;

#[cfg(feature = "enabled")]
pub use domain::*;
#[cfg(feature = "enabled")]
pub use error::{ CoreError, CoreResult, ErrorBody };
#[cfg(feature = "enabled")]
pub use ids::{
  AuditEventId, IdError, PaymentId, PermissionId, PlanId, PrincipalId, ResourceId, RoleId, TenantId,
};
