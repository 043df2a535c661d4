//! HTTP surface for the clinic core.
//!
//! This crate owns none of the domain logic — authorization lives in
//! [`clinic_rbac`], tenant scoping and rate limiting in [`clinic_tenancy`],
//! the subscription/webhook state machine in [`clinic_billing`]. What
//! lives here is the axum wiring that turns an inbound request into the
//! arguments those crates expect: bearer-credential authentication,
//! resource-name/action derivation from the route, the response envelope,
//! and the two routes spec §6 actually describes (subscribe, webhook).
//! Ordinary per-entity CRUD (patients, appointments, owners) is explicitly
//! out of scope (spec §1) and is not reproduced here.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod auth;

#[cfg(feature = "enabled")]
pub mod envelope;

#[cfg(feature = "enabled")]
pub mod rbac_middleware;

#[cfg(feature = "enabled")]
pub mod routes;

#[cfg(feature = "enabled")]
pub mod server;

#[cfg(feature = "enabled")]
pub use server::{ build_router, AppState };
