//! Persistence layer for the clinic core.
//!
//! Every tenant-scoped repository method takes `tenant_id: &TenantId` as a
//! mandatory first parameter so the property "every query for a
//! tenant-scoped entity includes `tenantId` in its filter" is a type
//! signature, not a convention callers have to remember (spec §4.2, §8).
//!
//! Open-ended fields (`metadata`, `features`, id sets) are stored as JSON
//! columns — the idiomatic middle ground between the source system's
//! document store and this crate's relational `sqlx` stack (design note,
//! SPEC_FULL §2.4). Soft-delete is a `deleted_at` timestamp column and every
//! uniqueness index carries a `WHERE deleted_at IS NULL` predicate.

pub mod audit_repo;
pub mod migrations;
pub mod payment_repo;
pub mod permission_repo;
pub mod plan_repo;
pub mod principal_repo;
pub mod resource_repo;
pub mod role_repo;
pub mod seen_event_repo;
pub mod tenant_repo;

pub use migrations::apply_all_migrations;
