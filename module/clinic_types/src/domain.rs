//! Core domain entities shared across the clinic backend's security,
//! tenancy and billing subsystems.
//!
//! These types carry their own invariants rather than leaving them to be
//! re-checked by every caller: a [`Tenant`] cannot be pushed over its user
//! limit, a [`SubscriptionBlock`]'s external subscription id cannot be
//! silently overwritten once set.

use crate::error::{ CoreError, CoreResult };
use crate::ids::{ PaymentId, PermissionId, PlanId, PrincipalId, ResourceId, RoleId, TenantId };
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::collections::{ HashMap, HashSet };

/// Which side of the product a [`Principal`] authenticates to: a clinic
/// staff member using the admin console, or a pet owner using the mobile
/// app. The owner-guard middleware (spec §4.2) checks this field.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum PrincipalKind
{
  Staff,
  Owner,
}

/// A staff user or a pet owner authenticated against the system.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Principal
{
  pub id: PrincipalId,
  pub display_name: String,
  pub email: String,
  pub hashed_secret: String,
  pub kind: PrincipalKind,
  pub is_super_admin: bool,
  pub tenant_ids: HashSet< TenantId >,
  pub role_ids: HashSet< RoleId >,
  pub created_at: DateTime< Utc >,
  pub deleted_at: Option< DateTime< Utc > >,
}

impl Principal
{
  /// A principal is active if it hasn't been soft-deleted.
  #[must_use]
  pub fn is_active( &self ) -> bool
  {
    self.deleted_at.is_none()
  }

  /// A super-admin must carry no tenant scoping; a regular principal must
  /// belong to at least one tenant. Checked at construction and whenever
  /// tenant membership changes.
  pub fn validate_tenant_scoping( &self ) -> CoreResult< () >
  {
    if self.is_super_admin
    {
      if !self.tenant_ids.is_empty()
      {
        return Err( CoreError::InvalidInput( "super-admin principals must not be tenant-scoped".into() ) );
      }
    }
    else if self.tenant_ids.is_empty()
    {
      return Err( CoreError::InvalidInput( "non-super-admin principals require at least one tenant".into() ) );
    }
    Ok( () )
  }
}

/// Lifecycle status of a tenant clinic.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum TenantStatus
{
  Trial,
  Active,
  Suspended,
  Inactive,
}

/// Billing status of a tenant's subscription block.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum BillingStatus
{
  Trial,
  Pending,
  Active,
  PastDue,
  Canceled,
}

impl BillingStatus
{
  /// The legal transitions a webhook or subscribe call may apply, per
  /// the subscription state machine. `from == to` is always legal (the
  /// webhook handler treats it as a no-op, not an error).
  #[must_use]
  pub fn can_transition_to( self, to: Self ) -> bool
  {
    if self == to
    {
      return true;
    }
    matches!
    (
      ( self, to ),
      ( Self::Trial, Self::Pending )
        | ( Self::Pending, Self::Active )
        | ( Self::Pending, Self::Canceled )
        | ( Self::Active, Self::Canceled )
        | ( Self::Active, Self::PastDue )
    )
  }
}

/// Subscription block embedded in a [`Tenant`].
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct SubscriptionBlock
{
  pub plan_id: Option< PlanId >,
  pub provider: Option< String >,
  external_subscription_id: Option< String >,
  pub billing_status: BillingStatus,
  pub trial_ends_at: Option< DateTime< Utc > >,
  pub subscription_ends_at: Option< DateTime< Utc > >,
  pub mrr_minor_units: i64,
}

impl SubscriptionBlock
{
  /// A new tenant starts in trial with no plan and no provider handle.
  #[must_use]
  pub fn new_trial( trial_ends_at: DateTime< Utc > ) -> Self
  {
    Self
    {
      plan_id: None,
      provider: None,
      external_subscription_id: None,
      billing_status: BillingStatus::Trial,
      trial_ends_at: Some( trial_ends_at ),
      subscription_ends_at: None,
      mrr_minor_units: 0,
    }
  }

  #[must_use]
  pub fn external_subscription_id( &self ) -> Option< &str >
  {
    self.external_subscription_id.as_deref()
  }

  /// Set the correlation handle used to match inbound webhooks back to
  /// this tenant. This is the only way to set it: once `Some`, any
  /// further attempt to set it (even to the same value) is a conflict —
  /// it is an immutable correlation handle for the lifetime of the
  /// subscription.
  pub fn set_external_subscription_id_once( &mut self, id: impl Into< String > ) -> CoreResult< () >
  {
    if self.external_subscription_id.is_some()
    {
      return Err( CoreError::Conflict( "external subscription id already set".into() ) );
    }
    self.external_subscription_id = Some( id.into() );
    Ok( () )
  }

  /// Apply a new billing status, enforcing the state machine's legal
  /// transitions. Returns `Ok(false)` on a same-state no-op, `Ok(true)`
  /// when the state actually advanced.
  pub fn apply_billing_status( &mut self, to: BillingStatus ) -> CoreResult< bool >
  {
    if !self.billing_status.can_transition_to( to )
    {
      return Err( CoreError::Conflict( format!(
        "illegal billing status transition {:?} -> {:?}",
        self.billing_status, to
      ) ) );
    }
    if self.billing_status == to
    {
      return Ok( false );
    }
    self.billing_status = to;
    Ok( true )
  }
}

/// Usage block embedded in a [`Tenant`], tracking consumption against plan limits.
#[derive( Debug, Clone, Copy, Serialize, Deserialize )]
pub struct UsageBlock
{
  pub users_count: u32,
  pub users_limit: u32,
  pub branches_count: u32,
  pub branches_limit: u32,
  pub storage_used_mb: u64,
  pub storage_limit_mb: u64,
}

impl UsageBlock
{
  #[must_use]
  pub fn trial_default() -> Self
  {
    Self
    {
      users_count: 0,
      users_limit: 3,
      branches_count: 0,
      branches_limit: 1,
      storage_used_mb: 0,
      storage_limit_mb: 1024,
    }
  }
}

/// Contact details for a tenant clinic.
#[derive( Debug, Clone, Default, Serialize, Deserialize )]
pub struct ContactBlock
{
  pub email: Option< String >,
  pub phone: Option< String >,
  pub address: Option< String >,
}

/// A clinic tenant.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Tenant
{
  pub id: TenantId,
  pub owner_principal_id: PrincipalId,
  pub display_name: String,
  pub legal_name: String,
  pub contact: ContactBlock,
  pub timezone: String,
  pub currency: String,
  pub domain: Option< String >,
  pub subscription: SubscriptionBlock,
  pub usage: UsageBlock,
  pub status: TenantStatus,
  pub created_at: DateTime< Utc >,
  pub deleted_at: Option< DateTime< Utc > >,
}

impl Tenant
{
  /// Attach one more user to this tenant, enforcing `usersCount ≤ usersLimit`.
  pub fn attach_user( &mut self ) -> CoreResult< () >
  {
    if self.usage.users_count + 1 > self.usage.users_limit
    {
      return Err( CoreError::Conflict( format!(
        "user limit reached ({}/{})",
        self.usage.users_count, self.usage.users_limit
      ) ) );
    }
    self.usage.users_count += 1;
    Ok( () )
  }

  /// Whether this tenant may currently be served (not soft-deleted, not suspended).
  #[must_use]
  pub fn is_usable( &self ) -> bool
  {
    self.deleted_at.is_none() && self.status != TenantStatus::Suspended
  }
}

/// A subscription plan a tenant may subscribe to.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Plan
{
  pub id: PlanId,
  pub display_name: String,
  pub monthly_price_minor: i64,
  pub annual_price_minor: i64,
  pub currency: String,
  pub users_limit: u32,
  pub branches_limit: u32,
  pub storage_limit_mb: u64,
  pub features: Vec< String >,
  pub is_visible: bool,
}

/// A named protected thing in the system, scoped to a tenant.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Resource
{
  pub id: ResourceId,
  pub tenant_id: TenantId,
  pub name: String,
  pub deleted_at: Option< DateTime< Utc > >,
}

/// The closed set of actions a [`Permission`] may grant.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Action
{
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Action
{
  /// Parse an HTTP method name into an [`Action`]. Returns `None` for
  /// methods outside the closed action set (e.g. `HEAD`, `OPTIONS`) —
  /// per spec, the RBAC engine defers rather than erroring on these.
  #[must_use]
  pub fn from_method( method: &str ) -> Option< Self >
  {
    match method.to_ascii_lowercase().as_str()
    {
      "get" => Some( Self::Get ),
      "post" => Some( Self::Post ),
      "put" => Some( Self::Put ),
      "patch" => Some( Self::Patch ),
      "delete" => Some( Self::Delete ),
      _ => None,
    }
  }
}

/// A (tenant, resource, action) authorization tuple.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Permission
{
  pub id: PermissionId,
  pub tenant_id: TenantId,
  pub resource_id: ResourceId,
  pub action: Action,
  pub deleted_at: Option< DateTime< Utc > >,
}

/// A named bundle of permissions and resources, scoped to a tenant.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Role
{
  pub id: RoleId,
  pub tenant_id: TenantId,
  pub name: String,
  pub permission_ids: HashSet< PermissionId >,
  pub resource_ids: HashSet< ResourceId >,
  pub deleted_at: Option< DateTime< Utc > >,
}

/// Status of a payment row as tracked through the webhook state machine.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum PaymentStatus
{
  Pending,
  Completed,
  Failed,
  Refunded,
}

/// A payment/checkout row, created pending and updated by webhook events.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Payment
{
  pub id: PaymentId,
  pub tenant_id: TenantId,
  pub plan_id: PlanId,
  pub amount_minor: i64,
  pub currency: String,
  pub provider: String,
  pub status: PaymentStatus,
  pub external_transaction_id: Option< String >,
  pub failure_reason: Option< String >,
  pub metadata: HashMap< String, serde_json::Value >,
  pub created_at: DateTime< Utc >,
  pub updated_at: DateTime< Utc >,
}

/// Kind of a sensitive lifecycle event recorded in the audit log.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum AuditEventKind
{
  TenantCreated,
  TenantSubscriptionInitiated,
  TenantSubscriptionActivated,
  TenantSubscriptionCanceled,
  TenantSubscriptionPastDue,
  RoleAssigned,
  RoleRevoked,
  RoleMutated,
  PermissionMutated,
}

/// An append-only audit log entry.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct AuditEvent
{
  pub id: crate::ids::AuditEventId,
  pub tenant_id: Option< TenantId >,
  pub actor_id: Option< PrincipalId >,
  pub event_kind: AuditEventKind,
  pub action: String,
  pub description: String,
  pub metadata: HashMap< String, serde_json::Value >,
  pub timestamp: DateTime< Utc >,
}

#[cfg( test )]
mod tests
{
  use super::*;

  fn sample_tenant() -> Tenant
  {
    Tenant
    {
      id: TenantId::generate(),
      owner_principal_id: PrincipalId::generate(),
      display_name: "Clinica Feliz".into(),
      legal_name: "Clinica Feliz SAS".into(),
      contact: ContactBlock::default(),
      timezone: "America/Bogota".into(),
      currency: "COP".into(),
      domain: None,
      subscription: SubscriptionBlock::new_trial( Utc::now() ),
      usage: UsageBlock { users_count: 0, users_limit: 1, ..UsageBlock::trial_default() },
      status: TenantStatus::Trial,
      created_at: Utc::now(),
      deleted_at: None,
    }
  }

  #[test]
  fn attach_user_rejects_over_limit()
  {
    let mut tenant = sample_tenant();
    tenant.attach_user().unwrap();
    let err = tenant.attach_user().unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }

  #[test]
  fn external_subscription_id_cannot_be_set_twice()
  {
    let mut sub = SubscriptionBlock::new_trial( Utc::now() );
    sub.set_external_subscription_id_once( "wompi_abc123" ).unwrap();
    let err = sub.set_external_subscription_id_once( "wompi_other" ).unwrap_err();
    assert!( matches!( err, CoreError::Conflict( .. ) ) );
    assert_eq!( sub.external_subscription_id(), Some( "wompi_abc123" ) );
  }

  #[test]
  fn billing_status_transitions_follow_the_state_machine()
  {
    assert!( BillingStatus::Trial.can_transition_to( BillingStatus::Pending ) );
    assert!( BillingStatus::Pending.can_transition_to( BillingStatus::Active ) );
    assert!( BillingStatus::Active.can_transition_to( BillingStatus::Canceled ) );
    assert!( BillingStatus::Active.can_transition_to( BillingStatus::PastDue ) );
    assert!( !BillingStatus::Trial.can_transition_to( BillingStatus::Active ) );
    assert!( !BillingStatus::Canceled.can_transition_to( BillingStatus::Active ) );
  }

  #[test]
  fn same_state_transition_is_a_noop_not_an_error()
  {
    let mut sub = SubscriptionBlock::new_trial( Utc::now() );
    let advanced = sub.apply_billing_status( BillingStatus::Trial ).unwrap();
    assert!( !advanced );
  }

  #[test]
  fn super_admin_must_have_no_tenants()
  {
    let principal = Principal
    {
      id: PrincipalId::generate(),
      display_name: "root".into(),
      email: "root@example.com".into(),
      hashed_secret: "x".into(),
      kind: PrincipalKind::Staff,
      is_super_admin: true,
      tenant_ids: HashSet::from( [ TenantId::generate() ] ),
      role_ids: HashSet::new(),
      created_at: Utc::now(),
      deleted_at: None,
    };
    assert!( principal.validate_tenant_scoping().is_err() );
  }

  #[test]
  fn action_from_method_defers_on_unsupported_verbs()
  {
    assert_eq!( Action::from_method( "GET" ), Some( Action::Get ) );
    assert_eq!( Action::from_method( "HEAD" ), None );
  }
}
