//! Repository for [`Tenant`] rows, including the embedded subscription and
//! usage blocks.

use chrono::{ DateTime, Utc };
use clinic_types::{
  BillingStatus, ContactBlock, CoreError, CoreResult, PlanId, PrincipalId, SubscriptionBlock,
  Tenant, TenantId, TenantStatus, UsageBlock,
};
use sqlx::{ FromRow, Row, SqlitePool };

#[derive( FromRow )]
struct TenantRow
{
  id: String,
  owner_principal_id: String,
  display_name: String,
  legal_name: String,
  contact_email: Option< String >,
  contact_phone: Option< String >,
  contact_address: Option< String >,
  timezone: String,
  currency: String,
  domain: Option< String >,
  sub_plan_id: Option< String >,
  sub_provider: Option< String >,
  sub_external_subscription_id: Option< String >,
  sub_billing_status: String,
  sub_trial_ends_at: Option< String >,
  sub_subscription_ends_at: Option< String >,
  sub_mrr_minor_units: i64,
  usage_users_count: i64,
  usage_users_limit: i64,
  usage_branches_count: i64,
  usage_branches_limit: i64,
  usage_storage_used_mb: i64,
  usage_storage_limit_mb: i64,
  status: String,
  created_at: String,
  deleted_at: Option< String >,
}

fn parse_billing_status( s: &str ) -> CoreResult< BillingStatus >
{
  match s
  {
    "trial" => Ok( BillingStatus::Trial ),
    "pending" => Ok( BillingStatus::Pending ),
    "active" => Ok( BillingStatus::Active ),
    "past_due" => Ok( BillingStatus::PastDue ),
    "canceled" => Ok( BillingStatus::Canceled ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown billing status '{other}'" ) ) ),
  }
}

fn billing_status_str( status: BillingStatus ) -> &'static str
{
  match status
  {
    BillingStatus::Trial => "trial",
    BillingStatus::Pending => "pending",
    BillingStatus::Active => "active",
    BillingStatus::PastDue => "past_due",
    BillingStatus::Canceled => "canceled",
  }
}

fn parse_tenant_status( s: &str ) -> CoreResult< TenantStatus >
{
  match s
  {
    "trial" => Ok( TenantStatus::Trial ),
    "active" => Ok( TenantStatus::Active ),
    "suspended" => Ok( TenantStatus::Suspended ),
    "inactive" => Ok( TenantStatus::Inactive ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown tenant status '{other}'" ) ) ),
  }
}

fn tenant_status_str( status: TenantStatus ) -> &'static str
{
  match status
  {
    TenantStatus::Trial => "trial",
    TenantStatus::Active => "active",
    TenantStatus::Suspended => "suspended",
    TenantStatus::Inactive => "inactive",
  }
}

fn parse_dt( s: &str ) -> CoreResult< DateTime< Utc > >
{
  s.parse().map_err( | e | CoreError::internal( anyhow::anyhow!( "{e}" ) ) )
}

impl TenantRow
{
  fn into_domain( self ) -> CoreResult< Tenant >
  {
    let mut subscription = SubscriptionBlock::new_trial( Utc::now() );
    if let Some( ref ext ) = self.sub_external_subscription_id
    {
      subscription.set_external_subscription_id_once( ext.clone() )?;
    }
    subscription.plan_id = self.sub_plan_id.map( | s | PlanId::parse( &s ) ).transpose()?;
    subscription.provider = self.sub_provider;
    subscription.billing_status = parse_billing_status( &self.sub_billing_status )?;
    subscription.trial_ends_at = self.sub_trial_ends_at.map( | s | parse_dt( &s ) ).transpose()?;
    subscription.subscription_ends_at = self.sub_subscription_ends_at.map( | s | parse_dt( &s ) ).transpose()?;
    subscription.mrr_minor_units = self.sub_mrr_minor_units;

    Ok( Tenant
    {
      id: TenantId::parse( &self.id )?,
      owner_principal_id: PrincipalId::parse( &self.owner_principal_id )?,
      display_name: self.display_name,
      legal_name: self.legal_name,
      contact: ContactBlock
      {
        email: self.contact_email,
        phone: self.contact_phone,
        address: self.contact_address,
      },
      timezone: self.timezone,
      currency: self.currency,
      domain: self.domain,
      subscription,
      usage: UsageBlock
      {
        users_count: self.usage_users_count as u32,
        users_limit: self.usage_users_limit as u32,
        branches_count: self.usage_branches_count as u32,
        branches_limit: self.usage_branches_limit as u32,
        storage_used_mb: self.usage_storage_used_mb as u64,
        storage_limit_mb: self.usage_storage_limit_mb as u64,
      },
      status: parse_tenant_status( &self.status )?,
      created_at: parse_dt( &self.created_at )?,
      deleted_at: self.deleted_at.map( | s | parse_dt( &s ) ).transpose()?,
    } )
  }
}

const SELECT_COLUMNS: &str = "id, owner_principal_id, display_name, legal_name, contact_email, \
  contact_phone, contact_address, timezone, currency, domain, sub_plan_id, sub_provider, \
  sub_external_subscription_id, sub_billing_status, sub_trial_ends_at, sub_subscription_ends_at, \
  sub_mrr_minor_units, usage_users_count, usage_users_limit, usage_branches_count, \
  usage_branches_limit, usage_storage_used_mb, usage_storage_limit_mb, status, created_at, deleted_at";

/// Insert a new tenant, created in `trial` status per lifecycle (spec §3).
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if `domain` is already taken.
pub async fn create( pool: &SqlitePool, tenant: &Tenant ) -> CoreResult< () >
{
  sqlx::query(
    "INSERT INTO tenants
      ( id, owner_principal_id, display_name, legal_name, contact_email, contact_phone,
        contact_address, timezone, currency, domain, sub_plan_id, sub_provider,
        sub_external_subscription_id, sub_billing_status, sub_trial_ends_at,
        sub_subscription_ends_at, sub_mrr_minor_units, usage_users_count, usage_users_limit,
        usage_branches_count, usage_branches_limit, usage_storage_used_mb, usage_storage_limit_mb,
        status, created_at, deleted_at )
     VALUES ( ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? )"
  )
  .bind( tenant.id.as_str() )
  .bind( tenant.owner_principal_id.as_str() )
  .bind( &tenant.display_name )
  .bind( &tenant.legal_name )
  .bind( &tenant.contact.email )
  .bind( &tenant.contact.phone )
  .bind( &tenant.contact.address )
  .bind( &tenant.timezone )
  .bind( &tenant.currency )
  .bind( &tenant.domain )
  .bind( tenant.subscription.plan_id.as_ref().map( clinic_types::PlanId::as_str ) )
  .bind( &tenant.subscription.provider )
  .bind( tenant.subscription.external_subscription_id() )
  .bind( billing_status_str( tenant.subscription.billing_status ) )
  .bind( tenant.subscription.trial_ends_at.map( | t | t.to_rfc3339() ) )
  .bind( tenant.subscription.subscription_ends_at.map( | t | t.to_rfc3339() ) )
  .bind( tenant.subscription.mrr_minor_units )
  .bind( i64::from( tenant.usage.users_count ) )
  .bind( i64::from( tenant.usage.users_limit ) )
  .bind( i64::from( tenant.usage.branches_count ) )
  .bind( i64::from( tenant.usage.branches_limit ) )
  .bind( tenant.usage.storage_used_mb as i64 )
  .bind( tenant.usage.storage_limit_mb as i64 )
  .bind( tenant_status_str( tenant.status ) )
  .bind( tenant.created_at.to_rfc3339() )
  .bind( tenant.deleted_at.map( | t | t.to_rfc3339() ) )
  .execute( pool )
  .await
  .map_err( | e | match e
  {
    sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
      CoreError::Conflict( "tenant domain or external subscription id already in use".into() ),
    other => other.into(),
  } )?;

  Ok( () )
}

/// Find a tenant by id (soft-deleted tenants are invisible).
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_id( pool: &SqlitePool, id: &TenantId ) -> CoreResult< Option< Tenant > >
{
  let row: Option< TenantRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM tenants WHERE id = ? AND deleted_at IS NULL" )
  )
  .bind( id.as_str() )
  .fetch_optional( pool )
  .await?;

  row.map( TenantRow::into_domain ).transpose()
}

/// Find the tenant owning the given external subscription id — the
/// correlation key used by webhook ingress (spec §4.4 step 4).
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_external_subscription_id(
  pool: &SqlitePool,
  external_subscription_id: &str,
) -> CoreResult< Option< Tenant > >
{
  let row: Option< TenantRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM tenants WHERE sub_external_subscription_id = ?" )
  )
  .bind( external_subscription_id )
  .fetch_optional( pool )
  .await?;

  row.map( TenantRow::into_domain ).transpose()
}

/// Atomically set the subscription fields written by a successful
/// `subscribe` call (spec §4.4 step 5): `planId`, provider,
/// `externalSubscriptionId`, `billingStatus = pending`,
/// `subscriptionEndsAt`, `mrr`. Conditioned on the subscription still being
/// in `trial` so a retried `subscribe` after a crash cannot double-apply.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if the tenant is no longer in `trial`
/// billing status (a concurrent subscribe already claimed it) or the
/// external subscription id collides with another tenant.
pub async fn write_subscribe_result(
  pool: &SqlitePool,
  tenant_id: &TenantId,
  plan_id: &PlanId,
  provider: &str,
  external_subscription_id: &str,
  subscription_ends_at: DateTime< Utc >,
  mrr_minor_units: i64,
) -> CoreResult< () >
{
  let result = sqlx::query(
    "UPDATE tenants
     SET sub_plan_id = ?, sub_provider = ?, sub_external_subscription_id = ?,
         sub_billing_status = 'pending', sub_subscription_ends_at = ?, sub_mrr_minor_units = ?
     WHERE id = ? AND sub_billing_status = 'trial' AND deleted_at IS NULL"
  )
  .bind( plan_id.as_str() )
  .bind( provider )
  .bind( external_subscription_id )
  .bind( subscription_ends_at.to_rfc3339() )
  .bind( mrr_minor_units )
  .bind( tenant_id.as_str() )
  .execute( pool )
  .await
  .map_err( | e | match e
  {
    sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
      CoreError::Conflict( "external subscription id already in use".into() ),
    other => other.into(),
  } )?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::Conflict( "tenant is not eligible to subscribe from its current state".into() ) );
  }
  Ok( () )
}

/// Apply a webhook-driven billing status transition, conditioned on the
/// tenant's *current* status so a reordered delivery can never regress
/// state (spec §5, §9). Returns `Ok(false)` if the row was already in the
/// target status (no-op, not an error) and `Ok(true)` if it actually moved.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the tenant does not exist, or
/// [`CoreError::Conflict`] if the transition from the tenant's current
/// status is illegal.
pub async fn apply_billing_transition(
  pool: &SqlitePool,
  tenant_id: &TenantId,
  from: BillingStatus,
  to: BillingStatus,
  plan_limits: Option< ( u32, u32, u64 ) >,
) -> CoreResult< bool >
{
  if !from.can_transition_to( to )
  {
    return Err( CoreError::Conflict( format!( "illegal transition {from:?} -> {to:?}" ) ) );
  }

  let current: Option< String > = sqlx::query_scalar(
    "SELECT sub_billing_status FROM tenants WHERE id = ? AND deleted_at IS NULL"
  )
  .bind( tenant_id.as_str() )
  .fetch_optional( pool )
  .await?;

  let Some( current ) = current else
  {
    return Err( CoreError::NotFound( format!( "tenant {tenant_id} not found" ) ) );
  };
  let current = parse_billing_status( &current )?;

  if current == to
  {
    return Ok( false );
  }
  if current != from
  {
    // Already moved past `from` by a concurrently-applied later event;
    // treat as a reordered duplicate delivery, not an error.
    return Ok( false );
  }

  let mut tx = pool.begin().await?;

  if let Some( ( users_limit, branches_limit, storage_limit_mb ) ) = plan_limits
  {
    sqlx::query(
      "UPDATE tenants SET sub_billing_status = ?, usage_users_limit = ?, usage_branches_limit = ?, \
       usage_storage_limit_mb = ?, status = CASE WHEN ? = 'active' THEN 'active' ELSE status END \
       WHERE id = ? AND sub_billing_status = ?"
    )
    .bind( billing_status_str( to ) )
    .bind( i64::from( users_limit ) )
    .bind( i64::from( branches_limit ) )
    .bind( storage_limit_mb as i64 )
    .bind( billing_status_str( to ) )
    .bind( tenant_id.as_str() )
    .bind( billing_status_str( from ) )
    .execute( &mut *tx )
    .await?;
  }
  else
  {
    let new_status = if to == BillingStatus::Canceled { Some( "suspended" ) } else { None };
    sqlx::query(
      "UPDATE tenants SET sub_billing_status = ?, status = COALESCE(?, status) \
       WHERE id = ? AND sub_billing_status = ?"
    )
    .bind( billing_status_str( to ) )
    .bind( new_status )
    .bind( tenant_id.as_str() )
    .bind( billing_status_str( from ) )
    .execute( &mut *tx )
    .await?;
  }

  tx.commit().await?;
  Ok( true )
}

/// Attach one more user to the tenant, enforcing `usersCount <= usersLimit`
/// (spec §3 invariant) with a single conditional `UPDATE`.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if the tenant is already at its user
/// limit, or [`CoreError::NotFound`] if the tenant does not exist.
pub async fn attach_user( pool: &SqlitePool, tenant_id: &TenantId ) -> CoreResult< () >
{
  let result = sqlx::query(
    "UPDATE tenants SET usage_users_count = usage_users_count + 1
     WHERE id = ? AND deleted_at IS NULL AND usage_users_count < usage_users_limit"
  )
  .bind( tenant_id.as_str() )
  .execute( pool )
  .await?;

  if result.rows_affected() == 1
  {
    return Ok( () );
  }

  let exists: Option< i64 > = sqlx::query_scalar( "SELECT 1 FROM tenants WHERE id = ? AND deleted_at IS NULL" )
    .bind( tenant_id.as_str() )
    .fetch_optional( pool )
    .await?;

  match exists
  {
    Some( _ ) => Err( CoreError::Conflict( "tenant user limit reached".into() ) ),
    None => Err( CoreError::NotFound( format!( "tenant {tenant_id} not found" ) ) ),
  }
}

/// List tenant ids, used by the rate-limiter sweep test and admin tooling.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_ids( pool: &SqlitePool ) -> CoreResult< Vec< TenantId > >
{
  let rows = sqlx::query( "SELECT id FROM tenants WHERE deleted_at IS NULL" )
    .fetch_all( pool )
    .await?;

  rows.iter().map( | row | TenantId::parse( row.get::< String, _ >( "id" ) ).map_err( CoreError::from ) ).collect()
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;
  use std::collections::HashSet;

  fn sample() -> Tenant
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
      usage: UsageBlock { users_count: 0, users_limit: 3, ..UsageBlock::trial_default() },
      status: TenantStatus::Trial,
      created_at: Utc::now(),
      deleted_at: None,
    }
  }

  #[tokio::test]
  async fn create_and_find_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = sample();
    create( db.pool(), &tenant ).await.unwrap();

    let found = find_by_id( db.pool(), &tenant.id ).await.unwrap().unwrap();
    assert_eq!( found.display_name, tenant.display_name );
    assert_eq!( found.subscription.billing_status, BillingStatus::Trial );
  }

  #[tokio::test]
  async fn subscribe_then_lookup_by_external_id()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = sample();
    create( db.pool(), &tenant ).await.unwrap();

    let plan_id = PlanId::generate();
    write_subscribe_result( db.pool(), &tenant.id, &plan_id, "wompi", "wompi_ext_1", Utc::now(), 490_000 )
      .await
      .unwrap();

    let found = find_by_external_subscription_id( db.pool(), "wompi_ext_1" ).await.unwrap().unwrap();
    assert_eq!( found.id, tenant.id );
    assert_eq!( found.subscription.billing_status, BillingStatus::Pending );
  }

  #[tokio::test]
  async fn subscribe_twice_conflicts()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = sample();
    create( db.pool(), &tenant ).await.unwrap();

    let plan_id = PlanId::generate();
    write_subscribe_result( db.pool(), &tenant.id, &plan_id, "wompi", "wompi_ext_2", Utc::now(), 1 )
      .await
      .unwrap();

    let err = write_subscribe_result( db.pool(), &tenant.id, &plan_id, "wompi", "wompi_ext_3", Utc::now(), 1 )
      .await
      .unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }

  #[tokio::test]
  async fn billing_transition_is_noop_when_already_applied()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = sample();
    create( db.pool(), &tenant ).await.unwrap();
    let plan_id = PlanId::generate();
    write_subscribe_result( db.pool(), &tenant.id, &plan_id, "wompi", "wompi_ext_4", Utc::now(), 1 )
      .await
      .unwrap();

    let advanced = apply_billing_transition(
      db.pool(), &tenant.id, BillingStatus::Pending, BillingStatus::Active, Some( ( 10, 2, 2048 ) )
    ).await.unwrap();
    assert!( advanced );

    // Replay of the same webhook: current status is already `active`, so
    // re-applying `pending -> active` is a no-op, not an error.
    let advanced_again = apply_billing_transition(
      db.pool(), &tenant.id, BillingStatus::Pending, BillingStatus::Active, Some( ( 10, 2, 2048 ) )
    ).await.unwrap();
    assert!( !advanced_again );
  }

  #[tokio::test]
  async fn attach_user_rejects_over_limit()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let mut tenant = sample();
    tenant.usage.users_limit = 1;
    create( db.pool(), &tenant ).await.unwrap();

    attach_user( db.pool(), &tenant.id ).await.unwrap();
    let err = attach_user( db.pool(), &tenant.id ).await.unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }

  #[tokio::test]
  async fn list_ids_excludes_nothing_for_fresh_tenants()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = sample();
    create( db.pool(), &tenant ).await.unwrap();

    let ids = list_ids( db.pool() ).await.unwrap();
    assert!( ids.contains( &tenant.id ) );
  }

  #[allow( dead_code )]
  fn unused_import_guard( _: HashSet< TenantId > ) {}
}
