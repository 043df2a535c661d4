//! Repository for [`Plan`] rows. Plans are global (not tenant-scoped).

use clinic_types::{ CoreError, CoreResult, Plan, PlanId };
use sqlx::{ FromRow, SqlitePool };

#[derive( FromRow )]
struct PlanRow
{
  id: String,
  display_name: String,
  monthly_price_minor: i64,
  annual_price_minor: i64,
  currency: String,
  users_limit: i64,
  branches_limit: i64,
  storage_limit_mb: i64,
  features: String,
  is_visible: i64,
}

impl PlanRow
{
  fn into_domain( self ) -> CoreResult< Plan >
  {
    let features: Vec< String > = serde_json::from_str( &self.features ).map_err( CoreError::internal )?;

    Ok( Plan
    {
      id: PlanId::parse( &self.id )?,
      display_name: self.display_name,
      monthly_price_minor: self.monthly_price_minor,
      annual_price_minor: self.annual_price_minor,
      currency: self.currency,
      users_limit: self.users_limit as u32,
      branches_limit: self.branches_limit as u32,
      storage_limit_mb: self.storage_limit_mb as u64,
      features,
      is_visible: self.is_visible != 0,
    } )
  }
}

const SELECT_COLUMNS: &str = "id, display_name, monthly_price_minor, annual_price_minor, currency, \
  users_limit, branches_limit, storage_limit_mb, features, is_visible";

/// Insert or replace a plan. Plans are managed by operators, not tenants,
/// so there is no soft-delete — an invisible plan is simply `is_visible = false`.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn upsert( pool: &SqlitePool, plan: &Plan ) -> CoreResult< () >
{
  sqlx::query(
    "INSERT INTO plans ( id, display_name, monthly_price_minor, annual_price_minor, currency, \
     users_limit, branches_limit, storage_limit_mb, features, is_visible )
     VALUES ( ?, ?, ?, ?, ?, ?, ?, ?, ?, ? )
     ON CONFLICT( id ) DO UPDATE SET
       display_name = excluded.display_name,
       monthly_price_minor = excluded.monthly_price_minor,
       annual_price_minor = excluded.annual_price_minor,
       currency = excluded.currency,
       users_limit = excluded.users_limit,
       branches_limit = excluded.branches_limit,
       storage_limit_mb = excluded.storage_limit_mb,
       features = excluded.features,
       is_visible = excluded.is_visible"
  )
  .bind( plan.id.as_str() )
  .bind( &plan.display_name )
  .bind( plan.monthly_price_minor )
  .bind( plan.annual_price_minor )
  .bind( &plan.currency )
  .bind( i64::from( plan.users_limit ) )
  .bind( i64::from( plan.branches_limit ) )
  .bind( plan.storage_limit_mb as i64 )
  .bind( serde_json::to_string( &plan.features ).unwrap() )
  .bind( i64::from( plan.is_visible ) )
  .execute( pool )
  .await?;

  Ok( () )
}

/// Find a plan by id, regardless of visibility.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_id( pool: &SqlitePool, id: &PlanId ) -> CoreResult< Option< Plan > >
{
  let row: Option< PlanRow > = sqlx::query_as( &format!( "SELECT {SELECT_COLUMNS} FROM plans WHERE id = ?" ) )
    .bind( id.as_str() )
    .fetch_optional( pool )
    .await?;

  row.map( PlanRow::into_domain ).transpose()
}

/// List every visible plan, the catalog shown to tenants choosing a plan.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_visible( pool: &SqlitePool ) -> CoreResult< Vec< Plan > >
{
  let rows: Vec< PlanRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM plans WHERE is_visible = 1 ORDER BY monthly_price_minor ASC" )
  )
  .fetch_all( pool )
  .await?;

  rows.into_iter().map( PlanRow::into_domain ).collect()
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample() -> Plan
  {
    Plan
    {
      id: PlanId::generate(),
      display_name: "Starter".into(),
      monthly_price_minor: 49_000,
      annual_price_minor: 490_000,
      currency: "COP".into(),
      users_limit: 5,
      branches_limit: 1,
      storage_limit_mb: 1024,
      features: vec![ "appointments".into(), "billing".into() ],
      is_visible: true,
    }
  }

  #[tokio::test]
  async fn upsert_and_find_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let plan = sample();
    upsert( db.pool(), &plan ).await.unwrap();

    let found = find_by_id( db.pool(), &plan.id ).await.unwrap().unwrap();
    assert_eq!( found.display_name, "Starter" );
    assert_eq!( found.features.len(), 2 );
  }

  #[tokio::test]
  async fn list_visible_excludes_hidden_plans()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let visible = sample();
    let mut hidden = sample();
    hidden.id = PlanId::generate();
    hidden.is_visible = false;

    upsert( db.pool(), &visible ).await.unwrap();
    upsert( db.pool(), &hidden ).await.unwrap();

    let plans = list_visible( db.pool() ).await.unwrap();
    assert!( plans.iter().any( | p | p.id == visible.id ) );
    assert!( !plans.iter().any( | p | p.id == hidden.id ) );
  }
}
