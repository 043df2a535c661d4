//! Repository for [`Payment`] rows — one row per checkout/payment attempt,
//! created pending and driven through its status machine by webhook events.

use chrono::{ DateTime, Utc };
use clinic_types::{ CoreError, CoreResult, PaymentId, PaymentStatus, Payment, PlanId, TenantId };
use sqlx::{ FromRow, SqlitePool };
use std::collections::HashMap;

#[derive( FromRow )]
struct PaymentRow
{
  id: String,
  tenant_id: String,
  plan_id: String,
  amount_minor: i64,
  currency: String,
  provider: String,
  status: String,
  external_transaction_id: Option< String >,
  failure_reason: Option< String >,
  metadata: String,
  created_at: String,
  updated_at: String,
}

fn parse_status( s: &str ) -> CoreResult< PaymentStatus >
{
  match s
  {
    "pending" => Ok( PaymentStatus::Pending ),
    "completed" => Ok( PaymentStatus::Completed ),
    "failed" => Ok( PaymentStatus::Failed ),
    "refunded" => Ok( PaymentStatus::Refunded ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown payment status '{other}'" ) ) ),
  }
}

fn status_str( status: PaymentStatus ) -> &'static str
{
  match status
  {
    PaymentStatus::Pending => "pending",
    PaymentStatus::Completed => "completed",
    PaymentStatus::Failed => "failed",
    PaymentStatus::Refunded => "refunded",
  }
}

impl PaymentRow
{
  fn into_domain( self ) -> CoreResult< Payment >
  {
    let metadata: HashMap< String, serde_json::Value > = serde_json::from_str( &self.metadata ).map_err( CoreError::internal )?;

    Ok( Payment
    {
      id: PaymentId::parse( &self.id )?,
      tenant_id: TenantId::parse( &self.tenant_id )?,
      plan_id: PlanId::parse( &self.plan_id )?,
      amount_minor: self.amount_minor,
      currency: self.currency,
      provider: self.provider,
      status: parse_status( &self.status )?,
      external_transaction_id: self.external_transaction_id,
      failure_reason: self.failure_reason,
      metadata,
      created_at: self.created_at.parse().map_err( CoreError::internal )?,
      updated_at: self.updated_at.parse().map_err( CoreError::internal )?,
    } )
  }
}

const SELECT_COLUMNS: &str = "id, tenant_id, plan_id, amount_minor, currency, provider, status, \
  external_transaction_id, failure_reason, metadata, created_at, updated_at";

/// Insert a new, pending payment row (created at `subscribe` time, before
/// any provider webhook has arrived).
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn create( pool: &SqlitePool, payment: &Payment ) -> CoreResult< () >
{
  sqlx::query(
    "INSERT INTO payments
      ( id, tenant_id, plan_id, amount_minor, currency, provider, status,
        external_transaction_id, failure_reason, metadata, created_at, updated_at )
     VALUES ( ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? )"
  )
  .bind( payment.id.as_str() )
  .bind( payment.tenant_id.as_str() )
  .bind( payment.plan_id.as_str() )
  .bind( payment.amount_minor )
  .bind( &payment.currency )
  .bind( &payment.provider )
  .bind( status_str( payment.status ) )
  .bind( &payment.external_transaction_id )
  .bind( &payment.failure_reason )
  .bind( serde_json::to_string( &payment.metadata ).unwrap() )
  .bind( payment.created_at.to_rfc3339() )
  .bind( payment.updated_at.to_rfc3339() )
  .execute( pool )
  .await?;

  Ok( () )
}

/// Find a payment by its provider-assigned external transaction id — the
/// correlation key webhook ingress uses to locate the row to update.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_external_transaction_id(
  pool: &SqlitePool,
  external_transaction_id: &str,
) -> CoreResult< Option< Payment > >
{
  let row: Option< PaymentRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM payments WHERE external_transaction_id = ?" )
  )
  .bind( external_transaction_id )
  .fetch_optional( pool )
  .await?;

  row.map( PaymentRow::into_domain ).transpose()
}

/// List payments for a tenant, most recent first.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_for_tenant( pool: &SqlitePool, tenant_id: &TenantId ) -> CoreResult< Vec< Payment > >
{
  let rows: Vec< PaymentRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM payments WHERE tenant_id = ? ORDER BY created_at DESC" )
  )
  .bind( tenant_id.as_str() )
  .fetch_all( pool )
  .await?;

  rows.into_iter().map( PaymentRow::into_domain ).collect()
}

/// Apply a webhook-driven status update to a payment row by external
/// transaction id, recording a failure reason when provided.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if no payment with that external
/// transaction id exists.
pub async fn update_status(
  pool: &SqlitePool,
  external_transaction_id: &str,
  status: PaymentStatus,
  failure_reason: Option< &str >,
) -> CoreResult< () >
{
  let result = sqlx::query(
    "UPDATE payments SET status = ?, failure_reason = ?, updated_at = ? WHERE external_transaction_id = ?"
  )
  .bind( status_str( status ) )
  .bind( failure_reason )
  .bind( Utc::now().to_rfc3339() )
  .bind( external_transaction_id )
  .execute( pool )
  .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "payment with external transaction id {external_transaction_id} not found" ) ) );
  }
  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample( tenant_id: TenantId ) -> Payment
  {
    Payment
    {
      id: PaymentId::generate(),
      tenant_id,
      plan_id: PlanId::generate(),
      amount_minor: 49_000,
      currency: "COP".into(),
      provider: "wompi".into(),
      status: PaymentStatus::Pending,
      external_transaction_id: Some( format!( "wompi_{}", uuid::Uuid::new_v4() ) ),
      failure_reason: None,
      metadata: HashMap::new(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn create_and_find_by_external_id_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let payment = sample( TenantId::generate() );
    create( db.pool(), &payment ).await.unwrap();

    let found = find_by_external_transaction_id(
      db.pool(), payment.external_transaction_id.as_deref().unwrap()
    ).await.unwrap().unwrap();
    assert_eq!( found.id, payment.id );
    assert_eq!( found.status, PaymentStatus::Pending );
  }

  #[tokio::test]
  async fn update_status_marks_completed()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let payment = sample( TenantId::generate() );
    create( db.pool(), &payment ).await.unwrap();

    let ext_id = payment.external_transaction_id.clone().unwrap();
    update_status( db.pool(), &ext_id, PaymentStatus::Completed, None ).await.unwrap();

    let found = find_by_external_transaction_id( db.pool(), &ext_id ).await.unwrap().unwrap();
    assert_eq!( found.status, PaymentStatus::Completed );
  }

  #[tokio::test]
  async fn update_status_for_unknown_transaction_not_found()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let err = update_status( db.pool(), "does-not-exist", PaymentStatus::Failed, Some( "declined" ) )
      .await
      .unwrap_err();
    assert_eq!( err.code(), "NOT_FOUND" );
  }
}
