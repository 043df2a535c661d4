//! Repository for webhook idempotency tracking. Every inbound webhook event
//! is recorded here, keyed on `(externalTransactionId, eventKind)`, before
//! any tenant mutation is attempted — a replayed delivery is detected and
//! short-circuited before it can touch subscription or payment state.

use chrono::Utc;
use clinic_types::CoreResult;
use sqlx::SqlitePool;

/// Record that a webhook event has been processed. Returns `Ok(true)` if
/// this is the first time the event has been seen, `Ok(false)` if it is a
/// duplicate delivery that should be acknowledged without reprocessing.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn mark_seen(
  pool: &SqlitePool,
  external_transaction_id: &str,
  event_kind: &str,
) -> CoreResult< bool >
{
  let result = sqlx::query(
    "INSERT INTO seen_webhook_events ( external_transaction_id, event_kind, processed_at )
     VALUES ( ?, ?, ? )
     ON CONFLICT( external_transaction_id, event_kind ) DO NOTHING"
  )
  .bind( external_transaction_id )
  .bind( event_kind )
  .bind( Utc::now().to_rfc3339() )
  .execute( pool )
  .await?;

  Ok( result.rows_affected() == 1 )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  #[tokio::test]
  async fn first_delivery_is_seen_second_is_duplicate()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let first = mark_seen( db.pool(), "wompi_123", "transaction.updated" ).await.unwrap();
    let second = mark_seen( db.pool(), "wompi_123", "transaction.updated" ).await.unwrap();

    assert!( first );
    assert!( !second );
  }

  #[tokio::test]
  async fn same_transaction_different_event_kind_is_distinct()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    assert!( mark_seen( db.pool(), "wompi_456", "checkout.session.completed" ).await.unwrap() );
    assert!( mark_seen( db.pool(), "wompi_456", "invoice.payment_failed" ).await.unwrap() );
  }
}
