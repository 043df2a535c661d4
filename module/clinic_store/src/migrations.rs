//! Migration application: migrations are embedded via `include_str!` and
//! safe to re-apply (idempotent `CREATE TABLE IF NOT EXISTS` / `CREATE
//! INDEX IF NOT EXISTS` rather than a per-migration guard table, since
//! every statement here is already idempotent on its own).

use clinic_types::CoreResult;
use sqlx::SqlitePool;

/// Apply every migration needed for the core schema. Safe to call multiple
/// times against the same pool.
///
/// # Errors
///
/// Returns [`clinic_types::CoreError::Upstream`] if a migration statement fails.
pub async fn apply_all_migrations( pool: &SqlitePool ) -> CoreResult< () >
{
  sqlx::query( "PRAGMA foreign_keys = ON" ).execute( pool ).await?;

  let core_schema = include_str!( "../migrations/001_core_schema.sql" );
  sqlx::raw_sql( core_schema ).execute( pool ).await?;

  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[tokio::test]
  async fn migrations_are_idempotent()
  {
    let pool = SqlitePool::connect( "sqlite::memory:" ).await.unwrap();
    apply_all_migrations( &pool ).await.unwrap();
    apply_all_migrations( &pool ).await.unwrap();

    let table_count: i64 = sqlx::query_scalar(
      "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'"
    )
    .fetch_one( &pool )
    .await
    .unwrap();

    assert!( table_count >= 8 );
  }
}
