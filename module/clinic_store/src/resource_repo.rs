//! Repository for [`Resource`] rows — named, protected things scoped to a
//! tenant (e.g. `"appointments"`, `"invoices"`).

use chrono::{ DateTime, Utc };
use clinic_types::{ CoreError, CoreResult, Resource, ResourceId, TenantId };
use sqlx::{ FromRow, SqlitePool };

#[derive( FromRow )]
struct ResourceRow
{
  id: String,
  tenant_id: String,
  name: String,
  deleted_at: Option< String >,
}

impl ResourceRow
{
  fn into_domain( self ) -> CoreResult< Resource >
  {
    Ok( Resource
    {
      id: ResourceId::parse( &self.id )?,
      tenant_id: TenantId::parse( &self.tenant_id )?,
      name: self.name,
      deleted_at: self.deleted_at.map( | s | s.parse::< DateTime< Utc > >() ).transpose().map_err( CoreError::internal )?,
    } )
  }
}

/// Create a resource under a tenant.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if a resource with the same name already
/// exists for this tenant.
pub async fn create( pool: &SqlitePool, resource: &Resource ) -> CoreResult< () >
{
  sqlx::query( "INSERT INTO resources ( id, tenant_id, name, deleted_at ) VALUES ( ?, ?, ?, ? )" )
    .bind( resource.id.as_str() )
    .bind( resource.tenant_id.as_str() )
    .bind( &resource.name )
    .bind( resource.deleted_at.map( | t | t.to_rfc3339() ) )
    .execute( pool )
    .await
    .map_err( | e | match e
    {
      sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
        CoreError::Conflict( format!( "resource '{}' already exists for this tenant", resource.name ) ),
      other => other.into(),
    } )?;

  Ok( () )
}

/// Find a resource by id, scoped to its owning tenant.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_id( pool: &SqlitePool, tenant_id: &TenantId, id: &ResourceId ) -> CoreResult< Option< Resource > >
{
  let row: Option< ResourceRow > = sqlx::query_as(
    "SELECT id, tenant_id, name, deleted_at FROM resources
     WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL"
  )
  .bind( tenant_id.as_str() )
  .bind( id.as_str() )
  .fetch_optional( pool )
  .await?;

  row.map( ResourceRow::into_domain ).transpose()
}

/// List every live resource for a tenant.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_for_tenant( pool: &SqlitePool, tenant_id: &TenantId ) -> CoreResult< Vec< Resource > >
{
  let rows: Vec< ResourceRow > = sqlx::query_as(
    "SELECT id, tenant_id, name, deleted_at FROM resources
     WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY name ASC"
  )
  .bind( tenant_id.as_str() )
  .fetch_all( pool )
  .await?;

  rows.into_iter().map( ResourceRow::into_domain ).collect()
}

/// Soft-delete a resource.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if no live resource with that id exists
/// for the tenant.
pub async fn soft_delete( pool: &SqlitePool, tenant_id: &TenantId, id: &ResourceId ) -> CoreResult< () >
{
  let result = sqlx::query(
    "UPDATE resources SET deleted_at = ? WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL"
  )
  .bind( Utc::now().to_rfc3339() )
  .bind( tenant_id.as_str() )
  .bind( id.as_str() )
  .execute( pool )
  .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "resource {id} not found" ) ) );
  }
  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample( tenant_id: TenantId ) -> Resource
  {
    Resource { id: ResourceId::generate(), tenant_id, name: "appointments".into(), deleted_at: None }
  }

  #[tokio::test]
  async fn create_and_list_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let resource = sample( tenant_id.clone() );
    create( db.pool(), &resource ).await.unwrap();

    let listed = list_for_tenant( db.pool(), &tenant_id ).await.unwrap();
    assert_eq!( listed.len(), 1 );
    assert_eq!( listed[ 0 ].name, "appointments" );
  }

  #[tokio::test]
  async fn duplicate_name_within_tenant_conflicts()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let resource = sample( tenant_id.clone() );
    create( db.pool(), &resource ).await.unwrap();

    let mut dup = sample( tenant_id );
    dup.id = ResourceId::generate();
    let err = create( db.pool(), &dup ).await.unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }

  #[tokio::test]
  async fn soft_deleted_resource_is_excluded_from_listing()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let resource = sample( tenant_id.clone() );
    create( db.pool(), &resource ).await.unwrap();
    soft_delete( db.pool(), &tenant_id, &resource.id ).await.unwrap();

    assert!( list_for_tenant( db.pool(), &tenant_id ).await.unwrap().is_empty() );
  }
}
