//! Repository for [`Role`] rows — a named bundle of permissions and
//! resources scoped to a tenant.

use chrono::{ DateTime, Utc };
use clinic_types::{ CoreError, CoreResult, PermissionId, ResourceId, Role, RoleId, TenantId };
use sqlx::{ FromRow, SqlitePool };
use std::collections::HashSet;

#[derive( FromRow )]
struct RoleRow
{
  id: String,
  tenant_id: String,
  name: String,
  permission_ids: String,
  resource_ids: String,
  deleted_at: Option< String >,
}

impl RoleRow
{
  fn into_domain( self ) -> CoreResult< Role >
  {
    let permission_ids: Vec< String > = serde_json::from_str( &self.permission_ids ).map_err( CoreError::internal )?;
    let resource_ids: Vec< String > = serde_json::from_str( &self.resource_ids ).map_err( CoreError::internal )?;

    Ok( Role
    {
      id: RoleId::parse( &self.id )?,
      tenant_id: TenantId::parse( &self.tenant_id )?,
      name: self.name,
      permission_ids: permission_ids.iter().map( | s | PermissionId::parse( s ) ).collect::< Result< HashSet< _ >, _ > >()?,
      resource_ids: resource_ids.iter().map( | s | ResourceId::parse( s ) ).collect::< Result< HashSet< _ >, _ > >()?,
      deleted_at: self.deleted_at.map( | s | s.parse::< DateTime< Utc > >() ).transpose().map_err( CoreError::internal )?,
    } )
  }
}

const SELECT_COLUMNS: &str = "id, tenant_id, name, permission_ids, resource_ids, deleted_at";

/// Create a role.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if a role with the same name already
/// exists for this tenant.
pub async fn create( pool: &SqlitePool, role: &Role ) -> CoreResult< () >
{
  let permission_ids: Vec< &str > = role.permission_ids.iter().map( | p | p.as_str() ).collect();
  let resource_ids: Vec< &str > = role.resource_ids.iter().map( | r | r.as_str() ).collect();

  sqlx::query(
    "INSERT INTO roles ( id, tenant_id, name, permission_ids, resource_ids, deleted_at )
     VALUES ( ?, ?, ?, ?, ?, ? )"
  )
  .bind( role.id.as_str() )
  .bind( role.tenant_id.as_str() )
  .bind( &role.name )
  .bind( serde_json::to_string( &permission_ids ).unwrap() )
  .bind( serde_json::to_string( &resource_ids ).unwrap() )
  .bind( role.deleted_at.map( | t | t.to_rfc3339() ) )
  .execute( pool )
  .await
  .map_err( | e | match e
  {
    sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
      CoreError::Conflict( format!( "role '{}' already exists for this tenant", role.name ) ),
    other => other.into(),
  } )?;

  Ok( () )
}

/// Find a role by id, scoped to its owning tenant.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_id( pool: &SqlitePool, tenant_id: &TenantId, id: &RoleId ) -> CoreResult< Option< Role > >
{
  let row: Option< RoleRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM roles WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL" )
  )
  .bind( tenant_id.as_str() )
  .bind( id.as_str() )
  .fetch_optional( pool )
  .await?;

  row.map( RoleRow::into_domain ).transpose()
}

/// Find the roles identified by the given ids, scoped to a tenant — used by
/// the RBAC engine to resolve a principal's `role_ids`.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_ids( pool: &SqlitePool, tenant_id: &TenantId, ids: &[ RoleId ] ) -> CoreResult< Vec< Role > >
{
  if ids.is_empty()
  {
    return Ok( Vec::new() );
  }

  let placeholders = std::iter::repeat( "?" ).take( ids.len() ).collect::< Vec< _ > >().join( ", " );
  let query = format!(
    "SELECT {SELECT_COLUMNS} FROM roles WHERE tenant_id = ? AND deleted_at IS NULL AND id IN ( {placeholders} )"
  );

  let mut q = sqlx::query_as( &query ).bind( tenant_id.as_str() );
  for id in ids
  {
    q = q.bind( id.as_str() );
  }
  let rows: Vec< RoleRow > = q.fetch_all( pool ).await?;

  rows.into_iter().map( RoleRow::into_domain ).collect()
}

/// List every live role for a tenant.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_for_tenant( pool: &SqlitePool, tenant_id: &TenantId ) -> CoreResult< Vec< Role > >
{
  let rows: Vec< RoleRow > = sqlx::query_as(
    &format!( "SELECT {SELECT_COLUMNS} FROM roles WHERE tenant_id = ? AND deleted_at IS NULL" )
  )
  .bind( tenant_id.as_str() )
  .fetch_all( pool )
  .await?;

  rows.into_iter().map( RoleRow::into_domain ).collect()
}

/// Overwrite a role's permission and resource sets. Callers are responsible
/// for invalidating the RBAC cache for every principal holding this role
/// afterward (spec §9 Open Question (c)).
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the role does not exist.
pub async fn set_grants(
  pool: &SqlitePool,
  tenant_id: &TenantId,
  id: &RoleId,
  permission_ids: &HashSet< PermissionId >,
  resource_ids: &HashSet< ResourceId >,
) -> CoreResult< () >
{
  let permission_ids: Vec< &str > = permission_ids.iter().map( | p | p.as_str() ).collect();
  let resource_ids: Vec< &str > = resource_ids.iter().map( | r | r.as_str() ).collect();

  let result = sqlx::query(
    "UPDATE roles SET permission_ids = ?, resource_ids = ?
     WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL"
  )
  .bind( serde_json::to_string( &permission_ids ).unwrap() )
  .bind( serde_json::to_string( &resource_ids ).unwrap() )
  .bind( tenant_id.as_str() )
  .bind( id.as_str() )
  .execute( pool )
  .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "role {id} not found" ) ) );
  }
  Ok( () )
}

/// Soft-delete a role.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if no live role with that id exists for
/// the tenant.
pub async fn soft_delete( pool: &SqlitePool, tenant_id: &TenantId, id: &RoleId ) -> CoreResult< () >
{
  let result = sqlx::query( "UPDATE roles SET deleted_at = ? WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL" )
    .bind( Utc::now().to_rfc3339() )
    .bind( tenant_id.as_str() )
    .bind( id.as_str() )
    .execute( pool )
    .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "role {id} not found" ) ) );
  }
  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample( tenant_id: TenantId ) -> Role
  {
    Role { id: RoleId::generate(), tenant_id, name: "front-desk".into(), permission_ids: HashSet::new(), resource_ids: HashSet::new(), deleted_at: None }
  }

  #[tokio::test]
  async fn create_and_find_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let role = sample( tenant_id.clone() );
    create( db.pool(), &role ).await.unwrap();

    let found = find_by_id( db.pool(), &tenant_id, &role.id ).await.unwrap().unwrap();
    assert_eq!( found.name, "front-desk" );
  }

  #[tokio::test]
  async fn set_grants_updates_permission_set()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let role = sample( tenant_id.clone() );
    create( db.pool(), &role ).await.unwrap();

    let permission_ids = HashSet::from( [ PermissionId::generate() ] );
    set_grants( db.pool(), &tenant_id, &role.id, &permission_ids, &HashSet::new() ).await.unwrap();

    let found = find_by_id( db.pool(), &tenant_id, &role.id ).await.unwrap().unwrap();
    assert_eq!( found.permission_ids, permission_ids );
  }

  #[tokio::test]
  async fn duplicate_name_within_tenant_conflicts()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let role = sample( tenant_id.clone() );
    create( db.pool(), &role ).await.unwrap();

    let mut dup = sample( tenant_id );
    dup.id = RoleId::generate();
    let err = create( db.pool(), &dup ).await.unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }
}
