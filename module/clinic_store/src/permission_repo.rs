//! Repository for [`Permission`] rows — a (tenant, resource, action) triple.

use chrono::{ DateTime, Utc };
use clinic_types::{ Action, CoreError, CoreResult, Permission, PermissionId, ResourceId, TenantId };
use sqlx::{ FromRow, SqlitePool };

#[derive( FromRow )]
struct PermissionRow
{
  id: String,
  tenant_id: String,
  resource_id: String,
  action: String,
  deleted_at: Option< String >,
}

fn parse_action( s: &str ) -> CoreResult< Action >
{
  match s
  {
    "get" => Ok( Action::Get ),
    "post" => Ok( Action::Post ),
    "put" => Ok( Action::Put ),
    "patch" => Ok( Action::Patch ),
    "delete" => Ok( Action::Delete ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown action '{other}'" ) ) ),
  }
}

fn action_str( action: Action ) -> &'static str
{
  match action
  {
    Action::Get => "get",
    Action::Post => "post",
    Action::Put => "put",
    Action::Patch => "patch",
    Action::Delete => "delete",
  }
}

impl PermissionRow
{
  fn into_domain( self ) -> CoreResult< Permission >
  {
    Ok( Permission
    {
      id: PermissionId::parse( &self.id )?,
      tenant_id: TenantId::parse( &self.tenant_id )?,
      resource_id: ResourceId::parse( &self.resource_id )?,
      action: parse_action( &self.action )?,
      deleted_at: self.deleted_at.map( | s | s.parse::< DateTime< Utc > >() ).transpose().map_err( CoreError::internal )?,
    } )
  }
}

/// Create a permission tuple.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if the (resource, action) pair is already
/// granted for this tenant.
pub async fn create( pool: &SqlitePool, permission: &Permission ) -> CoreResult< () >
{
  sqlx::query( "INSERT INTO permissions ( id, tenant_id, resource_id, action, deleted_at ) VALUES ( ?, ?, ?, ?, ? )" )
    .bind( permission.id.as_str() )
    .bind( permission.tenant_id.as_str() )
    .bind( permission.resource_id.as_str() )
    .bind( action_str( permission.action ) )
    .bind( permission.deleted_at.map( | t | t.to_rfc3339() ) )
    .execute( pool )
    .await
    .map_err( | e | match e
    {
      sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
        CoreError::Conflict( "permission already granted for this resource and action".into() ),
      other => other.into(),
    } )?;

  Ok( () )
}

/// List the permissions identified by the given ids, scoped to a tenant —
/// used by the RBAC engine to resolve a role's `permission_ids` into
/// concrete (resource, action) tuples.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_ids(
  pool: &SqlitePool,
  tenant_id: &TenantId,
  ids: &[ PermissionId ],
) -> CoreResult< Vec< Permission > >
{
  if ids.is_empty()
  {
    return Ok( Vec::new() );
  }

  let placeholders = std::iter::repeat( "?" ).take( ids.len() ).collect::< Vec< _ > >().join( ", " );
  let query = format!(
    "SELECT id, tenant_id, resource_id, action, deleted_at FROM permissions
     WHERE tenant_id = ? AND deleted_at IS NULL AND id IN ( {placeholders} )"
  );

  let mut q = sqlx::query_as( &query ).bind( tenant_id.as_str() );
  for id in ids
  {
    q = q.bind( id.as_str() );
  }
  let rows: Vec< PermissionRow > = q.fetch_all( pool ).await?;

  rows.into_iter().map( PermissionRow::into_domain ).collect()
}

/// List every live permission for a tenant.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn list_for_tenant( pool: &SqlitePool, tenant_id: &TenantId ) -> CoreResult< Vec< Permission > >
{
  let rows: Vec< PermissionRow > = sqlx::query_as(
    "SELECT id, tenant_id, resource_id, action, deleted_at FROM permissions
     WHERE tenant_id = ? AND deleted_at IS NULL"
  )
  .bind( tenant_id.as_str() )
  .fetch_all( pool )
  .await?;

  rows.into_iter().map( PermissionRow::into_domain ).collect()
}

/// Soft-delete a permission.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if no live permission with that id exists
/// for the tenant.
pub async fn soft_delete( pool: &SqlitePool, tenant_id: &TenantId, id: &PermissionId ) -> CoreResult< () >
{
  let result = sqlx::query(
    "UPDATE permissions SET deleted_at = ? WHERE tenant_id = ? AND id = ? AND deleted_at IS NULL"
  )
  .bind( Utc::now().to_rfc3339() )
  .bind( tenant_id.as_str() )
  .bind( id.as_str() )
  .execute( pool )
  .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "permission {id} not found" ) ) );
  }
  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  async fn seed_resource( pool: &sqlx::SqlitePool, tenant_id: &TenantId ) -> ResourceId
  {
    let resource = clinic_types::Resource
    {
      id: ResourceId::generate(),
      tenant_id: tenant_id.clone(),
      name: "appointments".into(),
      deleted_at: None,
    };
    crate::resource_repo::create( pool, &resource ).await.unwrap();
    resource.id
  }

  #[tokio::test]
  async fn create_and_find_by_ids_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let resource_id = seed_resource( db.pool(), &tenant_id ).await;

    let permission = Permission
    {
      id: PermissionId::generate(),
      tenant_id: tenant_id.clone(),
      resource_id,
      action: Action::Get,
      deleted_at: None,
    };
    create( db.pool(), &permission ).await.unwrap();

    let found = find_by_ids( db.pool(), &tenant_id, &[ permission.id.clone() ] ).await.unwrap();
    assert_eq!( found.len(), 1 );
    assert_eq!( found[ 0 ].action, Action::Get );
  }

  #[tokio::test]
  async fn duplicate_resource_action_conflicts()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let resource_id = seed_resource( db.pool(), &tenant_id ).await;

    let permission = Permission
    {
      id: PermissionId::generate(),
      tenant_id: tenant_id.clone(),
      resource_id: resource_id.clone(),
      action: Action::Post,
      deleted_at: None,
    };
    create( db.pool(), &permission ).await.unwrap();

    let mut dup = permission.clone();
    dup.id = PermissionId::generate();
    let err = create( db.pool(), &dup ).await.unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }
}
