//! Repository for [`Principal`] rows.

use chrono::{ DateTime, Utc };
use clinic_types::{ CoreError, CoreResult, Principal, PrincipalId, PrincipalKind, RoleId, TenantId };
use sqlx::{ FromRow, SqlitePool };
use std::collections::HashSet;

#[derive( FromRow )]
struct PrincipalRow
{
  id: String,
  display_name: String,
  email: String,
  hashed_secret: String,
  kind: String,
  is_super_admin: i64,
  tenant_ids: String,
  role_ids: String,
  created_at: String,
  deleted_at: Option< String >,
}

fn parse_kind( s: &str ) -> CoreResult< PrincipalKind >
{
  match s
  {
    "staff" => Ok( PrincipalKind::Staff ),
    "owner" => Ok( PrincipalKind::Owner ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown principal kind '{other}'" ) ) ),
  }
}

fn kind_str( kind: PrincipalKind ) -> &'static str
{
  match kind
  {
    PrincipalKind::Staff => "staff",
    PrincipalKind::Owner => "owner",
  }
}

impl PrincipalRow
{
  fn into_domain( self ) -> CoreResult< Principal >
  {
    let tenant_ids: Vec< String > = serde_json::from_str( &self.tenant_ids )
      .map_err( | e | CoreError::internal( e ) )?;
    let role_ids: Vec< String > = serde_json::from_str( &self.role_ids )
      .map_err( | e | CoreError::internal( e ) )?;

    Ok( Principal
    {
      id: PrincipalId::parse( &self.id )?,
      display_name: self.display_name,
      email: self.email,
      hashed_secret: self.hashed_secret,
      kind: parse_kind( &self.kind )?,
      is_super_admin: self.is_super_admin != 0,
      tenant_ids: tenant_ids.iter().map( | s | TenantId::parse( s ) ).collect::< Result< HashSet< _ >, _ > >()?,
      role_ids: role_ids.iter().map( | s | RoleId::parse( s ) ).collect::< Result< HashSet< _ >, _ > >()?,
      created_at: self.created_at.parse::< DateTime< Utc > >().map_err( | e | CoreError::internal( anyhow::anyhow!( e ) ) )?,
      deleted_at: self.deleted_at.map( | s | s.parse::< DateTime< Utc > >() ).transpose().map_err( | e | CoreError::internal( anyhow::anyhow!( e ) ) )?,
    } )
  }
}

/// Insert a new principal.
///
/// # Errors
///
/// Returns [`CoreError::Conflict`] if the email is already in use by an
/// active principal.
pub async fn create( pool: &SqlitePool, principal: &Principal ) -> CoreResult< () >
{
  principal.validate_tenant_scoping()?;

  let tenant_ids: Vec< &str > = principal.tenant_ids.iter().map( | t | t.as_str() ).collect();
  let role_ids: Vec< &str > = principal.role_ids.iter().map( | r | r.as_str() ).collect();

  sqlx::query(
    "INSERT INTO principals
      ( id, display_name, email, hashed_secret, kind, is_super_admin, tenant_ids, role_ids, created_at, deleted_at )
     VALUES ( ?, ?, ?, ?, ?, ?, ?, ?, ?, ? )"
  )
  .bind( principal.id.as_str() )
  .bind( &principal.display_name )
  .bind( &principal.email )
  .bind( &principal.hashed_secret )
  .bind( kind_str( principal.kind ) )
  .bind( i64::from( principal.is_super_admin ) )
  .bind( serde_json::to_string( &tenant_ids ).unwrap() )
  .bind( serde_json::to_string( &role_ids ).unwrap() )
  .bind( principal.created_at.to_rfc3339() )
  .bind( principal.deleted_at.map( | t | t.to_rfc3339() ) )
  .execute( pool )
  .await
  .map_err( | e | match e
  {
    sqlx::Error::Database( ref db ) if db.is_unique_violation() =>
      CoreError::Conflict( format!( "principal with email '{}' already exists", principal.email ) ),
    other => other.into(),
  } )?;

  Ok( () )
}

/// Find a principal by id. Returns `Ok(None)` for soft-deleted or absent
/// rows — callers treat both as "principal not usable".
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_id( pool: &SqlitePool, id: &PrincipalId ) -> CoreResult< Option< Principal > >
{
  let row: Option< PrincipalRow > = sqlx::query_as(
    "SELECT id, display_name, email, hashed_secret, kind, is_super_admin, tenant_ids, role_ids, created_at, deleted_at
     FROM principals WHERE id = ? AND deleted_at IS NULL"
  )
  .bind( id.as_str() )
  .fetch_optional( pool )
  .await?;

  row.map( PrincipalRow::into_domain ).transpose()
}

/// Find an active principal by email.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn find_by_email( pool: &SqlitePool, email: &str ) -> CoreResult< Option< Principal > >
{
  let row: Option< PrincipalRow > = sqlx::query_as(
    "SELECT id, display_name, email, hashed_secret, kind, is_super_admin, tenant_ids, role_ids, created_at, deleted_at
     FROM principals WHERE email = ? AND deleted_at IS NULL"
  )
  .bind( email )
  .fetch_optional( pool )
  .await?;

  row.map( PrincipalRow::into_domain ).transpose()
}

/// Overwrite a principal's role set (e.g. role assignment/revocation).
/// Callers are responsible for invalidating the RBAC cache afterward
/// (spec §9 Open Question (c)).
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the principal does not exist.
pub async fn set_role_ids( pool: &SqlitePool, id: &PrincipalId, role_ids: &HashSet< RoleId > ) -> CoreResult< () >
{
  let role_ids: Vec< &str > = role_ids.iter().map( | r | r.as_str() ).collect();

  let result = sqlx::query( "UPDATE principals SET role_ids = ? WHERE id = ? AND deleted_at IS NULL" )
    .bind( serde_json::to_string( &role_ids ).unwrap() )
    .bind( id.as_str() )
    .execute( pool )
    .await?;

  if result.rows_affected() == 0
  {
    return Err( CoreError::NotFound( format!( "principal {id} not found" ) ) );
  }
  Ok( () )
}

/// Soft-delete a principal.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn soft_delete( pool: &SqlitePool, id: &PrincipalId ) -> CoreResult< () >
{
  sqlx::query( "UPDATE principals SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL" )
    .bind( Utc::now().to_rfc3339() )
    .bind( id.as_str() )
    .execute( pool )
    .await?;
  Ok( () )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample( tenant: TenantId ) -> Principal
  {
    Principal
    {
      id: PrincipalId::generate(),
      display_name: "Dr. Ana".into(),
      email: format!( "ana-{}@example.com", uuid::Uuid::new_v4() ),
      hashed_secret: "hash".into(),
      kind: clinic_types::PrincipalKind::Staff,
      is_super_admin: false,
      tenant_ids: HashSet::from( [ tenant ] ),
      role_ids: HashSet::new(),
      created_at: Utc::now(),
      deleted_at: None,
    }
  }

  #[tokio::test]
  async fn create_and_find_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let principal = sample( TenantId::generate() );
    create( db.pool(), &principal ).await.unwrap();

    let found = find_by_id( db.pool(), &principal.id ).await.unwrap().unwrap();
    assert_eq!( found.email, principal.email );
  }

  #[tokio::test]
  async fn duplicate_email_conflicts()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant = TenantId::generate();
    let mut principal = sample( tenant.clone() );
    create( db.pool(), &principal ).await.unwrap();

    principal.id = PrincipalId::generate();
    let err = create( db.pool(), &principal ).await.unwrap_err();
    assert_eq!( err.code(), "CONFLICT" );
  }

  #[tokio::test]
  async fn soft_deleted_principal_is_not_found()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let principal = sample( TenantId::generate() );
    create( db.pool(), &principal ).await.unwrap();
    soft_delete( db.pool(), &principal.id ).await.unwrap();

    assert!( find_by_id( db.pool(), &principal.id ).await.unwrap().is_none() );
  }
}
