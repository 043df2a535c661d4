//! Role-based authorization engine.
//!
//! `authorize()` is the single entry point: cache-hit short circuit,
//! otherwise resolve the principal's roles, union their permissions,
//! filter by the requested action, and check whether the named resource is
//! among the ones those permissions grant (spec §4.1). The engine is
//! `async` because every step past the cache lookup is a store round trip
//! (spec §5).

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod implementation
{
  use clinic_cache::RbacCache;
  use clinic_store::{ permission_repo, principal_repo, resource_repo, role_repo };
  use clinic_types::{ Action, CoreError, CoreResult, PrincipalId, TenantId };
  use sqlx::SqlitePool;
  use std::collections::HashSet;
  use std::sync::Arc;

  /// Decide whether `principal_id` may perform `action` on the resource
  /// named `resource_name`, within `tenant_id`'s scope.
  ///
  /// Never returns `allow` on a store failure: any error resolving the
  /// principal, its roles, or its permissions is mapped to
  /// [`CoreError::Forbidden`] (fail closed), with the underlying error
  /// logged but not surfaced (spec §4.1 Failure mode).
  ///
  /// # Errors
  ///
  /// Returns [`CoreError::Forbidden`] when the principal is absent,
  /// soft-deleted, or any resolution step fails.
  pub async fn authorize(
    pool: &SqlitePool,
    cache: &Arc< dyn RbacCache >,
    tenant_id: &TenantId,
    principal_id: &PrincipalId,
    resource_name: &str,
    action: Action,
  ) -> CoreResult< bool >
  {
    if let Some( cached ) = cache.get( principal_id, resource_name, action ).await
    {
      return Ok( cached );
    }

    let allow = resolve( pool, tenant_id, principal_id, resource_name, action ).await?;
    cache.set( principal_id, resource_name, action, allow ).await;
    Ok( allow )
  }

  async fn resolve(
    pool: &SqlitePool,
    tenant_id: &TenantId,
    principal_id: &PrincipalId,
    resource_name: &str,
    action: Action,
  ) -> CoreResult< bool >
  {
    let principal = principal_repo::find_by_id( pool, principal_id )
      .await
      .map_err( | err | forbidden( "resolving principal", &err ) )?
      .ok_or_else( || CoreError::Forbidden( format!( "principal {principal_id} not found or inactive" ) ) )?;

    if principal.role_ids.is_empty()
    {
      return Ok( false );
    }

    let role_ids: Vec< _ > = principal.role_ids.into_iter().collect();
    let roles = role_repo::find_by_ids( pool, tenant_id, &role_ids )
      .await
      .map_err( | err | forbidden( "resolving roles", &err ) )?;

    let permission_ids: HashSet< _ > = roles.iter().flat_map( | role | role.permission_ids.iter().cloned() ).collect();
    if permission_ids.is_empty()
    {
      return Ok( false );
    }
    let permission_ids: Vec< _ > = permission_ids.into_iter().collect();

    let permissions = permission_repo::find_by_ids( pool, tenant_id, &permission_ids )
      .await
      .map_err( | err | forbidden( "resolving permissions", &err ) )?;

    let granted_resource_ids: HashSet< _ > = permissions
      .into_iter()
      .filter( | permission | permission.action == action )
      .map( | permission | permission.resource_id )
      .collect();

    if granted_resource_ids.is_empty()
    {
      return Ok( false );
    }

    let resource = resource_repo::list_for_tenant( pool, tenant_id )
      .await
      .map_err( | err | forbidden( "resolving resources", &err ) )?
      .into_iter()
      .find( | resource | resource.name == resource_name );

    Ok( resource.is_some_and( | resource | granted_resource_ids.contains( &resource.id ) ) )
  }

  fn forbidden( step: &str, err: &CoreError ) -> CoreError
  {
    tracing::warn!( step, error = %err, "rbac resolution failed, failing closed" );
    CoreError::Forbidden( format!( "authorization could not be resolved while {step}" ) )
  }

  /// Invalidate every cached decision for a principal. Call after mutating
  /// a role's grants, a permission, or a principal's `role_ids` (spec §9
  /// Open Question (c)).
  pub async fn invalidate( cache: &Arc< dyn RbacCache >, principal_id: &PrincipalId )
  {
    cache.invalidate_principal( principal_id ).await;
  }
}

#[cfg(feature = "enabled")]
pub use implementation::*;

#[cfg(test)]
mod tests
{
  use super::*;
  use clinic_cache::InMemoryRbacCache;
  use clinic_test_db::TestDatabaseBuilder;
  use clinic_types::{ Action, Permission, PermissionId, Principal, Resource, ResourceId, Role, RoleId, TenantId };
  use std::collections::HashSet;
  use std::sync::Arc;

  async fn seeded_pool() -> clinic_test_db::TestDatabase
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();
    db
  }

  fn sample_principal( tenant_id: TenantId, role_ids: HashSet< RoleId > ) -> Principal
  {
    Principal
    {
      id: clinic_types::PrincipalId::generate(),
      display_name: "Dr. Ana".into(),
      email: format!( "ana-{}@example.com", uuid::Uuid::new_v4() ),
      hashed_secret: "hash".into(),
      kind: clinic_types::PrincipalKind::Staff,
      is_super_admin: false,
      tenant_ids: HashSet::from( [ tenant_id ] ),
      role_ids,
      created_at: chrono::Utc::now(),
      deleted_at: None,
    }
  }

  #[tokio::test]
  async fn allows_when_role_grants_matching_permission()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();

    let resource = Resource { id: ResourceId::generate(), tenant_id: tenant_id.clone(), name: "appointments".into(), deleted_at: None };
    clinic_store::resource_repo::create( pool, &resource ).await.unwrap();

    let permission = Permission { id: PermissionId::generate(), tenant_id: tenant_id.clone(), resource_id: resource.id.clone(), action: Action::Get, deleted_at: None };
    clinic_store::permission_repo::create( pool, &permission ).await.unwrap();

    let role = Role { id: RoleId::generate(), tenant_id: tenant_id.clone(), name: "front-desk".into(), permission_ids: HashSet::from( [ permission.id ] ), resource_ids: HashSet::new(), deleted_at: None };
    clinic_store::role_repo::create( pool, &role ).await.unwrap();

    let principal = sample_principal( tenant_id.clone(), HashSet::from( [ role.id ] ) );
    clinic_store::principal_repo::create( pool, &principal ).await.unwrap();

    let allowed = authorize( pool, &cache, &tenant_id, &principal.id, "appointments", Action::Get ).await.unwrap();
    assert!( allowed );
  }

  #[tokio::test]
  async fn denies_when_action_does_not_match_any_granted_permission()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();

    let resource = Resource { id: ResourceId::generate(), tenant_id: tenant_id.clone(), name: "appointments".into(), deleted_at: None };
    clinic_store::resource_repo::create( pool, &resource ).await.unwrap();

    let permission = Permission { id: PermissionId::generate(), tenant_id: tenant_id.clone(), resource_id: resource.id.clone(), action: Action::Get, deleted_at: None };
    clinic_store::permission_repo::create( pool, &permission ).await.unwrap();

    let role = Role { id: RoleId::generate(), tenant_id: tenant_id.clone(), name: "front-desk".into(), permission_ids: HashSet::from( [ permission.id ] ), resource_ids: HashSet::new(), deleted_at: None };
    clinic_store::role_repo::create( pool, &role ).await.unwrap();

    let principal = sample_principal( tenant_id.clone(), HashSet::from( [ role.id ] ) );
    clinic_store::principal_repo::create( pool, &principal ).await.unwrap();

    let allowed = authorize( pool, &cache, &tenant_id, &principal.id, "appointments", Action::Delete ).await.unwrap();
    assert!( !allowed );
  }

  #[tokio::test]
  async fn empty_role_set_denies_without_touching_the_store_again()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();

    let principal = sample_principal( tenant_id.clone(), HashSet::new() );
    clinic_store::principal_repo::create( pool, &principal ).await.unwrap();

    let allowed = authorize( pool, &cache, &tenant_id, &principal.id, "appointments", Action::Get ).await.unwrap();
    assert!( !allowed );
  }

  #[tokio::test]
  async fn absent_principal_is_forbidden_not_internal_error()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();

    let err = authorize( pool, &cache, &tenant_id, &clinic_types::PrincipalId::generate(), "appointments", Action::Get )
      .await
      .unwrap_err();
    assert_eq!( err.code(), "FORBIDDEN" );
  }

  #[tokio::test]
  async fn cache_hit_short_circuits_the_store()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();
    let principal_id = clinic_types::PrincipalId::generate();

    cache.set( &principal_id, "appointments", Action::Get, true ).await;

    // No principal row exists for this id; a store round trip would fail closed.
    let allowed = authorize( pool, &cache, &tenant_id, &principal_id, "appointments", Action::Get ).await.unwrap();
    assert!( allowed );
  }

  #[tokio::test]
  async fn invalidate_forces_a_fresh_resolution()
  {
    let db = seeded_pool().await;
    let pool = db.pool();
    let cache: Arc< dyn clinic_cache::RbacCache > = Arc::new( InMemoryRbacCache::new() );
    let tenant_id = TenantId::generate();
    let principal = sample_principal( tenant_id.clone(), HashSet::new() );
    clinic_store::principal_repo::create( pool, &principal ).await.unwrap();

    cache.set( &principal.id, "appointments", Action::Get, true ).await;
    invalidate( &cache, &principal.id ).await;

    let allowed = authorize( pool, &cache, &tenant_id, &principal.id, "appointments", Action::Get ).await.unwrap();
    assert!( !allowed );
  }
}
