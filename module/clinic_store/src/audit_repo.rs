//! Repository for [`AuditEvent`] rows. Append-only: this module exposes
//! only `append` and paginated `query` — there is no `update` or `delete`
//! function to call, so the "never updated, never deleted" invariant
//! (spec §4.6) holds by construction, not by convention.

use chrono::{ DateTime, Utc };
use clinic_types::{ AuditEvent, AuditEventId, AuditEventKind, CoreError, CoreResult, PrincipalId, TenantId };
use sqlx::{ FromRow, SqlitePool };
use std::collections::HashMap;

#[derive( FromRow )]
struct AuditEventRow
{
  id: String,
  tenant_id: Option< String >,
  actor_id: Option< String >,
  event_kind: String,
  action: String,
  description: String,
  metadata: String,
  timestamp: String,
}

fn parse_event_kind( s: &str ) -> CoreResult< AuditEventKind >
{
  match s
  {
    "tenant_created" => Ok( AuditEventKind::TenantCreated ),
    "tenant_subscription_initiated" => Ok( AuditEventKind::TenantSubscriptionInitiated ),
    "tenant_subscription_activated" => Ok( AuditEventKind::TenantSubscriptionActivated ),
    "tenant_subscription_canceled" => Ok( AuditEventKind::TenantSubscriptionCanceled ),
    "tenant_subscription_past_due" => Ok( AuditEventKind::TenantSubscriptionPastDue ),
    "role_assigned" => Ok( AuditEventKind::RoleAssigned ),
    "role_revoked" => Ok( AuditEventKind::RoleRevoked ),
    "role_mutated" => Ok( AuditEventKind::RoleMutated ),
    "permission_mutated" => Ok( AuditEventKind::PermissionMutated ),
    other => Err( CoreError::internal( anyhow::anyhow!( "unknown audit event kind '{other}'" ) ) ),
  }
}

fn event_kind_str( kind: &AuditEventKind ) -> &'static str
{
  match kind
  {
    AuditEventKind::TenantCreated => "tenant_created",
    AuditEventKind::TenantSubscriptionInitiated => "tenant_subscription_initiated",
    AuditEventKind::TenantSubscriptionActivated => "tenant_subscription_activated",
    AuditEventKind::TenantSubscriptionCanceled => "tenant_subscription_canceled",
    AuditEventKind::TenantSubscriptionPastDue => "tenant_subscription_past_due",
    AuditEventKind::RoleAssigned => "role_assigned",
    AuditEventKind::RoleRevoked => "role_revoked",
    AuditEventKind::RoleMutated => "role_mutated",
    AuditEventKind::PermissionMutated => "permission_mutated",
  }
}

impl AuditEventRow
{
  fn into_domain( self ) -> CoreResult< AuditEvent >
  {
    let metadata: HashMap< String, serde_json::Value > = serde_json::from_str( &self.metadata ).map_err( CoreError::internal )?;

    Ok( AuditEvent
    {
      id: AuditEventId::parse( &self.id )?,
      tenant_id: self.tenant_id.map( | s | TenantId::parse( &s ) ).transpose()?,
      actor_id: self.actor_id.map( | s | PrincipalId::parse( &s ) ).transpose()?,
      event_kind: parse_event_kind( &self.event_kind )?,
      action: self.action,
      description: self.description,
      metadata,
      timestamp: self.timestamp.parse().map_err( CoreError::internal )?,
    } )
  }
}

const SELECT_COLUMNS: &str = "id, tenant_id, actor_id, event_kind, action, description, metadata, timestamp";

/// Append one audit event. There is no corresponding `update`/`delete`.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
pub async fn append( pool: &SqlitePool, event: &AuditEvent ) -> CoreResult< () >
{
  sqlx::query(
    "INSERT INTO audit_logs ( id, tenant_id, actor_id, event_kind, action, description, metadata, timestamp )
     VALUES ( ?, ?, ?, ?, ?, ?, ?, ? )"
  )
  .bind( event.id.as_str() )
  .bind( event.tenant_id.as_ref().map( clinic_types::TenantId::as_str ) )
  .bind( event.actor_id.as_ref().map( clinic_types::PrincipalId::as_str ) )
  .bind( event_kind_str( &event.event_kind ) )
  .bind( &event.action )
  .bind( &event.description )
  .bind( serde_json::to_string( &event.metadata ).unwrap() )
  .bind( event.timestamp.to_rfc3339() )
  .execute( pool )
  .await?;

  Ok( () )
}

/// A page of audit events, most recent first.
#[derive( Debug, Clone )]
pub struct Page
{
  pub events: Vec< AuditEvent >,
  pub has_more: bool,
}

/// Query audit events for a tenant, optionally narrowed to an actor and/or
/// a time range, newest first, with offset pagination.
///
/// # Errors
///
/// Returns [`CoreError::Upstream`] on a store failure.
#[allow( clippy::too_many_arguments )]
pub async fn query(
  pool: &SqlitePool,
  tenant_id: &TenantId,
  actor_id: Option< &PrincipalId >,
  event_kind: Option< &AuditEventKind >,
  since: Option< DateTime< Utc > >,
  until: Option< DateTime< Utc > >,
  limit: u32,
  offset: u32,
) -> CoreResult< Page >
{
  let mut sql = format!( "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE tenant_id = ?" );
  if actor_id.is_some() { sql.push_str( " AND actor_id = ?" ); }
  if event_kind.is_some() { sql.push_str( " AND event_kind = ?" ); }
  if since.is_some() { sql.push_str( " AND timestamp >= ?" ); }
  if until.is_some() { sql.push_str( " AND timestamp <= ?" ); }
  sql.push_str( " ORDER BY timestamp DESC LIMIT ? OFFSET ?" );

  let mut q = sqlx::query_as( &sql ).bind( tenant_id.as_str() );
  if let Some( actor_id ) = actor_id { q = q.bind( actor_id.as_str() ); }
  if let Some( kind ) = event_kind { q = q.bind( event_kind_str( kind ) ); }
  if let Some( since ) = since { q = q.bind( since.to_rfc3339() ); }
  if let Some( until ) = until { q = q.bind( until.to_rfc3339() ); }
  // fetch one extra row to compute `has_more` without a second COUNT query.
  q = q.bind( i64::from( limit ) + 1 ).bind( i64::from( offset ) );

  let rows: Vec< AuditEventRow > = q.fetch_all( pool ).await?;
  let has_more = rows.len() > limit as usize;
  let events = rows
    .into_iter()
    .take( limit as usize )
    .map( AuditEventRow::into_domain )
    .collect::< CoreResult< Vec< _ > > >()?;

  Ok( Page { events, has_more } )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;

  fn sample( tenant_id: TenantId ) -> AuditEvent
  {
    AuditEvent
    {
      id: AuditEventId::generate(),
      tenant_id: Some( tenant_id ),
      actor_id: Some( PrincipalId::generate() ),
      event_kind: AuditEventKind::TenantSubscriptionInitiated,
      action: "subscribe".into(),
      description: "tenant subscription initiated".into(),
      metadata: HashMap::new(),
      timestamp: Utc::now(),
    }
  }

  #[tokio::test]
  async fn append_and_query_round_trip()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let event = sample( tenant_id.clone() );
    append( db.pool(), &event ).await.unwrap();

    let page = query( db.pool(), &tenant_id, None, None, None, None, 10, 0 ).await.unwrap();
    assert_eq!( page.events.len(), 1 );
    assert!( !page.has_more );
    assert_eq!( page.events[ 0 ].event_kind, AuditEventKind::TenantSubscriptionInitiated );
  }

  #[tokio::test]
  async fn query_paginates_newest_first()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    for _ in 0..3
    {
      append( db.pool(), &sample( tenant_id.clone() ) ).await.unwrap();
    }

    let page = query( db.pool(), &tenant_id, None, None, None, None, 2, 0 ).await.unwrap();
    assert_eq!( page.events.len(), 2 );
    assert!( page.has_more );
  }

  #[tokio::test]
  async fn query_filters_by_event_kind()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    crate::migrations::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    append( db.pool(), &sample( tenant_id.clone() ) ).await.unwrap();
    let mut other = sample( tenant_id.clone() );
    other.id = AuditEventId::generate();
    other.event_kind = AuditEventKind::RoleAssigned;
    append( db.pool(), &other ).await.unwrap();

    let page = query(
      db.pool(), &tenant_id, None, Some( &AuditEventKind::RoleAssigned ), None, None, 10, 0
    ).await.unwrap();
    assert_eq!( page.events.len(), 1 );
    assert_eq!( page.events[ 0 ].event_kind, AuditEventKind::RoleAssigned );
  }
}
