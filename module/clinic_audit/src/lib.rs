//! Append-only audit trail for tenant lifecycle and RBAC mutation events.
//!
//! A thin wrapper over [`clinic_store::audit_repo`]: this crate exists so
//! callers depend on an audit *contract* (`record`/`history`) rather than
//! reaching into the store directly, while the actual append-only
//! guarantee — no `update`, no `delete` — lives in the repository itself
//! (spec §4.6).

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod implementation
{
  use chrono::{ DateTime, Utc };
  use clinic_store::audit_repo;
  use clinic_types::{ AuditEvent, AuditEventId, AuditEventKind, CoreResult, PrincipalId, TenantId };
  use sqlx::SqlitePool;
  use std::collections::HashMap;

  pub use audit_repo::Page;

  /// Record an audit event. Callers supply the classifying
  /// [`AuditEventKind`], a short human-readable `action`, a longer
  /// `description`, and free-form `metadata` — the timestamp and id are
  /// assigned here so every recorded event is self-consistent.
  ///
  /// # Errors
  ///
  /// Returns a [`clinic_types::CoreError`] if the write fails.
  #[allow( clippy::too_many_arguments )]
  pub async fn record(
    pool: &SqlitePool,
    tenant_id: Option< TenantId >,
    actor_id: Option< PrincipalId >,
    event_kind: AuditEventKind,
    action: impl Into< String >,
    description: impl Into< String >,
    metadata: HashMap< String, serde_json::Value >,
  ) -> CoreResult< AuditEvent >
  {
    let event = AuditEvent
    {
      id: AuditEventId::generate(),
      tenant_id,
      actor_id,
      event_kind,
      action: action.into(),
      description: description.into(),
      metadata,
      timestamp: Utc::now(),
    };

    audit_repo::append( pool, &event ).await?;
    tracing::debug!( event_id = %event.id, event_kind = ?event.event_kind, "audit event recorded" );
    Ok( event )
  }

  /// Fetch a tenant's audit history, newest first, optionally narrowed to
  /// an actor, an event kind, and/or a time range.
  ///
  /// # Errors
  ///
  /// Returns a [`clinic_types::CoreError`] if the query fails.
  #[allow( clippy::too_many_arguments )]
  pub async fn history(
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
    audit_repo::query( pool, tenant_id, actor_id, event_kind, since, until, limit, offset ).await
  }
}

#[cfg(feature = "enabled")]
pub use implementation::*;

#[cfg(test)]
mod tests
{
  use super::*;
  use clinic_test_db::TestDatabaseBuilder;
  use clinic_types::{ AuditEventKind, PrincipalId, TenantId };
  use std::collections::HashMap;

  #[tokio::test]
  async fn record_then_history_round_trips()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = TenantId::generate();
    let actor_id = PrincipalId::generate();

    record(
      db.pool(),
      Some( tenant_id.clone() ),
      Some( actor_id ),
      AuditEventKind::TenantCreated,
      "create_tenant",
      "tenant created via admin console",
      HashMap::new(),
    )
    .await
    .unwrap();

    let page = history( db.pool(), &tenant_id, None, None, None, None, 10, 0 ).await.unwrap();
    assert_eq!( page.events.len(), 1 );
    assert_eq!( page.events[ 0 ].event_kind, AuditEventKind::TenantCreated );
  }
}
