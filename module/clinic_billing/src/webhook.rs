//! Webhook ingress: authenticate, de-duplicate, and apply a provider's
//! billing event to the tenant's subscription state machine (spec §4.4
//! steps 3-6, §5 Transitions, §9 Open Question (a): signature failures
//! are the only case the caller turns into a 401, everything downstream
//! of a verified signature is absorbed and still acknowledged with 200).

use crate::provider::{ PaymentProvider, ProviderRegistry, WebhookEventKind };
use clinic_types::{ AuditEventKind, BillingStatus, CoreError, CoreResult, PaymentStatus, Tenant };
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Authenticate and process one webhook delivery for `provider_name`.
///
/// # Errors
///
/// Returns [`CoreError::Unauthorized`] if the signature does not verify.
/// Every other failure once the signature has verified is logged and
/// swallowed — the caller should still answer the provider with 200, or
/// it will keep retrying a delivery this core has already recorded.
pub async fn ingest(
  pool: &SqlitePool,
  registry: &ProviderRegistry,
  provider_name: &str,
  payload: &[ u8 ],
  signature_header: &str,
) -> CoreResult< () >
{
  let Some( provider ) = registry.get( provider_name ) else
  {
    tracing::warn!( provider = provider_name, "webhook for unconfigured provider, ignoring" );
    return Ok( () );
  };

  provider.verify_signature( payload, signature_header )?;

  if let Err( err ) = apply_verified_event( pool, provider.as_ref(), payload ).await
  {
    tracing::warn!( provider = provider_name, error = %err, "webhook processing failed, acknowledging anyway" );
  }

  Ok( () )
}

async fn apply_verified_event( pool: &SqlitePool, provider: &dyn PaymentProvider, payload: &[ u8 ] ) -> CoreResult< () >
{
  let event = provider.parse_event( payload )?;

  if matches!( event.event_kind, WebhookEventKind::Ignored )
  {
    return Ok( () );
  }

  let Some( external_transaction_id ) = event.external_transaction_id.as_deref() else
  {
    return Ok( () );
  };

  let first_seen =
    clinic_store::seen_event_repo::mark_seen( pool, external_transaction_id, event.event_kind.dedup_key() ).await?;
  if !first_seen
  {
    tracing::debug!( external_transaction_id, "duplicate webhook delivery, already processed" );
    return Ok( () );
  }

  let Some( external_subscription_id ) = event.external_subscription_id.as_deref() else
  {
    return Ok( () );
  };

  let Some( tenant ) = clinic_store::tenant_repo::find_by_external_subscription_id( pool, external_subscription_id ).await?
  else
  {
    tracing::warn!( external_subscription_id, "webhook for unrecognized subscription, ignoring" );
    return Ok( () );
  };

  match event.event_kind
  {
    WebhookEventKind::PaymentSucceeded => on_payment_succeeded( pool, &tenant ).await,
    WebhookEventKind::PaymentFailed => on_payment_failed( pool, &tenant, &event.raw_status ).await,
    WebhookEventKind::SubscriptionCanceled => on_subscription_canceled( pool, &tenant ).await,
    WebhookEventKind::Ignored => Ok( () ),
  }?;

  acknowledge_payment( pool, external_transaction_id, &event.event_kind ).await;
  Ok( () )
}

async fn on_payment_succeeded( pool: &SqlitePool, tenant: &Tenant ) -> CoreResult< () >
{
  if tenant.subscription.billing_status != BillingStatus::Pending
  {
    return Ok( () );
  }

  let plan_id = tenant
    .subscription
    .plan_id
    .clone()
    .ok_or_else( || CoreError::internal( anyhow::anyhow!( "pending tenant has no plan assigned" ) ) )?;
  let plan = clinic_store::plan_repo::find_by_id( pool, &plan_id )
    .await?
    .ok_or_else( || CoreError::internal( anyhow::anyhow!( "plan {plan_id} referenced by tenant is missing" ) ) )?;

  clinic_store::tenant_repo::apply_billing_transition(
    pool,
    &tenant.id,
    BillingStatus::Pending,
    BillingStatus::Active,
    Some( ( plan.users_limit, plan.branches_limit, plan.storage_limit_mb ) ),
  )
  .await?;

  clinic_audit::record(
    pool,
    Some( tenant.id.clone() ),
    None,
    AuditEventKind::TenantSubscriptionActivated,
    "webhook_payment_succeeded",
    "subscription activated after successful payment",
    HashMap::new(),
  )
  .await?;

  Ok( () )
}

async fn on_payment_failed( pool: &SqlitePool, tenant: &Tenant, raw_status: &str ) -> CoreResult< () >
{
  let ( to, action, description ) = match tenant.subscription.billing_status
  {
    BillingStatus::Pending => ( BillingStatus::Canceled, "webhook_payment_failed", "checkout payment failed, subscription canceled" ),
    BillingStatus::Active => ( BillingStatus::PastDue, "webhook_payment_failed", "renewal payment failed, subscription marked past due" ),
    _ => return Ok( () ),
  };

  clinic_store::tenant_repo::apply_billing_transition( pool, &tenant.id, tenant.subscription.billing_status, to, None )
    .await?;

  let event_kind = if to == BillingStatus::Canceled
  {
    AuditEventKind::TenantSubscriptionCanceled
  }
  else
  {
    AuditEventKind::TenantSubscriptionPastDue
  };

  clinic_audit::record(
    pool,
    Some( tenant.id.clone() ),
    None,
    event_kind,
    action,
    format!( "{description} (provider status: {raw_status})" ),
    HashMap::new(),
  )
  .await?;

  Ok( () )
}

async fn on_subscription_canceled( pool: &SqlitePool, tenant: &Tenant ) -> CoreResult< () >
{
  if !matches!( tenant.subscription.billing_status, BillingStatus::Pending | BillingStatus::Active )
  {
    return Ok( () );
  }

  clinic_store::tenant_repo::apply_billing_transition(
    pool,
    &tenant.id,
    tenant.subscription.billing_status,
    BillingStatus::Canceled,
    None,
  )
  .await?;

  clinic_audit::record(
    pool,
    Some( tenant.id.clone() ),
    None,
    AuditEventKind::TenantSubscriptionCanceled,
    "webhook_subscription_canceled",
    "subscription canceled upstream at the provider",
    HashMap::new(),
  )
  .await?;

  Ok( () )
}

/// Best-effort mirror of the event onto the originating [`Payment`] row.
/// The payment this transaction id belongs to may not exist (a renewal
/// charge the checkout-time row never anticipated) — that is not grounds
/// to fail a webhook that has already been durably recorded as seen.
async fn acknowledge_payment( pool: &SqlitePool, external_transaction_id: &str, event_kind: &WebhookEventKind )
{
  let ( status, failure_reason ): ( PaymentStatus, Option< &str > ) = match event_kind
  {
    WebhookEventKind::PaymentSucceeded => ( PaymentStatus::Completed, None ),
    WebhookEventKind::PaymentFailed => ( PaymentStatus::Failed, Some( "payment declined by provider" ) ),
    WebhookEventKind::SubscriptionCanceled | WebhookEventKind::Ignored => return,
  };

  if let Err( err ) =
    clinic_store::payment_repo::update_status( pool, external_transaction_id, status, failure_reason ).await
  {
    tracing::debug!( external_transaction_id, error = %err, "no payment row to mirror this webhook onto" );
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use crate::provider::{ CheckoutSession, NormalizedWebhookEvent };
  use async_trait::async_trait;
  use clinic_test_db::TestDatabaseBuilder;
  use clinic_types::{ ContactBlock, Plan, PlanId, SubscriptionBlock, TenantId, TenantStatus, UsageBlock };
  use chrono::Utc;
  use std::sync::Arc;
  use std::sync::Mutex;

  struct ScriptedProvider
  {
    events: Mutex< Vec< NormalizedWebhookEvent > >,
  }

  #[async_trait]
  impl PaymentProvider for ScriptedProvider
  {
    fn name( &self ) -> &'static str { "scripted" }

    async fn create_checkout( &self, _amount_minor: i64, _currency: &str, _reference: &str ) -> CoreResult< CheckoutSession >
    {
      unimplemented!( "not exercised by webhook tests" )
    }

    fn verify_signature( &self, _payload: &[ u8 ], signature_header: &str ) -> CoreResult< () >
    {
      if signature_header == "valid" { Ok( () ) } else { Err( CoreError::Unauthorized ) }
    }

    fn parse_event( &self, _payload: &[ u8 ] ) -> CoreResult< NormalizedWebhookEvent >
    {
      Ok( self.events.lock().unwrap().remove( 0 ) )
    }
  }

  async fn seed_pending_tenant( pool: &SqlitePool, external_subscription_id: &str ) -> TenantId
  {
    let tenant_id = TenantId::generate();
    let plan_id = PlanId::generate();
    clinic_store::plan_repo::upsert( pool, &Plan
    {
      id: plan_id.clone(),
      display_name: "Pro".into(),
      monthly_price_minor: 490_000,
      annual_price_minor: 4_900_000,
      currency: "COP".into(),
      users_limit: 25,
      branches_limit: 5,
      storage_limit_mb: 10_240,
      features: vec![],
      is_visible: true,
    } )
    .await
    .unwrap();

    let tenant = Tenant
    {
      id: tenant_id.clone(),
      owner_principal_id: clinic_types::PrincipalId::generate(),
      display_name: "Acme Vet".into(),
      legal_name: "Acme Vet SAS".into(),
      contact: ContactBlock::default(),
      timezone: "America/Bogota".into(),
      currency: "COP".into(),
      domain: None,
      subscription: SubscriptionBlock::new_trial( Utc::now() + chrono::Duration::days( 14 ) ),
      usage: UsageBlock::trial_default(),
      status: TenantStatus::Trial,
      created_at: Utc::now(),
      deleted_at: None,
    };
    clinic_store::tenant_repo::create( pool, &tenant ).await.unwrap();
    clinic_store::tenant_repo::write_subscribe_result(
      pool, &tenant_id, &plan_id, "scripted", external_subscription_id, Utc::now() + chrono::Duration::days( 30 ), 490_000,
    )
    .await
    .unwrap();
    tenant_id
  }

  fn succeeded_event( external_subscription_id: &str, external_transaction_id: &str ) -> NormalizedWebhookEvent
  {
    NormalizedWebhookEvent
    {
      provider: "scripted",
      event_kind: WebhookEventKind::PaymentSucceeded,
      external_subscription_id: Some( external_subscription_id.into() ),
      external_transaction_id: Some( external_transaction_id.into() ),
      raw_status: "APPROVED".into(),
      amount_minor: Some( 490_000 ),
      currency: Some( "COP".into() ),
      metadata: HashMap::new(),
    }
  }

  #[tokio::test]
  async fn bad_signature_is_rejected_as_unauthorized()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();

    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( ScriptedProvider { events: Mutex::new( vec![] ) } ) );

    let err = ingest( db.pool(), &registry, "scripted", b"{}", "wrong" ).await.unwrap_err();
    assert!( matches!( err, CoreError::Unauthorized ) );
  }

  #[tokio::test]
  async fn unconfigured_provider_is_acknowledged_without_processing()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();

    let registry = ProviderRegistry::new();
    ingest( db.pool(), &registry, "nope", b"{}", "anything" ).await.unwrap();
  }

  #[tokio::test]
  async fn payment_succeeded_activates_a_pending_tenant()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = seed_pending_tenant( db.pool(), "sub_ext_1" ).await;
    let event = succeeded_event( "sub_ext_1", "txn_1" );
    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( ScriptedProvider { events: Mutex::new( vec![ event ] ) } ) );

    ingest( db.pool(), &registry, "scripted", b"{}", "valid" ).await.unwrap();

    let tenant = clinic_store::tenant_repo::find_by_id( db.pool(), &tenant_id ).await.unwrap().unwrap();
    assert_eq!( tenant.subscription.billing_status, BillingStatus::Active );
    assert_eq!( tenant.status, TenantStatus::Active );
  }

  #[tokio::test]
  async fn a_replayed_delivery_is_a_no_op_the_second_time()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();

    let tenant_id = seed_pending_tenant( db.pool(), "sub_ext_2" ).await;
    let events = vec![
      succeeded_event( "sub_ext_2", "txn_2" ),
      succeeded_event( "sub_ext_2", "txn_2" ),
    ];
    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( ScriptedProvider { events: Mutex::new( events ) } ) );

    ingest( db.pool(), &registry, "scripted", b"{}", "valid" ).await.unwrap();
    ingest( db.pool(), &registry, "scripted", b"{}", "valid" ).await.unwrap();

    let tenant = clinic_store::tenant_repo::find_by_id( db.pool(), &tenant_id ).await.unwrap().unwrap();
    assert_eq!( tenant.subscription.billing_status, BillingStatus::Active );
  }
}
