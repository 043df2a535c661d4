//! The `subscribe` operation: move a tenant out of trial onto a paid plan
//! by creating a hosted checkout session with a payment provider (spec
//! §4.4 steps 1-7).

use crate::money::{ amount_minor_for_period, BillingPeriod };
use crate::provider::{ PaymentProvider, ProviderRegistry };
use chrono::Utc;
use clinic_reliability::{ retry, CircuitBreaker, CircuitError, RetryError, RetryPolicy };
use clinic_types::{ CoreError, CoreResult, Payment, PaymentId, PaymentStatus, PlanId, TenantId };
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Result of a successful `subscribe` call: where to send the tenant to
/// complete payment, and the id of the pending [`Payment`] row created to
/// track it.
#[derive( Debug, Clone )]
pub struct SubscribeOutcome
{
  pub checkout_url: String,
  pub payment_id: PaymentId,
}

/// Subscribe `tenant_id` to `plan_id` through `provider_name`, for one
/// `period`.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the tenant or plan does not exist,
/// [`CoreError::Conflict`] if the plan is not currently offered or the
/// tenant is not eligible to subscribe from its current state,
/// [`CoreError::InvalidInput`] if `provider_name` is not registered, or
/// whatever error the provider ultimately fails with once the
/// breaker/retry budget for its checkout call is exhausted.
#[allow( clippy::too_many_arguments )]
pub async fn subscribe(
  pool: &SqlitePool,
  registry: &ProviderRegistry,
  breaker: &CircuitBreaker,
  retry_policy: &RetryPolicy,
  cancel: &CancellationToken,
  tenant_id: &TenantId,
  plan_id: &PlanId,
  provider_name: &str,
  period: BillingPeriod,
) -> CoreResult< SubscribeOutcome >
{
  let tenant = clinic_store::tenant_repo::find_by_id( pool, tenant_id )
    .await?
    .ok_or_else( || CoreError::NotFound( format!( "tenant {tenant_id} not found" ) ) )?;

  if !tenant.is_usable()
  {
    return Err( CoreError::Conflict( "tenant is suspended or deleted".into() ) );
  }

  let plan = clinic_store::plan_repo::find_by_id( pool, plan_id )
    .await?
    .ok_or_else( || CoreError::NotFound( format!( "plan {plan_id} not found" ) ) )?;

  if !plan.is_visible
  {
    return Err( CoreError::Conflict( "plan is not currently offered".into() ) );
  }

  let provider = registry
    .get( provider_name )
    .ok_or_else( || CoreError::InvalidInput( format!( "unknown payment provider '{provider_name}'" ) ) )?;

  let amount_minor = amount_minor_for_period( &plan, period );
  let reference = tenant_id.as_str().to_string();
  let currency = plan.currency.clone();

  let checkout = breaker
    .execute( provider.name(), || {
      let provider = provider.clone();
      let currency = currency.clone();
      let reference = reference.clone();
      retry( retry_policy, cancel, move || {
        let provider = provider.clone();
        let currency = currency.clone();
        let reference = reference.clone();
        async move { provider.create_checkout( amount_minor, &currency, &reference ).await }
      } )
    } )
    .await
    .map_err( flatten_provider_error )?;

  let now = Utc::now();
  let payment = Payment
  {
    id: PaymentId::generate(),
    tenant_id: tenant_id.clone(),
    plan_id: plan_id.clone(),
    amount_minor,
    currency: plan.currency.clone(),
    provider: provider.name().to_string(),
    status: PaymentStatus::Pending,
    external_transaction_id: Some( checkout.external_id.clone() ),
    failure_reason: None,
    metadata: HashMap::new(),
    created_at: now,
    updated_at: now,
  };
  clinic_store::payment_repo::create( pool, &payment ).await?;

  clinic_store::tenant_repo::write_subscribe_result(
    pool,
    tenant_id,
    plan_id,
    provider.name(),
    &checkout.external_id,
    checkout.next_billing_at,
    amount_minor,
  )
  .await?;

  clinic_audit::record(
    pool,
    Some( tenant_id.clone() ),
    Some( tenant.owner_principal_id ),
    clinic_types::AuditEventKind::TenantSubscriptionInitiated,
    "subscribe",
    format!( "tenant subscribed to plan {plan_id} via {}", provider.name() ),
    HashMap::new(),
  )
  .await?;

  Ok( SubscribeOutcome { checkout_url: checkout.checkout_url, payment_id: payment.id } )
}

/// Collapse the breaker/retry error wrapping back down to the shared
/// taxonomy, so callers only ever see a plain [`CoreError`].
fn flatten_provider_error( err: CircuitError< RetryError< CoreError > > ) -> CoreError
{
  match err
  {
    CircuitError::Open => CoreError::upstream( anyhow::anyhow!( "payment provider circuit is open" ) ),
    CircuitError::Inner( RetryError::Exhausted( inner ) ) => inner,
    CircuitError::Inner( RetryError::Canceled ) =>
    {
      CoreError::internal( anyhow::anyhow!( "payment provider call canceled mid-retry" ) )
    }
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use crate::provider::{ CheckoutSession, NormalizedWebhookEvent, WebhookEventKind };
  use async_trait::async_trait;
  use clinic_test_db::TestDatabaseBuilder;
  use clinic_types::{ ContactBlock, SubscriptionBlock, Tenant, TenantStatus, UsageBlock };
  use std::sync::Arc;
  use std::sync::atomic::{ AtomicU32, Ordering };

  struct StubProvider
  {
    fail_times: AtomicU32,
  }

  #[async_trait]
  impl PaymentProvider for StubProvider
  {
    fn name( &self ) -> &'static str { "stub" }

    async fn create_checkout( &self, amount_minor: i64, currency: &str, reference: &str ) -> CoreResult< CheckoutSession >
    {
      if self.fail_times.load( Ordering::SeqCst ) > 0
      {
        self.fail_times.fetch_sub( 1, Ordering::SeqCst );
        return Err( CoreError::upstream( anyhow::anyhow!( "transient provider failure" ) ) );
      }
      Ok( CheckoutSession
      {
        external_id: format!( "stub_{reference}_{amount_minor}_{currency}" ),
        checkout_url: "https://pay.example/stub".into(),
        next_billing_at: Utc::now() + chrono::Duration::days( 30 ),
      } )
    }

    fn verify_signature( &self, _payload: &[ u8 ], _signature_header: &str ) -> CoreResult< () > { Ok( () ) }

    fn parse_event( &self, _payload: &[ u8 ] ) -> CoreResult< NormalizedWebhookEvent >
    {
      Ok( NormalizedWebhookEvent
      {
        provider: "stub",
        event_kind: WebhookEventKind::Ignored,
        external_subscription_id: None,
        external_transaction_id: None,
        raw_status: String::new(),
        amount_minor: None,
        currency: None,
        metadata: HashMap::new(),
      } )
    }
  }

  async fn seeded_tenant_and_plan( pool: &SqlitePool ) -> ( TenantId, PlanId )
  {
    let tenant_id = TenantId::generate();
    let owner_id = clinic_types::PrincipalId::generate();
    let tenant = Tenant
    {
      id: tenant_id.clone(),
      owner_principal_id: owner_id,
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

    let plan_id = PlanId::generate();
    let plan = clinic_types::Plan
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
    };
    clinic_store::plan_repo::upsert( pool, &plan ).await.unwrap();

    ( tenant_id, plan_id )
  }

  #[tokio::test]
  async fn subscribe_creates_a_pending_payment_and_checkout()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();
    let ( tenant_id, plan_id ) = seeded_tenant_and_plan( db.pool() ).await;

    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( StubProvider { fail_times: AtomicU32::new( 0 ) } ) );
    let breaker = CircuitBreaker::new( 3, 60 );
    let policy = RetryPolicy::default();
    let cancel = CancellationToken::new();

    let outcome = subscribe(
      db.pool(), &registry, &breaker, &policy, &cancel,
      &tenant_id, &plan_id, "stub", BillingPeriod::Monthly,
    )
    .await
    .unwrap();

    assert_eq!( outcome.checkout_url, "https://pay.example/stub" );

    let tenant = clinic_store::tenant_repo::find_by_id( db.pool(), &tenant_id ).await.unwrap().unwrap();
    assert_eq!( tenant.subscription.billing_status, clinic_types::BillingStatus::Pending );
  }

  #[tokio::test]
  async fn subscribe_retries_a_transient_provider_failure()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();
    let ( tenant_id, plan_id ) = seeded_tenant_and_plan( db.pool() ).await;

    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( StubProvider { fail_times: AtomicU32::new( 2 ) } ) );
    let breaker = CircuitBreaker::new( 5, 60 );
    let policy = RetryPolicy { max_attempts: 3, base: std::time::Duration::from_millis( 1 ), cap: std::time::Duration::from_millis( 2 ), ..RetryPolicy::default() };
    let cancel = CancellationToken::new();

    let outcome = subscribe(
      db.pool(), &registry, &breaker, &policy, &cancel,
      &tenant_id, &plan_id, "stub", BillingPeriod::Monthly,
    )
    .await
    .unwrap();

    assert!( outcome.checkout_url.starts_with( "https://pay.example" ) );
  }

  #[tokio::test]
  async fn subscribe_rejects_an_invisible_plan()
  {
    let db = TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();
    let ( tenant_id, plan_id ) = seeded_tenant_and_plan( db.pool() ).await;

    let mut plan = clinic_store::plan_repo::find_by_id( db.pool(), &plan_id ).await.unwrap().unwrap();
    plan.is_visible = false;
    clinic_store::plan_repo::upsert( db.pool(), &plan ).await.unwrap();

    let registry = ProviderRegistry::new()
      .with_provider( Arc::new( StubProvider { fail_times: AtomicU32::new( 0 ) } ) );
    let breaker = CircuitBreaker::new( 3, 60 );
    let policy = RetryPolicy::default();
    let cancel = CancellationToken::new();

    let err = subscribe(
      db.pool(), &registry, &breaker, &policy, &cancel,
      &tenant_id, &plan_id, "stub", BillingPeriod::Monthly,
    )
    .await
    .unwrap_err();

    assert_eq!( err.code(), "CONFLICT" );
  }
}
