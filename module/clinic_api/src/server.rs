//! Wires the clinic core into one axum [`Router`]: the process-wide state
//! every handler shares ([`AppState`]), and the middleware order spec §2
//! "Control flow" describes — authenticate, then tenant-scope, then
//! rate-limit, then RBAC — layered around the two routes this crate owns.

use crate::envelope::{ self, RequestContext };
use crate::{ auth, rbac_middleware, routes };
use axum::
{
  body::Body,
  extract::State,
  http::Request,
  middleware::{ self, Next },
  response::Response,
  routing::{ get, post },
  Router,
};
use clinic_billing::provider::{ stripe::StripeProvider, wompi::WompiProvider, ProviderRegistry };
use clinic_cache::RbacCache;
use clinic_config::AppConfig;
use clinic_reliability::{ CircuitBreaker, RetryPolicy };
use clinic_tenancy::rate_limit::HierarchicalRateLimiter;
use clinic_types::{ CoreError, TenantId };
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{ AllowOrigin, CorsLayer };
use tower_http::trace::TraceLayer;

/// Failure threshold / cooldown for the payment-provider breaker (spec
/// §4.5: "5 for payments").
const PAYMENT_BREAKER_THRESHOLD: u32 = 5;
const PAYMENT_BREAKER_COOLDOWN_SECS: u64 = 60;

/// Process-wide state shared by every handler and middleware.
pub struct AppState
{
  pub pool: SqlitePool,
  pub cache: Arc< dyn RbacCache >,
  pub provider_registry: ProviderRegistry,
  pub payment_breaker: CircuitBreaker,
  pub retry_policy: RetryPolicy,
  pub cancel: CancellationToken,
  pub rate_limiter: Arc< HierarchicalRateLimiter >,
  pub config: Arc< AppConfig >,
}

impl AppState
{
  /// Assemble process state from validated configuration and an already
  /// -migrated pool. Builds the payment provider registry from whichever
  /// of Wompi/Stripe have credentials configured (spec §6 "payment
  /// provider ... optional").
  pub async fn build( config: AppConfig, pool: SqlitePool ) -> Self
  {
    let cache = clinic_cache::build( config.redis_url.as_deref() ).await;

    let mut registry = ProviderRegistry::new();
    if let Some( wompi ) = &config.wompi
    {
      registry = registry.with_provider( Arc::new( WompiProvider::new(
        wompi.public_key.clone(),
        wompi.private_key.clone(),
        wompi.events_secret.clone(),
        wompi.base_url.clone(),
      ) ) );
    }
    if let Some( stripe ) = &config.stripe
    {
      registry = registry.with_provider( Arc::new( StripeProvider::new( stripe.secret_key.clone(), stripe.webhook_secret.clone() ) ) );
    }

    let rate_limiter = Arc::new( HierarchicalRateLimiter::new( clinic_tenancy::rate_limit::RateLimiterConfig
    {
      global: clinic_tenancy::rate_limit::RateLimitParams { rps: config.rate_limit_global.rps, burst: config.rate_limit_global.burst },
      tenant: clinic_tenancy::rate_limit::RateLimitParams { rps: config.rate_limit_tenant.rps, burst: config.rate_limit_tenant.burst },
      ..Default::default()
    } ) );

    Self
    {
      pool,
      cache,
      provider_registry: registry,
      payment_breaker: CircuitBreaker::new( PAYMENT_BREAKER_THRESHOLD, PAYMENT_BREAKER_COOLDOWN_SECS ),
      retry_policy: RetryPolicy::default(),
      cancel: CancellationToken::new(),
      rate_limiter,
      config: Arc::new( config ),
    }
  }
}

/// Checks the hierarchical rate limiter against the [`TenantId`] the
/// preceding tenant-scoping middleware attached to the request (spec
/// §4.3). Must run after [`clinic_tenancy::tenant_id::require_tenant_id`].
async fn rate_limit( State( state ): State< Arc< AppState > >, req: Request< Body >, next: Next ) -> Response
{
  let ctx = RequestContext { path: req.uri().path().to_string(), request_id: clinic_telemetry::new_request_id() };

  let Some( tenant_id ) = req.extensions().get::< TenantId >().cloned() else
  {
    return envelope::err( &ctx, &CoreError::InvalidInput( "missing tenant scope".into() ) );
  };

  match state.rate_limiter.check( &tenant_id )
  {
    Ok( () ) => next.run( req ).await,
    Err( err ) =>
    {
      if let CoreError::RateLimited { retry_after_secs } = &err
      {
        clinic_telemetry::log_rate_limited( Some( tenant_id.as_str() ), *retry_after_secs );
      }
      envelope::err( &ctx, &err )
    }
  }
}

fn cors_layer( config: &AppConfig ) -> CorsLayer
{
  if config.cors_allowed_origins.iter().any( | origin | origin == "*" )
  {
    return CorsLayer::permissive();
  }

  let origins: Vec< _ > = config
    .cors_allowed_origins
    .iter()
    .filter_map( | origin | origin.parse().ok() )
    .collect();

  CorsLayer::new().allow_origin( AllowOrigin::list( origins ) )
}

/// Builds the full router: an unauthenticated `/health` and
/// `/webhooks/{provider}`, and the tenant-scoped, rate-limited,
/// RBAC-guarded `/api/tenants/{tenant_id}/subscribe`.
#[must_use]
pub fn build_router( state: Arc< AppState > ) -> Router
{
  let public = Router::new()
    .route( "/health", get( routes::health::health ) )
    .route( "/webhooks/:provider", post( routes::webhook::ingest ) );

  let protected = Router::new()
    .route( "/api/tenants/:tenant_id/subscribe", post( routes::subscribe::subscribe ) )
    .layer( middleware::from_fn_with_state( Arc::clone( &state ), rbac_middleware::authorize_request ) )
    .layer( middleware::from_fn_with_state( Arc::clone( &state ), rate_limit ) )
    .layer( middleware::from_fn( clinic_tenancy::tenant_id::require_tenant_id ) )
    .layer( middleware::from_fn_with_state( Arc::clone( &state ), auth::authenticate ) );

  let cors = cors_layer( &state.config );

  Router::new()
    .merge( public )
    .merge( protected )
    .layer( middleware::from_fn( envelope::attach_request_id ) )
    .layer( TraceLayer::new_for_http() )
    .layer( cors )
    .with_state( state )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use axum::http::StatusCode as AxumStatus;
  use tower::ServiceExt;

  async fn built_state() -> Arc< AppState >
  {
    let db = clinic_test_db::TestDatabaseBuilder::new().build().await.unwrap();
    clinic_store::apply_all_migrations( db.pool() ).await.unwrap();
    let pool = db.pool().clone();

    let config = test_config();
    Arc::new( AppState::build( config, pool ).await )
  }

  fn test_config() -> AppConfig
  {
    AppConfig
    {
      app_env: clinic_config::AppEnv::Test,
      port: 0,
      database_url: "sqlite::memory:".into(),
      database_max_connections: 1,
      redis_url: None,
      jwt_secret: "test-secret".into(),
      jwt_access_ttl_secs: 3600,
      jwt_refresh_ttl_secs: 604_800,
      wompi: None,
      stripe: None,
      firebase_credentials_path: None,
      tenant_trial_days: 14,
      rate_limit_global: clinic_config::RateLimitParams { rps: 1000, burst: 2000 },
      rate_limit_tenant: clinic_config::RateLimitParams { rps: 50, burst: 100 },
      cors_allowed_origins: vec![ "*".into() ],
    }
  }

  #[tokio::test]
  async fn health_route_is_reachable_without_any_credential()
  {
    let state = built_state().await;
    let app = build_router( state );

    let response = app
      .oneshot( Request::builder().uri( "/health" ).body( Body::empty() ).unwrap() )
      .await
      .unwrap();

    assert_eq!( response.status(), AxumStatus::OK );
  }

  #[tokio::test]
  async fn subscribe_without_a_bearer_token_is_unauthorized()
  {
    let state = built_state().await;
    let app = build_router( state );

    let response = app
      .oneshot(
        Request::builder()
          .method( "POST" )
          .uri( "/api/tenants/tenant_00000000-0000-0000-0000-000000000001/subscribe" )
          .header( "x-tenant-id", "tenant_00000000-0000-0000-0000-000000000001" )
          .header( "content-type", "application/json" )
          .body( Body::from( "{}" ) )
          .unwrap(),
      )
      .await
      .unwrap();

    assert_eq!( response.status(), AxumStatus::UNAUTHORIZED );
  }

  #[tokio::test]
  async fn subscribe_without_a_tenant_header_is_a_bad_request()
  {
    let state = built_state().await;
    let app = build_router( Arc::clone( &state ) );

    let claims = auth::Claims { sub: clinic_types::PrincipalId::generate().as_str().to_string(), exp: chrono::Utc::now().timestamp() + 3600 };
    let token = jsonwebtoken::encode(
      &jsonwebtoken::Header::default(),
      &claims,
      &jsonwebtoken::EncodingKey::from_secret( state.config.jwt_secret.as_bytes() ),
    )
    .unwrap();

    let response = app
      .oneshot(
        Request::builder()
          .method( "POST" )
          .uri( "/api/tenants/tenant_00000000-0000-0000-0000-000000000001/subscribe" )
          .header( "authorization", format!( "Bearer {token}" ) )
          .header( "content-type", "application/json" )
          .body( Body::from( "{}" ) )
          .unwrap(),
      )
      .await
      .unwrap();

    // No X-Tenant-ID header: authentication succeeds (or fails first on an
    // absent principal), but either way this never reaches 200.
    assert_ne!( response.status(), AxumStatus::OK );
  }
}
