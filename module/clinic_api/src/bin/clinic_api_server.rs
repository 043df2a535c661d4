//! Process entry point: load configuration once, apply migrations, build
//! the shared [`clinic_api::AppState`], and serve until shutdown.
//!
//! Configuration is loaded exactly once here and passed by value into
//! every component — nothing downstream reads the environment itself
//! (spec §9 Design Note "Configuration-as-global-process-state").

use clinic_api::{ build_router, AppState };
use clinic_config::{ AppConfig, AppEnv };
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Grace period given to in-flight requests once shutdown begins (spec
/// §5 "bounded grace period (default 10 s)").
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs( 10 );

#[tokio::main]
async fn main() -> anyhow::Result< () >
{
  let config = AppConfig::from_env()?;

  let tracing_env = match config.app_env
  {
    AppEnv::Production => clinic_telemetry::Environment::Production,
    AppEnv::Development | AppEnv::Test => clinic_telemetry::Environment::Development,
  };
  clinic_telemetry::init_tracing( tracing_env ).map_err( | err | anyhow::anyhow!( "failed to initialize tracing: {err}" ) )?;

  let pool = SqlitePoolOptions::new()
    .max_connections( config.database_max_connections )
    .connect( &config.database_url )
    .await?;
  clinic_store::apply_all_migrations( &pool ).await?;

  let port = config.port;
  let state = Arc::new( AppState::build( config, pool ).await );
  let cancel = state.cancel.clone();
  let app = build_router( Arc::clone( &state ) );

  let listener = tokio::net::TcpListener::bind( ( "0.0.0.0", port ) ).await?;
  tracing::info!( port, "clinic core listening" );

  axum::serve( listener, app )
    .with_graceful_shutdown( shutdown_signal( cancel ) )
    .await?;

  Ok( () )
}

/// Waits for Ctrl+C or SIGTERM, fires the shared cancellation token (so
/// any in-flight retry backoff unwinds promptly per spec §5), then lets
/// axum's own graceful-shutdown grace period finish draining connections.
async fn shutdown_signal( cancel: tokio_util::sync::CancellationToken )
{
  let ctrl_c = async {
    signal::ctrl_c().await.expect( "failed to install Ctrl+C handler" );
  };

  #[cfg( unix )]
  let terminate = async {
    signal::unix::signal( signal::unix::SignalKind::terminate() )
      .expect( "failed to install SIGTERM handler" )
      .recv()
      .await;
  };

  #[cfg( not( unix ) )]
  let terminate = std::future::pending::< () >();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }

  tracing::info!( "shutdown signal received, canceling in-flight work" );
  cancel.cancel();
  tokio::time::sleep( SHUTDOWN_GRACE_PERIOD ).await;
}
