//! The clinic core's top-level application configuration
//!
//! One `AppConfig` is built once at process start via [`AppConfig::from_env`]
//! and passed by value into every component constructor — it is never read
//! inside a request handler. Required keys are validated eagerly so a
//! misconfigured deployment fails at startup, not on the first request that
//! happens to touch the missing value.

use crate::error::{ ConfigError, Result };
use serde::{ Deserialize, Serialize };

/// Deployment environment
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum AppEnv
{
  Development,
  Test,
  Production,
}

impl AppEnv
{
  fn parse( raw: &str ) -> Self
  {
    match raw.to_ascii_lowercase().as_str()
    {
      "production" | "prod" => Self::Production,
      "test" => Self::Test,
      _ => Self::Development,
    }
  }
}

/// Rate-limit bucket parameters (requests-per-second and burst capacity)
#[derive( Debug, Clone, Copy, Serialize, Deserialize )]
pub struct RateLimitParams
{
  pub rps: u32,
  pub burst: u32,
}

/// Wompi payment provider credentials
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct WompiConfig
{
  pub public_key: String,
  pub private_key: String,
  pub events_secret: String,
  pub base_url: String,
}

/// Stripe payment provider credentials
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct StripeConfig
{
  pub secret_key: String,
  pub webhook_secret: String,
}

/// The complete, validated configuration for a running clinic core process.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct AppConfig
{
  pub app_env: AppEnv,
  pub port: u16,

  pub database_url: String,
  pub database_max_connections: u32,

  pub redis_url: Option< String >,

  pub jwt_secret: String,
  pub jwt_access_ttl_secs: u64,
  pub jwt_refresh_ttl_secs: u64,

  pub wompi: Option< WompiConfig >,
  pub stripe: Option< StripeConfig >,

  pub firebase_credentials_path: Option< String >,

  pub tenant_trial_days: u32,

  pub rate_limit_global: RateLimitParams,
  pub rate_limit_tenant: RateLimitParams,

  pub cors_allowed_origins: Vec< String >,
}

fn env_required( key: &str ) -> Result< String >
{
  std::env::var( key ).map_err( | _ | ConfigError::MissingKey( key.to_string() ) )
}

fn env_opt( key: &str ) -> Option< String >
{
  std::env::var( key ).ok().filter( | v | !v.is_empty() )
}

fn env_parsed< T: std::str::FromStr >( key: &str, default: T ) -> Result< T >
{
  match env_opt( key )
  {
    None => Ok( default ),
    Some( raw ) => raw.parse::< T >().map_err( | _ | ConfigError::EnvParseError
    {
      var: key.to_string(),
      error: "failed to parse value".to_string(),
    } ),
  }
}

impl AppConfig
{
  /// Build configuration from process environment variables, failing fast
  /// if a required key is missing or malformed.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigError::MissingKey`] if a required variable is absent,
  /// or [`ConfigError::EnvParseError`] if a numeric variable cannot be parsed.
  pub fn from_env() -> Result< Self >
  {
    let _ = dotenvy::dotenv();

    let app_env = AppEnv::parse( &env_opt( "APP_ENV" ).unwrap_or_else( || "development".into() ) );
    let port = env_parsed( "PORT", 8080u16 )?;

    let database_url = env_opt( "DATABASE_URL" )
      .unwrap_or_else( || "sqlite://clinic_core.db?mode=rwc".to_string() );
    let database_max_connections = env_parsed( "DATABASE_MAX_CONNECTIONS", 5u32 )?;

    let redis_url = env_opt( "REDIS_URL" );

    let jwt_secret = if app_env == AppEnv::Production
    {
      env_required( "JWT_SECRET" )?
    }
    else
    {
      env_opt( "JWT_SECRET" ).unwrap_or_else( || "development-only-secret".to_string() )
    };
    let jwt_access_ttl_secs = env_parsed( "JWT_ACCESS_TTL_SECS", 900u64 )?;
    let jwt_refresh_ttl_secs = env_parsed( "JWT_REFRESH_TTL_SECS", 1_209_600u64 )?;

    let wompi = match (
      env_opt( "WOMPI_PUBLIC_KEY" ),
      env_opt( "WOMPI_PRIVATE_KEY" ),
      env_opt( "WOMPI_EVENTS_SECRET" ),
    )
    {
      ( Some( public_key ), Some( private_key ), Some( events_secret ) ) => Some( WompiConfig
      {
        public_key,
        private_key,
        events_secret,
        base_url: env_opt( "WOMPI_BASE_URL" )
          .unwrap_or_else( || "https://production.wompi.co/v1".to_string() ),
      } ),
      _ => None,
    };

    let stripe = match ( env_opt( "STRIPE_SECRET_KEY" ), env_opt( "STRIPE_WEBHOOK_SECRET" ) )
    {
      ( Some( secret_key ), Some( webhook_secret ) ) => Some( StripeConfig { secret_key, webhook_secret } ),
      _ => None,
    };

    let firebase_credentials_path = env_opt( "FIREBASE_CREDENTIALS_PATH" );

    let tenant_trial_days = env_parsed( "TENANT_TRIAL_DAYS", 14u32 )?;

    let rate_limit_global = RateLimitParams
    {
      rps: env_parsed( "RATE_LIMIT_GLOBAL_RPS", 1000u32 )?,
      burst: env_parsed( "RATE_LIMIT_GLOBAL_BURST", 2000u32 )?,
    };
    let rate_limit_tenant = RateLimitParams
    {
      rps: env_parsed( "RATE_LIMIT_TENANT_RPS", 50u32 )?,
      burst: env_parsed( "RATE_LIMIT_TENANT_BURST", 100u32 )?,
    };

    let cors_allowed_origins = env_opt( "CORS_ALLOWED_ORIGINS" )
      .map( | raw | raw.split( ',' ).map( | s | s.trim().to_string() ).collect() )
      .unwrap_or_default();

    Ok( Self
    {
      app_env,
      port,
      database_url,
      database_max_connections,
      redis_url,
      jwt_secret,
      jwt_access_ttl_secs,
      jwt_refresh_ttl_secs,
      wompi,
      stripe,
      firebase_credentials_path,
      tenant_trial_days,
      rate_limit_global,
      rate_limit_tenant,
      cors_allowed_origins,
    } )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use std::sync::Mutex;

  // Environment variables are process-global; serialize tests that touch them.
  static ENV_LOCK: Mutex< () > = Mutex::new( () );

  #[test]
  fn defaults_apply_when_unset()
  {
    let _guard = ENV_LOCK.lock().unwrap();
    for key in [ "APP_ENV", "PORT", "DATABASE_URL", "JWT_SECRET" ]
    {
      std::env::remove_var( key );
    }

    let config = AppConfig::from_env().unwrap();
    assert_eq!( config.app_env, AppEnv::Development );
    assert_eq!( config.port, 8080 );
    assert_eq!( config.jwt_secret, "development-only-secret" );
  }

  #[test]
  fn production_requires_jwt_secret()
  {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var( "APP_ENV", "production" );
    std::env::remove_var( "JWT_SECRET" );

    let result = AppConfig::from_env();
    assert!( result.is_err() );

    std::env::remove_var( "APP_ENV" );
  }

  #[test]
  fn wompi_config_requires_all_three_keys()
  {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::remove_var( "APP_ENV" );
    std::env::set_var( "WOMPI_PUBLIC_KEY", "pub_test_abc" );
    std::env::remove_var( "WOMPI_PRIVATE_KEY" );
    std::env::remove_var( "WOMPI_EVENTS_SECRET" );

    let config = AppConfig::from_env().unwrap();
    assert!( config.wompi.is_none() );

    std::env::remove_var( "WOMPI_PUBLIC_KEY" );
  }
}
