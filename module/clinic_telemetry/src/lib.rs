//! Centralized logging and tracing abstraction for the clinic core
//!
//! Provides unified logging infrastructure across all clinic crates:
//! - Structured logging with `tracing`
//! - JSON output in production, pretty output in development
//! - Log level configuration via `RUST_LOG`/`EnvFilter`
//! - Domain-event helpers (tenant lifecycle, webhook handling, rate limiting)

#![cfg_attr(not(feature = "enabled"), allow(unused_variables, dead_code))]

#[cfg(feature = "enabled")]
mod implementation
{
  use tracing_subscriber::{ fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

  /// Deployment environment, selects the log formatter.
  ///
  /// Mirrors `AppConfig.app_env` (`clinic_config`) without introducing a
  /// dependency on it — this crate must be initializable before
  /// configuration is fully loaded, so it takes the parsed value directly.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum Environment
  {
    Development,
    Production,
  }

  /// Initialize the global tracing subscriber.
  ///
  /// Call once at process start. In [`Environment::Production`], logs are
  /// emitted as JSON (one object per line, suitable for ingestion by a log
  /// pipeline); in [`Environment::Development`], logs use the pretty
  /// human-readable formatter. The filter defaults to `info` and honors
  /// `RUST_LOG` when set.
  pub fn init_tracing(environment: Environment) -> Result<(), Box<dyn std::error::Error>>
  {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match environment
    {
      Environment::Production =>
      {
        let registry = tracing_subscriber::registry()
          .with(filter)
          .with(fmt::layer().json().with_target(true).with_current_span(true));
        registry.try_init()?;
      }
      Environment::Development =>
      {
        let registry = tracing_subscriber::registry()
          .with(filter)
          .with(fmt::layer().pretty().with_target(false));
        registry.try_init()?;
      }
    }

    Ok(())
  }

  /// Generate a request-scoped identifier suitable for the `request_id`
  /// span field propagated into the HTTP response envelope.
  #[must_use]
  pub fn new_request_id() -> String
  {
    uuid::Uuid::new_v4().to_string()
  }

  /// Log a tenant lifecycle event (creation, subscription, suspension).
  pub fn log_tenant_event(tenant_id: &str, event: &str)
  {
    tracing::info!(
      tenant_id = %tenant_id,
      event = %event,
      "tenant lifecycle event"
    );
  }

  /// Log an inbound payment-webhook event. Always logged, even when the
  /// webhook handler swallows the error to keep returning 200 to the
  /// provider — this is the only record of what actually happened.
  pub fn log_webhook_event(provider: &str, event_kind: &str, outcome: &str)
  {
    tracing::info!(
      provider = %provider,
      event_kind = %event_kind,
      outcome = %outcome,
      "payment webhook processed"
    );
  }

  /// Log a webhook-handler error that was absorbed to preserve the
  /// at-least-once-delivery contract (handler still answers 200).
  pub fn log_webhook_error(provider: &str, error: &dyn std::fmt::Display)
  {
    tracing::error!(
      provider = %provider,
      error = %error,
      "payment webhook handler error (absorbed, responding 200)"
    );
  }

  /// Log a rate-limit rejection.
  pub fn log_rate_limited(tenant_id: Option<&str>, retry_after_secs: u64)
  {
    tracing::warn!(
      tenant_id = tenant_id.unwrap_or("global"),
      retry_after_secs = retry_after_secs,
      "request rate limited"
    );
  }

  /// Log a circuit breaker state transition.
  pub fn log_circuit_transition(service: &str, from: &str, to: &str)
  {
    tracing::warn!(
      service = %service,
      from = %from,
      to = %to,
      "circuit breaker state transition"
    );
  }
}

#[cfg(feature = "enabled")]
pub use implementation::*;

#[cfg(not(feature = "enabled"))]
mod stub
{
  /// Stub environment for disabled feature
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum Environment
  {
    Development,
    Production,
  }

  /// Stub init function
  pub fn init_tracing(_environment: Environment) -> Result<(), Box<dyn std::error::Error>>
  {
    Ok(())
  }

  /// Stub id generator
  pub fn new_request_id() -> String
  {
    String::new()
  }

  /// Stub log function
  pub fn log_tenant_event(_tenant_id: &str, _event: &str) {}
  /// Stub log function
  pub fn log_webhook_event(_provider: &str, _event_kind: &str, _outcome: &str) {}
  /// Stub log function
  pub fn log_webhook_error(_provider: &str, _error: &dyn std::fmt::Display) {}
  /// Stub log function
  pub fn log_rate_limited(_tenant_id: Option<&str>, _retry_after_secs: u64) {}
  /// Stub log function
  pub fn log_circuit_transition(_service: &str, _from: &str, _to: &str) {}
}

#[cfg(not(feature = "enabled"))]
pub use stub::*;

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn request_ids_are_unique()
  {
    let a = new_request_id();
    let b = new_request_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
  }
}
