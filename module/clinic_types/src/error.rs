//! Closed error taxonomy shared by every layer of the clinic core
//!
//! All fallible operations across `clinic_rbac`, `clinic_tenancy`,
//! `clinic_billing`, `clinic_audit` and the HTTP layer resolve to this one
//! enum. Keeping the taxonomy closed (rather than letting each crate grow
//! its own error type) means the HTTP layer needs exactly one
//! `IntoResponse` impl to produce a consistent envelope for every endpoint.

use std::fmt;

/// Error raised by any component in the clinic core
#[derive( Debug, thiserror::Error )]
pub enum CoreError
{
  /// The caller's request was malformed or failed validation
  #[error( "invalid input: {0}" )]
  InvalidInput( String ),

  /// No valid credentials were presented
  #[error( "unauthorized" )]
  Unauthorized,

  /// Credentials were valid but the principal lacks the required permission
  #[error( "forbidden: {0}" )]
  Forbidden( String ),

  /// The requested entity does not exist (or is not visible to this tenant)
  #[error( "not found: {0}" )]
  NotFound( String ),

  /// The request conflicts with the current state of the entity
  #[error( "conflict: {0}" )]
  Conflict( String ),

  /// The caller has exceeded a rate limit; retry after the given duration
  #[error( "rate limited, retry after {retry_after_secs}s" )]
  RateLimited
  {
    /// Seconds the caller should wait before retrying
    retry_after_secs: u64,
  },

  /// A call to an external dependency (payment provider, cache, store) failed
  #[error( "upstream dependency failed: {source}" )]
  Upstream
  {
    #[source]
    source: anyhow::Error,
  },

  /// An unexpected internal error occurred
  #[error( "internal error: {source}" )]
  Internal
  {
    #[source]
    source: anyhow::Error,
  },
}

impl CoreError
{
  /// Machine-readable error code, stable across versions, used in the
  /// HTTP error envelope and safe to match on from client code.
  #[must_use]
  pub fn code( &self ) -> &'static str
  {
    match self {
      Self::InvalidInput( .. ) => "INVALID_INPUT",
      Self::Unauthorized => "UNAUTHORIZED",
      Self::Forbidden( .. ) => "FORBIDDEN",
      Self::NotFound( .. ) => "NOT_FOUND",
      Self::Conflict( .. ) => "CONFLICT",
      Self::RateLimited { .. } => "RATE_LIMITED",
      Self::Upstream { .. } => "INTERNAL_ERROR",
      Self::Internal { .. } => "INTERNAL_ERROR",
    }
  }

  /// HTTP status code this error maps to
  #[must_use]
  pub fn status_code( &self ) -> u16
  {
    match self {
      Self::InvalidInput( .. ) => 400,
      Self::Unauthorized => 401,
      Self::Forbidden( .. ) => 403,
      Self::NotFound( .. ) => 404,
      Self::Conflict( .. ) => 409,
      Self::RateLimited { .. } => 429,
      Self::Upstream { .. } => 502,
      Self::Internal { .. } => 500,
    }
  }

  /// Wrap an arbitrary error as an [`CoreError::Upstream`] failure
  pub fn upstream( source: impl Into< anyhow::Error > ) -> Self
  {
    Self::Upstream { source: source.into() }
  }

  /// Wrap an arbitrary error as an [`CoreError::Internal`] failure
  pub fn internal( source: impl Into< anyhow::Error > ) -> Self
  {
    Self::Internal { source: source.into() }
  }
}

impl From< super::ids::IdError > for CoreError
{
  fn from( err: super::ids::IdError ) -> Self
  {
    Self::InvalidInput( err.to_string() )
  }
}

impl From< sqlx::Error > for CoreError
{
  fn from( err: sqlx::Error ) -> Self
  {
    match err
    {
      sqlx::Error::RowNotFound => Self::NotFound( "requested row not found".into() ),
      other => Self::upstream( other ),
    }
  }
}

/// Body of the error envelope's `error` field
#[derive( Debug, Clone, serde::Serialize )]
pub struct ErrorBody
{
  /// Machine-readable error code (see [`CoreError::code`])
  pub code: String,
  /// Human-readable message, safe to display to API consumers
  pub message: String,
}

impl fmt::Display for ErrorBody
{
  fn fmt( &self, f: &mut fmt::Formatter< '_ > ) -> fmt::Result
  {
    write!( f, "{}: {}", self.code, self.message )
  }
}

impl From< &CoreError > for ErrorBody
{
  fn from( err: &CoreError ) -> Self
  {
    Self
    {
      code: err.code().to_string(),
      message: err.to_string(),
    }
  }
}

/// Result alias used throughout the clinic core
pub type CoreResult< T > = std::result::Result< T, CoreError >;

#[cfg(feature = "http")]
impl axum::response::IntoResponse for CoreError
{
  fn into_response( self ) -> axum::response::Response
  {
    if let Self::RateLimited { retry_after_secs } = &self
    {
      let body = ErrorBody::from( &self );
      return (
        axum::http::StatusCode::from_u16( self.status_code() ).unwrap(),
        [ ( axum::http::header::RETRY_AFTER, retry_after_secs.to_string() ) ],
        axum::Json( body ),
      )
        .into_response();
    }

    let status = axum::http::StatusCode::from_u16( self.status_code() ).unwrap();
    let body = ErrorBody::from( &self );
    ( status, axum::Json( body ) ).into_response()
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn status_codes_match_taxonomy()
  {
    assert_eq!( CoreError::Unauthorized.status_code(), 401 );
    assert_eq!( CoreError::RateLimited { retry_after_secs: 5 }.status_code(), 429 );
  }

  #[test]
  fn upstream_wraps_arbitrary_errors()
  {
    let err = CoreError::upstream( anyhow::anyhow!( "connection reset" ) );
    assert_eq!( err.code(), "INTERNAL_ERROR" );
  }

  #[test]
  fn sqlx_row_not_found_maps_to_not_found()
  {
    let err: CoreError = sqlx::Error::RowNotFound.into();
    assert_eq!( err.code(), "NOT_FOUND" );
  }
}
