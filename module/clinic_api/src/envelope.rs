//! The response envelope every route in this crate answers with (spec §6):
//! `{success, data, statusCode, timestamp, path, request_id}`, with error
//! responses additionally carrying `{code, message}`.

use axum::
{
  async_trait,
  extract::FromRequestParts,
  http::{ request::Parts, StatusCode },
  response::{ IntoResponse, Response },
  Json,
};
use chrono::{ DateTime, Utc };
use clinic_types::CoreError;
use serde::Serialize;

/// Extension inserted by [`attach_request_id`] and read back out by
/// [`RequestContext`]'s extractor.
#[derive( Debug, Clone )]
struct RequestId( String );

/// Generates a request id for this request and stores it in the
/// extensions map, so every handler and the error-rendering path can
/// recover the same id without threading it through every function
/// signature by hand.
pub async fn attach_request_id( mut req: axum::http::Request< axum::body::Body >, next: axum::middleware::Next ) -> Response
{
  req.extensions_mut().insert( RequestId( clinic_telemetry::new_request_id() ) );
  next.run( req ).await
}

/// Per-request data every envelope needs: the path that was requested and
/// the id [`attach_request_id`] minted for it.
#[derive( Debug, Clone )]
pub struct RequestContext
{
  pub path: String,
  pub request_id: String,
}

#[async_trait]
impl< S > FromRequestParts< S > for RequestContext
where
  S: Send + Sync,
{
  type Rejection = std::convert::Infallible;

  async fn from_request_parts( parts: &mut Parts, _state: &S ) -> Result< Self, Self::Rejection >
  {
    let request_id = parts
      .extensions
      .get::< RequestId >()
      .map( | id | id.0.clone() )
      .unwrap_or_else( clinic_telemetry::new_request_id );

    Ok( Self { path: parts.uri.path().to_string(), request_id } )
  }
}

/// Envelope body shared by success and error responses.
#[derive( Debug, Serialize )]
struct EnvelopeBody< T >
{
  success: bool,
  data: T,
  #[serde( rename = "statusCode" )]
  status_code: u16,
  timestamp: DateTime< Utc >,
  path: String,
  request_id: String,
  #[serde( skip_serializing_if = "Option::is_none" )]
  code: Option< String >,
  #[serde( skip_serializing_if = "Option::is_none" )]
  message: Option< String >,
}

/// Wrap a successful payload in the envelope and respond with `status`.
pub fn ok< T: Serialize >( ctx: &RequestContext, status: StatusCode, data: T ) -> Response
{
  let body = EnvelopeBody
  {
    success: true,
    data,
    status_code: status.as_u16(),
    timestamp: Utc::now(),
    path: ctx.path.clone(),
    request_id: ctx.request_id.clone(),
    code: None,
    message: None,
  };
  ( status, Json( body ) ).into_response()
}

/// Wrap a [`CoreError`] in the envelope. Never includes the underlying
/// error's source chain (stack traces, provider error bodies) — only the
/// stable `code` and the error's own `Display` message (spec §7).
pub fn err( ctx: &RequestContext, error: &CoreError ) -> Response
{
  let status = StatusCode::from_u16( error.status_code() ).unwrap_or( StatusCode::INTERNAL_SERVER_ERROR );
  let body = EnvelopeBody
  {
    success: false,
    data: serde_json::Value::Null,
    status_code: status.as_u16(),
    timestamp: Utc::now(),
    path: ctx.path.clone(),
    request_id: ctx.request_id.clone(),
    code: Some( error.code().to_string() ),
    message: Some( error.to_string() ),
  };

  if let CoreError::RateLimited { retry_after_secs } = error
  {
    return ( status, [ ( axum::http::header::RETRY_AFTER, retry_after_secs.to_string() ) ], Json( body ) ).into_response();
  }

  ( status, Json( body ) ).into_response()
}

#[cfg( test )]
mod tests
{
  use super::*;
  use axum::body::to_bytes;

  #[tokio::test]
  async fn ok_envelope_carries_success_true_and_no_error_fields()
  {
    let ctx = RequestContext { path: "/api/tenants/t1/subscribe".into(), request_id: "req-1".into() };
    let response = ok( &ctx, StatusCode::OK, serde_json::json!( { "checkoutUrl": "https://example.com" } ) );
    let body = to_bytes( response.into_body(), usize::MAX ).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice( &body ).unwrap();

    assert_eq!( value[ "success" ], true );
    assert_eq!( value[ "request_id" ], "req-1" );
    assert!( value.get( "code" ).is_none() );
  }

  #[tokio::test]
  async fn err_envelope_carries_code_and_message()
  {
    let ctx = RequestContext { path: "/webhooks/wompi".into(), request_id: "req-2".into() };
    let response = err( &ctx, &CoreError::Forbidden( "nope".into() ) );
    assert_eq!( response.status(), StatusCode::FORBIDDEN );

    let body = to_bytes( response.into_body(), usize::MAX ).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice( &body ).unwrap();
    assert_eq!( value[ "success" ], false );
    assert_eq!( value[ "code" ], "FORBIDDEN" );
  }

  #[tokio::test]
  async fn rate_limited_err_sets_retry_after_header()
  {
    let ctx = RequestContext { path: "/api/tenants/t1/subscribe".into(), request_id: "req-3".into() };
    let response = err( &ctx, &CoreError::RateLimited { retry_after_secs: 7 } );

    assert_eq!( response.headers().get( axum::http::header::RETRY_AFTER ).unwrap(), "7" );
  }
}
