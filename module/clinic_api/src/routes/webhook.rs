//! `POST /webhooks/{provider}` (spec §4.4 "Webhook ingress", §6 "Webhook
//! endpoint"). Not tenant-scoped and not RBAC-authorized — the provider
//! is an anonymous caller authenticated only by its signature.

use crate::envelope::{ self, RequestContext };
use crate::server::AppState;
use axum::
{
  body::Bytes,
  extract::{ Path, State },
  http::{ HeaderMap, StatusCode },
  response::Response,
};
use clinic_types::CoreError;
use std::sync::Arc;

/// Header names providers are known to send a signature under, tried in
/// the order spec §6 lists them: `X-Signature`, `X-Wompi-Signature`,
/// `Stripe-Signature`.
const SIGNATURE_HEADERS: &[ &str ] = &[ "x-signature", "x-wompi-signature", "stripe-signature" ];

fn signature_header( headers: &HeaderMap ) -> Option< &str >
{
  SIGNATURE_HEADERS.iter().find_map( | name | headers.get( *name ).and_then( | value | value.to_str().ok() ) )
}

pub async fn ingest(
  State( state ): State< Arc< AppState > >,
  ctx: RequestContext,
  Path( provider_name ): Path< String >,
  headers: HeaderMap,
  body: Bytes,
) -> Response
{
  // Unknown/unconfigured provider: acknowledge without processing so a
  // misconfigured webhook target does not trigger an infinite retry storm
  // (spec §6 "On unknown provider returns 200 with {error: ...}").
  if state.provider_registry.get( &provider_name ).is_none()
  {
    tracing::warn!( provider = %provider_name, "webhook for unknown provider" );
    return envelope::ok( &ctx, StatusCode::OK, serde_json::json!( { "error": "unknown provider" } ) );
  }

  let Some( signature ) = signature_header( &headers ) else
  {
    return envelope::err( &ctx, &CoreError::Unauthorized );
  };

  match clinic_billing::ingest_webhook( &state.pool, &state.provider_registry, &provider_name, &body, signature ).await
  {
    Ok( () ) =>
    {
      // The signature already verified inside `ingest_webhook`; parsing it
      // again here is pure, side-effect-free and only for the response
      // body's informational `event` field (spec §6).
      let event_kind = state
        .provider_registry
        .get( &provider_name )
        .and_then( | provider | provider.parse_event( &body ).ok() )
        .map( | event | event.event_kind.dedup_key() )
        .unwrap_or( "ignored" );

      envelope::ok( &ctx, StatusCode::OK, serde_json::json!( { "status": "received", "event": event_kind } ) )
    }
    Err( err @ CoreError::Unauthorized ) => envelope::err( &ctx, &err ),
    Err( err ) =>
    {
      // Every other failure is already logged inside `ingest_webhook`; the
      // provider still gets a 200 so it does not retry-storm a delivery
      // this core has already recorded (spec §4.4 step 6).
      tracing::debug!( provider = %provider_name, error = %err, "webhook acknowledged despite processing error" );
      envelope::ok( &ctx, StatusCode::OK, serde_json::json!( { "status": "received", "event": "unknown" } ) )
    }
  }
}
