//! Wompi payment provider adapter.
//!
//! Verifies webhooks with the timestamped-property-list scheme (spec
//! §4.4): the payload carries a `signature.properties` list of dotted
//! paths into the event plus a `timestamp`, and the provider's own
//! `events_secret` is appended before hashing — matching Wompi's actual
//! webhook signing scheme (the property-list + `checksum` shape), rather
//! than a header-only HMAC.

use super::{ CheckoutSession, NormalizedWebhookEvent, PaymentProvider, WebhookEventKind, constant_time_eq };
use async_trait::async_trait;
use chrono::{ Duration as ChronoDuration, Utc };
use clinic_types::{ CoreError, CoreResult };
use sha2::{ Digest, Sha256 };
use std::collections::HashMap;

/// Wompi's own checkout-link URL shape (spec §6).
fn checkout_url( external_id: &str ) -> String
{
  format!( "https://checkout.wompi.co/l/{external_id}" )
}

/// Adapter for the Wompi hosted-checkout and webhook APIs.
#[derive( Debug, Clone )]
pub struct WompiProvider
{
  http: reqwest::Client,
  public_key: String,
  private_key: String,
  events_secret: String,
  base_url: String,
}

impl WompiProvider
{
  /// Build an adapter from the validated Wompi section of `AppConfig`.
  #[must_use]
  pub fn new( public_key: String, private_key: String, events_secret: String, base_url: String ) -> Self
  {
    Self { http: reqwest::Client::new(), public_key, private_key, events_secret, base_url }
  }
}

#[derive( serde::Deserialize )]
struct PaymentLinkResponse
{
  data: PaymentLinkData,
}

#[derive( serde::Deserialize )]
struct PaymentLinkData
{
  id: String,
}

fn navigate< 'v >( value: &'v serde_json::Value, dotted_path: &str ) -> Option< &'v serde_json::Value >
{
  dotted_path.split( '.' ).try_fold( value, | current, segment | current.get( segment ) )
}

fn stringify( value: &serde_json::Value ) -> String
{
  match value
  {
    serde_json::Value::String( s ) => s.clone(),
    other => other.to_string(),
  }
}

#[async_trait]
impl PaymentProvider for WompiProvider
{
  fn name( &self ) -> &'static str
  {
    "wompi"
  }

  async fn create_checkout(
    &self,
    amount_minor: i64,
    currency: &str,
    reference: &str,
  ) -> CoreResult< CheckoutSession >
  {
    let response = self
      .http
      .post( format!( "{}/payment_links", self.base_url ) )
      .bearer_auth( &self.private_key )
      .json( &serde_json::json!( {
        "name": "Subscription checkout",
        "amount_in_cents": amount_minor,
        "currency": currency,
        "single_use": true,
        "reference": reference,
        "public_key": self.public_key,
      } ) )
      .send()
      .await
      .map_err( CoreError::upstream )?
      .error_for_status()
      .map_err( CoreError::upstream )?
      .json::< PaymentLinkResponse >()
      .await
      .map_err( CoreError::upstream )?;

    Ok( CheckoutSession
    {
      checkout_url: checkout_url( &response.data.id ),
      external_id: response.data.id,
      // Wompi payment links do not carry recurring billing metadata; the
      // caller re-derives the next charge from the plan's billing period.
      next_billing_at: Utc::now() + ChronoDuration::days( 30 ),
    } )
  }

  fn verify_signature( &self, payload: &[ u8 ], _signature_header: &str ) -> CoreResult< () >
  {
    let parsed: serde_json::Value = serde_json::from_slice( payload )
      .map_err( | e | CoreError::InvalidInput( format!( "malformed wompi webhook payload: {e}" ) ) )?;

    let properties = parsed
      .pointer( "/signature/properties" )
      .and_then( serde_json::Value::as_array )
      .ok_or_else( || CoreError::Unauthorized )?;
    let checksum = parsed
      .pointer( "/signature/checksum" )
      .and_then( serde_json::Value::as_str )
      .ok_or_else( || CoreError::Unauthorized )?;
    let sent_at = parsed
      .get( "sent_at" )
      .or_else( || parsed.pointer( "/signature/sent_at" ) )
      .ok_or_else( || CoreError::Unauthorized )?;

    let mut concatenated = String::new();
    for property in properties
    {
      let path = property.as_str().ok_or_else( || CoreError::Unauthorized )?;
      let value = navigate( &parsed, path ).ok_or_else( || CoreError::Unauthorized )?;
      concatenated.push_str( &stringify( value ) );
    }
    concatenated.push_str( &stringify( sent_at ) );
    concatenated.push_str( &self.events_secret );

    let computed = hex::encode( Sha256::digest( concatenated.as_bytes() ) );

    if constant_time_eq( computed.as_bytes(), checksum.to_ascii_lowercase().as_bytes() )
    {
      Ok( () )
    }
    else
    {
      Err( CoreError::Unauthorized )
    }
  }

  fn parse_event( &self, payload: &[ u8 ] ) -> CoreResult< NormalizedWebhookEvent >
  {
    let parsed: serde_json::Value = serde_json::from_slice( payload )
      .map_err( | e | CoreError::InvalidInput( format!( "malformed wompi webhook payload: {e}" ) ) )?;

    let event = parsed.get( "event" ).and_then( serde_json::Value::as_str ).unwrap_or_default();
    let transaction = parsed.pointer( "/data/transaction" );

    let status = transaction
      .and_then( | t | t.get( "status" ) )
      .and_then( serde_json::Value::as_str )
      .unwrap_or( "UNKNOWN" )
      .to_string();

    // Status vocabulary mapping (resolves spec §9 Open Question (b)):
    // APPROVED -> payment succeeded; DECLINED/ERROR/VOIDED -> payment
    // failed / subscription canceled, disambiguated by `apply_event`
    // against the tenant's *current* billing status.
    let event_kind = match status.as_str()
    {
      "APPROVED" => WebhookEventKind::PaymentSucceeded,
      "DECLINED" | "ERROR" | "VOIDED" => WebhookEventKind::PaymentFailed,
      _ if event == "subscription.canceled" => WebhookEventKind::SubscriptionCanceled,
      _ => WebhookEventKind::Ignored,
    };

    let external_subscription_id = transaction
      .and_then( | t | t.get( "reference" ) )
      .and_then( serde_json::Value::as_str )
      .map( ToString::to_string );
    let external_transaction_id = transaction
      .and_then( | t | t.get( "id" ) )
      .and_then( serde_json::Value::as_str )
      .map( ToString::to_string );
    let amount_minor = transaction.and_then( | t | t.get( "amount_in_cents" ) ).and_then( serde_json::Value::as_i64 );
    let currency = transaction
      .and_then( | t | t.get( "currency" ) )
      .and_then( serde_json::Value::as_str )
      .map( ToString::to_string );

    Ok( NormalizedWebhookEvent
    {
      provider: "wompi",
      event_kind,
      external_subscription_id,
      external_transaction_id,
      raw_status: status,
      amount_minor,
      currency,
      metadata: HashMap::new(),
    } )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  fn provider() -> WompiProvider
  {
    WompiProvider::new( "pub_test".into(), "prv_test".into(), "s3cr3t".into(), "https://sandbox.wompi.co/v1".into() )
  }

  fn signed_payload( secret: &str ) -> ( Vec< u8 >, String )
  {
    let sent_at = "2026-01-01T00:00:00.000Z";
    let status = "APPROVED";
    let transaction_id = "txn_123";

    let mut concatenated = String::new();
    concatenated.push_str( transaction_id );
    concatenated.push_str( status );
    concatenated.push_str( sent_at );
    concatenated.push_str( secret );
    let checksum = hex::encode( Sha256::digest( concatenated.as_bytes() ) );

    let body = serde_json::json!( {
      "event": "transaction.updated",
      "data": { "transaction": { "id": transaction_id, "status": status, "reference": "sub_abc", "amount_in_cents": 490_000, "currency": "COP" } },
      "sent_at": sent_at,
      "signature": { "properties": [ "data.transaction.id", "data.transaction.status" ], "checksum": checksum }
    } );
    ( serde_json::to_vec( &body ).unwrap(), checksum )
  }

  #[test]
  fn verify_accepts_a_correctly_signed_payload()
  {
    let provider = provider();
    let ( payload, _ ) = signed_payload( "s3cr3t" );
    assert!( provider.verify_signature( &payload, "" ).is_ok() );
  }

  #[test]
  fn verify_rejects_a_tampered_payload()
  {
    let provider = provider();
    let ( payload, checksum ) = signed_payload( "s3cr3t" );
    let mut tampered: serde_json::Value = serde_json::from_slice( &payload ).unwrap();
    tampered[ "data" ][ "transaction" ][ "status" ] = serde_json::json!( "DECLINED" );
    tampered[ "signature" ][ "checksum" ] = serde_json::json!( checksum );
    let err = provider.verify_signature( &serde_json::to_vec( &tampered ).unwrap(), "" ).unwrap_err();
    assert!( matches!( err, CoreError::Unauthorized ) );
  }

  #[test]
  fn parse_event_maps_approved_to_payment_succeeded()
  {
    let provider = provider();
    let ( payload, _ ) = signed_payload( "s3cr3t" );
    let event = provider.parse_event( &payload ).unwrap();
    assert_eq!( event.event_kind, WebhookEventKind::PaymentSucceeded );
    assert_eq!( event.external_subscription_id.as_deref(), Some( "sub_abc" ) );
  }
}
