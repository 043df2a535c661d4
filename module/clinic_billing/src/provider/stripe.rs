//! Stripe payment provider adapter.
//!
//! Verifies webhooks with the generic HMAC shape (spec §4.4): hex-encode
//! `HMAC-SHA256(secret, payload)` and compare it in constant time against
//! the `Stripe-Signature` header.

use super::{ CheckoutSession, NormalizedWebhookEvent, PaymentProvider, WebhookEventKind, constant_time_eq };
use async_trait::async_trait;
use chrono::Utc;
use clinic_types::{ CoreError, CoreResult };
use hmac::{ Hmac, Mac };
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac< Sha256 >;

/// Adapter for the Stripe Checkout and webhook APIs.
#[derive( Debug, Clone )]
pub struct StripeProvider
{
  http: reqwest::Client,
  secret_key: String,
  webhook_secret: String,
}

impl StripeProvider
{
  /// Build an adapter from the validated Stripe section of `AppConfig`.
  #[must_use]
  pub fn new( secret_key: String, webhook_secret: String ) -> Self
  {
    Self { http: reqwest::Client::new(), secret_key, webhook_secret }
  }
}

#[derive( serde::Deserialize )]
struct CheckoutSessionResponse
{
  id: String,
  url: String,
}

#[async_trait]
impl PaymentProvider for StripeProvider
{
  fn name( &self ) -> &'static str
  {
    "stripe"
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
      .post( "https://api.stripe.com/v1/checkout/sessions" )
      .basic_auth( &self.secret_key, Some( "" ) )
      .form( &[
        ( "mode", "subscription" ),
        ( "client_reference_id", reference ),
        ( "line_items[0][price_data][currency]", currency ),
        ( "line_items[0][price_data][unit_amount]", &amount_minor.to_string() ),
        ( "line_items[0][quantity]", "1" ),
      ] )
      .send()
      .await
      .map_err( CoreError::upstream )?
      .error_for_status()
      .map_err( CoreError::upstream )?
      .json::< CheckoutSessionResponse >()
      .await
      .map_err( CoreError::upstream )?;

    Ok( CheckoutSession
    {
      external_id: response.id,
      checkout_url: response.url,
      next_billing_at: Utc::now() + chrono::Duration::days( 30 ),
    } )
  }

  fn verify_signature( &self, payload: &[ u8 ], signature_header: &str ) -> CoreResult< () >
  {
    if signature_header.is_empty()
    {
      return Err( CoreError::Unauthorized );
    }

    let mut mac = HmacSha256::new_from_slice( self.webhook_secret.as_bytes() )
      .map_err( | _ | CoreError::internal( anyhow::anyhow!( "invalid stripe webhook secret length" ) ) )?;
    mac.update( payload );
    let computed = hex::encode( mac.finalize().into_bytes() );

    if constant_time_eq( computed.as_bytes(), signature_header.trim().to_ascii_lowercase().as_bytes() )
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
      .map_err( | e | CoreError::InvalidInput( format!( "malformed stripe webhook payload: {e}" ) ) )?;

    let event_type = parsed.get( "type" ).and_then( serde_json::Value::as_str ).unwrap_or_default();
    let data_object = parsed.pointer( "/data/object" );

    let event_kind = match event_type
    {
      "checkout.session.completed"
        if data_object.and_then( | o | o.get( "payment_status" ) ).and_then( serde_json::Value::as_str )
          == Some( "paid" ) =>
      {
        WebhookEventKind::PaymentSucceeded
      }
      "invoice.payment_failed" => WebhookEventKind::PaymentFailed,
      "customer.subscription.deleted" => WebhookEventKind::SubscriptionCanceled,
      _ => WebhookEventKind::Ignored,
    };

    let external_subscription_id = data_object
      .and_then( | o | o.get( "client_reference_id" ).or_else( || o.get( "subscription" ) ) )
      .and_then( serde_json::Value::as_str )
      .map( ToString::to_string );
    let external_transaction_id =
      parsed.get( "id" ).and_then( serde_json::Value::as_str ).map( ToString::to_string );
    let amount_minor =
      data_object.and_then( | o | o.get( "amount_total" ).or_else( || o.get( "amount_due" ) ) ).and_then( serde_json::Value::as_i64 );
    let currency = data_object
      .and_then( | o | o.get( "currency" ) )
      .and_then( serde_json::Value::as_str )
      .map( ToString::to_string );

    Ok( NormalizedWebhookEvent
    {
      provider: "stripe",
      event_kind,
      external_subscription_id,
      external_transaction_id,
      raw_status: event_type.to_string(),
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

  fn provider() -> StripeProvider
  {
    StripeProvider::new( "sk_test_123".into(), "whsec_abc".into() )
  }

  fn signed( secret: &str, payload: &[ u8 ] ) -> String
  {
    let mut mac = HmacSha256::new_from_slice( secret.as_bytes() ).unwrap();
    mac.update( payload );
    hex::encode( mac.finalize().into_bytes() )
  }

  #[test]
  fn verify_accepts_a_correctly_signed_payload()
  {
    let provider = provider();
    let payload = br#"{"type":"checkout.session.completed"}"#;
    let header = signed( "whsec_abc", payload );
    assert!( provider.verify_signature( payload, &header ).is_ok() );
  }

  #[test]
  fn verify_rejects_an_empty_header()
  {
    let provider = provider();
    let err = provider.verify_signature( b"{}", "" ).unwrap_err();
    assert!( matches!( err, CoreError::Unauthorized ) );
  }

  #[test]
  fn verify_rejects_a_wrong_secret_signature()
  {
    let provider = provider();
    let payload = br#"{"type":"checkout.session.completed"}"#;
    let header = signed( "not-the-secret", payload );
    let err = provider.verify_signature( payload, &header ).unwrap_err();
    assert!( matches!( err, CoreError::Unauthorized ) );
  }

  #[test]
  fn parse_event_maps_completed_and_paid_checkout_to_payment_succeeded()
  {
    let provider = provider();
    let payload = serde_json::to_vec( &serde_json::json!( {
      "id": "evt_1",
      "type": "checkout.session.completed",
      "data": { "object": { "payment_status": "paid", "client_reference_id": "sub_xyz", "amount_total": 4900, "currency": "usd" } }
    } ) )
    .unwrap();
    let event = provider.parse_event( &payload ).unwrap();
    assert_eq!( event.event_kind, WebhookEventKind::PaymentSucceeded );
    assert_eq!( event.external_subscription_id.as_deref(), Some( "sub_xyz" ) );
  }

  #[test]
  fn parse_event_maps_invoice_payment_failed()
  {
    let provider = provider();
    let payload = serde_json::to_vec( &serde_json::json!( {
      "id": "evt_2",
      "type": "invoice.payment_failed",
      "data": { "object": { "subscription": "sub_xyz" } }
    } ) )
    .unwrap();
    let event = provider.parse_event( &payload ).unwrap();
    assert_eq!( event.event_kind, WebhookEventKind::PaymentFailed );
  }

  #[test]
  fn parse_event_ignores_unmodeled_event_types()
  {
    let provider = provider();
    let payload = serde_json::to_vec( &serde_json::json!( { "id": "evt_3", "type": "customer.updated" } ) ).unwrap();
    let event = provider.parse_event( &payload ).unwrap();
    assert_eq!( event.event_kind, WebhookEventKind::Ignored );
  }
}
