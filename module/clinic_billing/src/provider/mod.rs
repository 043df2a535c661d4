//! Payment provider abstraction (spec §4.4.1).
//!
//! A small `PaymentProvider` trait wraps each external checkout/webhook
//! API behind a tracked trait object, following the same provider-adapter
//! pattern used elsewhere in this codebase for wrapping an external
//! client behind a tracked wrapper.

pub mod stripe;
pub mod wompi;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use clinic_types::CoreResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a successful hosted-checkout creation call.
#[derive( Debug, Clone )]
pub struct CheckoutSession
{
  /// Provider-assigned identifier, also used as the correlation handle
  /// stored on the tenant's subscription block.
  pub external_id: String,
  /// URL the client should be redirected to in order to complete payment.
  pub checkout_url: String,
  /// The provider's best estimate of the next billing timestamp.
  pub next_billing_at: DateTime< Utc >,
}

/// A normalized view of a provider webhook event, produced by
/// [`PaymentProvider::parse_event`] after signature verification has
/// already succeeded (spec §4.4 step 3).
#[derive( Debug, Clone )]
pub struct NormalizedWebhookEvent
{
  pub provider: &'static str,
  pub event_kind: WebhookEventKind,
  pub external_subscription_id: Option< String >,
  pub external_transaction_id: Option< String >,
  pub raw_status: String,
  pub amount_minor: Option< i64 >,
  pub currency: Option< String >,
  pub metadata: HashMap< String, serde_json::Value >,
}

/// The classifying event kinds the subscription state machine reacts to
/// (spec §4.4 Transitions). A provider's raw event/status vocabulary maps
/// into this closed set in each adapter's `status_map` (spec §9 Open
/// Question (b)).
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum WebhookEventKind
{
  PaymentSucceeded,
  PaymentFailed,
  SubscriptionCanceled,
  /// Recognized but not actionable for the subscription state machine
  /// (e.g. a Stripe event this core does not model); the webhook handler
  /// absorbs it as a no-op.
  Ignored,
}

impl WebhookEventKind
{
  /// Stable string used as half of the `(externalTransactionId, eventKind)`
  /// idempotency dedup key (spec §4.4).
  #[must_use]
  pub fn dedup_key( self ) -> &'static str
  {
    match self
    {
      Self::PaymentSucceeded => "payment_succeeded",
      Self::PaymentFailed => "payment_failed",
      Self::SubscriptionCanceled => "subscription_canceled",
      Self::Ignored => "ignored",
    }
  }
}

/// A payment provider adapter: creates hosted-checkout sessions and
/// authenticates/parses its own webhook deliveries.
#[async_trait]
pub trait PaymentProvider: Send + Sync
{
  /// Provider name as used in the subscription block, payment rows, and
  /// the `/webhooks/{provider}` route (spec §6).
  fn name( &self ) -> &'static str;

  /// Whether this provider should still be retried by the caller after
  /// responding 401 to a bad signature (spec §9 Open Question (a)). Both
  /// modeled providers currently answer `false`.
  fn retry_on_401( &self ) -> bool
  {
    false
  }

  /// Create a hosted-checkout link for `amount_minor` of `currency`.
  ///
  /// # Errors
  ///
  /// Returns [`clinic_types::CoreError::Upstream`] if the provider call
  /// fails.
  async fn create_checkout(
    &self,
    amount_minor: i64,
    currency: &str,
    reference: &str,
  ) -> CoreResult< CheckoutSession >;

  /// Verify `payload`'s signature against `signature_header`, in constant
  /// time. Returns `Ok(())` on success.
  ///
  /// # Errors
  ///
  /// Returns [`clinic_types::CoreError::Unauthorized`] if the signature
  /// does not match.
  fn verify_signature( &self, payload: &[ u8 ], signature_header: &str ) -> CoreResult< () >;

  /// Parse an already-authenticated payload into a normalized event.
  ///
  /// # Errors
  ///
  /// Returns [`clinic_types::CoreError::InvalidInput`] if the payload is
  /// not shaped the way this provider's webhooks are documented to be.
  fn parse_event( &self, payload: &[ u8 ] ) -> CoreResult< NormalizedWebhookEvent >;
}

/// Resolves `provider ∈ {wompi, stripe}` (spec §6) to its adapter.
#[derive( Clone, Default )]
pub struct ProviderRegistry
{
  providers: HashMap< &'static str, Arc< dyn PaymentProvider > >,
}

impl std::fmt::Debug for ProviderRegistry
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "ProviderRegistry" )
      .field( "providers", &self.providers.keys().collect::< Vec< _ > >() )
      .finish()
  }
}

impl ProviderRegistry
{
  /// An empty registry with nothing registered.
  #[must_use]
  pub fn new() -> Self
  {
    Self { providers: HashMap::new() }
  }

  /// Register a provider adapter under its own [`PaymentProvider::name`].
  #[must_use]
  pub fn with_provider( mut self, provider: Arc< dyn PaymentProvider > ) -> Self
  {
    self.providers.insert( provider.name(), provider );
    self
  }

  /// Look up a provider by name. `None` means an unknown/unconfigured
  /// provider — the webhook route treats this as a 200 no-op rather than
  /// a 404 (spec §6: "avoid retry storms from misconfiguration").
  #[must_use]
  pub fn get( &self, name: &str ) -> Option< Arc< dyn PaymentProvider > >
  {
    self.providers.get( name ).cloned()
  }
}

/// Compare two byte slices in constant time. Both signature shapes (spec
/// §4.4) require this rather than `==`, which short-circuits on the first
/// differing byte and would leak timing information about how much of a
/// forged signature was correct.
#[must_use]
pub fn constant_time_eq( a: &[ u8 ], b: &[ u8 ] ) -> bool
{
  use subtle::ConstantTimeEq;
  a.len() == b.len() && a.ct_eq( b ).into()
}
