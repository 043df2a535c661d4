//! Resilience patterns for outbound calls: a three-state circuit breaker
//! and exponential-backoff retry, composed so a retried call counts as
//! exactly one breaker failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{ Arc, Mutex };
use std::time::{ Duration, Instant };

use tokio_util::sync::CancellationToken;

/// State of a single breaker-guarded service.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum CircuitState
{
  Closed,
  Open,
  HalfOpen,
}

struct Entry
{
  state: CircuitState,
  opened_at: Instant,
  failure_count: u32,
  probe_in_flight: bool,
}

impl Entry
{
  fn fresh() -> Self
  {
    Self { state: CircuitState::Closed, opened_at: Instant::now(), failure_count: 0, probe_in_flight: false }
  }
}

/// Error returned by [`CircuitBreaker::execute`]: either the breaker
/// rejected the call without running it, or the call itself failed.
#[derive( Debug )]
pub enum CircuitError< E >
{
  /// The circuit is open (or a half-open probe is already in flight); the
  /// call was never attempted.
  Open,
  /// The call ran and returned an error.
  Inner( E ),
}

/// Per-service-key three-state circuit breaker (spec §4.5): `closed` permits
/// calls and counts failures; after `failure_threshold` consecutive
/// failures it opens and fails every call immediately; after `cooldown`
/// elapses it moves to `half_open` and permits exactly one probe call —
/// success closes the circuit, failure reopens it for another cooldown.
#[derive( Debug )]
pub struct CircuitBreaker
{
  state: Arc< Mutex< HashMap< String, Entry > > >,
  failure_threshold: u32,
  cooldown: Duration,
}

impl std::fmt::Debug for Entry
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "Entry" )
      .field( "state", &self.state )
      .field( "failure_count", &self.failure_count )
      .field( "probe_in_flight", &self.probe_in_flight )
      .finish()
  }
}

impl CircuitBreaker
{
  /// Create a breaker. `failure_threshold` consecutive failures opens the
  /// circuit for `cooldown_secs` before a half-open probe is permitted.
  #[must_use]
  pub fn new( failure_threshold: u32, cooldown_secs: u64 ) -> Self
  {
    Self
    {
      state: Arc::new( Mutex::new( HashMap::new() ) ),
      failure_threshold,
      cooldown: Duration::from_secs( cooldown_secs ),
    }
  }

  /// Current externally-visible state for a service, without side effects
  /// on a stale `Open` entry (unlike `execute`, this does not advance a
  /// timed-out open circuit to half-open).
  #[must_use]
  pub fn state( &self, service: &str ) -> CircuitState
  {
    self.state.lock().unwrap().get( service ).map_or( CircuitState::Closed, | e | e.state )
  }

  /// Decide whether a call may proceed, transitioning `Open` to `HalfOpen`
  /// once the cooldown has elapsed. Returns `true` if the caller should run
  /// the wrapped function now (and, for a half-open probe, marks it as the
  /// single in-flight probe so concurrent callers are rejected).
  fn admit( &self, service: &str ) -> bool
  {
    let mut guard = self.state.lock().unwrap();
    let entry = guard.entry( service.to_string() ).or_insert_with( Entry::fresh );

    match entry.state
    {
      CircuitState::Closed => true,
      CircuitState::HalfOpen => false,
      CircuitState::Open =>
      {
        if entry.opened_at.elapsed() >= self.cooldown
        {
          entry.state = CircuitState::HalfOpen;
          entry.probe_in_flight = true;
          true
        }
        else
        {
          false
        }
      }
    }
  }

  /// Record a successful call: closes the circuit and resets the failure
  /// count, regardless of which state it was previously in.
  pub fn record_success( &self, service: &str )
  {
    let mut guard = self.state.lock().unwrap();
    clinic_telemetry::log_circuit_transition( service, "any", "closed" );
    guard.insert( service.to_string(), Entry::fresh() );
  }

  /// Record a failed call. In `half_open`, a single failed probe reopens
  /// the circuit immediately. In `closed`, failures accumulate until
  /// `failure_threshold` is reached, at which point the circuit opens.
  pub fn record_failure( &self, service: &str )
  {
    let mut guard = self.state.lock().unwrap();
    let entry = guard.entry( service.to_string() ).or_insert_with( Entry::fresh );

    match entry.state
    {
      CircuitState::HalfOpen =>
      {
        entry.state = CircuitState::Open;
        entry.opened_at = Instant::now();
        entry.probe_in_flight = false;
        clinic_telemetry::log_circuit_transition( service, "half_open", "open" );
      }
      CircuitState::Closed | CircuitState::Open =>
      {
        entry.failure_count += 1;
        if entry.failure_count >= self.failure_threshold
        {
          entry.state = CircuitState::Open;
          entry.opened_at = Instant::now();
          clinic_telemetry::log_circuit_transition( service, "closed", "open" );
        }
      }
    }
  }

  /// Run `f` under the breaker for `service`. If the circuit is open (or a
  /// half-open probe is already in flight) the call is rejected without
  /// running `f`. Otherwise `f` runs and its outcome updates breaker state.
  ///
  /// # Errors
  ///
  /// Returns [`CircuitError::Open`] if the breaker rejects the call, or
  /// [`CircuitError::Inner`] wrapping `f`'s own error.
  pub async fn execute< F, Fut, T, E >( &self, service: &str, f: F ) -> Result< T, CircuitError< E > >
  where
    F: FnOnce() -> Fut,
    Fut: Future< Output = Result< T, E > >,
  {
    if !self.admit( service )
    {
      return Err( CircuitError::Open );
    }

    match f().await
    {
      Ok( value ) =>
      {
        self.record_success( service );
        Ok( value )
      }
      Err( err ) =>
      {
        self.record_failure( service );
        Err( CircuitError::Inner( err ) )
      }
    }
  }
}

/// Exponential backoff parameters for [`retry`] (spec §4.5): delay for
/// attempt `i` (0-indexed, excluding the first, immediate attempt) is
/// `min(base * multiplier^i, cap)`, optionally jittered.
#[derive( Debug, Clone, Copy )]
pub struct RetryPolicy
{
  pub max_attempts: u32,
  pub base: Duration,
  pub multiplier: u32,
  pub cap: Duration,
  pub jitter: bool,
}

impl Default for RetryPolicy
{
  fn default() -> Self
  {
    Self
    {
      max_attempts: 3,
      base: Duration::from_millis( 100 ),
      multiplier: 2,
      cap: Duration::from_secs( 10 ),
      jitter: false,
    }
  }
}

impl RetryPolicy
{
  fn delay_for( &self, attempt: u32 ) -> Duration
  {
    let factor = self.multiplier.saturating_pow( attempt );
    let scaled = self.base.saturating_mul( factor );
    let capped = scaled.min( self.cap );

    if !self.jitter
    {
      return capped;
    }
    // Full jitter within ±25%: uniform in [0.75, 1.25] * capped.
    let millis = capped.as_millis() as u64;
    let spread = millis / 4;
    let offset = if spread == 0 { 0 } else { rand::random::< u64 >() % ( 2 * spread + 1 ) };
    Duration::from_millis( millis.saturating_sub( spread ).saturating_add( offset ) )
  }
}

/// Error returned by [`retry`]: either every attempt failed (carrying the
/// last underlying error) or the retry was canceled mid-backoff.
#[derive( Debug )]
pub enum RetryError< E >
{
  /// All `max_attempts + 1` calls failed; this is the last one's error.
  Exhausted( E ),
  /// The cancellation token fired while waiting out a backoff delay.
  Canceled,
}

/// Classifies whether a given error is worth retrying. Non-retryable
/// errors short-circuit immediately rather than burning the remaining
/// attempt budget.
pub trait Retryable
{
  /// Returns `true` if another attempt might succeed.
  fn is_retryable( &self ) -> bool;
}

/// Retry `f` under `policy`, honoring `cancel` for an in-flight backoff
/// sleep (spec §5: "a canceled retry backoff returns the cancellation
/// error, not the last underlying error"). Total call count is bounded by
/// `policy.max_attempts + 1` (the initial attempt plus retries).
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] wrapping the last error once every
/// attempt has failed, or [`RetryError::Canceled`] if `cancel` fires while
/// waiting out a backoff delay.
pub async fn retry< F, Fut, T, E >( policy: &RetryPolicy, cancel: &CancellationToken, mut f: F ) -> Result< T, RetryError< E > >
where
  F: FnMut() -> Fut,
  Fut: Future< Output = Result< T, E > >,
  E: Retryable,
{
  let mut attempt = 0u32;
  loop
  {
    match f().await
    {
      Ok( value ) => return Ok( value ),
      Err( err ) =>
      {
        if !err.is_retryable() || attempt >= policy.max_attempts
        {
          return Err( RetryError::Exhausted( err ) );
        }

        let delay = policy.delay_for( attempt );
        attempt += 1;

        tokio::select!
        {
          () = tokio::time::sleep( delay ) => {}
          () = cancel.cancelled() => return Err( RetryError::Canceled ),
        }
      }
    }
  }
}

/// Classifies the shared error taxonomy for [`retry`]: only the two kinds
/// that indicate a transient failure of the call itself — an upstream
/// hiccup or a rate limit — are worth another attempt. Everything else
/// (bad input, auth, a conflict already recorded in the store) would just
/// fail again the same way.
impl Retryable for clinic_types::CoreError
{
  fn is_retryable( &self ) -> bool
  {
    matches!( self, Self::Upstream { .. } | Self::RateLimited { .. } )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[derive( Debug, PartialEq, Eq )]
  struct Boom;

  impl Retryable for Boom
  {
    fn is_retryable( &self ) -> bool { true }
  }

  #[test]
  fn circuit_opens_after_threshold_failures()
  {
    let cb = CircuitBreaker::new( 3, 60 );

    assert_eq!( cb.state( "payments" ), CircuitState::Closed );
    cb.record_failure( "payments" );
    cb.record_failure( "payments" );
    assert_eq!( cb.state( "payments" ), CircuitState::Closed );
    cb.record_failure( "payments" );
    assert_eq!( cb.state( "payments" ), CircuitState::Open );
  }

  #[test]
  fn success_recovers_failure_count_before_opening()
  {
    let cb = CircuitBreaker::new( 2, 60 );
    cb.record_failure( "push" );
    cb.record_success( "push" );
    cb.record_failure( "push" );
    assert_eq!( cb.state( "push" ), CircuitState::Closed );
  }

  #[tokio::test]
  async fn execute_rejects_calls_while_open()
  {
    let cb = CircuitBreaker::new( 1, 60 );
    let _: Result< (), CircuitError< Boom > > = cb.execute( "payments", || async { Err( Boom ) } ).await;
    assert_eq!( cb.state( "payments" ), CircuitState::Open );

    let result: Result< (), CircuitError< Boom > > = cb.execute( "payments", || async { Ok( () ) } ).await;
    assert!( matches!( result, Err( CircuitError::Open ) ) );
  }

  #[tokio::test]
  async fn half_open_probe_after_cooldown_closes_on_success()
  {
    let cb = CircuitBreaker::new( 1, 0 );
    let _: Result< (), CircuitError< Boom > > = cb.execute( "payments", || async { Err( Boom ) } ).await;
    assert_eq!( cb.state( "payments" ), CircuitState::Open );

    let result: Result< (), CircuitError< Boom > > = cb.execute( "payments", || async { Ok( () ) } ).await;
    assert!( result.is_ok() );
    assert_eq!( cb.state( "payments" ), CircuitState::Closed );
  }

  #[tokio::test]
  async fn retry_stops_after_max_attempts()
  {
    let policy = RetryPolicy { max_attempts: 2, base: Duration::from_millis( 1 ), cap: Duration::from_millis( 5 ), ..RetryPolicy::default() };
    let cancel = CancellationToken::new();
    let mut calls = 0u32;

    let result: Result< (), RetryError< Boom > > = retry( &policy, &cancel, || { calls += 1; async { Err( Boom ) } } ).await;

    assert!( matches!( result, Err( RetryError::Exhausted( Boom ) ) ) );
    assert_eq!( calls, 3 );
  }

  #[tokio::test]
  async fn retry_honors_cancellation_during_backoff()
  {
    let policy = RetryPolicy { max_attempts: 5, base: Duration::from_secs( 30 ), ..RetryPolicy::default() };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result: Result< (), RetryError< Boom > > = retry( &policy, &cancel, || async { Err( Boom ) } ).await;
    assert!( matches!( result, Err( RetryError::Canceled ) ) );
  }

  #[tokio::test]
  async fn execute_composes_with_retry_as_one_failure()
  {
    let cb = CircuitBreaker::new( 2, 60 );
    let policy = RetryPolicy { max_attempts: 2, base: Duration::from_millis( 1 ), cap: Duration::from_millis( 2 ), ..RetryPolicy::default() };
    let cancel = CancellationToken::new();

    let result: Result< (), CircuitError< RetryError< Boom > > > = cb
      .execute( "payments", || retry( &policy, &cancel, || async { Err( Boom ) } ) )
      .await;

    assert!( result.is_err() );
    // Three failed calls inside one retry() count as exactly one breaker failure.
    assert_eq!( cb.state( "payments" ), CircuitState::Closed );
  }

  #[test]
  fn core_error_retryable_classification()
  {
    use clinic_types::CoreError;

    assert!( CoreError::upstream( anyhow::anyhow!( "timeout" ) ).is_retryable() );
    assert!( CoreError::RateLimited { retry_after_secs: 1 }.is_retryable() );
    assert!( !CoreError::Unauthorized.is_retryable() );
    assert!( !CoreError::Conflict( "already subscribed".into() ).is_retryable() );
  }
}
