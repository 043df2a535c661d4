//! Hierarchical token-bucket rate limiter
//!
//! Two tiers apply to every request: one global bucket shared by the
//! whole process, and one bucket per tenant created lazily on first use.
//! A request must pass both to proceed (spec §4.3).
//!
//! Per-tenant buckets live in a [`DashMap`] rather than a single `Mutex`
//! -guarded `HashMap` so that reads (the hot path, once a tenant's bucket
//! already exists) only take a shard-local lock; [`DashMap`] gives us that
//! for free, the same way [`clinic_cache`](../clinic_cache) uses it for its
//! in-memory RBAC cache. Left unchecked, the map would grow one entry per
//! tenant ever seen, so a background sweep periodically evicts down to a
//! low-water mark once the map crosses a high-water mark.

use dashmap::DashMap;
use governor::
{
  clock::{ Clock, DefaultClock },
  state::{ InMemoryState, NotKeyed },
  Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use clinic_types::{ CoreError, TenantId };

type DirectLimiter = GovernorRateLimiter< NotKeyed, InMemoryState, DefaultClock >;

/// Requests-per-second and burst size for one tier of the limiter.
#[derive( Debug, Clone, Copy )]
pub struct RateLimitParams
{
  /// Sustained requests allowed per second.
  pub rps: u32,
  /// Instantaneous burst allowed on top of the sustained rate.
  pub burst: u32,
}

impl Default for RateLimitParams
{
  /// Per-tenant defaults (spec §4.3): 50 RPS, burst of 100. Callers building
  /// the global tier should override this with a higher ceiling.
  fn default() -> Self
  {
    Self { rps: 50, burst: 100 }
  }
}

impl RateLimitParams
{
  fn quota( self ) -> Quota
  {
    let rps = NonZeroU32::new( self.rps ).unwrap_or( nonzero!( 1u32 ) );
    let burst = NonZeroU32::new( self.burst ).unwrap_or( rps );
    Quota::per_second( rps ).allow_burst( burst )
  }
}

/// Configuration for [`HierarchicalRateLimiter::new`].
#[derive( Debug, Clone, Copy )]
pub struct RateLimiterConfig
{
  /// Bucket shared by every request regardless of tenant.
  pub global: RateLimitParams,
  /// Bucket applied per tenant, created lazily on first use.
  pub tenant: RateLimitParams,
  /// Map size above which the sweep evicts entries.
  pub high_water_mark: usize,
  /// Map size the sweep evicts down to.
  pub low_water_mark: usize,
  /// How often the sweep runs.
  pub sweep_interval: Duration,
}

impl Default for RateLimiterConfig
{
  fn default() -> Self
  {
    Self
    {
      global: RateLimitParams { rps: 1000, burst: 2000 },
      tenant: RateLimitParams::default(),
      high_water_mark: 10_000,
      low_water_mark: 5_000,
      sweep_interval: Duration::from_secs( 60 ),
    }
  }
}

/// Two-tier token-bucket limiter: one global bucket, one lazily-created
/// bucket per tenant.
pub struct HierarchicalRateLimiter
{
  global: DirectLimiter,
  per_tenant: DashMap< TenantId, Arc< DirectLimiter > >,
  tenant_quota: Quota,
  high_water_mark: usize,
  low_water_mark: usize,
}

impl std::fmt::Debug for HierarchicalRateLimiter
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "HierarchicalRateLimiter" )
      .field( "tenant_buckets", &self.per_tenant.len() )
      .field( "high_water_mark", &self.high_water_mark )
      .field( "low_water_mark", &self.low_water_mark )
      .finish()
  }
}

impl HierarchicalRateLimiter
{
  /// Builds a limiter from the given configuration. Does not start the
  /// sweep task; call [`Self::spawn_sweep`] separately once the limiter is
  /// wrapped in an `Arc`.
  #[must_use]
  pub fn new( config: RateLimiterConfig ) -> Self
  {
    Self
    {
      global: GovernorRateLimiter::direct( config.global.quota() ),
      per_tenant: DashMap::new(),
      tenant_quota: config.tenant.quota(),
      high_water_mark: config.high_water_mark,
      low_water_mark: config.low_water_mark,
    }
  }

  /// Checks both the global and the tenant bucket, consuming one unit
  /// from each only if both currently have capacity.
  ///
  /// # Errors
  ///
  /// Returns [`CoreError::RateLimited`] with the number of seconds the
  /// caller should wait, taken from whichever tier rejected the request.
  pub fn check( &self, tenant_id: &TenantId ) -> Result< (), CoreError >
  {
    self.global.check().map_err( Self::as_rate_limited )?;

    let bucket = self.tenant_bucket( tenant_id );
    bucket.check().map_err( Self::as_rate_limited )?;

    Ok( () )
  }

  fn tenant_bucket( &self, tenant_id: &TenantId ) -> Arc< DirectLimiter >
  {
    // Shared (read) lock on the shard while the common case — an existing
    // bucket — is satisfied.
    if let Some( existing ) = self.per_tenant.get( tenant_id )
    {
      return Arc::clone( &existing );
    }

    // Exclusive (write) lock only to create a bucket the first time this
    // tenant is seen. `entry` re-checks under the write lock so concurrent
    // first-requests from the same tenant don't create two buckets.
    Arc::clone(
      &*self
        .per_tenant
        .entry( tenant_id.clone() )
        .or_insert_with( || Arc::new( GovernorRateLimiter::direct( self.tenant_quota ) ) ),
    )
  }

  fn as_rate_limited( not_until: governor::NotUntil< <DefaultClock as Clock>::Instant > ) -> CoreError
  {
    let wait = not_until.wait_time_from( DefaultClock::default().now() );
    CoreError::RateLimited { retry_after_secs: wait.as_secs().max( 1 ) }
  }

  /// Evicts entries from the per-tenant map once it exceeds the configured
  /// high-water mark, bringing it back down to the low-water mark.
  ///
  /// Tenants are dropped in arbitrary (shard-iteration) order; a tenant
  /// evicted this way simply gets a fresh, full bucket on its next request,
  /// which is the correct, conservative behavior for an eviction whose only
  /// purpose is bounding memory.
  pub fn sweep( &self )
  {
    let len = self.per_tenant.len();
    if len <= self.high_water_mark
    {
      return;
    }

    let to_remove = len - self.low_water_mark;
    let victims: Vec< TenantId > = self
      .per_tenant
      .iter()
      .take( to_remove )
      .map( |entry| entry.key().clone() )
      .collect();

    for tenant_id in victims
    {
      self.per_tenant.remove( &tenant_id );
    }

    tracing::debug!( evicted = to_remove, remaining = self.per_tenant.len(), "swept rate limiter map" );
  }

  /// Number of tenants currently holding a bucket. Exposed for tests and
  /// metrics, not for request handling.
  #[must_use]
  pub fn tenant_bucket_count( &self ) -> usize
  {
    self.per_tenant.len()
  }
}

/// Spawns a background task that calls [`HierarchicalRateLimiter::sweep`]
/// on the given interval until the returned handle is dropped or aborted.
pub fn spawn_sweep( limiter: Arc< HierarchicalRateLimiter >, interval: Duration ) -> tokio::task::JoinHandle< () >
{
  tokio::spawn( async move
  {
    let mut ticker = tokio::time::interval( interval );
    loop
    {
      ticker.tick().await;
      limiter.sweep();
    }
  } )
}

#[cfg( test )]
mod tests
{
  use super::*;

  fn tiny_config() -> RateLimiterConfig
  {
    RateLimiterConfig
    {
      global: RateLimitParams { rps: 100, burst: 100 },
      tenant: RateLimitParams { rps: 1, burst: 1 },
      high_water_mark: 3,
      low_water_mark: 1,
      sweep_interval: Duration::from_millis( 10 ),
    }
  }

  #[test]
  fn allows_the_first_request_for_a_fresh_tenant()
  {
    let limiter = HierarchicalRateLimiter::new( tiny_config() );
    let tenant = TenantId::generate();

    assert!( limiter.check( &tenant ).is_ok() );
  }

  #[test]
  fn rejects_a_burst_over_capacity_with_rate_limited()
  {
    let limiter = HierarchicalRateLimiter::new( tiny_config() );
    let tenant = TenantId::generate();

    limiter.check( &tenant ).unwrap();
    let err = limiter.check( &tenant ).unwrap_err();

    assert_eq!( err.code(), "RATE_LIMITED" );
  }

  #[test]
  fn one_tenant_exhausting_its_bucket_does_not_affect_another_tenant()
  {
    let limiter = HierarchicalRateLimiter::new( tiny_config() );
    let tenant_a = TenantId::generate();
    let tenant_b = TenantId::generate();

    limiter.check( &tenant_a ).unwrap();
    assert!( limiter.check( &tenant_a ).is_err() );
    assert!( limiter.check( &tenant_b ).is_ok() );
  }

  #[test]
  fn sweep_evicts_down_to_the_low_water_mark_once_the_high_water_mark_is_crossed()
  {
    let limiter = HierarchicalRateLimiter::new( tiny_config() );

    for _ in 0..4
    {
      limiter.check( &TenantId::generate() ).ok();
    }
    assert_eq!( limiter.tenant_bucket_count(), 4 );

    limiter.sweep();

    assert_eq!( limiter.tenant_bucket_count(), 1 );
  }

  #[test]
  fn sweep_is_a_no_op_below_the_high_water_mark()
  {
    let limiter = HierarchicalRateLimiter::new( tiny_config() );
    limiter.check( &TenantId::generate() ).ok();

    limiter.sweep();

    assert_eq!( limiter.tenant_bucket_count(), 1 );
  }

  #[tokio::test]
  async fn spawned_sweep_runs_without_panicking()
  {
    let limiter = Arc::new( HierarchicalRateLimiter::new( tiny_config() ) );
    for _ in 0..4
    {
      limiter.check( &TenantId::generate() ).ok();
    }

    let handle = spawn_sweep( Arc::clone( &limiter ), Duration::from_millis( 5 ) );
    tokio::time::sleep( Duration::from_millis( 50 ) ).await;
    handle.abort();

    assert!( limiter.tenant_bucket_count() <= 3 );
  }
}
