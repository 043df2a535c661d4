//! Read-through cache for RBAC authorization decisions.
//!
//! Two implementations of a shared [`RbacCache`] trait: an in-memory
//! `dashmap`-backed one (always available) and an optional Redis one, used
//! when `AppConfig.redis_url` is `Some`. Both are keyed on
//! `(principal, resource, action)`, TTL'd, and support explicit
//! per-principal invalidation — cache errors are caught and logged inside
//! the adapter and never surface as an error to callers, so the RBAC engine
//! can never fail closed on cache unavailability (spec §4.1).

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod implementation
{
  use async_trait::async_trait;
  use clinic_types::{ Action, PrincipalId };
  use dashmap::DashMap;
  use std::sync::Arc;
  use std::time::{ Duration, Instant };

  /// Default time-to-live for a cached authorization decision (spec §4.1).
  pub const DEFAULT_TTL: Duration = Duration::from_secs( 15 * 60 );

  fn cache_key( principal_id: &PrincipalId, resource_name: &str, action: Action ) -> String
  {
    format!( "{}:{resource_name}:{action:?}", principal_id.as_str() )
  }

  fn principal_prefix( principal_id: &PrincipalId ) -> String
  {
    format!( "{}:", principal_id.as_str() )
  }

  /// Read-through cache for `(principal, resource, action) -> allow/deny`.
  /// Implementations must never return an error: a backend failure is
  /// logged and treated as a miss, which the caller falls through to the
  /// store for (spec §4.1: "must not fail closed on cache unavailability").
  #[async_trait]
  pub trait RbacCache: std::fmt::Debug + Send + Sync
  {
    /// Look up a cached decision. `None` means "miss or cache unavailable" —
    /// callers cannot distinguish the two, by design.
    async fn get( &self, principal_id: &PrincipalId, resource_name: &str, action: Action ) -> Option< bool >;

    /// Store a decision with the default TTL. Idempotent: writing the same
    /// key with the same value repeatedly has no additional effect.
    async fn set( &self, principal_id: &PrincipalId, resource_name: &str, action: Action, allow: bool );

    /// Invalidate every cached decision for a principal. Called on role
    /// mutation, permission mutation, and `role_ids` mutation (spec §9
    /// Open Question (c) — always publish the explicit invalidation rather
    /// than relying on TTL alone).
    async fn invalidate_principal( &self, principal_id: &PrincipalId );
  }

  struct Entry
  {
    value: bool,
    expires_at: Instant,
  }

  /// In-memory `RbacCache`, grounded on the `dashmap`-per-key pattern used
  /// throughout this codebase family for concurrent state. Always
  /// available, regardless of configuration.
  #[derive( Debug )]
  pub struct InMemoryRbacCache
  {
    entries: DashMap< String, Entry >,
    ttl: Duration,
  }

  impl InMemoryRbacCache
  {
    /// Create a cache with the default 15-minute TTL.
    #[must_use]
    pub fn new() -> Self
    {
      Self::with_ttl( DEFAULT_TTL )
    }

    /// Create a cache with an explicit TTL (tests use this to shrink it).
    #[must_use]
    pub fn with_ttl( ttl: Duration ) -> Self
    {
      Self { entries: DashMap::new(), ttl }
    }
  }

  impl Default for InMemoryRbacCache
  {
    fn default() -> Self
    {
      Self::new()
    }
  }

  impl std::fmt::Debug for Entry
  {
    fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      f.debug_struct( "Entry" ).field( "value", &self.value ).finish()
    }
  }

  #[async_trait]
  impl RbacCache for InMemoryRbacCache
  {
    async fn get( &self, principal_id: &PrincipalId, resource_name: &str, action: Action ) -> Option< bool >
    {
      let key = cache_key( principal_id, resource_name, action );
      let entry = self.entries.get( &key )?;
      if entry.expires_at <= Instant::now()
      {
        drop( entry );
        self.entries.remove( &key );
        return None;
      }
      Some( entry.value )
    }

    async fn set( &self, principal_id: &PrincipalId, resource_name: &str, action: Action, allow: bool )
    {
      let key = cache_key( principal_id, resource_name, action );
      self.entries.insert( key, Entry { value: allow, expires_at: Instant::now() + self.ttl } );
    }

    async fn invalidate_principal( &self, principal_id: &PrincipalId )
    {
      let prefix = principal_prefix( principal_id );
      self.entries.retain( | key, _ | !key.starts_with( &prefix ) );
    }
  }

  /// Redis-backed `RbacCache`, used when `AppConfig.redis_url` is `Some`.
  /// Keeps a per-principal Redis `SET` of live keys (`idx:{principal}`) so
  /// invalidation is a bounded `SMEMBERS` + `DEL` rather than a blocking
  /// `SCAN` over the whole keyspace.
  #[derive( Debug, Clone )]
  pub struct RedisRbacCache
  {
    conn: redis::aio::ConnectionManager,
    ttl_secs: u64,
  }

  impl RedisRbacCache
  {
    /// Connect to Redis at `redis_url`, using the default 15-minute TTL.
    ///
    /// # Errors
    ///
    /// Returns a `redis::RedisError` if the connection cannot be established.
    pub async fn connect( redis_url: &str ) -> Result< Self, redis::RedisError >
    {
      let client = redis::Client::open( redis_url )?;
      let conn = redis::aio::ConnectionManager::new( client ).await?;
      Ok( Self { conn, ttl_secs: DEFAULT_TTL.as_secs() } )
    }

    fn index_key( principal_id: &PrincipalId ) -> String
    {
      format!( "idx:{}", principal_id.as_str() )
    }
  }

  #[async_trait]
  impl RbacCache for RedisRbacCache
  {
    async fn get( &self, principal_id: &PrincipalId, resource_name: &str, action: Action ) -> Option< bool >
    {
      use redis::AsyncCommands;

      let key = cache_key( principal_id, resource_name, action );
      let mut conn = self.conn.clone();
      match conn.get::< _, Option< String > >( &key ).await
      {
        Ok( Some( raw ) ) => Some( raw == "1" ),
        Ok( None ) => None,
        Err( err ) =>
        {
          tracing::warn!( error = %err, key = %key, "rbac cache read failed, falling through to store" );
          None
        }
      }
    }

    async fn set( &self, principal_id: &PrincipalId, resource_name: &str, action: Action, allow: bool )
    {
      use redis::AsyncCommands;

      let key = cache_key( principal_id, resource_name, action );
      let index_key = Self::index_key( principal_id );
      let mut conn = self.conn.clone();

      let value = if allow { "1" } else { "0" };
      if let Err( err ) = conn.set_ex::< _, _, () >( &key, value, self.ttl_secs ).await
      {
        tracing::warn!( error = %err, key = %key, "rbac cache write failed" );
        return;
      }
      if let Err( err ) = conn.sadd::< _, _, () >( &index_key, &key ).await
      {
        tracing::warn!( error = %err, key = %index_key, "rbac cache index update failed" );
      }
    }

    async fn invalidate_principal( &self, principal_id: &PrincipalId )
    {
      use redis::AsyncCommands;

      let index_key = Self::index_key( principal_id );
      let mut conn = self.conn.clone();

      let keys: Vec< String > = match conn.smembers( &index_key ).await
      {
        Ok( keys ) => keys,
        Err( err ) =>
        {
          tracing::warn!( error = %err, principal = %principal_id, "rbac cache invalidation read failed" );
          return;
        }
      };

      if !keys.is_empty()
      {
        if let Err( err ) = conn.del::< _, () >( &keys ).await
        {
          tracing::warn!( error = %err, principal = %principal_id, "rbac cache invalidation delete failed" );
        }
      }
      if let Err( err ) = conn.del::< _, () >( &index_key ).await
      {
        tracing::warn!( error = %err, principal = %principal_id, "rbac cache index delete failed" );
      }
    }
  }

  /// Build the configured cache: Redis when `redis_url` is `Some` and
  /// reachable, falling back to the in-memory cache otherwise (never a
  /// hard failure — a cache is an optimization, not a dependency).
  pub async fn build( redis_url: Option< &str > ) -> Arc< dyn RbacCache >
  {
    if let Some( url ) = redis_url
    {
      match RedisRbacCache::connect( url ).await
      {
        Ok( cache ) => return Arc::new( cache ),
        Err( err ) => tracing::warn!( error = %err, "failed to connect to redis, falling back to in-memory rbac cache" ),
      }
    }
    Arc::new( InMemoryRbacCache::new() )
  }
}

#[cfg(feature = "enabled")]
pub use implementation::*;

#[cfg(test)]
mod tests
{
  use super::*;
  use clinic_types::PrincipalId;
  use std::time::Duration;

  #[tokio::test]
  async fn set_then_get_round_trips_before_expiry()
  {
    let cache = InMemoryRbacCache::new();
    let principal = PrincipalId::generate();

    cache.set( &principal, "appointments", Action::Get, true ).await;
    assert_eq!( cache.get( &principal, "appointments", Action::Get ).await, Some( true ) );
  }

  #[tokio::test]
  async fn get_misses_after_ttl_expires()
  {
    let cache = InMemoryRbacCache::with_ttl( Duration::from_millis( 10 ) );
    let principal = PrincipalId::generate();

    cache.set( &principal, "appointments", Action::Get, true ).await;
    tokio::time::sleep( Duration::from_millis( 30 ) ).await;
    assert_eq!( cache.get( &principal, "appointments", Action::Get ).await, None );
  }

  #[tokio::test]
  async fn invalidate_principal_clears_only_that_principals_keys()
  {
    let cache = InMemoryRbacCache::new();
    let alice = PrincipalId::generate();
    let bob = PrincipalId::generate();

    cache.set( &alice, "appointments", Action::Get, true ).await;
    cache.set( &bob, "appointments", Action::Get, true ).await;

    cache.invalidate_principal( &alice ).await;

    assert_eq!( cache.get( &alice, "appointments", Action::Get ).await, None );
    assert_eq!( cache.get( &bob, "appointments", Action::Get ).await, Some( true ) );
  }

  #[tokio::test]
  async fn distinct_actions_on_same_resource_are_independent_keys()
  {
    let cache = InMemoryRbacCache::new();
    let principal = PrincipalId::generate();

    cache.set( &principal, "appointments", Action::Get, true ).await;
    cache.set( &principal, "appointments", Action::Delete, false ).await;

    assert_eq!( cache.get( &principal, "appointments", Action::Get ).await, Some( true ) );
    assert_eq!( cache.get( &principal, "appointments", Action::Delete ).await, Some( false ) );
  }
}
