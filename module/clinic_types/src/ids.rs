//! Type-safe entity identifiers with validation and backward compatibility
//!
//! This module provides validated entity IDs with compile-time type safety
//! and runtime format validation. All IDs use underscore-separated format:
//! `prefix_uuid`
//!
//! # Quick Start
//!
//! ```
//! use clinic_types::TenantId;
//!
//! // Generate new ID
//! let id = TenantId::generate();
//! assert!(id.as_str().starts_with("tenant_"));
//!
//! // Parse existing ID
//! let id = TenantId::parse("tenant_550e8400-e29b-41d4-a716-446655440000")?;
//!
//! // Use in APIs (type-safe)
//! fn load_tenant(id: &TenantId) { /* ... */ }
//! load_tenant(&id);
//! # Ok::<(), clinic_types::IdError>(())
//! ```
//!
//! # Supported Entity Types
//!
//! | Type | Prefix | Example | Use Case |
//! |------|--------|---------|----------|
//! | `PrincipalId` | `principal_` | `principal_550e8400-...` | Authenticated user/service account |
//! | `TenantId` | `tenant_` | `tenant_550e8400-...` | Clinic tenant |
//! | `ResourceId` | `res_` | `res_550e8400-...` | Arbitrary authorizable resource |
//! | `PermissionId` | `perm_` | `perm_550e8400-...` | Permission grant definition |
//! | `RoleId` | `role_` | `role_550e8400-...` | Role bundling permissions |
//! | `PlanId` | `plan_` | `plan_550e8400-...` | Subscription plan |
//! | `PaymentId` | `pay_` | `pay_550e8400-...` | Payment/webhook-derived transaction |
//! | `AuditEventId` | `audit_` | `audit_550e8400-...` | Append-only audit log entry |
//!
//! # Migration from Legacy Format
//!
//! Some callers still produce hyphen-separated IDs (`tenant-<uuid>`). For
//! backward compatibility while those call sites are updated, use
//! `parse_flexible()`:
//!
//! ```
//! use clinic_types::TenantId;
//!
//! // Current format (strict validation)
//! let id1 = TenantId::parse("tenant_550e8400-e29b-41d4-a716-446655440000")?;
//!
//! // Legacy format (auto-normalized)
//! let id2 = TenantId::parse_flexible("tenant-550e8400-e29b-41d4-a716-446655440000")?;
//!
//! assert_eq!(id1.as_str(), id2.as_str());
//! # Ok::<(), clinic_types::IdError>(())
//! ```
//!
//! **When to use `parse_flexible()`:**
//! - Reading IDs from databases or logs that predate the underscore format
//! - Processing IDs from external systems (e.g. a payment provider's metadata)
//!
//! **When to use `parse()`:**
//! - For newly generated IDs or any freshly issued identifier
//!
//! # Security
//!
//! 1. **Type safety**: prevents mixing a `TenantId` with a `PrincipalId` at compile time.
//! 2. **Injection prevention**: strict UUID validation blocks SQL/XSS/path traversal payloads
//!    riding along in an ID-shaped parameter.
//! 3. **Immutable prefixes**: prefixes are `const`, never user-controlled.
//! 4. **Security telemetry**: failed parses are logged when the `telemetry` feature is enabled.
//!
//! # Feature Flags
//!
//! - `enabled` (default): enables all ID types and their dependencies.
//! - `telemetry`: logs failed/normalized parses via `tracing`.
//! - `test-helpers`: exposes `test_fixture`, `from_uuid`, `test_with_suffix` for deterministic
//!   fixtures in this crate's and downstream crates' test suites.

use serde::{ Deserialize, Serialize };
use std::fmt;

/// Entity ID prefixes
pub mod prefix
{
  pub const PRINCIPAL: &str = "principal_";
  pub const TENANT: &str = "tenant_";
  pub const RESOURCE: &str = "res_";
  pub const PERMISSION: &str = "perm_";
  pub const ROLE: &str = "role_";
  pub const PLAN: &str = "plan_";
  pub const PAYMENT: &str = "pay_";
  pub const AUDIT_EVENT: &str = "audit_";
}

/// Errors that can occur during ID parsing
#[derive( Debug, Clone, PartialEq, Eq, thiserror::Error )]
pub enum IdError
{
  #[error( "Invalid prefix: expected '{expected}', found '{found}'\n\
            Hint: Entity IDs must start with '{expected}'.\n\
            Example: {expected}550e8400-e29b-41d4-a716-446655440000" )]
  InvalidPrefix
  {
    expected: &'static str,
    found: String,
  },

  #[error( "Missing UUID component\n\
            Hint: ID format is 'prefix_uuid' where uuid is 36 characters.\n\
            Example: tenant_550e8400-e29b-41d4-a716-446655440000" )]
  MissingUuid,

  #[error( "Invalid UUID format: '{0}'\n\
            Hint: UUID must be 36 characters in format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx\n\
            - Must use lowercase hexadecimal (a-f, 0-9)\n\
            - Must have hyphens at positions 8, 13, 18, 23\n\
            Example: tenant_550e8400-e29b-41d4-a716-446655440000" )]
  InvalidUuid( String ),

  #[error( "Empty ID string\n\
            Hint: Provide a valid entity ID in format 'prefix_uuid'.\n\
            Example: tenant_550e8400-e29b-41d4-a716-446655440000" )]
  EmptyId,
}

impl IdError
{
  /// Get machine-readable error code for API responses
  ///
  /// # Example
  /// ```
  /// use clinic_types::TenantId;
  ///
  /// let err = TenantId::parse("invalid").unwrap_err();
  /// assert_eq!(err.code(), "INVALID_PREFIX");
  /// ```
  pub fn code( &self ) -> &'static str
  {
    match self {
      Self::InvalidPrefix { .. } => "INVALID_PREFIX",
      Self::MissingUuid => "MISSING_UUID",
      Self::InvalidUuid( .. ) => "INVALID_UUID",
      Self::EmptyId => "EMPTY_ID",
    }
  }

  /// Get actionable suggestion for fixing the error
  pub fn suggestion( &self ) -> Option< String >
  {
    match self {
      Self::InvalidPrefix { expected, found } => {
        if found.starts_with( &expected.replace( '_', "-" ) ) {
          Some( format!(
            "Legacy hyphen format detected. Use underscore instead: '{}'",
            found.replace( '-', "_" )
          ) )
        } else {
          Some( format!( "ID must start with '{}'", expected ) )
        }
      }
      Self::InvalidUuid( uuid ) => {
        if uuid.len() != 36 {
          Some( format!(
            "UUID must be exactly 36 characters, got {}. \
             Format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx",
            uuid.len()
          ) )
        } else if uuid.chars().any( |c| c.is_ascii_uppercase() ) {
          Some( "UUID must use lowercase hexadecimal characters (a-f, 0-9)".into() )
        } else {
          Some( "Verify UUID has hyphens at correct positions (8-4-4-4-12)".into() )
        }
      }
      Self::MissingUuid => {
        Some( "Provide the UUID component after the prefix".into() )
      }
      Self::EmptyId => {
        Some( "Provide a non-empty ID string".into() )
      }
    }
  }
}

/// Validates that a string is a valid UUID (hyphenated lowercase hex)
fn is_valid_uuid( s: &str ) -> bool
{
  if s.len() != 36
  {
    return false;
  }

  let parts: Vec< &str > = s.split( '-' ).collect();
  if parts.len() != 5
  {
    return false;
  }

  let expected_lens = [ 8, 4, 4, 4, 12 ];
  for ( part, &expected_len ) in parts.iter().zip( expected_lens.iter() )
  {
    if part.len() != expected_len
    {
      return false;
    }
    if !part.chars().all( |c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() )
    {
      return false;
    }
  }

  true
}

/// Macro to define ID types with validation and generation
macro_rules! define_id
{
  (
    $( #[ $meta:meta ] )*
    $name:ident,
    $prefix:expr,
    $doc:expr
  ) =>
  {
    $( #[ $meta ] )*
    #[ doc = $doc ]
    #[ derive( Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize )]
    #[ serde( try_from = "String", into = "String" )]
    pub struct $name( String );

    impl $name
    {
      /// Parse an ID from a string, validating format
      ///
      /// # Security
      ///
      /// Failed parse attempts are logged when the `telemetry` feature is enabled.
      pub fn parse( s: impl AsRef< str > ) -> Result< Self, IdError >
      {
        let s = s.as_ref();
        let result = Self::parse_impl( s );

        #[cfg( feature = "telemetry" )]
        if let Err( ref error ) = result
        {
          tracing::warn!(
            id_type = stringify!( $name ),
            error = %error,
            input_len = s.len(),
            expected_prefix = $prefix,
            "Failed to parse entity ID - possible security event"
          );
        }

        result
      }

      /// Internal parse implementation (separated for telemetry)
      fn parse_impl( s: &str ) -> Result< Self, IdError >
      {
        if s.is_empty()
        {
          return Err( IdError::EmptyId );
        }

        if !s.starts_with( $prefix )
        {
          return Err( IdError::InvalidPrefix
          {
            expected: $prefix,
            found: s.chars().take( $prefix.len() + 1 ).collect(),
          } );
        }

        let uuid_part = &s[ $prefix.len().. ];
        if uuid_part.is_empty()
        {
          return Err( IdError::MissingUuid );
        }

        if !is_valid_uuid( uuid_part )
        {
          return Err( IdError::InvalidUuid( uuid_part.to_string() ) );
        }

        Ok( Self( s.to_string() ) )
      }

      /// Parse an ID accepting both current (underscore) and legacy (hyphen) formats
      ///
      /// Use this while reading from stores that may still hold legacy-format IDs;
      /// prefer `parse()` for anything freshly generated.
      pub fn parse_flexible( s: impl AsRef< str > ) -> Result< Self, IdError >
      {
        let s = s.as_ref();

        if let Ok( id ) = Self::parse( s )
        {
          return Ok( id );
        }

        let legacy_prefix = $prefix.replace( '_', "-" );
        if s.starts_with( &legacy_prefix )
        {
          let uuid_part = &s[ legacy_prefix.len().. ];

          if uuid_part.is_empty()
          {
            return Err( IdError::MissingUuid );
          }

          if !is_valid_uuid( uuid_part )
          {
            return Err( IdError::InvalidUuid( uuid_part.to_string() ) );
          }

          let normalized = format!( "{}{}", $prefix, uuid_part );

          #[cfg( feature = "telemetry" )]
          tracing::info!(
            id_type = stringify!( $name ),
            original_format = "legacy-hyphen",
            normalized_format = "current-underscore",
            "Normalized legacy ID format to current format"
          );

          return Ok( Self( normalized ) );
        }

        let result = Self::parse( s );

        #[cfg( feature = "telemetry" )]
        if let Err( ref error ) = result
        {
          tracing::warn!(
            id_type = stringify!( $name ),
            error = %error,
            input_len = s.len(),
            expected_prefix = $prefix,
            legacy_prefix = legacy_prefix,
            "Failed to parse entity ID in both current and legacy formats"
          );
        }

        result
      }

      /// Generate a new random ID
      #[must_use]
      pub fn generate() -> Self
      {
        Self( format!( "{}{}", $prefix, uuid::Uuid::new_v4() ) )
      }

      /// Get the ID as a string slice
      #[must_use]
      pub fn as_str( &self ) -> &str
      {
        &self.0
      }

      /// Get the prefix for this ID type
      #[must_use]
      pub fn prefix() -> &'static str
      {
        $prefix
      }
    }

    impl fmt::Display for $name
    {
      fn fmt( &self, f: &mut fmt::Formatter< '_ > ) -> fmt::Result
      {
        write!( f, "{}", self.0 )
      }
    }

    impl TryFrom< String > for $name
    {
      type Error = IdError;

      fn try_from( value: String ) -> Result< Self, Self::Error >
      {
        Self::parse( value )
      }
    }

    impl From< $name > for String
    {
      fn from( id: $name ) -> Self
      {
        id.0
      }
    }

    impl AsRef< str > for $name
    {
      fn as_ref( &self ) -> &str
      {
        &self.0
      }
    }

    impl std::str::FromStr for $name
    {
      type Err = IdError;

      fn from_str( s: &str ) -> Result< Self, Self::Err >
      {
        Self::parse( s )
      }
    }
  };
}

// Define all entity ID types

define_id!
(
  PrincipalId,
  prefix::PRINCIPAL,
  "Unique identifier for an authenticated principal (format: `principal_<uuid>`)"
);

define_id!
(
  TenantId,
  prefix::TENANT,
  "Unique identifier for a tenant clinic (format: `tenant_<uuid>`)"
);

define_id!
(
  ResourceId,
  prefix::RESOURCE,
  "Unique identifier for an authorizable resource (format: `res_<uuid>`)"
);

define_id!
(
  PermissionId,
  prefix::PERMISSION,
  "Unique identifier for a permission grant definition (format: `perm_<uuid>`)"
);

define_id!
(
  RoleId,
  prefix::ROLE,
  "Unique identifier for a role bundling permissions (format: `role_<uuid>`)"
);

define_id!
(
  PlanId,
  prefix::PLAN,
  "Unique identifier for a subscription plan (format: `plan_<uuid>`)"
);

define_id!
(
  PaymentId,
  prefix::PAYMENT,
  "Unique identifier for a payment/webhook-derived transaction (format: `pay_<uuid>`)"
);

define_id!
(
  AuditEventId,
  prefix::AUDIT_EVENT,
  "Unique identifier for an append-only audit log entry (format: `audit_<uuid>`)"
);

// Test utilities for all ID types
#[cfg( any( test, feature = "test-helpers" ) )]
macro_rules! impl_test_utilities
{
  ( $name:ident, $prefix:expr ) =>
  {
    impl $name
    {
      /// Create ID from a known UUID for testing
      pub fn from_uuid( uuid: uuid::Uuid ) -> Self
      {
        Self( format!( "{}{}", $prefix, uuid ) )
      }

      /// Create ID with sequential number for testing
      ///
      /// Generates deterministic UUIDs for test fixtures, making tests
      /// reproducible and debuggable.
      pub fn test_fixture( n: u32 ) -> Self
      {
        let uuid = uuid::Uuid::from_u128( n as u128 );
        Self::from_uuid( uuid )
      }

      /// Create ID with custom suffix for testing edge cases
      ///
      /// **Warning:** this bypasses validation and should only be used to
      /// construct intentionally invalid IDs for error-path testing.
      pub fn test_with_suffix( suffix: &str ) -> Self
      {
        Self( format!( "{}{}", $prefix, suffix ) )
      }
    }
  };
}

#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( PrincipalId, prefix::PRINCIPAL );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( TenantId, prefix::TENANT );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( ResourceId, prefix::RESOURCE );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( PermissionId, prefix::PERMISSION );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( RoleId, prefix::ROLE );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( PlanId, prefix::PLAN );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( PaymentId, prefix::PAYMENT );
#[cfg( any( test, feature = "test-helpers" ) )]
impl_test_utilities!( AuditEventId, prefix::AUDIT_EVENT );

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn tenant_id_generate_has_correct_prefix()
  {
    let id = TenantId::generate();
    assert!( id.as_str().starts_with( "tenant_" ) );
    assert_eq!( id.as_str().len(), "tenant_".len() + 36 );
  }

  #[test]
  fn tenant_id_parse_valid()
  {
    let id_str = "tenant_550e8400-e29b-41d4-a716-446655440000";
    let id = TenantId::parse( id_str ).unwrap();
    assert_eq!( id.as_str(), id_str );
  }

  #[test]
  fn tenant_id_parse_invalid_prefix()
  {
    let result = TenantId::parse( "wrong_550e8400-e29b-41d4-a716-446655440000" );
    assert!( matches!( result, Err( IdError::InvalidPrefix { .. } ) ) );
  }

  #[test]
  fn tenant_id_parse_missing_uuid()
  {
    let result = TenantId::parse( "tenant_" );
    assert!( matches!( result, Err( IdError::MissingUuid ) ) );
  }

  #[test]
  fn tenant_id_parse_empty()
  {
    let result = TenantId::parse( "" );
    assert!( matches!( result, Err( IdError::EmptyId ) ) );
  }

  #[test]
  fn tenant_id_parse_flexible_accepts_legacy_hyphen()
  {
    let legacy = "tenant-550e8400-e29b-41d4-a716-446655440000";
    let id = TenantId::parse_flexible( legacy ).unwrap();
    assert_eq!( id.as_str(), "tenant_550e8400-e29b-41d4-a716-446655440000" );
  }

  #[test]
  fn distinct_id_types_do_not_cross_parse()
  {
    let tenant = TenantId::generate();
    let result = PrincipalId::parse( tenant.as_str() );
    assert!( result.is_err() );
  }

  #[test]
  fn roundtrip_through_string_conversion()
  {
    let id = RoleId::generate();
    let as_string: String = id.clone().into();
    let parsed_back = RoleId::try_from( as_string ).unwrap();
    assert_eq!( id, parsed_back );
  }

  #[test]
  fn test_fixture_ids_are_deterministic()
  {
    let a = PaymentId::test_fixture( 1 );
    let b = PaymentId::test_fixture( 1 );
    assert_eq!( a, b );
    assert_eq!( a.as_str(), "pay_00000000-0000-0000-0000-000000000001" );
  }
}
