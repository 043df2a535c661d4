//! Tenant identification middleware
//!
//! Every tenant-scoped route requires an `X-Tenant-ID` header. This
//! middleware resolves it once, at the edge, so downstream handlers and
//! the rate limiter can both trust `req.extensions()` to carry an already
//! -validated [`TenantId`] rather than re-parsing the header themselves
//! (spec §4.2).
//!
//! The header is expected in the same `tenant_<uuid>` form [`TenantId`]
//! uses everywhere else in this codebase — the store, the audit log, the
//! billing webhooks. An older revision of this system minted tenant
//! identifiers as bare 24-hex Mongo object ids; that wire format is not
//! produced or consumed anywhere in this rewrite, so [`TenantId::parse_flexible`]
//! (which also accepts the legacy hyphenated form, but not the Mongo one)
//! is what "malformed" is measured against here.

use axum::
{
  body::Body,
  http::Request,
  middleware::Next,
  response::{ IntoResponse, Response },
};
use clinic_types::{ CoreError, TenantId };

/// Name of the header carrying the caller's tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Extracts and validates the `X-Tenant-ID` header, inserting the parsed
/// [`TenantId`] into the request's extensions on success.
///
/// Rejects with `400 INVALID_INPUT` when the header is missing, is not
/// valid UTF-8, or does not parse as a [`TenantId`].
pub async fn require_tenant_id( mut req: Request< Body >, next: Next ) -> Response
{
  match extract_tenant_id( &req )
  {
    Ok( tenant_id ) =>
    {
      req.extensions_mut().insert( tenant_id );
      next.run( req ).await
    }
    Err( err ) => err.into_response(),
  }
}

/// Pulls the tenant id out of a request's headers without consuming the
/// request, so it can be unit-tested independently of the middleware
/// plumbing.
pub fn extract_tenant_id( req: &Request< Body > ) -> Result< TenantId, CoreError >
{
  let header = req
    .headers()
    .get( TENANT_HEADER )
    .ok_or_else( || CoreError::InvalidInput( format!( "missing {TENANT_HEADER} header" ) ) )?;

  let raw = header
    .to_str()
    .map_err( |_err| CoreError::InvalidInput( format!( "{TENANT_HEADER} header is not valid UTF-8" ) ) )?;

  TenantId::parse_flexible( raw ).map_err( CoreError::from )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use axum::http::Request;

  fn request_with_header( value: Option< &str > ) -> Request< Body >
  {
    let mut builder = Request::builder().uri( "/api/tenants/whatever" );
    if let Some( value ) = value
    {
      builder = builder.header( TENANT_HEADER, value );
    }
    builder.body( Body::empty() ).unwrap()
  }

  #[test]
  fn accepts_a_well_formed_tenant_id()
  {
    let id = TenantId::generate();
    let req = request_with_header( Some( id.as_str() ) );

    let parsed = extract_tenant_id( &req ).unwrap();
    assert_eq!( parsed, id );
  }

  #[test]
  fn accepts_the_legacy_hyphenated_form()
  {
    let id = TenantId::generate();
    let legacy = id.as_str().replacen( "tenant_", "tenant-", 1 );
    let req = request_with_header( Some( &legacy ) );

    let parsed = extract_tenant_id( &req ).unwrap();
    assert_eq!( parsed, id );
  }

  #[test]
  fn rejects_a_missing_header()
  {
    let req = request_with_header( None );
    let err = extract_tenant_id( &req ).unwrap_err();
    assert_eq!( err.code(), "INVALID_INPUT" );
  }

  #[test]
  fn rejects_a_bare_twenty_four_hex_object_id()
  {
    // The predecessor system's wire format; no longer accepted.
    let req = request_with_header( Some( "507f1f77bcf86cd799439011" ) );
    let err = extract_tenant_id( &req ).unwrap_err();
    assert_eq!( err.code(), "INVALID_INPUT" );
  }

  #[test]
  fn rejects_malformed_ids()
  {
    let req = request_with_header( Some( "tenant_not-a-uuid" ) );
    let err = extract_tenant_id( &req ).unwrap_err();
    assert_eq!( err.code(), "INVALID_INPUT" );
  }
}
