//! Derives `(resourceName, action)` from the route and dispatches to
//! [`clinic_rbac::authorize`] (spec §4.1 Inputs / Design Note
//! "route-string introspection").
//!
//! Must run after [`crate::auth::authenticate`] (needs a [`PrincipalId`]
//! extension) and after [`clinic_tenancy::tenant_id::require_tenant_id`]
//! (needs a [`TenantId`] extension).

use crate::envelope::{ self, RequestContext };
use axum::
{
  body::Body,
  extract::{ MatchedPath, State },
  http::Request,
  middleware::Next,
  response::{ IntoResponse, Response },
};
use clinic_types::{ Action, CoreError, PrincipalId, TenantId };
use std::sync::Arc;

/// The resource name the engine authorizes against is the route
/// template's last segment that is not a parameter placeholder (`:id` or
/// `{id}`). A route with no such segment (`/health`, `/webhooks/:provider`
/// taken alone) has nothing to authorize and is skipped — spec §4.1 edge
/// case "route without a terminal non-parameter segment".
#[must_use]
pub fn resource_name_from_route( route: &str ) -> Option< &str >
{
  route
    .split( '/' )
    .filter( | segment | !segment.is_empty() )
    .rev()
    .find( | segment | !is_placeholder( segment ) )
}

fn is_placeholder( segment: &str ) -> bool
{
  segment.starts_with( ':' ) || ( segment.starts_with( '{' ) && segment.ends_with( '}' ) )
}

/// Authorizes the request against the RBAC engine, or defers (lets the
/// request through unauthorized at this layer) when the route carries no
/// resource name or the HTTP method is outside the closed action set
/// (spec §4.1 Inputs: "the engine does not evaluate and defers").
pub async fn authorize_request( State( state ): State< Arc< crate::server::AppState > >, req: Request< Body >, next: Next ) -> Response
{
  let ctx = RequestContext { path: req.uri().path().to_string(), request_id: clinic_telemetry::new_request_id() };

  let Some( action ) = Action::from_method( req.method().as_str() ) else
  {
    return next.run( req ).await;
  };

  let Some( resource_name ) = req.extensions().get::< MatchedPath >().and_then( | path | resource_name_from_route( path.as_str() ) ) else
  {
    return next.run( req ).await;
  };
  let resource_name = resource_name.to_string();

  let Some( principal_id ) = req.extensions().get::< PrincipalId >().cloned() else
  {
    return envelope::err( &ctx, &CoreError::Unauthorized );
  };

  let Some( tenant_id ) = req.extensions().get::< TenantId >().cloned() else
  {
    return envelope::err( &ctx, &CoreError::InvalidInput( "missing tenant scope".into() ) );
  };

  match clinic_rbac::authorize( &state.pool, &state.cache, &tenant_id, &principal_id, &resource_name, action ).await
  {
    Ok( true ) => next.run( req ).await,
    Ok( false ) => envelope::err( &ctx, &CoreError::Forbidden( format!( "not permitted to {action:?} {resource_name}" ) ) ),
    Err( err ) => envelope::err( &ctx, &err ),
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn takes_the_last_non_placeholder_segment_colon_style()
  {
    assert_eq!( resource_name_from_route( "/api/tenants/:tenant_id/appointments/:id" ), Some( "appointments" ) );
  }

  #[test]
  fn takes_the_last_non_placeholder_segment_brace_style()
  {
    assert_eq!( resource_name_from_route( "/api/tenants/{tenant_id}/patients" ), Some( "patients" ) );
  }

  #[test]
  fn returns_none_when_every_segment_is_a_placeholder()
  {
    assert_eq!( resource_name_from_route( "/api/:a/:b" ), None );
  }

  #[test]
  fn returns_none_for_a_route_with_no_segments()
  {
    assert_eq!( resource_name_from_route( "/" ), None );
  }

  #[test]
  fn a_plain_route_with_no_placeholders_uses_its_final_segment()
  {
    assert_eq!( resource_name_from_route( "/health" ), Some( "health" ) );
  }
}
