//! Owner-only route guard
//!
//! Mobile routes are only reachable by pet owners, never by clinic staff
//! using the admin console. This runs after authentication has already
//! attached a [`Principal`] to the request's extensions, and simply
//! checks its [`PrincipalKind`] (spec §4.2).

use axum::
{
  body::Body,
  http::Request,
  middleware::Next,
  response::{ IntoResponse, Response },
};
use clinic_types::{ CoreError, Principal, PrincipalKind };

/// Rejects the request with `403 FORBIDDEN` unless the authenticated
/// principal is a pet owner.
///
/// Must run after whatever middleware attaches the [`Principal`] extension;
/// a missing `Principal` is treated as `401 UNAUTHORIZED` rather than a
/// panic, since that indicates a misordered middleware stack rather than
/// a caller error.
pub async fn require_owner( req: Request< Body >, next: Next ) -> Response
{
  let principal = match req.extensions().get::< Principal >()
  {
    Some( principal ) => principal,
    None => return CoreError::Unauthorized.into_response(),
  };

  if principal.kind != PrincipalKind::Owner
  {
    return CoreError::Forbidden( "this route is only available to pet owners".into() ).into_response();
  }

  next.run( req ).await
}

#[cfg( test )]
mod tests
{
  use super::*;
  use axum::
  {
    body::Body,
    http::{ Request, StatusCode },
    middleware::{ self, Next },
    routing::get,
    Router,
  };
  use chrono::Utc;
  use clinic_types::{ PrincipalId, TenantId };
  use std::collections::HashSet;
  use tower::ServiceExt;

  fn principal_of_kind( kind: PrincipalKind ) -> Principal
  {
    Principal
    {
      id: PrincipalId::generate(),
      display_name: "Test Principal".into(),
      email: "test@example.com".into(),
      hashed_secret: "irrelevant".into(),
      kind,
      is_super_admin: false,
      tenant_ids: HashSet::from( [ TenantId::generate() ] ),
      role_ids: HashSet::new(),
      created_at: Utc::now(),
      deleted_at: None,
    }
  }

  async fn inject_principal( principal: Principal, mut req: Request< Body >, next: Next ) -> Response
  {
    req.extensions_mut().insert( principal );
    next.run( req ).await
  }

  fn app_with_principal( principal: Option< Principal > ) -> Router
  {
    let router = Router::new().route( "/mobile/pets", get( || async { "ok" } ) );
    let router = router.layer( middleware::from_fn( require_owner ) );

    match principal
    {
      Some( principal ) =>
      {
        router.layer( middleware::from_fn( move |req, next| inject_principal( principal.clone(), req, next ) ) )
      }
      None => router,
    }
  }

  #[tokio::test]
  async fn allows_an_owner_through()
  {
    let app = app_with_principal( Some( principal_of_kind( PrincipalKind::Owner ) ) );
    let response = app
      .oneshot( Request::builder().uri( "/mobile/pets" ).body( Body::empty() ).unwrap() )
      .await
      .unwrap();

    assert_eq!( response.status(), StatusCode::OK );
  }

  #[tokio::test]
  async fn rejects_a_staff_principal_as_forbidden()
  {
    let app = app_with_principal( Some( principal_of_kind( PrincipalKind::Staff ) ) );
    let response = app
      .oneshot( Request::builder().uri( "/mobile/pets" ).body( Body::empty() ).unwrap() )
      .await
      .unwrap();

    assert_eq!( response.status(), StatusCode::FORBIDDEN );
  }

  #[tokio::test]
  async fn rejects_a_missing_principal_as_unauthorized()
  {
    let app = app_with_principal( None );
    let response = app
      .oneshot( Request::builder().uri( "/mobile/pets" ).body( Body::empty() ).unwrap() )
      .await
      .unwrap();

    assert_eq!( response.status(), StatusCode::UNAUTHORIZED );
  }
}
