//! Bearer credential verification.
//!
//! Issuance (signing a token at login, refresh rotation) is explicitly out
//! of scope (spec §1 non-goals: "JWT issuance details"); this module only
//! verifies the `Authorization: Bearer <token>` header spec §6 says every
//! authenticated route consumes, and resolves it to a [`Principal`]. The
//! claims shape is trimmed to the one field this core actually needs out
//! of the token: the principal id.

use crate::envelope::{ self, RequestContext };
use axum::
{
  body::Body,
  extract::State,
  http::Request,
  middleware::Next,
  response::{ IntoResponse, Response },
};
use clinic_types::{ CoreError, Principal, PrincipalId };
use jsonwebtoken::{ decode, DecodingKey, Validation };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;

/// Claims this core requires of a bearer token. Whatever service issues
/// tokens may embed more; everything else is ignored.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Claims
{
  /// Principal id (spec §3 Principal "stable identifier").
  pub sub: String,
  /// Expiration, Unix seconds.
  pub exp: i64,
}

/// Decode and validate a bearer token against `secret`.
///
/// # Errors
///
/// Returns [`CoreError::Unauthorized`] if the token is malformed, expired,
/// or signed with a different secret.
pub fn decode_claims( token: &str, secret: &str ) -> Result< Claims, CoreError >
{
  decode::< Claims >( token, &DecodingKey::from_secret( secret.as_bytes() ), &Validation::default() )
    .map( | data | data.claims )
    .map_err( | _err | CoreError::Unauthorized )
}

fn bearer_token( req: &Request< Body > ) -> Option< &str >
{
  req.headers().get( axum::http::header::AUTHORIZATION )?.to_str().ok()?.strip_prefix( "Bearer " )
}

/// Authenticates the request: verifies the bearer token, resolves the
/// principal, and inserts both the [`PrincipalId`] and the full
/// [`Principal`] into the request's extensions for downstream middleware
/// (RBAC, owner-guard) and handlers to read.
///
/// Rejects with `401 UNAUTHORIZED` if the header is absent, the token does
/// not verify, or the principal it names does not exist (or is
/// soft-deleted).
pub async fn authenticate( State( state ): State< Arc< crate::server::AppState > >, mut req: Request< Body >, next: Next ) -> Response
{
  let ctx = RequestContext { path: req.uri().path().to_string(), request_id: clinic_telemetry::new_request_id() };

  let Some( token ) = bearer_token( &req ) else
  {
    return envelope::err( &ctx, &CoreError::Unauthorized );
  };

  let claims = match decode_claims( token, &state.config.jwt_secret )
  {
    Ok( claims ) => claims,
    Err( err ) => return envelope::err( &ctx, &err ),
  };

  let Ok( principal_id ) = claims.sub.parse::< PrincipalId >() else
  {
    return envelope::err( &ctx, &CoreError::Unauthorized );
  };

  let principal = match clinic_store::principal_repo::find_by_id( &state.pool, &principal_id ).await
  {
    Ok( Some( principal ) ) if principal.is_active() => principal,
    Ok( _ ) => return envelope::err( &ctx, &CoreError::Unauthorized ),
    Err( err ) =>
    {
      tracing::warn!( error = %err, "principal lookup failed during authentication" );
      return envelope::err( &ctx, &CoreError::Unauthorized );
    }
  };

  req.extensions_mut().insert( principal.id.clone() );
  req.extensions_mut().insert( principal );
  next.run( req ).await
}

#[cfg( test )]
mod tests
{
  use super::*;
  use chrono::Utc;

  fn token_for( sub: &str, secret: &str, exp_offset_secs: i64 ) -> String
  {
    let claims = Claims { sub: sub.to_string(), exp: Utc::now().timestamp() + exp_offset_secs };
    jsonwebtoken::encode( &jsonwebtoken::Header::default(), &claims, &jsonwebtoken::EncodingKey::from_secret( secret.as_bytes() ) ).unwrap()
  }

  #[test]
  fn decodes_a_validly_signed_token()
  {
    let id = PrincipalId::generate();
    let token = token_for( id.as_str(), "s3cret", 3600 );

    let claims = decode_claims( &token, "s3cret" ).unwrap();
    assert_eq!( claims.sub, id.as_str() );
  }

  #[test]
  fn rejects_a_token_signed_with_a_different_secret()
  {
    let token = token_for( "whoever", "s3cret", 3600 );
    let err = decode_claims( &token, "other-secret" ).unwrap_err();
    assert_eq!( err.code(), "UNAUTHORIZED" );
  }

  #[test]
  fn rejects_an_expired_token()
  {
    let token = token_for( "whoever", "s3cret", -3600 );
    let err = decode_claims( &token, "s3cret" ).unwrap_err();
    assert_eq!( err.code(), "UNAUTHORIZED" );
  }
}
