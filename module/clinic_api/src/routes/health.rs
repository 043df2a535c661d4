//! Liveness probe. Framework-level, tagged neither tenant-scoped nor
//! authenticated — spec §4.1 edge case "route without a terminal
//! non-parameter segment" exists precisely so routes like this one are
//! reachable without going through the RBAC engine.

use crate::envelope::{ self, RequestContext };
use axum::{ http::StatusCode, response::Response };

pub async fn health( ctx: RequestContext ) -> Response
{
  envelope::ok( &ctx, StatusCode::OK, serde_json::json!( { "status": "ok" } ) )
}
