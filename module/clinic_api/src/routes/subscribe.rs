//! `POST /api/tenants/{tenant_id}/subscribe` (spec §4.4 "Subscribe
//! operation", §8 scenario 1 "Happy-path subscribe").

use crate::envelope::{ self, RequestContext };
use crate::server::AppState;
use axum::
{
  extract::{ Path, State },
  http::StatusCode,
  response::Response,
  Json,
};
use clinic_billing::money::BillingPeriod;
use clinic_types::{ CoreError, PaymentId, PlanId, TenantId };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;

/// Request body for the subscribe route.
#[derive( Debug, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct SubscribeRequest
{
  pub plan_id: String,
  pub provider: String,
  pub billing_period: BillingPeriodWire,
}

/// Wire representation of [`BillingPeriod`] — `monthly` or `annual`, per
/// spec §8 scenario 1's `{billingPeriod: monthly}`.
#[derive( Debug, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum BillingPeriodWire
{
  Monthly,
  Annual,
}

impl From< BillingPeriodWire > for BillingPeriod
{
  fn from( wire: BillingPeriodWire ) -> Self
  {
    match wire
    {
      BillingPeriodWire::Monthly => Self::Monthly,
      BillingPeriodWire::Annual => Self::Annual,
    }
  }
}

#[derive( Debug, Serialize )]
#[serde( rename_all = "camelCase" )]
struct SubscribeResponse
{
  checkout_url: String,
  payment_id: PaymentId,
}

pub async fn subscribe(
  State( state ): State< Arc< AppState > >,
  ctx: RequestContext,
  Path( tenant_id ): Path< String >,
  Json( request ): Json< SubscribeRequest >,
) -> Response
{
  let tenant_id = match tenant_id.parse::< TenantId >()
  {
    Ok( id ) => id,
    Err( err ) => return envelope::err( &ctx, &CoreError::from( err ) ),
  };

  let plan_id = match request.plan_id.parse::< PlanId >()
  {
    Ok( id ) => id,
    Err( err ) => return envelope::err( &ctx, &CoreError::from( err ) ),
  };

  let outcome = clinic_billing::subscribe(
    &state.pool,
    &state.provider_registry,
    &state.payment_breaker,
    &state.retry_policy,
    &state.cancel,
    &tenant_id,
    &plan_id,
    &request.provider,
    request.billing_period.into(),
  )
  .await;

  match outcome
  {
    Ok( outcome ) => envelope::ok(
      &ctx,
      StatusCode::OK,
      SubscribeResponse { checkout_url: outcome.checkout_url, payment_id: outcome.payment_id },
    ),
    Err( err ) => envelope::err( &ctx, &err ),
  }
}
