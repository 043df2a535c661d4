//! Integer minor-currency-unit arithmetic for subscription pricing.
//!
//! Prices are computed and compared as integers; a value never crosses an
//! `f64` boundary except to round once at the edge.

/// Billing period a tenant may subscribe under.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum BillingPeriod
{
  Monthly,
  Annual,
}

/// Compute the amount to charge, in minor currency units, for one billing
/// period of `plan` (spec §4.4 step 2: "amount in minor units = price ×
/// 100, rounded to nearest integer"). Plan prices are already stored in
/// minor units in [`clinic_types::Plan`], so this selects the right field
/// rather than re-deriving the multiplication — the ×100 step already
/// happened when the plan was created.
#[must_use]
pub fn amount_minor_for_period( plan: &clinic_types::Plan, period: BillingPeriod ) -> i64
{
  match period
  {
    BillingPeriod::Monthly => plan.monthly_price_minor,
    BillingPeriod::Annual => plan.annual_price_minor,
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use clinic_types::PlanId;

  fn sample_plan() -> clinic_types::Plan
  {
    clinic_types::Plan
    {
      id: PlanId::generate(),
      display_name: "Pro".into(),
      monthly_price_minor: 490_000,
      annual_price_minor: 4_900_000,
      currency: "COP".into(),
      users_limit: 25,
      branches_limit: 5,
      storage_limit_mb: 10_240,
      features: vec![],
      is_visible: true,
    }
  }

  #[test]
  fn monthly_period_selects_monthly_price()
  {
    let plan = sample_plan();
    assert_eq!( amount_minor_for_period( &plan, BillingPeriod::Monthly ), 490_000 );
  }

  #[test]
  fn annual_period_selects_annual_price()
  {
    let plan = sample_plan();
    assert_eq!( amount_minor_for_period( &plan, BillingPeriod::Annual ), 4_900_000 );
  }
}
