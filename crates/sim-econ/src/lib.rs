#![deny(warnings)]

//! Economic models for the market strategy simulation.
//!
//! This crate provides the pure functions the round-resolution engine is
//! built from:
//! - Effect-schedule resolution: unit profits and capacity for a round
//! - Competitive share computation with an equal-split fallback
//! - Inertia smoothing of segment shares
//! - Investment costing, valuation multiples, and estimated share price
//! - Shared-minimum rank computation

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sim_core::{RoundDecision, ScheduledEffect, VerticalIntegration};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Weights must be finite and non-negative.
    #[error("invalid demand weight: {0}")]
    InvalidWeight(f64),
    /// The equal-split fallback needs a positive firm count.
    #[error("firm count must be greater than zero")]
    NoFirms,
    /// Numeric conversion to decimal failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Base unit profit for the low-end segment, before bonuses.
pub const BASE_LOW_UNIT_PROFIT: i64 = 500;
/// Base unit profit for the high-end segment, before bonuses.
pub const BASE_HIGH_UNIT_PROFIT: i64 = 1_000;
/// Cost of a Manufacturing vertical-integration investment.
pub const MANUFACTURING_COST: i64 = 3_000_000;
/// Cost of a Software vertical-integration investment.
pub const SOFTWARE_COST: i64 = 1_500_000;
/// Cost of building one factory.
pub const FACTORY_COST: i64 = 5_000_000;
/// Capacity bonus per active factory; factories compound multiplicatively.
pub const FACTORY_CAPACITY_STEP: f64 = 1.1;

/// A firm's resolved economics for one round, derived purely from its
/// effect schedule and the round number.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitEconomics {
    /// Profit per unit sold in the low-end segment.
    pub low_unit_profit: Decimal,
    /// Profit per unit sold in the high-end segment.
    pub high_unit_profit: Decimal,
    /// Multiplier applied to the firm's allocated demand weight.
    pub capacity_multiplier: f64,
    /// True iff at least one factory has reached its activation round.
    pub factory_active: bool,
}

/// Resolve an effect schedule for a given round.
///
/// Manufacturing bonuses apply only inside their two-round window, Software
/// bonuses apply from activation onward, and each active factory multiplies
/// capacity by 1.1.
pub fn unit_economics(effects: &[ScheduledEffect], round: u32) -> UnitEconomics {
    let mut low = Decimal::new(BASE_LOW_UNIT_PROFIT, 0);
    let mut high = Decimal::new(BASE_HIGH_UNIT_PROFIT, 0);
    let mut active_factories: u32 = 0;
    for effect in effects {
        match *effect {
            ScheduledEffect::Manufacturing {
                first_round,
                last_round,
            } if (first_round..=last_round).contains(&round) => {
                low += Decimal::new(100, 0);
                high += Decimal::new(200, 0);
            }
            ScheduledEffect::Software { first_round } if round >= first_round => {
                low += Decimal::new(5, 0);
                high += Decimal::new(10, 0);
            }
            ScheduledEffect::Factory { first_round } if round >= first_round => {
                active_factories += 1;
            }
            _ => {}
        }
    }
    UnitEconomics {
        low_unit_profit: low,
        high_unit_profit: high,
        capacity_multiplier: FACTORY_CAPACITY_STEP.powi(active_factories as i32),
        factory_active: active_factories > 0,
    }
}

/// Raw competitive shares from demand weights.
///
/// Each share is `w_i / Σw`. When the total weight is zero the segment is in
/// a defined degenerate state and every firm receives the equal split
/// `1 / firm_count` — including firms with zero input.
pub fn competitive_shares(weights: &[f64], firm_count: usize) -> Result<Vec<f64>, EconError> {
    if firm_count == 0 {
        return Err(EconError::NoFirms);
    }
    for &w in weights {
        if !w.is_finite() || w < 0.0 {
            return Err(EconError::InvalidWeight(w));
        }
    }
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        Ok(weights.iter().map(|w| w / total).collect())
    } else {
        Ok(vec![1.0 / firm_count as f64; weights.len()])
    }
}

/// Inertia smoothing: retain `alpha` of the previous settled share.
pub fn smooth_share(prev: f64, raw: f64, alpha: f64) -> f64 {
    alpha * prev + (1.0 - alpha) * raw
}

/// Total cost of a round's investment choices. Vertical integration and the
/// factory flag are independent, so both can bill in the same round.
pub fn investment_cost(decision: &RoundDecision) -> Decimal {
    let mut cost = Decimal::ZERO;
    match decision.vertical_integration {
        Some(VerticalIntegration::Manufacturing) => cost += Decimal::new(MANUFACTURING_COST, 0),
        Some(VerticalIntegration::Software) => cost += Decimal::new(SOFTWARE_COST, 0),
        None => {}
    }
    if decision.build_factory {
        cost += Decimal::new(FACTORY_COST, 0);
    }
    cost
}

/// Gross (operating) profit from segment sales, before investment cost.
pub fn operating_profit(
    sales_low: f64,
    sales_high: f64,
    unit: &UnitEconomics,
) -> Result<Decimal, EconError> {
    let low = Decimal::from_f64(sales_low).ok_or(EconError::NonFinite)?;
    let high = Decimal::from_f64(sales_high).ok_or(EconError::NonFinite)?;
    Ok(low * unit.low_unit_profit + high * unit.high_unit_profit)
}

/// Valuation multiple: base 10, plus the cumulative Software bonus, minus 2
/// once the consecutive-loss penalty has triggered, floored at 5.
pub fn valuation_multiple(extra_multiple: u32, loss_penalty: bool) -> u32 {
    let penalty: i64 = if loss_penalty { 2 } else { 0 };
    let multiple = 10 + i64::from(extra_multiple) - penalty;
    multiple.max(5) as u32
}

/// Estimated share price: the EPS proxy scaled by the valuation multiple,
/// never negative.
pub fn estimated_price(operating_profit: Decimal, multiple: u32) -> Decimal {
    (operating_profit * Decimal::from(multiple)).max(Decimal::ZERO)
}

/// Descending ranks with shared-minimum tie-break: tied values receive the
/// same rank, and the next distinct value ranks below all of them.
pub fn shared_min_ranks<T: PartialOrd>(values: &[T]) -> Vec<u32> {
    values
        .iter()
        .map(|v| {
            let above = values
                .iter()
                .filter(|other| (*other).partial_cmp(v) == Some(Ordering::Greater))
                .count();
            above as u32 + 1
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base_profits_without_effects() {
        let econ = unit_economics(&[], 1);
        assert_eq!(econ.low_unit_profit, Decimal::new(500, 0));
        assert_eq!(econ.high_unit_profit, Decimal::new(1_000, 0));
        assert!((econ.capacity_multiplier - 1.0).abs() < 1e-12);
        assert!(!econ.factory_active);
    }

    #[test]
    fn manufacturing_window_is_two_rounds() {
        // Investment in round 1 activates for rounds 2 and 3 only.
        let effects = [ScheduledEffect::Manufacturing {
            first_round: 2,
            last_round: 3,
        }];
        assert_eq!(
            unit_economics(&effects, 1).low_unit_profit,
            Decimal::new(500, 0)
        );
        assert_eq!(
            unit_economics(&effects, 2).low_unit_profit,
            Decimal::new(600, 0)
        );
        assert_eq!(
            unit_economics(&effects, 3).high_unit_profit,
            Decimal::new(1_200, 0)
        );
        assert_eq!(
            unit_economics(&effects, 4).low_unit_profit,
            Decimal::new(500, 0)
        );
    }

    #[test]
    fn software_bonus_is_persistent() {
        let effects = [ScheduledEffect::Software { first_round: 2 }];
        assert_eq!(
            unit_economics(&effects, 1).low_unit_profit,
            Decimal::new(500, 0)
        );
        for round in 2..=10 {
            let econ = unit_economics(&effects, round);
            assert_eq!(econ.low_unit_profit, Decimal::new(505, 0));
            assert_eq!(econ.high_unit_profit, Decimal::new(1_010, 0));
        }
    }

    #[test]
    fn factories_compound_multiplicatively() {
        let effects = [
            ScheduledEffect::Factory { first_round: 3 },
            ScheduledEffect::Factory { first_round: 4 },
        ];
        assert!((unit_economics(&effects, 2).capacity_multiplier - 1.0).abs() < 1e-12);
        assert!(!unit_economics(&effects, 2).factory_active);
        assert!((unit_economics(&effects, 3).capacity_multiplier - 1.1).abs() < 1e-12);
        assert!(unit_economics(&effects, 3).factory_active);
        assert!((unit_economics(&effects, 4).capacity_multiplier - 1.21).abs() < 1e-12);
    }

    #[test]
    fn shares_are_proportional_to_weights() {
        let shares = competitive_shares(&[1.0, 3.0], 4).unwrap();
        assert!((shares[0] - 0.25).abs() < 1e-12);
        assert!((shares[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn zero_total_weight_falls_back_to_equal_split() {
        let shares = competitive_shares(&[0.0, 0.0, 0.0, 0.0], 4).unwrap();
        for s in shares {
            assert!((s - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn invalid_weights_are_rejected() {
        assert_eq!(
            competitive_shares(&[-1.0], 4),
            Err(EconError::InvalidWeight(-1.0))
        );
        assert!(competitive_shares(&[f64::NAN], 4).is_err());
        assert_eq!(competitive_shares(&[1.0], 0), Err(EconError::NoFirms));
    }

    #[test]
    fn smoothing_retains_alpha_of_previous() {
        let settled = smooth_share(0.25, 0.45, 0.6);
        assert!((settled - 0.33).abs() < 1e-12);
        // Alpha zero means no inertia at all.
        assert!((smooth_share(0.25, 0.45, 0.0) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn investment_costs_are_additive() {
        let none = RoundDecision {
            low_ratio: 0.5,
            vertical_integration: None,
            build_factory: false,
        };
        assert_eq!(investment_cost(&none), Decimal::ZERO);
        let both = RoundDecision {
            low_ratio: 0.5,
            vertical_integration: Some(VerticalIntegration::Manufacturing),
            build_factory: true,
        };
        assert_eq!(investment_cost(&both), Decimal::new(8_000_000, 0));
        let software = RoundDecision {
            low_ratio: 0.5,
            vertical_integration: Some(VerticalIntegration::Software),
            build_factory: false,
        };
        assert_eq!(investment_cost(&software), Decimal::new(1_500_000, 0));
    }

    #[test]
    fn operating_profit_matches_even_split() {
        let econ = unit_economics(&[], 1);
        let gross = operating_profit(20_000.0, 5_000.0, &econ).unwrap();
        assert_eq!(gross, Decimal::new(15_000_000, 0));
    }

    #[test]
    fn valuation_multiple_floors_at_five() {
        assert_eq!(valuation_multiple(0, false), 10);
        assert_eq!(valuation_multiple(3, false), 13);
        assert_eq!(valuation_multiple(0, true), 8);
        assert_eq!(valuation_multiple(2, true), 10);
        // Floor binds even under heavy (hypothetical) penalties.
        assert!(valuation_multiple(0, true) >= 5);
    }

    #[test]
    fn estimated_price_never_negative() {
        assert_eq!(
            estimated_price(Decimal::new(-1_000, 0), 10),
            Decimal::ZERO
        );
        assert_eq!(
            estimated_price(Decimal::new(15_000_000, 0), 10),
            Decimal::new(150_000_000, 0)
        );
    }

    #[test]
    fn ranks_share_the_minimum_on_ties() {
        assert_eq!(shared_min_ranks(&[0.4, 0.4, 0.2]), vec![1, 1, 3]);
        assert_eq!(shared_min_ranks(&[0.1, 0.5, 0.3]), vec![3, 1, 2]);
        assert_eq!(shared_min_ranks(&[0.25, 0.25, 0.25, 0.25]), vec![1, 1, 1, 1]);
    }

    proptest! {
        #[test]
        fn positive_weight_shares_sum_to_one(weights in proptest::collection::vec(0.001f64..100.0, 1..8)) {
            let shares = competitive_shares(&weights, weights.len()).unwrap();
            let total: f64 = shares.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }

        #[test]
        fn fallback_shares_sum_to_one(n in 1usize..8) {
            let weights = vec![0.0; n];
            let shares = competitive_shares(&weights, n).unwrap();
            let total: f64 = shares.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }

        #[test]
        fn multiple_never_below_floor(extra in 0u32..20, penalty in proptest::bool::ANY) {
            prop_assert!(valuation_multiple(extra, penalty) >= 5);
        }

        #[test]
        fn ranks_are_within_bounds(values in proptest::collection::vec(0.0f64..1.0, 1..8)) {
            let ranks = shared_min_ranks(&values);
            for r in ranks {
                prop_assert!(r >= 1 && r as usize <= values.len());
            }
        }
    }
}
