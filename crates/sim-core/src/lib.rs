#![deny(warnings)]

//! Core domain models and invariants for the market strategy simulation.
//!
//! This crate defines the serializable types shared across the simulation —
//! firms, per-round decisions, scheduled investment effects, and round
//! reports — with validation helpers to guarantee basic invariants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a competing firm, e.g. "Team 1".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmId(pub String);

impl fmt::Display for FirmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Once-per-round vertical integration investment. The two options are
/// mutually exclusive; a decision carries at most one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalIntegration {
    /// Boosts unit profit for a two-round window starting next round.
    Manufacturing,
    /// Permanently boosts unit profit (small) and the valuation multiple.
    Software,
}

/// One firm's choices for a single round, supplied by the decision collector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundDecision {
    /// Fraction of effort allocated to the low-end segment, in [0, 1].
    pub low_ratio: f64,
    /// Optional vertical integration investment for this round.
    pub vertical_integration: Option<VerticalIntegration>,
    /// Whether to build a factory this round (independent of VI).
    pub build_factory: bool,
}

impl RoundDecision {
    /// High-end allocation is derived, never stored: `1 - low_ratio`.
    pub fn high_ratio(&self) -> f64 {
        1.0 - self.low_ratio
    }
}

/// A queued future effect of an investment, resolved at decision time into
/// absolute activation rounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledEffect {
    /// +100 low / +200 high unit profit, active on the inclusive window
    /// `[first_round, last_round]`.
    Manufacturing { first_round: u32, last_round: u32 },
    /// +5 low / +10 high unit profit, active from `first_round` onward.
    Software { first_round: u32 },
    /// ×1.1 capacity multiplier from `first_round` onward; multiple
    /// factories compound multiplicatively.
    Factory { first_round: u32 },
}

/// Per-firm financial and effect-schedule state. Created at game start,
/// mutated every resolved round, never destroyed: a bankrupt firm persists
/// in its terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Firm {
    /// Unique firm identifier.
    pub id: FirmId,
    /// Cash on hand; once negative the firm is bankrupt for good.
    pub cash: Decimal,
    /// One-way flag, false → true only.
    pub is_bankrupt: bool,
    /// Whether the most recently resolved round had negative net profit.
    pub prev_round_loss: bool,
    /// Set permanently once net profit is negative two rounds in a row.
    pub had_consecutive_loss: bool,
    /// Cumulative valuation-multiple bonus; +1 per Software investment.
    pub extra_multiple: u32,
    /// Scheduled future effects from past investments.
    pub effects: Vec<ScheduledEffect>,
    /// Smoothed low-end share carried into the next round's inertia term.
    pub prev_low_share: f64,
    /// Smoothed high-end share carried into the next round's inertia term.
    pub prev_high_share: f64,
    /// Most recent round's gross (operating) profit; valuation EPS proxy.
    pub last_operating_profit: Decimal,
    /// Most recent round's net profit (after investment cost).
    pub last_net_profit: Decimal,
    /// Most recent round's combined market share.
    pub last_total_share: f64,
}

impl Firm {
    /// A fresh firm at game start with an even share split carried in.
    pub fn new(id: FirmId, initial_cash: Decimal, initial_share: f64) -> Self {
        Self {
            id,
            cash: initial_cash,
            is_bankrupt: false,
            prev_round_loss: false,
            had_consecutive_loss: false,
            extra_multiple: 0,
            effects: vec![],
            prev_low_share: initial_share,
            prev_high_share: initial_share,
            last_operating_profit: Decimal::ZERO,
            last_net_profit: Decimal::ZERO,
            last_total_share: 0.0,
        }
    }
}

/// Game configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Number of rounds before the game ends.
    pub rounds: u32,
    /// Starting capital per firm.
    pub initial_cash: Decimal,
    /// Fixed low-end market size in units per round.
    pub low_market_units: u64,
    /// Fixed high-end market size in units per round.
    pub high_market_units: u64,
    /// Share-inertia retention coefficient; `None` disables smoothing and
    /// settles on the raw competitive share.
    pub inertia_alpha: Option<f64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rounds: 4,
            initial_cash: Decimal::new(15_000_000, 0),
            low_market_units: 80_000,
            high_market_units: 20_000,
            inertia_alpha: Some(0.6),
        }
    }
}

/// One firm's row in a round report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FirmReport {
    /// Firm identifier.
    pub id: FirmId,
    /// Settled low-end segment share.
    pub low_share: f64,
    /// Settled high-end segment share.
    pub high_share: f64,
    /// Combined share of the whole market (both segments).
    pub total_share: f64,
    /// Gross profit from sales, before investment cost.
    pub operating_profit: Decimal,
    /// Profit after investment cost; the cash movement this round.
    pub net_profit: Decimal,
    /// Cash after this round's settlement.
    pub cash: Decimal,
    /// Valuation multiple applied to the EPS proxy.
    pub valuation_multiple: u32,
    /// Whether at least one factory was active this round.
    pub factory_active: bool,
    /// `max(0, operating_profit × valuation_multiple)`.
    pub estimated_price: Decimal,
    /// Rank by total share, descending, shared-minimum ties.
    pub share_rank: u32,
    /// Rank by estimated price, descending, shared-minimum ties.
    pub price_rank: u32,
    /// Whether the firm is bankrupt as of this round.
    pub is_bankrupt: bool,
}

/// Immutable record of one resolved round, one row per firm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// The round this report settles (1-based).
    pub round: u32,
    /// Per-firm results, in roster order.
    pub rows: Vec<FirmReport>,
}

/// One firm's end-of-game standing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalStanding {
    /// Firm identifier.
    pub id: FirmId,
    /// Total market share from the final resolved round.
    pub final_share: f64,
    /// Estimated share price at game end.
    pub final_price: Decimal,
    /// Composite score in [0, 1]; see the scoring rules in `sim-engine`.
    pub score: f64,
    /// Rank by score, descending, shared-minimum ties.
    pub rank: u32,
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Segment allocation must lie within [0, 1].
    #[error("allocation ratio {0} is outside [0, 1]")]
    RatioOutOfRange(f64),
    /// Numeric field must be finite.
    #[error("non-finite numeric value encountered")]
    NonFinite,
    /// Firm names must be non-empty.
    #[error("firm name must not be empty")]
    EmptyFirmName,
    /// Firm names must be unique within a game.
    #[error("duplicate firm name: {0}")]
    DuplicateFirmName(String),
    /// A game needs at least one firm.
    #[error("game must have at least one firm")]
    NoFirms,
    /// A game needs at least one round.
    #[error("round count must be greater than zero")]
    NoRounds,
    /// Both market segments must have positive unit demand.
    #[error("market segment size must be greater than zero")]
    EmptyMarket,
    /// The inertia coefficient must lie within [0, 1).
    #[error("inertia coefficient {0} is outside [0, 1)")]
    InvalidInertia(f64),
    /// Starting capital must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
}

/// Validate a single round decision as it arrives from the collector.
pub fn validate_decision(d: &RoundDecision) -> Result<(), ValidationError> {
    if !d.low_ratio.is_finite() {
        return Err(ValidationError::NonFinite);
    }
    if !(0.0..=1.0).contains(&d.low_ratio) {
        return Err(ValidationError::RatioOutOfRange(d.low_ratio));
    }
    Ok(())
}

/// Validate game configuration parameters.
pub fn validate_config(c: &GameConfig) -> Result<(), ValidationError> {
    if c.rounds == 0 {
        return Err(ValidationError::NoRounds);
    }
    if c.low_market_units == 0 || c.high_market_units == 0 {
        return Err(ValidationError::EmptyMarket);
    }
    if c.initial_cash < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    if let Some(alpha) = c.inertia_alpha {
        if !alpha.is_finite() || !(0.0..1.0).contains(&alpha) {
            return Err(ValidationError::InvalidInertia(alpha));
        }
    }
    Ok(())
}

/// Validate the roster of firm identifiers at game start.
pub fn validate_roster(ids: &[FirmId]) -> Result<(), ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::NoFirms);
    }
    let mut seen: BTreeSet<&FirmId> = BTreeSet::new();
    for id in ids {
        if id.0.trim().is_empty() {
            return Err(ValidationError::EmptyFirmName);
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateFirmName(id.0.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decision(low: f64) -> RoundDecision {
        RoundDecision {
            low_ratio: low,
            vertical_integration: None,
            build_factory: false,
        }
    }

    #[test]
    fn high_ratio_is_complement() {
        let d = decision(0.3);
        assert!((d.high_ratio() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn decision_bounds_are_enforced() {
        assert!(validate_decision(&decision(0.0)).is_ok());
        assert!(validate_decision(&decision(1.0)).is_ok());
        assert_eq!(
            validate_decision(&decision(1.5)),
            Err(ValidationError::RatioOutOfRange(1.5))
        );
        assert_eq!(
            validate_decision(&decision(f64::NAN)),
            Err(ValidationError::NonFinite)
        );
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = GameConfig::default();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.rounds, 4);
        assert_eq!(cfg.initial_cash, Decimal::new(15_000_000, 0));
        assert_eq!(cfg.low_market_units + cfg.high_market_units, 100_000);
    }

    #[test]
    fn config_rejects_bad_inertia() {
        let cfg = GameConfig {
            inertia_alpha: Some(1.0),
            ..GameConfig::default()
        };
        assert_eq!(
            validate_config(&cfg),
            Err(ValidationError::InvalidInertia(1.0))
        );
    }

    #[test]
    fn roster_rejects_duplicates_and_blanks() {
        let ids = vec![FirmId("A".into()), FirmId("A".into())];
        assert_eq!(
            validate_roster(&ids),
            Err(ValidationError::DuplicateFirmName("A".into()))
        );
        assert_eq!(
            validate_roster(&[FirmId("  ".into())]),
            Err(ValidationError::EmptyFirmName)
        );
        assert_eq!(validate_roster(&[]), Err(ValidationError::NoFirms));
    }

    #[test]
    fn serde_roundtrip_round_report() {
        let report = RoundReport {
            round: 1,
            rows: vec![FirmReport {
                id: FirmId("Team 1".into()),
                low_share: 0.25,
                high_share: 0.25,
                total_share: 0.25,
                operating_profit: Decimal::new(15_000_000, 0),
                net_profit: Decimal::new(15_000_000, 0),
                cash: Decimal::new(30_000_000, 0),
                valuation_multiple: 10,
                factory_active: false,
                estimated_price: Decimal::new(150_000_000, 0),
                share_rank: 1,
                price_rank: 1,
                is_bankrupt: false,
            }],
        };
        let s = serde_json::to_string(&report).unwrap();
        let back: RoundReport = serde_json::from_str(&s).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn serde_roundtrip_effects() {
        let effects = vec![
            ScheduledEffect::Manufacturing {
                first_round: 2,
                last_round: 3,
            },
            ScheduledEffect::Software { first_round: 2 },
            ScheduledEffect::Factory { first_round: 3 },
        ];
        let s = serde_json::to_string(&effects).unwrap();
        let back: Vec<ScheduledEffect> = serde_json::from_str(&s).unwrap();
        assert_eq!(back, effects);
    }

    proptest! {
        #[test]
        fn in_range_ratios_validate(low in 0.0f64..=1.0) {
            prop_assert!(validate_decision(&decision(low)).is_ok());
        }

        #[test]
        fn out_of_range_ratios_reject(low in 1.0001f64..100.0) {
            prop_assert!(validate_decision(&decision(low)).is_err());
            prop_assert!(validate_decision(&decision(-low)).is_err());
        }
    }
}
