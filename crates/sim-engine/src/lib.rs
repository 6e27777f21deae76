#![deny(warnings)]

//! Round-resolution engine for the market strategy simulation.
//!
//! [`Game`] owns all state for one running game instance: the firms, the
//! decision buffer for the current round, and the immutable round-report
//! history. It exposes two state transitions — [`Game::submit_decision`]
//! and [`Game::resolve_round`] — plus end-of-game scoring and a reset.
//! Both transitions are plain calls, independent of any rendering cycle,
//! so they can be driven by a scheduler, a network handler, or a test
//! harness alike.
//!
//! [`SharedGame`] wraps a game in `Arc<Mutex<_>>` for concurrent decision
//! collectors: each team's client clones the handle and writes only its own
//! entry, while a single coordinator performs the read-all-then-resolve
//! step under the same lock.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{
    validate_config, validate_decision, validate_roster, FinalStanding, Firm, FirmId, FirmReport,
    GameConfig, RoundDecision, RoundReport, ScheduledEffect, ValidationError, VerticalIntegration,
};
use sim_econ::EconError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Errors produced by the engine's state transitions.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// Resolution was requested before every active firm submitted.
    /// No state was changed; resolution can be retried once the listed
    /// firms have submitted.
    #[error("waiting on decisions from: {missing:?}")]
    NotReady { missing: Vec<FirmId> },
    /// The configured round count has been played out.
    #[error("the game is over; no further rounds may be resolved")]
    GameOver,
    /// Final scoring was requested while rounds remain.
    #[error("the game is still in progress")]
    GameInProgress,
    /// The firm is not part of this game.
    #[error("unknown firm: {0}")]
    UnknownFirm(FirmId),
    /// Bankrupt firms take no further actions.
    #[error("firm {0} is bankrupt and cannot act")]
    FirmBankrupt(FirmId),
    /// Re-submission within a round is rejected, not overwritten, so a team
    /// cannot revise after others have committed.
    #[error("firm {0} already submitted a decision this round")]
    AlreadySubmitted(FirmId),
    /// The decision failed validation at the collection boundary.
    #[error(transparent)]
    InvalidDecision(#[from] ValidationError),
    /// An economic helper rejected its inputs.
    #[error(transparent)]
    Econ(#[from] EconError),
    /// A writer panicked while holding the shared-game lock.
    #[error("shared game lock poisoned")]
    LockPoisoned,
}

/// Live per-firm status for the current round, for external renderers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmStatus {
    /// No decision submitted yet this round.
    Thinking,
    /// Decision recorded; waiting on the rest of the field.
    Submitted,
    /// Out of the game; auto-assigned zero activity.
    Bankrupt,
}

/// Per-firm results staged during resolution, applied after every firm's
/// numbers are known.
struct Settled {
    decision: RoundDecision,
    low_share: f64,
    high_share: f64,
    sales_low: f64,
    sales_high: f64,
    gross: Decimal,
    net: Decimal,
    factory_active: bool,
}

/// One running game instance: firms, decision buffer, and history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    config: GameConfig,
    firms: Vec<Firm>,
    pending: BTreeMap<FirmId, RoundDecision>,
    current_round: u32,
    game_over: bool,
    history: Vec<RoundReport>,
}

impl Game {
    /// Start a new game with the given roster and configuration.
    pub fn new(roster: Vec<FirmId>, config: GameConfig) -> Result<Self, ValidationError> {
        validate_roster(&roster)?;
        validate_config(&config)?;
        let initial_share = 1.0 / roster.len() as f64;
        let firms = roster
            .into_iter()
            .map(|id| Firm::new(id, config.initial_cash, initial_share))
            .collect();
        Ok(Self {
            config,
            firms,
            pending: BTreeMap::new(),
            current_round: 1,
            game_over: false,
            history: vec![],
        })
    }

    /// The round currently collecting decisions (1-based).
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// True once the configured number of rounds has been resolved.
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Immutable history of resolved rounds, oldest first.
    pub fn history(&self) -> &[RoundReport] {
        &self.history
    }

    /// Read-only view of firm state, in roster order.
    pub fn firms(&self) -> &[Firm] {
        &self.firms
    }

    /// Per-firm status for the current round, in roster order.
    pub fn statuses(&self) -> Vec<(FirmId, FirmStatus)> {
        self.firms
            .iter()
            .map(|f| {
                let status = if f.is_bankrupt {
                    FirmStatus::Bankrupt
                } else if self.pending.contains_key(&f.id) {
                    FirmStatus::Submitted
                } else {
                    FirmStatus::Thinking
                };
                (f.id.clone(), status)
            })
            .collect()
    }

    /// True once every non-bankrupt firm has a recorded decision.
    pub fn is_ready(&self) -> bool {
        self.missing_decisions().is_empty()
    }

    fn missing_decisions(&self) -> Vec<FirmId> {
        self.firms
            .iter()
            .filter(|f| !f.is_bankrupt && !self.pending.contains_key(&f.id))
            .map(|f| f.id.clone())
            .collect()
    }

    /// Record one firm's decision for the current round.
    ///
    /// A second submission by the same firm in the same round is rejected;
    /// bankrupt firms are auto-assigned zero activity and may not submit.
    pub fn submit_decision(
        &mut self,
        id: &FirmId,
        decision: RoundDecision,
    ) -> Result<(), EngineError> {
        if self.game_over {
            return Err(EngineError::GameOver);
        }
        validate_decision(&decision)?;
        let firm = self
            .firms
            .iter()
            .find(|f| &f.id == id)
            .ok_or_else(|| EngineError::UnknownFirm(id.clone()))?;
        if firm.is_bankrupt {
            return Err(EngineError::FirmBankrupt(id.clone()));
        }
        if self.pending.contains_key(id) {
            return Err(EngineError::AlreadySubmitted(id.clone()));
        }
        debug!(firm = %id, round = self.current_round, "decision recorded");
        self.pending.insert(id.clone(), decision);
        Ok(())
    }

    /// Resolve the current round from the buffered decisions.
    ///
    /// Requires a decision from every non-bankrupt firm; otherwise returns
    /// [`EngineError::NotReady`] without touching any state. On success the
    /// report is appended to history, the decision buffer is cleared, and
    /// the round counter advances (or the game ends after the last round).
    pub fn resolve_round(&mut self) -> Result<RoundReport, EngineError> {
        if self.game_over {
            return Err(EngineError::GameOver);
        }
        let missing = self.missing_decisions();
        if !missing.is_empty() {
            return Err(EngineError::NotReady { missing });
        }
        let round = self.current_round;
        info!(round, "resolving round");

        let settled = self.settle_market(round)?;
        let rows = self.apply_settlement(round, settled);
        let report = RoundReport { round, rows };

        self.history.push(report.clone());
        self.pending.clear();
        if round >= self.config.rounds {
            self.game_over = true;
            info!(round, "game over");
        } else {
            self.current_round += 1;
        }
        Ok(report)
    }

    /// Pure settlement pass: weighted demand, shares (with fallback and
    /// optional inertia), sales, and profit for every firm. Bankrupt firms
    /// contribute zero demand and settle to `None`.
    fn settle_market(&self, round: u32) -> Result<Vec<Option<Settled>>, EngineError> {
        let firm_count = self.firms.len();
        let mut w_low = vec![0.0; firm_count];
        let mut w_high = vec![0.0; firm_count];
        let economics: Vec<_> = self
            .firms
            .iter()
            .map(|f| sim_econ::unit_economics(&f.effects, round))
            .collect();
        for (i, firm) in self.firms.iter().enumerate() {
            if firm.is_bankrupt {
                continue;
            }
            if let Some(d) = self.pending.get(&firm.id) {
                w_low[i] = d.low_ratio * economics[i].capacity_multiplier;
                w_high[i] = d.high_ratio() * economics[i].capacity_multiplier;
            }
        }
        let raw_low = sim_econ::competitive_shares(&w_low, firm_count)?;
        let raw_high = sim_econ::competitive_shares(&w_high, firm_count)?;

        let mut settled = Vec::with_capacity(firm_count);
        for (i, firm) in self.firms.iter().enumerate() {
            let decision = match self.pending.get(&firm.id) {
                Some(d) if !firm.is_bankrupt => *d,
                _ => {
                    settled.push(None);
                    continue;
                }
            };
            let (low_share, high_share) = match self.config.inertia_alpha {
                Some(alpha) => (
                    sim_econ::smooth_share(firm.prev_low_share, raw_low[i], alpha),
                    sim_econ::smooth_share(firm.prev_high_share, raw_high[i], alpha),
                ),
                None => (raw_low[i], raw_high[i]),
            };
            let sales_low = low_share * self.config.low_market_units as f64;
            let sales_high = high_share * self.config.high_market_units as f64;
            let gross = sim_econ::operating_profit(sales_low, sales_high, &economics[i])?;
            let net = gross - sim_econ::investment_cost(&decision);
            settled.push(Some(Settled {
                decision,
                low_share,
                high_share,
                sales_low,
                sales_high,
                gross,
                net,
                factory_active: economics[i].factory_active,
            }));
        }
        Ok(settled)
    }

    /// Mutation pass: cash movement, loss streaks, bankruptcy, effect
    /// scheduling, and valuation, producing the report rows (ranks last).
    fn apply_settlement(&mut self, round: u32, settled: Vec<Option<Settled>>) -> Vec<FirmReport> {
        let total_units = (self.config.low_market_units + self.config.high_market_units) as f64;
        let mut rows = Vec::with_capacity(self.firms.len());
        for (firm, stage) in self.firms.iter_mut().zip(settled) {
            let Some(stage) = stage else {
                // Bankrupt sentinel: zero share, profit, and price.
                rows.push(FirmReport {
                    id: firm.id.clone(),
                    low_share: 0.0,
                    high_share: 0.0,
                    total_share: 0.0,
                    operating_profit: Decimal::ZERO,
                    net_profit: Decimal::ZERO,
                    cash: firm.cash,
                    valuation_multiple: sim_econ::valuation_multiple(
                        firm.extra_multiple,
                        firm.had_consecutive_loss,
                    ),
                    factory_active: false,
                    estimated_price: Decimal::ZERO,
                    share_rank: 0,
                    price_rank: 0,
                    is_bankrupt: true,
                });
                continue;
            };

            firm.prev_low_share = stage.low_share;
            firm.prev_high_share = stage.high_share;
            firm.cash += stage.net;

            let lost = stage.net < Decimal::ZERO;
            if lost && firm.prev_round_loss {
                firm.had_consecutive_loss = true;
            }
            firm.prev_round_loss = lost;
            if firm.cash < Decimal::ZERO && !firm.is_bankrupt {
                info!(firm = %firm.id, round, cash = %firm.cash, "firm went bankrupt");
                firm.is_bankrupt = true;
            }

            match stage.decision.vertical_integration {
                Some(VerticalIntegration::Manufacturing) => {
                    firm.effects.push(ScheduledEffect::Manufacturing {
                        first_round: round + 1,
                        last_round: round + 2,
                    });
                }
                Some(VerticalIntegration::Software) => {
                    firm.effects
                        .push(ScheduledEffect::Software { first_round: round + 1 });
                    firm.extra_multiple += 1;
                }
                None => {}
            }
            if stage.decision.build_factory {
                firm.effects
                    .push(ScheduledEffect::Factory { first_round: round + 2 });
            }

            let multiple =
                sim_econ::valuation_multiple(firm.extra_multiple, firm.had_consecutive_loss);
            let price = sim_econ::estimated_price(stage.gross, multiple);
            let total_share = (stage.sales_low + stage.sales_high) / total_units;
            firm.last_operating_profit = stage.gross;
            firm.last_net_profit = stage.net;
            firm.last_total_share = total_share;

            rows.push(FirmReport {
                id: firm.id.clone(),
                low_share: stage.low_share,
                high_share: stage.high_share,
                total_share,
                operating_profit: stage.gross,
                net_profit: stage.net,
                cash: firm.cash,
                valuation_multiple: multiple,
                factory_active: stage.factory_active,
                estimated_price: price,
                share_rank: 0,
                price_rank: 0,
                is_bankrupt: firm.is_bankrupt,
            });
        }

        let shares: Vec<f64> = rows.iter().map(|r| r.total_share).collect();
        let prices: Vec<Decimal> = rows.iter().map(|r| r.estimated_price).collect();
        let share_ranks = sim_econ::shared_min_ranks(&shares);
        let price_ranks = sim_econ::shared_min_ranks(&prices);
        for ((row, sr), pr) in rows.iter_mut().zip(share_ranks).zip(price_ranks) {
            row.share_rank = sr;
            row.price_rank = pr;
        }
        rows
    }

    /// End-of-game scoring and ranking; only valid once the game is over.
    ///
    /// Each firm scores half on final share and half on final price, each
    /// normalized by the field maximum (denominators of zero are replaced
    /// by one). Bankrupt firms score zero on both terms unconditionally.
    pub fn final_ranking(&self) -> Result<Vec<FinalStanding>, EngineError> {
        if !self.game_over {
            return Err(EngineError::GameInProgress);
        }
        let mut shares = Vec::with_capacity(self.firms.len());
        let mut prices = Vec::with_capacity(self.firms.len());
        for firm in &self.firms {
            if firm.is_bankrupt {
                shares.push(0.0);
                prices.push(Decimal::ZERO);
            } else {
                let multiple =
                    sim_econ::valuation_multiple(firm.extra_multiple, firm.had_consecutive_loss);
                shares.push(firm.last_total_share);
                prices.push(sim_econ::estimated_price(firm.last_operating_profit, multiple));
            }
        }
        let max_share = shares.iter().fold(0.0f64, |a, &b| a.max(b));
        let max_price = prices.iter().max().copied().unwrap_or(Decimal::ZERO);
        let share_denom = if max_share > 0.0 { max_share } else { 1.0 };
        let price_denom = if max_price > Decimal::ZERO {
            max_price.to_f64().ok_or(EconError::NonFinite)?
        } else {
            1.0
        };

        let mut scores = Vec::with_capacity(self.firms.len());
        for (i, firm) in self.firms.iter().enumerate() {
            let score = if firm.is_bankrupt {
                0.0
            } else {
                let price = prices[i].to_f64().ok_or(EconError::NonFinite)?;
                0.5 * (shares[i] / share_denom) + 0.5 * (price / price_denom)
            };
            scores.push(score);
        }
        let ranks = sim_econ::shared_min_ranks(&scores);

        let mut standings: Vec<FinalStanding> = self
            .firms
            .iter()
            .enumerate()
            .map(|(i, firm)| FinalStanding {
                id: firm.id.clone(),
                final_share: shares[i],
                final_price: prices[i],
                score: scores[i],
                rank: ranks[i],
            })
            .collect();
        // Stable sort: ties keep roster order.
        standings.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(standings)
    }

    /// Discard all firm and round state and start over at round 1.
    pub fn reset(&mut self) {
        info!("game reset");
        let initial_share = 1.0 / self.firms.len() as f64;
        for firm in &mut self.firms {
            *firm = Firm::new(firm.id.clone(), self.config.initial_cash, initial_share);
        }
        self.pending.clear();
        self.history.clear();
        self.current_round = 1;
        self.game_over = false;
    }
}

/// Clonable handle to a mutex-guarded [`Game`], for one-client-per-team
/// decision collection with a single resolving coordinator.
#[derive(Clone, Debug)]
pub struct SharedGame {
    inner: Arc<Mutex<Game>>,
}

impl SharedGame {
    /// Wrap a game for shared access.
    pub fn new(game: Game) -> Self {
        Self {
            inner: Arc::new(Mutex::new(game)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Game>, EngineError> {
        self.inner.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Record one firm's decision; safe to call from concurrent clients.
    pub fn submit_decision(
        &self,
        id: &FirmId,
        decision: RoundDecision,
    ) -> Result<(), EngineError> {
        self.lock()?.submit_decision(id, decision)
    }

    /// Resolve the current round as the single coordinating actor.
    pub fn resolve_round(&self) -> Result<RoundReport, EngineError> {
        self.lock()?.resolve_round()
    }

    /// Snapshot of per-firm statuses for the current round.
    pub fn statuses(&self) -> Result<Vec<(FirmId, FirmStatus)>, EngineError> {
        Ok(self.lock()?.statuses())
    }

    /// Snapshot of the resolved-round history.
    pub fn history(&self) -> Result<Vec<RoundReport>, EngineError> {
        Ok(self.lock()?.history().to_vec())
    }

    /// The round currently collecting decisions.
    pub fn current_round(&self) -> Result<u32, EngineError> {
        Ok(self.lock()?.current_round())
    }

    /// True once the configured number of rounds has been resolved.
    pub fn is_game_over(&self) -> Result<bool, EngineError> {
        Ok(self.lock()?.is_game_over())
    }

    /// End-of-game scoring; trusted-operator surface.
    pub fn final_ranking(&self) -> Result<Vec<FinalStanding>, EngineError> {
        self.lock()?.final_ranking()
    }

    /// Discard all state and start over; trusted-operator surface.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.lock()?.reset();
        Ok(())
    }
}
