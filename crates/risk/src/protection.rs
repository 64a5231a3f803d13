//! Protective levels for one open position.
//!
//! Stop-loss and take-profit are fixed at entry. The trailing stop is a
//! ratchet: for a Long it only rises, for a Short it only falls, and once set
//! it stays set until the position is closed. Staged exits fire at most once
//! per position lifetime.

use tracing::debug;

use common::{Bar, InstrumentSpec, OrderReason, Side};

use crate::config::{RiskConfig, MAX_STAGES};

/// Tolerance for price comparisons.
pub const PRICE_EPSILON: f64 = 1e-9;

/// One bit per configured stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageFlags(u64);

impl StageFlags {
    pub fn is_set(&self, stage: usize) -> bool {
        stage < MAX_STAGES && self.0 & (1 << stage) != 0
    }

    /// Returns false if the bit was already set.
    pub fn set(&mut self, stage: usize) -> bool {
        if stage >= MAX_STAGES || self.is_set(stage) {
            return false;
        }
        self.0 |= 1 << stage;
        true
    }

    pub fn clear(&mut self, stage: usize) {
        if stage < MAX_STAGES {
            self.0 &= !(1 << stage);
        }
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }
}

/// A full exit demanded by a protective level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveExit {
    pub reason: OrderReason,
    /// The level that was crossed; the exit is priced here, not at the extreme.
    pub price: f64,
}

/// A stage whose threshold was reached on this bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageExit {
    pub stage: usize,
    pub fraction: f64,
}

/// Protective state of the currently open position.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionState {
    side: Side,
    entry_price: f64,
    stop_price: Option<f64>,
    take_price: Option<f64>,
    trailing_stop_price: Option<f64>,
    stage_flags: StageFlags,
}

impl ProtectionState {
    /// Initial levels for a position entered at `entry_price`.
    pub fn new(side: Side, entry_price: f64, cfg: &RiskConfig, instrument: &InstrumentSpec) -> Self {
        let level = |distance: f64, direction: f64| {
            (distance > 0.0).then(|| instrument.round_price(entry_price + direction * distance))
        };
        let sign = side.sign();

        Self {
            side,
            entry_price,
            stop_price: level(cfg.stop_distance, -sign),
            take_price: level(cfg.take_distance, sign),
            trailing_stop_price: None,
            stage_flags: StageFlags::default(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn stop_price(&self) -> Option<f64> {
        self.stop_price
    }

    pub fn take_price(&self) -> Option<f64> {
        self.take_price
    }

    pub fn trailing_stop_price(&self) -> Option<f64> {
        self.trailing_stop_price
    }

    pub fn stage_flags(&self) -> StageFlags {
        self.stage_flags
    }

    /// Stop level a venue should hold: the tighter of hard stop and trailing.
    pub fn effective_stop(&self) -> Option<f64> {
        match (self.stop_price, self.trailing_stop_price) {
            (Some(stop), Some(trail)) => Some(match self.side {
                Side::Long => stop.max(trail),
                Side::Short => stop.min(trail),
            }),
            (stop, trail) => trail.or(stop),
        }
    }

    /// Best distance price has moved in our favor during `bar`.
    pub fn favorable_excursion(&self, bar: &Bar) -> f64 {
        (bar.favorable_extreme(self.side) - self.entry_price) * self.side.sign()
    }

    /// Full-exit checks in priority order: hard stop, take-profit, trailing stop.
    pub fn check_exit(&self, bar: &Bar) -> Option<ProtectiveExit> {
        let adverse = bar.adverse_extreme(self.side);
        let favorable = bar.favorable_extreme(self.side);

        if let Some(stop) = self.stop_price {
            if self.crossed_against(adverse, stop) {
                return Some(ProtectiveExit {
                    reason: OrderReason::StopLoss,
                    price: stop,
                });
            }
        }
        if let Some(take) = self.take_price {
            if self.reached_in_favor(favorable, take) {
                return Some(ProtectiveExit {
                    reason: OrderReason::TakeProfit,
                    price: take,
                });
            }
        }
        if let Some(trail) = self.trailing_stop_price {
            if self.crossed_against(adverse, trail) {
                return Some(ProtectiveExit {
                    reason: OrderReason::TrailingStop,
                    price: trail,
                });
            }
        }
        None
    }

    /// Ratchet the trailing stop from this bar's favorable extreme.
    /// Returns the newly adopted level, if any.
    pub fn update_trailing(
        &mut self,
        bar: &Bar,
        cfg: &RiskConfig,
        instrument: &InstrumentSpec,
    ) -> Option<f64> {
        if !cfg.trailing_enabled() {
            return None;
        }
        if self.favorable_excursion(bar) <= cfg.trail_distance + cfg.trail_step {
            return None;
        }

        let extreme = bar.favorable_extreme(self.side);
        let candidate = instrument.round_price(extreme - self.side.sign() * cfg.trail_distance);
        let improves = match (self.trailing_stop_price, self.side) {
            (None, _) => true,
            (Some(current), Side::Long) => candidate > current + PRICE_EPSILON,
            (Some(current), Side::Short) => candidate < current - PRICE_EPSILON,
        };
        if !improves {
            return None;
        }

        debug!(
            side = %self.side,
            previous = ?self.trailing_stop_price,
            adopted = candidate,
            "Trailing stop ratcheted"
        );
        self.trailing_stop_price = Some(candidate);
        Some(candidate)
    }

    /// Stages reached on this bar that have not fired before, ascending.
    /// Each returned stage is marked as fired.
    pub fn due_stages(&mut self, bar: &Bar, cfg: &RiskConfig) -> Vec<StageExit> {
        let excursion = self.favorable_excursion(bar);
        let mut due = Vec::new();
        for (stage, exit) in cfg.stages.iter().enumerate() {
            if excursion + PRICE_EPSILON >= exit.threshold && self.stage_flags.set(stage) {
                due.push(StageExit {
                    stage,
                    fraction: exit.fraction,
                });
            }
        }
        due
    }

    /// Re-arm a stage whose exit was never filled.
    pub fn rearm_stage(&mut self, stage: usize) {
        self.stage_flags.clear(stage);
    }

    fn crossed_against(&self, adverse: f64, level: f64) -> bool {
        match self.side {
            Side::Long => adverse <= level + PRICE_EPSILON,
            Side::Short => adverse >= level - PRICE_EPSILON,
        }
    }

    fn reached_in_favor(&self, favorable: f64, level: f64) -> bool {
        match self.side {
            Side::Long => favorable >= level - PRICE_EPSILON,
            Side::Short => favorable <= level + PRICE_EPSILON,
        }
    }
}
