use serde::{Deserialize, Serialize};
use tracing::info;

use common::InstrumentSpec;

use crate::config::{ResetPolicy, RiskConfig};

/// Money-management state of one strategy instance.
///
/// Mutated only when a trade closes; read when a trade opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingState {
    pub base_volume: f64,
    pub current_volume: f64,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub equity: f64,
    pub peak_equity: f64,
}

/// Volume for the next entry, adapted to the trade outcome history.
#[derive(Debug, Clone)]
pub struct Sizer {
    state: SizingState,
    multiplier: f64,
    reset_policy: ResetPolicy,
    max_drawdown_percent: f64,
    instrument: InstrumentSpec,
}

impl Sizer {
    pub fn new(cfg: &RiskConfig, instrument: InstrumentSpec) -> Self {
        let base = cap(&instrument, cfg.base_volume);
        Self {
            state: SizingState {
                base_volume: cfg.base_volume,
                current_volume: base,
                consecutive_losses: 0,
                consecutive_wins: 0,
                equity: cfg.initial_equity,
                peak_equity: cfg.initial_equity,
            },
            multiplier: cfg.martingale_multiplier,
            reset_policy: cfg.reset_policy,
            max_drawdown_percent: cfg.max_drawdown_percent,
            instrument,
        }
    }

    pub fn state(&self) -> &SizingState {
        &self.state
    }

    pub fn equity(&self) -> f64 {
        self.state.equity
    }

    /// Normalized volume for the next entry, or `None` when it rounds below
    /// the minimum tradable size.
    pub fn next_volume(&self) -> Option<f64> {
        let volume = self.instrument.normalize_volume(self.state.current_volume);
        (volume > 0.0).then_some(volume)
    }

    /// Record a realized trade outcome.
    pub fn on_trade_closed(&mut self, pnl: f64) {
        let s = &mut self.state;
        s.equity += pnl;
        let new_peak = s.equity > s.peak_equity;
        if new_peak {
            s.peak_equity = s.equity;
        }

        let reset = if pnl < 0.0 {
            s.consecutive_losses += 1;
            s.consecutive_wins = 0;
            false
        } else {
            s.consecutive_wins += 1;
            s.consecutive_losses = 0;
            new_peak || self.reset_policy == ResetPolicy::OnAnyWin
        };

        if reset {
            s.current_volume = cap(&self.instrument, s.base_volume);
        } else {
            s.current_volume = self.instrument.clamp_volume(s.current_volume * self.multiplier);
        }

        info!(
            pnl = pnl,
            equity = s.equity,
            peak_equity = s.peak_equity,
            current_volume = s.current_volume,
            losses = s.consecutive_losses,
            wins = s.consecutive_wins,
            "Sizing updated after trade close"
        );
    }

    /// Book the outcome of a drawdown-breaker close. Equity and peak follow
    /// the pnl, but volume stays at base and streaks stay cleared.
    pub fn on_forced_close(&mut self, pnl: f64) {
        let s = &mut self.state;
        s.equity += pnl;
        if s.equity > s.peak_equity {
            s.peak_equity = s.equity;
        }
        s.current_volume = cap(&self.instrument, s.base_volume);
        s.consecutive_losses = 0;
        s.consecutive_wins = 0;
        info!(
            pnl = pnl,
            equity = s.equity,
            current_volume = s.current_volume,
            "Forced close booked, sizing held at base"
        );
    }

    /// Floating loss that trips the drawdown circuit breaker, if enabled.
    pub fn drawdown_limit(&self) -> Option<f64> {
        (self.max_drawdown_percent > 0.0)
            .then(|| self.state.equity.max(0.0) * self.max_drawdown_percent / 100.0)
    }

    /// Circuit-breaker reset: back to base volume, streaks cleared.
    pub fn force_reset(&mut self) {
        self.state.current_volume = cap(&self.instrument, self.state.base_volume);
        self.state.consecutive_losses = 0;
        self.state.consecutive_wins = 0;
        info!(volume = self.state.current_volume, "Sizing reset by drawdown breaker");
    }
}

fn cap(instrument: &InstrumentSpec, volume: f64) -> f64 {
    match instrument.max_volume {
        Some(max) => volume.min(max),
        None => volume,
    }
}
