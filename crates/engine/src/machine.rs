use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use common::{
    Bar, EngineEvent, EngineState, ExecutionReport, InstrumentSpec, Order, OrderIntent,
    OrderReason, Position, Side, Signal, SkipReason, TradeEvent,
};
use risk::{
    validate_instrument, ProtectionState, ReversalMode, RiskConfig, Sizer, SizingState,
};

use crate::error::EngineError;

/// Residual volumes smaller than this are dust.
const VOLUME_EPSILON: f64 = 1e-9;

/// Orders and diagnostics produced by one engine step.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Step {
    pub orders: Vec<Order>,
    pub events: Vec<EngineEvent>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.events.is_empty()
    }
}

/// An emitted trading intent that has not been confirmed or failed yet.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    intent: OrderIntent,
    reason: OrderReason,
}

/// Bar-driven position and risk state machine for one instrument.
///
/// Owns the authoritative position, its protective levels and the sizing
/// state. Every mutation happens through `on_bar` or `on_report`, so a host
/// must serialize calls for a given instrument.
pub struct PositionEngine {
    pair: String,
    cfg: RiskConfig,
    instrument: InstrumentSpec,
    state: EngineState,
    position: Position,
    protection: Option<ProtectionState>,
    sizer: Sizer,
    pending: HashMap<String, Pending>,
    /// Realized PnL accumulated over the current position's lifetime.
    lifetime_pnl: f64,
}

impl PositionEngine {
    /// Validates the configuration before any bar can be processed.
    pub fn new(
        pair: impl Into<String>,
        cfg: RiskConfig,
        instrument: InstrumentSpec,
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        validate_instrument(&instrument)?;
        let sizer = Sizer::new(&cfg, instrument);
        Ok(Self {
            pair: pair.into(),
            cfg,
            instrument,
            state: EngineState::Running,
            position: Position::default(),
            protection: None,
            sizer,
            pending: HashMap::new(),
            lifetime_pnl: 0.0,
        })
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn protection(&self) -> Option<&ProtectionState> {
        self.protection.as_ref()
    }

    pub fn sizing(&self) -> &SizingState {
        self.sizer.state()
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.len()
    }

    pub fn entry_in_flight(&self) -> bool {
        self.pending.values().any(|p| p.intent.is_entry())
    }

    pub fn close_in_flight(&self) -> bool {
        self.pending.values().any(|p| p.intent.is_full_close())
    }

    /// Process one finished bar and the signal computed for it.
    pub fn on_bar(&mut self, bar: &Bar, signal: Signal) -> Step {
        let mut step = Step::default();

        if self.state == EngineState::Halted {
            if signal.entry_side().is_some() {
                self.skip_entry(signal, SkipReason::Halted, &mut step);
            }
            return step;
        }

        if self.check_drawdown(bar, &mut step) {
            return step;
        }

        let mut exited = false;
        if let Some(side) = self.position.side.as_side() {
            if !self.close_in_flight() {
                exited = self.evaluate_exits(side, bar, signal, &mut step);
            }
        }

        if let Some(entry_side) = signal.entry_side() {
            self.evaluate_entry(entry_side, signal, exited, &mut step);
        }
        step
    }

    /// Apply an execution report for an order this engine emitted.
    ///
    /// Returns `Err` only when the drawdown breaker's close failed; the engine
    /// is halted at that point and ignores further bars.
    pub fn on_report(&mut self, report: ExecutionReport) -> Result<Step, EngineError> {
        let Some(pending) = self.pending.remove(report.order_id()) else {
            if !matches!(report, ExecutionReport::Accepted { .. }) {
                warn!(pair = %self.pair, order_id = %report.order_id(), "Report for unknown order ignored");
            }
            return Ok(Step::default());
        };

        match report {
            ExecutionReport::Filled(fill) => Ok(self.on_fill(pending, fill)),
            ExecutionReport::Accepted { order_id } => {
                // Trading intents stay in flight until filled or failed.
                self.pending.insert(order_id, pending);
                Ok(Step::default())
            }
            ExecutionReport::Failed { order_id, error } => self.on_failure(pending, order_id, error),
        }
    }

    // ── Bar evaluation ───────────────────────────────────────────────────────

    /// Forced flatten when the floating loss at the bar's adverse extreme
    /// reaches the configured share of equity.
    fn check_drawdown(&mut self, bar: &Bar, step: &mut Step) -> bool {
        let Some(limit) = self.sizer.drawdown_limit() else {
            return false;
        };
        let (Some(side), Some(entry)) = (self.position.side.as_side(), self.position.entry_price)
        else {
            return false;
        };
        if self.close_in_flight() {
            return false;
        }

        let floating_loss = (entry - bar.adverse_extreme(side)) * side.sign() * self.position.volume;
        if floating_loss < limit {
            return false;
        }

        let volume = self.closable_volume();
        if volume <= 0.0 {
            // Partial exits already in flight cover the whole position.
            debug!(pair = %self.pair, floating_loss, limit, "Drawdown breached while fully committed to partial exits");
            return true;
        }

        warn!(
            pair = %self.pair,
            floating_loss = floating_loss,
            limit = limit,
            "Max drawdown breached — forcing flatten"
        );
        step.events.push(EngineEvent::DrawdownBreached {
            pair: self.pair.clone(),
            floating_loss,
            limit,
        });
        self.sizer.force_reset();
        self.emit(OrderIntent::Close { side, volume }, OrderReason::DrawdownBreaker, None, step);
        true
    }

    /// Exit rules in priority order. Returns true when a full close was emitted.
    fn evaluate_exits(&mut self, side: Side, bar: &Bar, signal: Signal, step: &mut Step) -> bool {
        let Some(mut protection) = self.protection.take() else {
            // Entry price not confirmed yet: only the signal can close.
            if signal.exits(side) {
                return self.close_all(side, OrderReason::SignalExit, None, step);
            }
            return false;
        };

        let exited = self.evaluate_protected_exits(&mut protection, side, bar, signal, step);
        self.protection = Some(protection);
        exited
    }

    fn evaluate_protected_exits(
        &mut self,
        protection: &mut ProtectionState,
        side: Side,
        bar: &Bar,
        signal: Signal,
        step: &mut Step,
    ) -> bool {
        if let Some(exit) = protection.check_exit(bar) {
            info!(pair = %self.pair, reason = %exit.reason, price = exit.price, "Protective exit triggered");
            step.events.push(EngineEvent::ExitTriggered {
                pair: self.pair.clone(),
                reason: exit.reason,
                price: exit.price,
            });
            return self.close_all(side, exit.reason, Some(exit.price), step);
        }

        let mut available = self.available_volume();
        for stage in protection.due_stages(bar, &self.cfg) {
            let volume = self.instrument.floor_volume(available * stage.fraction).min(available);
            if volume <= 0.0 || volume + VOLUME_EPSILON < self.instrument.min_volume {
                debug!(pair = %self.pair, stage = stage.stage, "Stage exit rounds below minimum volume — consumed");
                continue;
            }
            info!(pair = %self.pair, stage = stage.stage, volume = volume, "Staged partial exit");
            step.events.push(EngineEvent::StageFired {
                pair: self.pair.clone(),
                stage: stage.stage,
                volume,
            });
            self.emit(
                OrderIntent::PartialClose { side, volume },
                OrderReason::Stage(stage.stage),
                None,
                step,
            );
            available -= volume;
        }

        if signal.exits(side) && available > VOLUME_EPSILON {
            info!(pair = %self.pair, "Signal exit");
            if self.close_all(side, OrderReason::SignalExit, None, step) {
                return true;
            }
        }

        if let Some(level) = protection.update_trailing(bar, &self.cfg, &self.instrument) {
            info!(pair = %self.pair, trailing_stop = level, "Trailing stop adopted");
            step.events.push(EngineEvent::TrailingAdopted {
                pair: self.pair.clone(),
                price: level,
            });
            self.emit(
                OrderIntent::ModifyProtection {
                    stop_price: protection.effective_stop(),
                    take_price: protection.take_price(),
                },
                OrderReason::ProtectionUpdate,
                None,
                step,
            );
        }
        false
    }

    fn evaluate_entry(&mut self, entry_side: Side, signal: Signal, exited: bool, step: &mut Step) {
        if self.entry_in_flight() {
            self.skip_entry(signal, SkipReason::EntryInFlight, step);
            return;
        }

        let current = if exited { None } else { self.position.side.as_side() };
        match current {
            None => {
                let Some(volume) = self.sizer.next_volume() else {
                    self.skip_entry(signal, SkipReason::ZeroVolume, step);
                    return;
                };
                self.emit(
                    OrderIntent::Open { side: entry_side, volume },
                    OrderReason::SignalEntry,
                    None,
                    step,
                );
            }
            Some(side) if side == entry_side => {
                debug!(pair = %self.pair, side = %side, "Already positioned — entry signal ignored");
            }
            Some(side) if self.close_in_flight() => {
                debug!(pair = %self.pair, side = %side, "Opposite position still closing");
                self.skip_entry(signal, SkipReason::CloseInFlight, step);
            }
            Some(side) => self.reverse(side, entry_side, signal, step),
        }
    }

    /// Flip from `side` to `entry_side` on one signal.
    fn reverse(&mut self, side: Side, entry_side: Side, signal: Signal, step: &mut Step) {
        let base = self.sizer.next_volume();
        let opposite = self.available_volume();

        // A net flip larger than the instrument allows is split into Close + Open.
        let over_max = match (base, self.instrument.max_volume) {
            (Some(base), Some(max)) => base + opposite > max + VOLUME_EPSILON,
            _ => false,
        };
        let mode = match self.cfg.reversal_mode {
            ReversalMode::NetOpen if over_max => {
                debug!(pair = %self.pair, opposite, "Net reversal exceeds max volume, closing first");
                ReversalMode::CloseThenOpen
            }
            mode => mode,
        };

        match mode {
            ReversalMode::CloseThenOpen => {
                let close_volume = self.closable_volume();
                if close_volume > 0.0 {
                    self.emit(
                        OrderIntent::Close { side, volume: close_volume },
                        OrderReason::Reversal,
                        None,
                        step,
                    );
                }
                let Some(base) = base else {
                    self.skip_entry(signal, SkipReason::ZeroVolume, step);
                    return;
                };
                let residual = (opposite - close_volume).max(0.0);
                let volume = self.instrument.normalize_volume(base + residual);
                self.emit(
                    OrderIntent::Open { side: entry_side, volume },
                    OrderReason::Reversal,
                    None,
                    step,
                );
            }
            ReversalMode::NetOpen => {
                let Some(base) = base else {
                    self.skip_entry(signal, SkipReason::ZeroVolume, step);
                    return;
                };
                let volume = self.instrument.normalize_volume(base + opposite);
                self.emit(
                    OrderIntent::Open { side: entry_side, volume },
                    OrderReason::Reversal,
                    None,
                    step,
                );
            }
        }
        info!(pair = %self.pair, from = %side, to = %entry_side, "Position reversal requested");
    }

    fn close_all(&mut self, side: Side, reason: OrderReason, price: Option<f64>, step: &mut Step) -> bool {
        let volume = self.closable_volume();
        if volume <= 0.0 {
            return false;
        }
        self.emit(OrderIntent::Close { side, volume }, reason, price, step);
        true
    }

    /// Position volume not already committed to in-flight partial exits.
    fn available_volume(&self) -> f64 {
        let committed: f64 = self
            .pending
            .values()
            .filter_map(|p| match p.intent {
                OrderIntent::PartialClose { volume, .. } => Some(volume),
                _ => None,
            })
            .sum();
        (self.position.volume - committed).max(0.0)
    }

    /// Available volume rounded down to the lot size.
    fn closable_volume(&self) -> f64 {
        self.instrument.floor_volume(self.available_volume())
    }

    fn emit(&mut self, intent: OrderIntent, reason: OrderReason, price: Option<f64>, step: &mut Step) {
        let mut order = Order::new(self.pair.clone(), intent, reason);
        if let Some(price) = price {
            order = order.at_price(price);
        }
        if !matches!(intent, OrderIntent::ModifyProtection { .. }) {
            self.pending.insert(order.id.clone(), Pending { intent, reason });
        }
        debug!(pair = %self.pair, order_id = %order.id, intent = ?intent, reason = %reason, "Order intent emitted");
        step.orders.push(order);
    }

    fn skip_entry(&self, signal: Signal, reason: SkipReason, step: &mut Step) {
        info!(pair = %self.pair, signal = ?signal, reason = %reason, "Entry skipped");
        step.events.push(EngineEvent::EntrySkipped {
            pair: self.pair.clone(),
            signal,
            reason,
        });
    }

    // ── Execution reports ────────────────────────────────────────────────────

    fn on_fill(&mut self, pending: Pending, fill: TradeEvent) -> Step {
        let mut step = Step::default();
        let outcome = self
            .position
            .apply_fill(fill.side, fill.filled_volume, fill.fill_price);

        info!(
            pair = %self.pair,
            reason = %pending.reason,
            side = %fill.side,
            volume = fill.filled_volume,
            price = fill.fill_price,
            position = %self.position.side,
            position_volume = self.position.volume,
            "Fill applied"
        );

        if outcome.reduced > 0.0 {
            self.lifetime_pnl += fill.realized_pnl;
        }
        if outcome.closed {
            let pnl = std::mem::take(&mut self.lifetime_pnl);
            info!(pair = %self.pair, pnl = pnl, reason = %pending.reason, "Position closed");
            if pending.reason == OrderReason::DrawdownBreaker {
                self.sizer.on_forced_close(pnl);
            } else {
                self.sizer.on_trade_closed(pnl);
            }
            self.protection = None;
        }

        self.init_protection(&mut step);
        step
    }

    /// Compute protective levels once the entry price of an open position is known.
    fn init_protection(&mut self, step: &mut Step) {
        if self.protection.is_some() {
            return;
        }
        let Some(side) = self.position.side.as_side() else {
            return;
        };
        let Some(entry) = self.position.entry_price else {
            warn!(pair = %self.pair, "Fill without price — protective levels deferred");
            return;
        };

        let protection = ProtectionState::new(side, entry, &self.cfg, &self.instrument);
        let stop_price = protection.stop_price();
        let take_price = protection.take_price();
        self.protection = Some(protection);

        if stop_price.is_some() || take_price.is_some() {
            self.emit(
                OrderIntent::ModifyProtection {
                    stop_price,
                    take_price,
                },
                OrderReason::ProtectionUpdate,
                None,
                step,
            );
        }
    }

    fn on_failure(
        &mut self,
        pending: Pending,
        order_id: String,
        error: String,
    ) -> Result<Step, EngineError> {
        let mut step = Step::default();

        if pending.reason == OrderReason::DrawdownBreaker {
            error!(
                pair = %self.pair,
                order_id = %order_id,
                error = %error,
                "Forced exit failed — engine halted"
            );
            self.state = EngineState::Halted;
            return Err(EngineError::ForcedExitFailed {
                pair: self.pair.clone(),
                error,
            });
        }

        warn!(pair = %self.pair, order_id = %order_id, reason = %pending.reason, error = %error, "Order failed");
        if let (OrderReason::Stage(stage), Some(protection)) = (pending.reason, self.protection.as_mut()) {
            protection.rearm_stage(stage);
        }
        step.events.push(EngineEvent::OrderFailed {
            pair: self.pair.clone(),
            order_id,
            error,
        });
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{OrderSide, PositionSide};
    use risk::ExitStage;

    fn instrument() -> InstrumentSpec {
        InstrumentSpec {
            price_step: 0.01,
            volume_step: 0.01,
            min_volume: 0.01,
            max_volume: None,
        }
    }

    fn bar(i: i64, high: f64, low: f64) -> Bar {
        Bar {
            open_time: Utc.timestamp_opt(0, 0).unwrap() + Duration::minutes(i),
            open: low,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
        }
    }

    fn fill(order: &Order, price: f64, pnl: f64) -> ExecutionReport {
        ExecutionReport::Filled(TradeEvent {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side: order.intent.order_side().unwrap(),
            filled_volume: order.intent.volume(),
            fill_price: price,
            realized_pnl: pnl,
            timestamp: Utc::now(),
        })
    }

    fn open_long(engine: &mut PositionEngine, price: f64) {
        let step = engine.on_bar(&bar(0, price, price), Signal::EnterLong);
        let order = step.orders[0].clone();
        engine.on_report(fill(&order, price, 0.0)).unwrap();
    }

    #[test]
    fn entry_waits_for_confirmation() {
        let mut engine = PositionEngine::new("BTCUSDT", RiskConfig::default(), instrument()).unwrap();
        let step = engine.on_bar(&bar(0, 100.0, 99.0), Signal::EnterLong);
        assert_eq!(step.orders.len(), 1);
        assert!(engine.entry_in_flight());

        let again = engine.on_bar(&bar(1, 100.0, 99.0), Signal::EnterLong);
        assert!(again.orders.is_empty());
        assert!(matches!(
            again.events[0],
            EngineEvent::EntrySkipped { reason: SkipReason::EntryInFlight, .. }
        ));
    }

    #[test]
    fn failed_entry_clears_in_flight_flag() {
        let mut engine = PositionEngine::new("BTCUSDT", RiskConfig::default(), instrument()).unwrap();
        let step = engine.on_bar(&bar(0, 100.0, 99.0), Signal::EnterShort);
        let failed = ExecutionReport::Failed {
            order_id: step.orders[0].id.clone(),
            error: "rejected".into(),
        };
        let after = engine.on_report(failed).unwrap();
        assert!(matches!(after.events[0], EngineEvent::OrderFailed { .. }));
        assert!(!engine.entry_in_flight());
        assert!(engine.position().is_flat());

        let retry = engine.on_bar(&bar(1, 100.0, 99.0), Signal::EnterShort);
        assert_eq!(retry.orders.len(), 1);
    }

    #[test]
    fn fill_without_price_defers_protection() {
        let cfg = RiskConfig {
            stop_distance: 5.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        let step = engine.on_bar(&bar(0, 100.0, 99.0), Signal::EnterLong);
        let after = engine.on_report(fill(&step.orders[0], 0.0, 0.0)).unwrap();
        assert!(after.orders.is_empty());
        assert!(engine.protection().is_none());

        // A price-less position never triggers protective exits.
        let quiet = engine.on_bar(&bar(1, 100.0, 1.0), Signal::None);
        assert!(quiet.orders.is_empty());
    }

    #[test]
    fn confirmed_entry_publishes_protection() {
        let cfg = RiskConfig {
            stop_distance: 5.0,
            take_distance: 8.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        let step = engine.on_bar(&bar(0, 100.0, 99.0), Signal::EnterLong);
        let after = engine.on_report(fill(&step.orders[0], 100.0, 0.0)).unwrap();
        assert_eq!(
            after.orders[0].intent,
            OrderIntent::ModifyProtection {
                stop_price: Some(95.0),
                take_price: Some(108.0)
            }
        );
        assert_eq!(engine.pending_orders(), 0);
    }

    #[test]
    fn signal_exit_closes_whole_position() {
        let mut engine = PositionEngine::new("BTCUSDT", RiskConfig::default(), instrument()).unwrap();
        open_long(&mut engine, 100.0);
        let step = engine.on_bar(&bar(1, 101.0, 99.5), Signal::ExitLong);
        assert_eq!(step.orders[0].intent, OrderIntent::Close { side: Side::Long, volume: 1.0 });
        assert_eq!(step.orders[0].reason, OrderReason::SignalExit);

        // Nothing else is emitted while the close is unconfirmed.
        let next = engine.on_bar(&bar(2, 101.0, 99.5), Signal::ExitLong);
        assert!(next.orders.is_empty());
    }

    #[test]
    fn exit_and_entry_in_same_bar() {
        let cfg = RiskConfig {
            stop_distance: 2.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);
        let step = engine.on_bar(&bar(1, 100.0, 97.0), Signal::EnterShort);
        assert_eq!(step.orders.len(), 2);
        assert_eq!(step.orders[0].reason, OrderReason::StopLoss);
        assert_eq!(step.orders[0].price, Some(98.0));
        assert_eq!(step.orders[1].intent, OrderIntent::Open { side: Side::Short, volume: 1.0 });
    }

    #[test]
    fn same_side_entry_is_ignored() {
        let mut engine = PositionEngine::new("BTCUSDT", RiskConfig::default(), instrument()).unwrap();
        open_long(&mut engine, 100.0);
        let step = engine.on_bar(&bar(1, 101.0, 99.0), Signal::EnterLong);
        assert!(step.is_empty());
    }

    #[test]
    fn partial_exits_use_remaining_volume() {
        let cfg = RiskConfig {
            base_volume: 4.0,
            stages: vec![
                ExitStage { threshold: 2.0, fraction: 0.5 },
                ExitStage { threshold: 4.0, fraction: 0.5 },
            ],
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);

        let step = engine.on_bar(&bar(1, 105.0, 100.0), Signal::None);
        let volumes: Vec<f64> = step.orders.iter().map(|o| o.intent.volume()).collect();
        assert_eq!(volumes, vec![2.0, 1.0]);
        assert!(step
            .orders
            .iter()
            .all(|o| matches!(o.intent, OrderIntent::PartialClose { .. })));

        for order in &step.orders {
            engine.on_report(fill(order, 105.0, 5.0 * order.intent.volume())).unwrap();
        }
        assert_eq!(engine.position().volume, 1.0);
        assert_eq!(engine.position().side, PositionSide::Long);

        // Thresholds revisited: no second firing.
        let again = engine.on_bar(&bar(2, 106.0, 101.0), Signal::None);
        assert!(again.orders.is_empty());
    }

    #[test]
    fn failed_stage_is_rearmed() {
        let cfg = RiskConfig {
            base_volume: 2.0,
            stages: vec![ExitStage { threshold: 2.0, fraction: 0.5 }],
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);
        let step = engine.on_bar(&bar(1, 103.0, 100.0), Signal::None);
        engine
            .on_report(ExecutionReport::Failed {
                order_id: step.orders[0].id.clone(),
                error: "timeout".into(),
            })
            .unwrap();
        let retry = engine.on_bar(&bar(2, 103.0, 100.0), Signal::None);
        assert_eq!(retry.orders.len(), 1);
        assert_eq!(retry.orders[0].reason, OrderReason::Stage(0));
    }

    #[test]
    fn drawdown_breaker_closes_before_entries() {
        let cfg = RiskConfig {
            base_volume: 10.0,
            max_drawdown_percent: 5.0,
            initial_equity: 1_000.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);

        // Loss at low 94 = 6 * 10 = 60 >= 50.
        let step = engine.on_bar(&bar(1, 100.0, 94.0), Signal::EnterShort);
        assert_eq!(step.orders.len(), 1);
        assert_eq!(step.orders[0].reason, OrderReason::DrawdownBreaker);
        assert!(step.orders[0].intent.is_full_close());
        assert!(matches!(step.events[0], EngineEvent::DrawdownBreached { .. }));
    }

    #[test]
    fn forced_close_fill_keeps_base_volume() {
        let cfg = RiskConfig {
            base_volume: 1.0,
            martingale_multiplier: 2.0,
            max_drawdown_percent: 5.0,
            initial_equity: 100.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);

        let step = engine.on_bar(&bar(1, 100.0, 90.0), Signal::None);
        assert_eq!(step.orders[0].reason, OrderReason::DrawdownBreaker);
        engine.on_report(fill(&step.orders[0], 90.0, -10.0)).unwrap();

        assert!(engine.position().is_flat());
        assert_eq!(engine.sizing().equity, 90.0);
        assert_eq!(engine.sizing().current_volume, 1.0);
        assert_eq!(engine.sizing().consecutive_losses, 0);

        let next = engine.on_bar(&bar(2, 91.0, 90.0), Signal::EnterLong);
        assert_eq!(next.orders[0].intent, OrderIntent::Open { side: Side::Long, volume: 1.0 });
    }

    #[test]
    fn breach_with_only_partials_in_flight_is_quiet() {
        let cfg = RiskConfig {
            base_volume: 1.0,
            stages: vec![ExitStage { threshold: 1.0, fraction: 1.0 }],
            max_drawdown_percent: 5.0,
            initial_equity: 100.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);

        let stage = engine.on_bar(&bar(1, 102.0, 100.0), Signal::None);
        assert_eq!(stage.orders[0].intent, OrderIntent::PartialClose { side: Side::Long, volume: 1.0 });

        // Loss at low 90 = 10 >= 5, but nothing is left to close.
        for i in 2..4 {
            let step = engine.on_bar(&bar(i, 100.0, 90.0), Signal::EnterShort);
            assert!(step.is_empty(), "{step:?}");
        }
        assert_eq!(engine.sizing().current_volume, 1.0);

        engine.on_report(fill(&stage.orders[0], 95.0, -5.0)).unwrap();
        assert!(engine.position().is_flat());
    }

    #[test]
    fn net_reversal_over_max_volume_is_split() {
        let cfg = RiskConfig {
            base_volume: 3.0,
            reversal_mode: ReversalMode::NetOpen,
            ..RiskConfig::default()
        };
        let spec = InstrumentSpec {
            max_volume: Some(3.0),
            ..instrument()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, spec).unwrap();
        let entry = engine.on_bar(&bar(0, 100.0, 100.0), Signal::EnterShort);
        engine.on_report(fill(&entry.orders[0], 100.0, 0.0)).unwrap();
        assert_eq!(engine.position().volume, 3.0);

        let step = engine.on_bar(&bar(1, 100.0, 99.0), Signal::EnterLong);
        let intents: Vec<OrderIntent> = step.orders.iter().map(|o| o.intent).collect();
        assert_eq!(
            intents,
            vec![
                OrderIntent::Close { side: Side::Short, volume: 3.0 },
                OrderIntent::Open { side: Side::Long, volume: 3.0 },
            ]
        );
        assert!(step.orders.iter().all(|o| o.intent.volume() <= 3.0));
    }

    #[test]
    fn failed_forced_exit_halts_engine() {
        let cfg = RiskConfig {
            max_drawdown_percent: 1.0,
            initial_equity: 100.0,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        open_long(&mut engine, 100.0);
        let step = engine.on_bar(&bar(1, 100.0, 90.0), Signal::None);
        let err = engine
            .on_report(ExecutionReport::Failed {
                order_id: step.orders[0].id.clone(),
                error: "venue down".into(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ForcedExitFailed { .. }));
        assert_eq!(engine.state(), EngineState::Halted);

        let ignored = engine.on_bar(&bar(2, 100.0, 50.0), Signal::EnterShort);
        assert!(ignored.orders.is_empty());
    }

    #[test]
    fn zero_volume_entry_is_skipped() {
        let cfg = RiskConfig {
            base_volume: 0.001,
            ..RiskConfig::default()
        };
        let mut engine = PositionEngine::new("BTCUSDT", cfg, instrument()).unwrap();
        let step = engine.on_bar(&bar(0, 100.0, 99.0), Signal::EnterLong);
        assert!(step.orders.is_empty());
        assert!(matches!(
            step.events[0],
            EngineEvent::EntrySkipped { reason: SkipReason::ZeroVolume, .. }
        ));
    }

    #[test]
    fn invalid_config_rejected_at_startup() {
        let cfg = RiskConfig {
            trail_distance: 3.0,
            trail_step: 0.0,
            ..RiskConfig::default()
        };
        assert!(matches!(
            PositionEngine::new("BTCUSDT", cfg, instrument()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn unknown_report_is_ignored() {
        let mut engine = PositionEngine::new("BTCUSDT", RiskConfig::default(), instrument()).unwrap();
        let step = engine
            .on_report(ExecutionReport::Filled(TradeEvent {
                order_id: "nope".into(),
                pair: "BTCUSDT".into(),
                side: OrderSide::Buy,
                filled_volume: 1.0,
                fill_price: 100.0,
                realized_pnl: 0.0,
                timestamp: Utc::now(),
            }))
            .unwrap();
        assert!(step.is_empty());
        assert!(engine.position().is_flat());
    }
}
