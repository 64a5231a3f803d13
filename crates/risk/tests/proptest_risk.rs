use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{Bar, InstrumentSpec, Side};
use risk::{ExitStage, ProtectionState, ResetPolicy, RiskConfig, Sizer};

fn bar(high: f64, low: f64) -> Bar {
    Bar {
        open_time: Utc.timestamp_opt(0, 0).unwrap(),
        open: low,
        high,
        low,
        close: low,
        volume: 1.0,
    }
}

fn instrument(max_volume: Option<f64>) -> InstrumentSpec {
    InstrumentSpec {
        price_step: 0.01,
        volume_step: 0.01,
        min_volume: 0.01,
        max_volume,
    }
}

fn trailing_config(distance: f64, step: f64) -> RiskConfig {
    RiskConfig {
        trail_distance: distance,
        trail_step: step,
        stages: vec![
            ExitStage { threshold: 2.0, fraction: 0.25 },
            ExitStage { threshold: 5.0, fraction: 0.5 },
            ExitStage { threshold: 9.0, fraction: 1.0 },
        ],
        ..RiskConfig::default()
    }
}

proptest! {
    /// Adopted trailing stops never move against a Long position.
    #[test]
    fn long_trailing_stop_is_non_decreasing(
        distance in 0.5f64..20.0,
        step in 0.01f64..5.0,
        moves in prop::collection::vec((-10.0f64..10.0, 0.0f64..5.0), 1..60),
    ) {
        let cfg = trailing_config(distance, step);
        let spec = instrument(None);
        let mut state = ProtectionState::new(Side::Long, 100.0, &cfg, &spec);
        let mut price = 100.0;
        let mut last: Option<f64> = None;
        for (drift, range) in moves {
            price = (price + drift).max(1.0);
            state.update_trailing(&bar(price + range, price), &cfg, &spec);
            let current = state.trailing_stop_price();
            if let (Some(prev), Some(now)) = (last, current) {
                prop_assert!(now >= prev, "trailing moved down: {prev} -> {now}");
            }
            if last.is_some() {
                prop_assert!(current.is_some(), "trailing stop was unset");
            }
            last = current;
        }
    }

    /// Adopted trailing stops never move against a Short position.
    #[test]
    fn short_trailing_stop_is_non_increasing(
        distance in 0.5f64..20.0,
        step in 0.01f64..5.0,
        moves in prop::collection::vec((-10.0f64..10.0, 0.0f64..5.0), 1..60),
    ) {
        let cfg = trailing_config(distance, step);
        let spec = instrument(None);
        let mut state = ProtectionState::new(Side::Short, 100.0, &cfg, &spec);
        let mut price = 100.0;
        let mut last: Option<f64> = None;
        for (drift, range) in moves {
            price = (price + drift).max(1.0);
            state.update_trailing(&bar(price, (price - range).max(0.5)), &cfg, &spec);
            let current = state.trailing_stop_price();
            if let (Some(prev), Some(now)) = (last, current) {
                prop_assert!(now <= prev, "trailing moved up: {prev} -> {now}");
            }
            last = current;
        }
    }

    /// However often a bar revisits a threshold, each stage fires once.
    #[test]
    fn each_stage_fires_at_most_once(
        highs in prop::collection::vec(95.0f64..115.0, 1..80),
    ) {
        let cfg = trailing_config(1.0, 1.0);
        let spec = instrument(None);
        let mut state = ProtectionState::new(Side::Long, 100.0, &cfg, &spec);
        let mut fired = vec![0u32; cfg.stages.len()];
        for high in highs {
            for exit in state.due_stages(&bar(high, 94.0), &cfg) {
                fired[exit.stage] += 1;
            }
        }
        prop_assert!(fired.iter().all(|&n| n <= 1), "stage fired twice: {fired:?}");
    }

    /// Martingale escalation never exceeds the instrument maximum.
    #[test]
    fn martingale_volume_respects_max(
        multiplier in 1.0f64..5.0,
        max_volume in 0.5f64..50.0,
        outcomes in prop::collection::vec(-100.0f64..100.0, 0..100),
        on_any_win in any::<bool>(),
    ) {
        let cfg = RiskConfig {
            base_volume: 0.5,
            martingale_multiplier: multiplier,
            reset_policy: if on_any_win { ResetPolicy::OnAnyWin } else { ResetPolicy::OnNewEquityPeak },
            ..RiskConfig::default()
        };
        let mut sizer = Sizer::new(&cfg, instrument(Some(max_volume)));
        for pnl in outcomes {
            sizer.on_trade_closed(pnl);
            prop_assert!(sizer.state().current_volume <= max_volume + 1e-9);
            if let Some(v) = sizer.next_volume() {
                prop_assert!(v <= max_volume + 1e-9);
                prop_assert!(v > 0.0);
            }
        }
    }
}
