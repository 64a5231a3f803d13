use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::InstrumentSpec;

/// Maximum number of staged exits; one bit each in `StageFlags`.
pub const MAX_STAGES: usize = 64;

/// One staged partial exit: close `fraction` of the remaining volume once the
/// favorable excursion from entry reaches `threshold` (price distance).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitStage {
    pub threshold: f64,
    pub fraction: f64,
}

/// How a winning trade affects martingale volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Reset to base volume only when equity makes a new peak; other wins
    /// keep applying the multiplier.
    #[default]
    OnNewEquityPeak,
    /// Reset to base volume on every trade with pnl >= 0.
    OnAnyWin,
}

/// How an entry signal against an open position is turned into intents.
///
/// The default emits two orders. A host that expects a single netting Open
/// (Short 2 flipped by one Open of 3 into Long 1) must select `NetOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalMode {
    /// Full `Close` of the opposite position, then an `Open` sized base plus
    /// whatever residual the rounded close leaves behind.
    #[default]
    CloseThenOpen,
    /// A single `Open` sized base plus the whole opposite volume. Falls back
    /// to `CloseThenOpen` when that Open would exceed the instrument's
    /// maximum volume.
    NetOpen,
}

/// Per-instrument risk and money-management parameters.
///
/// Distances are absolute price distances. A distance of 0 disables the
/// corresponding level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub base_volume: f64,
    #[serde(default)]
    pub stop_distance: f64,
    #[serde(default)]
    pub take_distance: f64,
    #[serde(default)]
    pub trail_distance: f64,
    #[serde(default)]
    pub trail_step: f64,
    /// Ascending by threshold.
    #[serde(default)]
    pub stages: Vec<ExitStage>,
    /// Applied to the current volume after a loss. 1.0 disables martingale.
    #[serde(default = "default_multiplier")]
    pub martingale_multiplier: f64,
    /// Floating loss, as a percent of equity, that forces a flatten. 0 disables.
    #[serde(default)]
    pub max_drawdown_percent: f64,
    #[serde(default)]
    pub reset_policy: ResetPolicy,
    #[serde(default)]
    pub reversal_mode: ReversalMode,
    #[serde(default = "default_equity")]
    pub initial_equity: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_equity() -> f64 {
    10_000.0
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_volume: 1.0,
            stop_distance: 0.0,
            take_distance: 0.0,
            trail_distance: 0.0,
            trail_step: 0.0,
            stages: Vec::new(),
            martingale_multiplier: default_multiplier(),
            max_drawdown_percent: 0.0,
            reset_policy: ResetPolicy::default(),
            reversal_mode: ReversalMode::default(),
            initial_equity: default_equity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("base_volume must be > 0, got {0}")]
    BaseVolume(f64),

    #[error("{field} must be a finite value >= 0, got {value}")]
    NegativeDistance { field: &'static str, value: f64 },

    #[error("trail_step must be > 0 when trailing is enabled, got {0}")]
    TrailStep(f64),

    #[error("stage {index}: fraction must be in (0, 1], got {fraction}")]
    StageFraction { index: usize, fraction: f64 },

    #[error("stage {index}: threshold must be > 0, got {threshold}")]
    StageThreshold { index: usize, threshold: f64 },

    #[error("stage {index}: thresholds must be strictly ascending")]
    StagesNotAscending { index: usize },

    #[error("at most {MAX_STAGES} stages are supported, got {0}")]
    TooManyStages(usize),

    #[error("martingale_multiplier must be > 0, got {0}")]
    Multiplier(f64),

    #[error("max_drawdown_percent must be in [0, 100), got {0}")]
    DrawdownPercent(f64),

    #[error("initial_equity must be > 0, got {0}")]
    InitialEquity(f64),

    #[error("instrument: {0}")]
    Instrument(String),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::Config(err.to_string())
    }
}

impl RiskConfig {
    pub fn trailing_enabled(&self) -> bool {
        self.trail_distance > 0.0
    }

    /// Reject configurations that cannot be run. Called before the first bar.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_volume > 0.0 && self.base_volume.is_finite()) {
            return Err(ConfigError::BaseVolume(self.base_volume));
        }

        for (field, value) in [
            ("stop_distance", self.stop_distance),
            ("take_distance", self.take_distance),
            ("trail_distance", self.trail_distance),
            ("trail_step", self.trail_step),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::NegativeDistance { field, value });
            }
        }

        if self.trailing_enabled() && self.trail_step <= 0.0 {
            return Err(ConfigError::TrailStep(self.trail_step));
        }

        if self.stages.len() > MAX_STAGES {
            return Err(ConfigError::TooManyStages(self.stages.len()));
        }
        let mut previous: Option<f64> = None;
        for (index, stage) in self.stages.iter().enumerate() {
            if !(stage.threshold > 0.0 && stage.threshold.is_finite()) {
                return Err(ConfigError::StageThreshold {
                    index,
                    threshold: stage.threshold,
                });
            }
            if !(stage.fraction > 0.0 && stage.fraction <= 1.0) {
                return Err(ConfigError::StageFraction {
                    index,
                    fraction: stage.fraction,
                });
            }
            if previous.is_some_and(|p| stage.threshold <= p) {
                return Err(ConfigError::StagesNotAscending { index });
            }
            previous = Some(stage.threshold);
        }

        if !(self.martingale_multiplier > 0.0 && self.martingale_multiplier.is_finite()) {
            return Err(ConfigError::Multiplier(self.martingale_multiplier));
        }
        if !(0.0..100.0).contains(&self.max_drawdown_percent) {
            return Err(ConfigError::DrawdownPercent(self.max_drawdown_percent));
        }
        if !(self.initial_equity > 0.0 && self.initial_equity.is_finite()) {
            return Err(ConfigError::InitialEquity(self.initial_equity));
        }
        Ok(())
    }
}

/// Reject instrument granularity that would make rounding meaningless.
pub fn validate_instrument(spec: &InstrumentSpec) -> Result<(), ConfigError> {
    if !(spec.price_step > 0.0) {
        return Err(ConfigError::Instrument(format!(
            "price_step must be > 0, got {}",
            spec.price_step
        )));
    }
    if !(spec.volume_step > 0.0) {
        return Err(ConfigError::Instrument(format!(
            "volume_step must be > 0, got {}",
            spec.volume_step
        )));
    }
    if spec.min_volume < 0.0 {
        return Err(ConfigError::Instrument(format!(
            "min_volume must be >= 0, got {}",
            spec.min_volume
        )));
    }
    if let Some(max) = spec.max_volume {
        if max < spec.min_volume {
            return Err(ConfigError::Instrument(format!(
                "max_volume {max} is below min_volume {}",
                spec.min_volume
            )));
        }
    }
    Ok(())
}
