use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use common::{Error, InstrumentSpec, Result};
use risk::{validate_instrument, RiskConfig};

/// Top-level engine config file (TOML), one table per traded pair.
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// name = "BTC martingale"
/// pair = "BTCUSDT"
///
/// [strategy.instrument]
/// price_step = 0.01
/// volume_step = 0.001
/// min_volume = 0.001
/// max_volume = 5.0
///
/// [strategy.risk]
/// base_volume = 0.01
/// stop_distance = 150.0
/// trail_distance = 100.0
/// trail_step = 20.0
/// martingale_multiplier = 2.0
/// max_drawdown_percent = 5.0
/// stages = [{ threshold = 50.0, fraction = 0.5 }]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs.
    pub name: String,
    /// Trading pair, e.g. "BTCUSDT".
    pub pair: String,
    #[serde(default)]
    pub instrument: InstrumentSpec,
    pub risk: RiskConfig,
}

impl StrategyFileConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read '{path}': {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Every pair appears once and every table passes risk validation.
    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(Error::Config("no [[strategy]] tables".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.strategies {
            if !seen.insert(s.pair.as_str()) {
                return Err(Error::Config(format!("pair '{}' configured twice", s.pair)));
            }
            s.risk
                .validate()
                .and_then(|_| validate_instrument(&s.instrument))
                .map_err(|e| Error::Config(format!("{} ({}): {e}", s.name, s.pair)))?;
        }
        Ok(())
    }
}
